use std::convert::Infallible;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::http::header;
use actix_web::{get, post, put, web, HttpResponse, Responder};
use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use kn_gen_core::config::validate_temperature;
use kn_gen_core::io::list_files;
use kn_gen_core::{GenerationDefaults, KnError, KneserNeyModel, ModelHandle, Token, Tokenizer};

/// State shared by every worker.
pub struct AppState {
	pub models: ModelHandle,
	pub tokenizer: Box<dyn Tokenizer>,
	/// Directory holding the model files served by `/v1/models` and `/v1/reload`.
	pub data_dir: PathBuf,
	/// Name of the tokenizer file, hidden from the model listing when it lives in `data_dir`.
	pub tokenizer_name: String,
	pub defaults: GenerationDefaults,
}

/// Body of `POST /generate`.
#[derive(Deserialize)]
struct GenerateRequest {
	prefix: String,
	max_length: Option<usize>,
	temperature: Option<f64>,
	seed: Option<u64>,
}

/// Query parameters of `GET /generate/stream`.
#[derive(Deserialize)]
struct StreamParams {
	prefix: String,
	max_length: Option<usize>,
	temperature: Option<f64>,
	seed: Option<u64>,
}

#[derive(Serialize)]
struct GenerateResponse {
	story: String,
	tokens_generated: usize,
}

#[derive(Deserialize)]
struct ReloadQuery {
	name: Option<String>,
}

/// Everything a generation needs, resolved before any blocking work starts.
struct Job {
	model: Arc<KneserNeyModel>,
	prefix: Vec<Token>,
	max_length: usize,
	temperature: f64,
	eot: Token,
	seed: Option<u64>,
}

impl Job {
	fn rng(&self) -> StdRng {
		match self.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_os_rng(),
		}
	}
}

fn detail(mut builder: actix_web::HttpResponseBuilder, message: impl ToString) -> HttpResponse {
	builder.json(json!({ "detail": message.to_string() }))
}

/// Validates request values, snapshots the active model and encodes the prefix.
fn prepare(
	state: &AppState,
	prefix: &str,
	max_length: Option<usize>,
	temperature: Option<f64>,
	seed: Option<u64>,
) -> Result<Job, HttpResponse> {
	let temperature = validate_temperature(temperature.unwrap_or(state.defaults.temperature))
		.map_err(|e| detail(HttpResponse::BadRequest(), e))?;
	let model = state
		.models
		.current()
		.ok_or_else(|| detail(HttpResponse::ServiceUnavailable(), "No model loaded"))?;

	let prefix = state.tokenizer.encode(prefix);
	if prefix.is_empty() {
		return Err(detail(HttpResponse::BadRequest(), "Prefix could not be tokenized"));
	}

	Ok(Job {
		model,
		prefix,
		max_length: max_length.unwrap_or(state.defaults.max_length),
		temperature,
		eot: state.tokenizer.eot_token(),
		seed,
	})
}

/// HTTP GET endpoint `/`
///
/// Service status, including whether a model is ready to serve.
#[get("/")]
async fn status(state: web::Data<AppState>) -> impl Responder {
	HttpResponse::Ok().json(json!({
		"status": "ok",
		"service": "Kneser–Ney story generation API",
		"models_loaded": state.models.is_loaded(),
	}))
}

#[get("/health")]
async fn health() -> impl Responder {
	HttpResponse::Ok().json(json!({ "status": "healthy" }))
}

/// HTTP POST endpoint `/generate`
///
/// Generates a whole story from a text prefix and returns it decoded.
/// `tokens_generated` excludes the prefix.
#[post("/generate")]
async fn generate(state: web::Data<AppState>, body: web::Json<GenerateRequest>) -> HttpResponse {
	let request = body.into_inner();
	let job = match prepare(&state, &request.prefix, request.max_length, request.temperature, request.seed) {
		Ok(job) => job,
		Err(response) => return response,
	};

	let result = web::block(move || {
		let mut rng = job.rng();
		let tokens = job.model.generate(&job.prefix, job.max_length, job.eot, job.temperature, &mut rng)?;
		Ok::<_, KnError>(GenerateResponse {
			story: state.tokenizer.decode(&tokens),
			tokens_generated: tokens.len().saturating_sub(job.prefix.len()),
		})
	})
	.await;

	match result {
		Ok(Ok(response)) => HttpResponse::Ok().json(response),
		Ok(Err(e)) => detail(HttpResponse::InternalServerError(), format!("Generation error: {e}")),
		Err(e) => detail(HttpResponse::InternalServerError(), format!("Generation error: {e}")),
	}
}

fn frame(event: serde_json::Value) -> Result<web::Bytes, Infallible> {
	Ok(web::Bytes::from(format!("data: {event}\n\n")))
}

/// HTTP GET endpoint `/generate/stream`
///
/// Server-Sent Events: one `{text, token}` event per sampled token, where
/// `text` is the decoded story so far, then `{done: true}` if the story ended
/// with the end-of-text token, then `{done: true, final}`.
///
/// Generation runs on a blocking thread and stops as soon as the client
/// disconnects.
#[get("/generate/stream")]
async fn generate_stream(state: web::Data<AppState>, query: web::Query<StreamParams>) -> HttpResponse {
	let params = query.into_inner();
	let job = match prepare(&state, &params.prefix, params.max_length, params.temperature, params.seed) {
		Ok(job) => job,
		Err(response) => return response,
	};

	let (tx, rx) = mpsc::channel::<Result<web::Bytes, Infallible>>(16);
	actix_web::rt::task::spawn_blocking(move || {
		let mut rng = job.rng();
		let mut stream = job.model.stream(&job.prefix, job.max_length, job.eot, job.temperature, &mut rng);

		while let Some(step) = stream.next() {
			let token = match step {
				Ok(token) => token,
				Err(e) => {
					let _ = tx.blocking_send(frame(json!({ "error": e.to_string() })));
					return;
				}
			};
			let text = state.tokenizer.decode(stream.tokens());
			if tx.blocking_send(frame(json!({ "text": text, "token": token }))).is_err() {
				debug!("Stream client disconnected, generation stopped");
				return;
			}
			if token == job.eot && tx.blocking_send(frame(json!({ "done": true }))).is_err() {
				return;
			}
		}

		let story = state.tokenizer.decode(stream.tokens());
		let _ = tx.blocking_send(frame(json!({ "done": true, "final": story })));
	});

	HttpResponse::Ok()
		.content_type("text/event-stream")
		.insert_header((header::CACHE_CONTROL, "no-cache"))
		.streaming(ReceiverStream::new(rx))
}

/// HTTP GET endpoint `/v1/models`
///
/// Names of the model files available in the data directory.
#[get("/v1/models")]
async fn get_models(state: web::Data<AppState>) -> impl Responder {
	match list_files(&state.data_dir, "json") {
		Ok(files) => {
			let models: Vec<String> = files.into_iter().filter(|name| *name != state.tokenizer_name).collect();
			HttpResponse::Ok().json(json!({ "models": models }))
		}
		Err(_) => detail(HttpResponse::InternalServerError(), "Failed to list models"),
	}
}

/// HTTP PUT endpoint `/v1/reload?name=<model>`
///
/// Replaces the active model with `<data_dir>/<model>.json` (or its `.bin`
/// cache). Requests in flight finish on the model they started with; on
/// failure the previous model stays active.
#[put("/v1/reload")]
async fn reload(state: web::Data<AppState>, query: web::Query<ReloadQuery>) -> HttpResponse {
	let name = match query.name.as_deref().map(str::trim) {
		Some(name) if !name.is_empty() => name.to_owned(),
		_ => return detail(HttpResponse::BadRequest(), "Missing or empty model name"),
	};
	if name.contains(['/', '\\']) || name.contains("..") {
		return detail(HttpResponse::BadRequest(), "Model name must not contain a path");
	}

	let path = state.data_dir.join(format!("{name}.json"));
	let result = web::block(move || state.models.reload(path)).await;

	match result {
		Ok(Ok(model)) => HttpResponse::Ok().json(json!({
			"status": "reloaded",
			"model": name,
			"order": model.order(),
			"vocabulary": model.vocabulary().len(),
		})),
		Ok(Err(KnError::Io(e))) if e.kind() == ErrorKind::NotFound => {
			detail(HttpResponse::NotFound(), format!("Model not found: {name}"))
		}
		Ok(Err(e)) => {
			warn!("Reload of {name} rejected: {e}");
			detail(HttpResponse::UnprocessableEntity(), format!("Failed to load model: {e}"))
		}
		Err(e) => detail(HttpResponse::InternalServerError(), format!("Failed to load model: {e}")),
	}
}

/// Registers every endpoint.
pub fn configure(config: &mut web::ServiceConfig) {
	config
		.service(status)
		.service(health)
		.service(generate)
		.service(generate_stream)
		.service(get_models)
		.service(reload);
}
