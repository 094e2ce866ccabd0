use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use log::{info, warn};

use kn_gen_core::io::get_filename;
use kn_gen_core::tokenizer::load_tokenizer;
use kn_gen_core::{GenerationDefaults, ModelHandle};

mod routes;

use routes::AppState;

#[derive(Parser)]
#[command(name = "kn-gen-server", about = "Kneser–Ney story generation server")]
struct Cli {
	/// Directory holding the model files
	#[arg(long, default_value = "models")]
	data_dir: PathBuf,

	/// Model loaded at startup, by name (`<data_dir>/<model>.json`)
	#[arg(long, default_value = "kneser_ney_4gram")]
	model: String,

	/// Tokenizer file
	#[arg(long, default_value = "models/tokenizer.json")]
	tokenizer: PathBuf,

	#[arg(long, default_value = "127.0.0.1")]
	host: String,

	#[arg(long, default_value = "5000")]
	port: u16,
}

/// Main entry point for the server.
///
/// Loads the tokenizer and the startup model, then serves the generation API.
///
/// # Notes
/// - A missing or invalid startup model is not fatal: the server starts
///   empty, answers 503 on generation, and waits for `PUT /v1/reload`.
/// - A missing tokenizer is fatal.
#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let cli = Cli::parse();

	let tokenizer = load_tokenizer(&cli.tokenizer)?;
	info!("Tokenizer ready, {} ids", tokenizer.vocab_size());

	let models = ModelHandle::empty();
	let model_path = cli.data_dir.join(format!("{}.json", cli.model));
	if let Err(e) = models.reload(&model_path) {
		warn!("Starting without a model ({}): {e}", model_path.display());
	}

	let state = web::Data::new(AppState {
		models,
		tokenizer,
		tokenizer_name: get_filename(&cli.tokenizer)?,
		data_dir: cli.data_dir,
		defaults: GenerationDefaults::default(),
	});

	info!("Listening on {}:{}", cli.host, cli.port);
	HttpServer::new(move || {
		App::new()
			.wrap(Cors::permissive())
			.wrap(middleware::Logger::default())
			.app_data(state.clone())
			.configure(routes::configure)
	})
		.bind((cli.host.as_str(), cli.port))?
		.run()
		.await?;

	Ok(())
}
