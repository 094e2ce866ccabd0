//! Text ⇄ token conversion consumed by the model and the serving layer.
//!
//! The model only ever sees token ids; a `Tokenizer` owns the mapping and
//! tells callers which id ends a story.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::model::Token;

/// Word-level tokenizer with frequency-ranked vocabulary.
pub mod word;

pub use word::WordTokenizer;

#[derive(Error, Debug)]
pub enum TokenizerError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Serialization(String),

	#[error("Unsupported tokenizer type: {0}")]
	UnsupportedKind(String),

	#[error("Missing special token: {0}")]
	MissingSpecialToken(&'static str),
}

impl TokenizerError {
	pub fn serialization(e: impl std::fmt::Display) -> Self {
		TokenizerError::Serialization(e.to_string())
	}
}

/// Maps text to token ids and back.
///
/// `encode` never fails: words outside the vocabulary become the unknown
/// token. `decode` is lossy and need not invert `encode`.
pub trait Tokenizer: Send + Sync {
	fn encode(&self, text: &str) -> Vec<Token>;

	fn decode(&self, tokens: &[Token]) -> String;

	/// Id of the end-of-text token that terminates generation.
	fn eot_token(&self) -> Token;

	fn vocab_size(&self) -> usize;
}

#[derive(Deserialize)]
struct KindProbe {
	#[serde(rename = "type")]
	kind: Option<String>,
}

/// Loads a tokenizer file, dispatching on its `type` field.
///
/// # Errors
/// Returns `TokenizerError::UnsupportedKind` for anything but `"word"`.
pub fn load_tokenizer<P: AsRef<Path>>(path: P) -> Result<Box<dyn Tokenizer>, TokenizerError> {
	let bytes = fs::read(path)?;
	let probe: KindProbe = serde_json::from_slice(&bytes).map_err(TokenizerError::serialization)?;
	match probe.kind.as_deref() {
		Some("word") => Ok(Box::new(WordTokenizer::from_json(&bytes)?)),
		other => Err(TokenizerError::UnsupportedKind(other.unwrap_or("<none>").to_owned())),
	}
}
