use thiserror::Error;

/// Errors raised by the n-gram engine.
///
/// Numeric corner cases during sampling are not errors: they take the
/// uniform fallback documented on `DrawSource`.
#[derive(Error, Debug)]
pub enum KnError {
	/// Invalid construction parameters (order, discount, temperature).
	#[error("Invalid configuration: {0}")]
	Config(String),

	/// Inference against a model whose vocabulary is empty.
	#[error("Model is empty; train or load it first")]
	EmptyModel,

	/// Persisted model data is missing fields, malformed or inconsistent.
	#[error("Invalid model format: {0}")]
	Format(String),

	/// File access failure, passed through unchanged.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl KnError {
	pub fn config<E: std::fmt::Display>(error: E) -> Self {
		KnError::Config(error.to_string())
	}

	pub fn format<E: std::fmt::Display>(error: E) -> Self {
		KnError::Format(error.to_string())
	}
}
