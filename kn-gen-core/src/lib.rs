//! Kneser–Ney n-gram text generation library.
//!
//! This crate provides a word-level story generator built on:
//! - Interpolated Kneser–Ney smoothing over n-grams of a fixed order
//! - Temperature-scaled sampling with an injectable random source
//! - A validated, self-describing persistence format (JSON, plus a binary cache)
//! - A word tokenizer turning text into the token ids the model consumes
//!
//! The model never sees text; everything below `model` works on `Token` ids.

/// Model parameters and generation defaults.
pub mod config;

/// Library error type.
pub mod error;

/// I/O utilities (corpus loading, path helpers).
pub mod io;

/// Counting, smoothing, sampling and persistence.
pub mod model;

/// Text ⇄ token conversion.
pub mod tokenizer;

pub use config::{GenerationDefaults, ModelConfig};
pub use error::KnError;
pub use model::Token;
pub use model::handle::ModelHandle;
pub use model::kneser_ney::KneserNeyModel;
pub use tokenizer::{Tokenizer, WordTokenizer};
