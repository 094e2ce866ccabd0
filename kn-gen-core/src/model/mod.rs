//! Interpolated Kneser–Ney n-gram language model.
//!
//! Training flows through the leaves first:
//! - `CountStore` accumulates n-gram and context counts (`counts`)
//! - `ContinuationStats` derives distinct-continuation counts (`continuation`)
//! - `KneserNeyModel` evaluates probabilities over both (`kneser_ney`)
//! - sampling and sequence generation live in `generator`
//! - persistence lives in `codec`, hot-swapping in `handle`

/// Opaque token id assigned by a tokenizer.
pub type Token = u32;

/// Multi-order n-gram and context occurrence counts.
pub mod counts;

/// Distinct-continuation (N1+) statistics derived from a `CountStore`.
pub mod continuation;

/// The trained model and its probability evaluator.
pub mod kneser_ney;

/// Temperature-controlled sampling and autoregressive generation.
pub mod generator;

/// Save/load of the complete model state (JSON and postcard).
pub mod codec;

/// Atomically replaceable shared reference to a trained model.
pub mod handle;
