use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use log::{info, warn};

use crate::error::KnError;
use super::codec;
use super::kneser_ney::KneserNeyModel;

/// Shared, atomically replaceable reference to the active model.
///
/// Readers take a snapshot (`current`) and keep using that `Arc` for the
/// whole request, so a concurrent `replace` never mixes two models inside one
/// call. The lock only guards the pointer swap; the model itself is immutable.
#[derive(Debug, Default)]
pub struct ModelHandle {
	current: RwLock<Option<Arc<KneserNeyModel>>>,
}

impl ModelHandle {
	pub fn new(model: KneserNeyModel) -> Self {
		Self { current: RwLock::new(Some(Arc::new(model))) }
	}

	/// Handle with no model yet; `current` returns `None` until one is installed.
	pub fn empty() -> Self {
		Self::default()
	}

	/// Snapshot of the active model.
	pub fn current(&self) -> Option<Arc<KneserNeyModel>> {
		// The guarded value is a single pointer, a poisoned lock still holds a valid one.
		self.current
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub fn is_loaded(&self) -> bool {
		self.current().is_some()
	}

	/// Installs `model`, returning the previously active one.
	pub fn replace(&self, model: KneserNeyModel) -> Option<Arc<KneserNeyModel>> {
		let model = Arc::new(model);
		let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
		current.replace(model)
	}

	/// Loads a model file (see `codec::load_cached`) and installs it.
	///
	/// # Errors
	/// Any load error is returned and the active model stays in place.
	pub fn reload<P: AsRef<Path>>(&self, path: P) -> Result<Arc<KneserNeyModel>, KnError> {
		let path = path.as_ref();
		let model = match codec::load_cached(path) {
			Ok(model) => model,
			Err(e) => {
				warn!("Keeping the active model, failed to load {}: {e}", path.display());
				return Err(e);
			}
		};
		self.replace(model);
		info!("Active model replaced from {}", path.display());
		self.current().ok_or(KnError::EmptyModel)
	}
}
