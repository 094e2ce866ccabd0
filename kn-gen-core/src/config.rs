use crate::error::KnError;

/// Construction parameters of a Kneser–Ney model.
///
/// # Invariants
/// - `order >= 2`
/// - `0.0 <= discount < 1.0`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelConfig {
	order: usize,
	discount: f64,
}

impl ModelConfig {
	/// Creates a validated configuration.
	///
	/// # Errors
	/// Returns `KnError::Config` if `order < 2` or `discount` is outside `[0, 1)`.
	pub fn new(order: usize, discount: f64) -> Result<Self, KnError> {
		if order < 2 {
			return Err(KnError::config(format!("order must be >= 2, got {order}")));
		}
		if !(0.0..1.0).contains(&discount) {
			return Err(KnError::config(format!("discount must be in [0, 1), got {discount}")));
		}
		Ok(Self { order, discount })
	}

	/// Maximum n-gram length, predicted token included.
	pub fn order(&self) -> usize {
		self.order
	}

	pub fn discount(&self) -> f64 {
		self.discount
	}
}

impl Default for ModelConfig {
	/// 4-gram model with a 0.75 discount.
	fn default() -> Self {
		Self { order: 4, discount: 0.75 }
	}
}

/// Request defaults used by the serving layer when a caller omits a value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationDefaults {
	pub max_length: usize,
	pub temperature: f64,
}

impl Default for GenerationDefaults {
	fn default() -> Self {
		Self { max_length: 500, temperature: 1.0 }
	}
}

/// Checks a sampling temperature supplied from outside the process.
///
/// The sampler itself floors the temperature, so this only rejects values
/// that have no meaning at all (non-finite or non-positive).
pub fn validate_temperature(temperature: f64) -> Result<f64, KnError> {
	if !temperature.is_finite() || temperature <= 0.0 {
		return Err(KnError::config(format!("temperature must be > 0, got {temperature}")));
	}
	Ok(temperature)
}
