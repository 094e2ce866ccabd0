use std::collections::BTreeSet;

use log::debug;
use rand::Rng;

use crate::error::KnError;
use super::Token;
use super::kneser_ney::{KneserNeyModel, tail};

/// Lowest temperature used when computing the sampling exponent.
///
/// Keeps `1 / temperature` finite: sampling approaches greedy selection as the
/// temperature goes to zero, without ever becoming exactly greedy.
pub const TEMPERATURE_FLOOR: f64 = 1e-8;

/// Which path produced a sampled token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawSource {
	/// Drawn from the (temperature-adjusted) Kneser–Ney distribution.
	Distribution,
	/// No vocabulary token had a positive probability; uniform over the vocabulary.
	NoCandidates,
	/// Temperature exponentiation underflowed every weight to zero; uniform over the vocabulary.
	Underflow,
}

/// A sampled token and how it was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Draw {
	pub token: Token,
	pub source: DrawSource,
}

impl KneserNeyModel {
	/// Every vocabulary token with a strictly positive probability after `history`,
	/// in ascending token order.
	///
	/// # Errors
	/// Returns `KnError::EmptyModel` if the vocabulary is empty.
	pub fn candidates(&self, history: &[Token]) -> Result<Vec<(Token, f64)>, KnError> {
		if self.is_empty() {
			return Err(KnError::EmptyModel);
		}
		let mut candidates = Vec::new();
		for &token in self.vocabulary() {
			let p = self.prob(history, token)?;
			if p > 0.0 {
				candidates.push((token, p));
			}
		}
		Ok(candidates)
	}

	/// Samples the next token and reports which path chose it.
	///
	/// # Errors
	/// Returns `KnError::EmptyModel` if the vocabulary is empty.
	pub fn sample_next<R: Rng + ?Sized>(&self, history: &[Token], temperature: f64, rng: &mut R) -> Result<Draw, KnError> {
		let candidates = self.candidates(history)?;
		sample_candidates(candidates, self.vocabulary(), temperature, rng)
	}

	/// Samples the next token after `history`.
	///
	/// `temperature` below 1 sharpens the distribution, above 1 flattens it.
	///
	/// # Errors
	/// Returns `KnError::EmptyModel` if the vocabulary is empty.
	pub fn generate_next_token<R: Rng + ?Sized>(&self, history: &[Token], temperature: f64, rng: &mut R) -> Result<Token, KnError> {
		self.sample_next(history, temperature, rng).map(|draw| draw.token)
	}

	/// Generates a sequence starting from `prefix`.
	///
	/// # Behavior
	/// - The prefix is copied, never modified.
	/// - If `prefix.len() >= max_length`, the prefix is returned unchanged.
	/// - Otherwise tokens are appended until `max_length` is reached or `eot` is
	///   sampled (the `eot` token is kept in the output).
	///
	/// # Errors
	/// Returns `KnError::EmptyModel` if the vocabulary is empty.
	pub fn generate<R: Rng + ?Sized>(
		&self,
		prefix: &[Token],
		max_length: usize,
		eot: Token,
		temperature: f64,
		rng: &mut R,
	) -> Result<Vec<Token>, KnError> {
		if self.is_empty() {
			return Err(KnError::EmptyModel);
		}
		let mut stream = self.stream(prefix, max_length, eot, temperature, rng);
		for step in &mut stream {
			step?;
		}
		Ok(stream.into_tokens())
	}

	/// Token-by-token generation, for callers that deliver text progressively
	/// or need to stop between tokens.
	pub fn stream<'a, R: Rng + ?Sized>(
		&'a self,
		prefix: &[Token],
		max_length: usize,
		eot: Token,
		temperature: f64,
		rng: &'a mut R,
	) -> TokenStream<'a, R> {
		TokenStream {
			model: self,
			tokens: prefix.to_vec(),
			max_length,
			eot,
			temperature,
			rng,
			finished: false,
		}
	}
}

/// Iterator over freshly generated tokens.
///
/// Yields each sampled token; the full sequence (prefix included) is available
/// through `tokens()` at any point. Stops after `eot`, at `max_length`, or after
/// the first error.
pub struct TokenStream<'a, R: Rng + ?Sized> {
	model: &'a KneserNeyModel,
	tokens: Vec<Token>,
	max_length: usize,
	eot: Token,
	temperature: f64,
	rng: &'a mut R,
	finished: bool,
}

impl<R: Rng + ?Sized> TokenStream<'_, R> {
	/// Prefix plus every token generated so far.
	pub fn tokens(&self) -> &[Token] {
		&self.tokens
	}

	pub fn into_tokens(self) -> Vec<Token> {
		self.tokens
	}
}

impl<R: Rng + ?Sized> Iterator for TokenStream<'_, R> {
	type Item = Result<Token, KnError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.finished || self.tokens.len() >= self.max_length {
			return None;
		}

		let history = tail(&self.tokens, self.model.order() - 1);
		match self.model.generate_next_token(history, self.temperature, &mut *self.rng) {
			Ok(token) => {
				self.tokens.push(token);
				if token == self.eot {
					self.finished = true;
				}
				Some(Ok(token))
			}
			Err(e) => {
				self.finished = true;
				Some(Err(e))
			}
		}
	}
}

/// Draws one token from scored candidates.
///
/// # Behavior
/// - No candidates: uniform draw over `vocabulary` (`DrawSource::NoCandidates`).
/// - `temperature != 1`: each weight is raised to `1 / max(temperature, TEMPERATURE_FLOOR)`.
/// - Weights summing to `<= 0` afterwards: uniform draw over `vocabulary` (`DrawSource::Underflow`).
/// - Otherwise: categorical draw proportional to the weights.
///
/// # Errors
/// Returns `KnError::EmptyModel` if a uniform draw is needed over an empty vocabulary.
pub fn sample_candidates<R: Rng + ?Sized>(
	mut candidates: Vec<(Token, f64)>,
	vocabulary: &BTreeSet<Token>,
	temperature: f64,
	rng: &mut R,
) -> Result<Draw, KnError> {
	if candidates.is_empty() {
		debug!("no candidate with positive probability, sampling uniformly");
		let token = uniform_draw(vocabulary, rng)?;
		return Ok(Draw { token, source: DrawSource::NoCandidates });
	}

	apply_temperature(&mut candidates, temperature);

	let total: f64 = candidates.iter().map(|(_, weight)| weight).sum();
	if total.is_nan() || total <= 0.0 {
		debug!("temperature {temperature} underflowed every weight, sampling uniformly");
		let token = uniform_draw(vocabulary, rng)?;
		return Ok(Draw { token, source: DrawSource::Underflow });
	}

	for (_, weight) in candidates.iter_mut() {
		*weight /= total;
	}

	match categorical_draw(&candidates, rng) {
		Some(token) => Ok(Draw { token, source: DrawSource::Distribution }),
		None => {
			let token = uniform_draw(vocabulary, rng)?;
			Ok(Draw { token, source: DrawSource::Underflow })
		}
	}
}

/// Raises every weight to `1 / max(temperature, TEMPERATURE_FLOOR)`; no-op at 1.0.
pub fn apply_temperature(weights: &mut [(Token, f64)], temperature: f64) {
	if temperature == 1.0 {
		return;
	}
	let exponent = 1.0 / temperature.max(TEMPERATURE_FLOOR);
	for (_, weight) in weights.iter_mut() {
		*weight = weight.powf(exponent);
	}
}

/// Categorical draw over normalized weights; `None` only for an empty slice.
fn categorical_draw<R: Rng + ?Sized>(weights: &[(Token, f64)], rng: &mut R) -> Option<Token> {
	let r: f64 = rng.random();
	let mut cumulative = 0.0;
	for &(token, weight) in weights {
		cumulative += weight;
		if r < cumulative {
			return Some(token);
		}
	}
	// Rounding left the cumulative sum just below 1: take the last candidate
	// that carries any weight.
	weights
		.iter()
		.rev()
		.find(|(_, weight)| *weight > 0.0)
		.or(weights.last())
		.map(|&(token, _)| token)
}

fn uniform_draw<R: Rng + ?Sized>(vocabulary: &BTreeSet<Token>, rng: &mut R) -> Result<Token, KnError> {
	if vocabulary.is_empty() {
		return Err(KnError::EmptyModel);
	}
	let index = rng.random_range(0..vocabulary.len());
	vocabulary.iter().nth(index).copied().ok_or(KnError::EmptyModel)
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use rand::SeedableRng;
	use rand::rngs::StdRng;

	use super::*;
	use crate::config::ModelConfig;

	fn pattern_model() -> KneserNeyModel {
		let mut model = KneserNeyModel::new(ModelConfig::new(3, 0.5).unwrap());
		model.train([vec![1, 2, 1, 2, 1, 2]]);
		model
	}

	fn histogram(model: &KneserNeyModel, history: &[Token], temperature: f64, draws: usize) -> HashMap<Token, usize> {
		let mut rng = StdRng::seed_from_u64(7);
		let mut counts = HashMap::new();
		for _ in 0..draws {
			let token = model.generate_next_token(history, temperature, &mut rng).unwrap();
			*counts.entry(token).or_insert(0) += 1;
		}
		counts
	}

	#[test]
	fn empty_candidates_fall_back_to_uniform() {
		let vocabulary: BTreeSet<Token> = [3, 5, 8].into_iter().collect();
		let mut rng = StdRng::seed_from_u64(1);
		let mut seen = BTreeSet::new();
		for _ in 0..200 {
			let draw = sample_candidates(Vec::new(), &vocabulary, 1.0, &mut rng).unwrap();
			assert_eq!(draw.source, DrawSource::NoCandidates);
			seen.insert(draw.token);
		}
		assert_eq!(seen, vocabulary);
	}

	#[test]
	fn categorical_draw_never_invents_a_token() {
		let mut rng = StdRng::seed_from_u64(5);
		assert_eq!(categorical_draw(&[], &mut rng), None);

		// Cumulative mass stays far below any draw: the last weighted candidate wins.
		let weights = [(7, 0.0), (9, 1e-300), (4, 0.0)];
		for _ in 0..50 {
			assert_eq!(categorical_draw(&weights, &mut rng), Some(9));
		}
	}

	#[test]
	fn underflow_falls_back_to_uniform() {
		let vocabulary: BTreeSet<Token> = [1, 2].into_iter().collect();
		let mut rng = StdRng::seed_from_u64(1);
		let draw = sample_candidates(vec![(1, 0.6), (2, 0.4)], &vocabulary, 1e-12, &mut rng).unwrap();
		assert_eq!(draw.source, DrawSource::Underflow);
		assert!(vocabulary.contains(&draw.token));
	}

	#[test]
	fn uniform_fallback_on_empty_vocabulary_is_an_error() {
		let mut rng = StdRng::seed_from_u64(1);
		let result = sample_candidates(Vec::new(), &BTreeSet::new(), 1.0, &mut rng);
		assert!(matches!(result, Err(KnError::EmptyModel)));
	}

	#[test]
	fn temperature_exponent_is_floored() {
		let mut weights = vec![(1, 0.5), (2, 0.25)];
		apply_temperature(&mut weights, 0.5);
		assert!((weights[0].1 - 0.25).abs() < 1e-12);
		assert!((weights[1].1 - 0.0625).abs() < 1e-12);

		let mut unchanged = vec![(1, 0.5)];
		apply_temperature(&mut unchanged, 1.0);
		assert_eq!(unchanged[0].1, 0.5);

		// Non-positive temperatures use the floor instead of dividing by zero.
		let mut floored = vec![(1, 1.0), (2, 0.5)];
		apply_temperature(&mut floored, 0.0);
		assert_eq!(floored[0].1, 1.0);
		assert_eq!(floored[1].1, 0.0);
	}

	#[test]
	fn seeded_sampling_is_reproducible() {
		let model = pattern_model();
		let a = model.generate(&[1], 30, 99, 1.0, &mut StdRng::seed_from_u64(42)).unwrap();
		let b = model.generate(&[1], 30, 99, 1.0, &mut StdRng::seed_from_u64(42)).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn low_temperature_converges_on_the_most_likely_token() {
		let model = pattern_model();
		let counts = histogram(&model, &[1, 2], 0.01, 2000);
		assert_eq!(counts.get(&1), Some(&2000));
	}

	#[test]
	fn high_temperature_approaches_uniform() {
		let model = pattern_model();
		let draws = 10_000;
		let counts = histogram(&model, &[1, 2], 100.0, draws);
		for token in [1, 2] {
			let share = *counts.get(&token).unwrap_or(&0) as f64 / draws as f64;
			assert!((share - 0.5).abs() < 0.05, "token {token} share {share}");
		}
	}

	#[test]
	fn sampling_follows_the_distribution() {
		let model = pattern_model();
		let draws = 10_000;
		let counts = histogram(&model, &[1, 2], 1.0, draws);
		let share = *counts.get(&2).unwrap_or(&0) as f64 / draws as f64;
		// P(2 | 1 2) = 0.03125
		assert!((share - 0.03125).abs() < 0.01, "share {share}");
	}

	#[test]
	fn generate_returns_long_prefix_unchanged() {
		let model = pattern_model();
		let mut rng = StdRng::seed_from_u64(3);
		assert_eq!(model.generate(&[2], 1, 2, 1.0, &mut rng).unwrap(), vec![2]);
		assert_eq!(model.generate(&[1, 2, 1], 2, 2, 1.0, &mut rng).unwrap(), vec![1, 2, 1]);
	}

	#[test]
	fn generate_stops_at_max_length_or_eot() {
		let model = pattern_model();
		let mut rng = StdRng::seed_from_u64(11);

		let no_eot = model.generate(&[1], 12, 99, 1.0, &mut rng).unwrap();
		assert_eq!(no_eot.len(), 12);
		assert_eq!(no_eot[0], 1);

		let with_eot = model.generate(&[1], 50, 2, 1.0, &mut rng).unwrap();
		assert_eq!(*with_eot.last().unwrap(), 2);
		assert_eq!(with_eot.iter().filter(|&&t| t == 2).count(), 1);
	}

	#[test]
	fn generate_on_empty_model_fails() {
		let model = KneserNeyModel::new(ModelConfig::default());
		let mut rng = StdRng::seed_from_u64(3);
		assert!(matches!(model.generate(&[], 10, 2, 1.0, &mut rng), Err(KnError::EmptyModel)));
		assert!(matches!(model.generate_next_token(&[], 1.0, &mut rng), Err(KnError::EmptyModel)));
	}

	#[test]
	fn stream_yields_only_new_tokens() {
		let model = pattern_model();
		let mut rng = StdRng::seed_from_u64(5);
		let mut stream = model.stream(&[1, 2], 6, 99, 1.0, &mut rng);
		let produced: Vec<Token> = stream.by_ref().map(Result::unwrap).collect();
		assert_eq!(produced.len(), 4);
		assert_eq!(&stream.tokens()[2..], &produced[..]);
	}
}
