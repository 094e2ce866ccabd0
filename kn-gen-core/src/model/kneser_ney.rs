use std::collections::BTreeSet;
use std::sync::mpsc;
use std::thread;

use log::info;

use crate::config::ModelConfig;
use crate::error::KnError;
use super::Token;
use super::continuation::ContinuationStats;
use super::counts::CountStore;

/// Interpolated Kneser–Ney n-gram language model.
///
/// For a history `h` and token `w` at order `k`:
///
/// ```text
/// P(w | h) = max(c(h, w) - D, 0) / c(h)  +  D · N1+(h ·) / c(h) · P(w | h[1..])
/// ```
///
/// and the unigram base case is the continuation probability
/// `N1+(· w) / Σ N1+(· v)`.
///
/// # Responsibilities
/// - Accumulate counts from a tokenized corpus and derive continuation statistics
/// - Evaluate `P(token | history)` with stepwise backoff
///
/// # Invariants
/// - Configuration is always valid (`order >= 2`, `0 <= discount < 1`)
/// - `continuation` is derived from `counts` after every training pass
/// - Nothing mutates the model outside `train`; a trained model is shared read-only
#[derive(Clone, Debug)]
pub struct KneserNeyModel {
	config: ModelConfig,
	counts: CountStore,
	continuation: ContinuationStats,
}

impl KneserNeyModel {
	/// Creates an empty, untrained model.
	pub fn new(config: ModelConfig) -> Self {
		let counts = CountStore::with_order(config.order());
		let continuation = ContinuationStats::build(&counts);
		Self { config, counts, continuation }
	}

	/// Reassembles a model from tables that were already validated.
	pub(crate) fn from_parts(config: ModelConfig, counts: CountStore, continuation: ContinuationStats) -> Self {
		Self { config, counts, continuation }
	}

	/// Counts the corpus and rebuilds continuation statistics.
	///
	/// # Notes
	/// - Calling it twice accumulates both corpora; it is not idempotent.
	/// - Empty sequences are skipped.
	pub fn train<I, S>(&mut self, corpus: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<[Token]>,
	{
		self.counts.train(corpus);
		self.continuation = ContinuationStats::build(&self.counts);
		self.log_summary();
	}

	/// Same result as `train`, but counts chunks of the corpus on worker threads
	/// and merges the partial stores before deriving continuation statistics.
	///
	/// # Behavior
	/// - Splits the corpus into `cpus * 8` chunks.
	/// - Each thread builds a partial `CountStore` and sends it over an MPSC channel.
	/// - Partial stores are merged sequentially; merge order does not change counts.
	pub fn train_parallel(&mut self, corpus: &[Vec<Token>]) -> Result<(), KnError> {
		if corpus.is_empty() {
			self.train(corpus);
			return Ok(());
		}

		let chunks = num_cpus::get() * 8;
		let chunk_size = corpus.len().div_ceil(chunks);
		let order = self.config.order();

		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for chunk in corpus.chunks(chunk_size) {
				let tx = tx.clone();
				scope.spawn(move || {
					let mut partial = CountStore::with_order(order);
					partial.train(chunk);
					// The receiver outlives the scope, so sending cannot fail.
					let _ = tx.send(partial);
				});
			}
		});
		drop(tx);

		for partial in rx.iter() {
			self.counts.merge(&partial)?;
		}
		self.continuation = ContinuationStats::build(&self.counts);
		self.log_summary();
		Ok(())
	}

	fn log_summary(&self) {
		info!("Trained {}-gram Kneser–Ney model", self.order());
		info!("Vocabulary size: {}", self.vocabulary().len());
		info!("Total unigrams: {}", self.counts.total_unigrams());
		for k in 2..=self.order() {
			info!("Unique {k}-grams: {}", self.counts.distinct_ngrams(k));
		}
	}

	pub fn config(&self) -> ModelConfig {
		self.config
	}

	/// Maximum n-gram length `N`.
	pub fn order(&self) -> usize {
		self.config.order()
	}

	pub fn discount(&self) -> f64 {
		self.config.discount()
	}

	pub fn counts(&self) -> &CountStore {
		&self.counts
	}

	pub fn continuation(&self) -> &ContinuationStats {
		&self.continuation
	}

	/// Tokens seen during training, in ascending order.
	pub fn vocabulary(&self) -> &BTreeSet<Token> {
		self.counts.vocabulary()
	}

	/// `true` until a training pass (or load) has seen at least one token.
	pub fn is_empty(&self) -> bool {
		self.vocabulary().is_empty()
	}

	/// Probability of `token` following `history`, evaluated at the model order.
	///
	/// Only the last `N - 1` tokens of `history` are used. Tokens outside the
	/// vocabulary have probability 0.
	///
	/// # Errors
	/// Returns `KnError::EmptyModel` if the vocabulary is empty.
	pub fn prob(&self, history: &[Token], token: Token) -> Result<f64, KnError> {
		self.order_prob(history, token, self.order())
	}

	/// Probability of `token` after `history`, starting the backoff at `order`.
	///
	/// `order` is clamped to `1..=N`.
	///
	/// # Errors
	/// Returns `KnError::EmptyModel` if the vocabulary is empty.
	pub fn order_prob(&self, history: &[Token], token: Token, order: usize) -> Result<f64, KnError> {
		if self.is_empty() {
			return Err(KnError::EmptyModel);
		}
		if !self.vocabulary().contains(&token) {
			return Ok(0.0);
		}

		let mut order = order.clamp(1, self.order());
		let mut history = tail(history, order - 1);

		// The recursive definition unrolled: every observed order adds its
		// discounted term scaled by the product of the backoff weights above it.
		let mut probability = 0.0;
		let mut scale = 1.0;
		let mut ngram: Vec<Token> = Vec::with_capacity(order);

		while order > 1 {
			let context_len = order - 1;
			if history.len() > context_len {
				history = tail(history, context_len);
			}
			if history.len() < context_len {
				// Not enough history for this order, same history one order down.
				order -= 1;
				continue;
			}

			let context_count = self.counts.context_count(order, history);
			if context_count == 0 {
				// Unseen context: drop the oldest token and try one order lower.
				history = &history[1..];
				order -= 1;
				continue;
			}

			ngram.clear();
			ngram.extend_from_slice(history);
			ngram.push(token);
			let count = self.counts.ngram_count(&ngram) as f64;
			let context_count = context_count as f64;
			let discount = self.discount();

			let discounted = (count - discount).max(0.0);
			let ml_term = discounted / context_count;
			let distinct = self.continuation.continuation_count(order, history) as f64;
			let backoff_weight = discount * distinct / context_count;

			probability += scale * ml_term;
			scale *= backoff_weight;

			history = &history[1..];
			order -= 1;
		}

		Ok(probability + scale * self.unigram_prob(token))
	}

	/// Continuation probability of `token`, uniform over the vocabulary when
	/// no bigram was ever observed.
	fn unigram_prob(&self, token: Token) -> f64 {
		let total = self.continuation.total_unigram_continuations();
		if total == 0 {
			return 1.0 / self.vocabulary().len() as f64;
		}
		self.continuation.unigram_continuation(token) as f64 / total as f64
	}
}

/// Last `n` tokens of `tokens` (all of them if shorter).
pub(crate) fn tail(tokens: &[Token], n: usize) -> &[Token] {
	&tokens[tokens.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
	use super::*;

	fn trained(order: usize, discount: f64, corpus: &[Vec<Token>]) -> KneserNeyModel {
		let mut model = KneserNeyModel::new(ModelConfig::new(order, discount).unwrap());
		model.train(corpus);
		model
	}

	#[test]
	fn untrained_model_is_empty() {
		let model = KneserNeyModel::new(ModelConfig::default());
		assert!(model.is_empty());
		assert!(matches!(model.prob(&[1], 2), Err(KnError::EmptyModel)));
	}

	#[test]
	fn repeating_pattern_is_preferred() {
		let model = trained(3, 0.5, &[vec![1, 2, 1, 2, 1, 2]]);
		let p1 = model.prob(&[1, 2], 1).unwrap();
		let p2 = model.prob(&[1, 2], 2).unwrap();

		assert!(p1 > p2);
		// Hand-computed: 0.75 + 0.25 * (0.75 + 0.25 * 0.5) and 0.25 * 0.25 * 0.5
		assert!((p1 - 0.96875).abs() < 1e-12);
		assert!((p2 - 0.03125).abs() < 1e-12);
	}

	#[test]
	fn distribution_over_vocabulary_sums_to_one() {
		let model = trained(3, 0.75, &[vec![1, 2, 3, 1, 2, 4, 2, 3], vec![4, 1, 3, 2]]);
		for history in [vec![], vec![1], vec![1, 2], vec![3, 3], vec![9, 9, 9]] {
			let sum: f64 = model.vocabulary().iter().map(|&w| model.prob(&history, w).unwrap()).sum();
			assert!((sum - 1.0).abs() < 1e-9, "history {history:?} sums to {sum}");
		}
	}

	#[test]
	fn unknown_token_has_zero_probability() {
		let model = trained(2, 0.5, &[vec![1], vec![2]]);
		// Uniform fallback applies to vocabulary tokens only.
		assert_eq!(model.prob(&[], 1).unwrap(), 0.5);
		assert_eq!(model.prob(&[], 42).unwrap(), 0.0);
	}

	#[test]
	fn long_history_is_truncated() {
		let model = trained(3, 0.5, &[vec![1, 2, 1, 2, 1, 2]]);
		assert_eq!(
			model.prob(&[7, 7, 7, 1, 2], 1).unwrap(),
			model.prob(&[1, 2], 1).unwrap()
		);
	}

	#[test]
	fn unseen_context_backs_off_one_token_at_a_time() {
		// [3, 1] is never a trigram context, but [1] is a bigram context.
		let model = trained(3, 0.5, &[vec![1, 2, 1, 2, 3]]);
		let backed_off = model.prob(&[3, 1], 2).unwrap();
		let bigram = model.order_prob(&[1], 2, 2).unwrap();
		assert_eq!(backed_off, bigram);

		// Jumping straight to the unigram would give a different answer.
		let unigram = model.order_prob(&[], 2, 1).unwrap();
		assert_ne!(backed_off, unigram);
	}

	#[test]
	fn short_history_keeps_its_tokens() {
		let model = trained(4, 0.5, &[vec![1, 2, 3, 1, 2, 4]]);
		// One token of history at order 4 is evaluated as a bigram on that token.
		assert_eq!(model.prob(&[2], 3).unwrap(), model.order_prob(&[2], 3, 2).unwrap());
	}

	#[test]
	fn per_order_probabilities_stay_in_unit_interval() {
		let model = trained(4, 0.9, &[vec![1, 1, 1, 2, 3, 1, 1, 4], vec![2, 2, 3, 3, 4, 4]]);
		for order in 1..=4 {
			for history in [vec![1, 1, 1], vec![2, 3, 3], vec![1, 2, 3]] {
				for &w in model.vocabulary() {
					let p = model.order_prob(&history, w, order).unwrap();
					assert!((0.0..=1.0).contains(&p), "order {order} p={p}");
					assert_eq!(p.to_bits(), model.order_prob(&history, w, order).unwrap().to_bits());
				}
			}
		}
	}

	#[test]
	fn zero_discount_is_maximum_likelihood_for_seen_contexts() {
		let model = trained(2, 0.0, &[vec![1, 2, 1, 3, 1, 2]]);
		assert!((model.prob(&[1], 2).unwrap() - 2.0 / 3.0).abs() < 1e-12);
		assert!((model.prob(&[1], 3).unwrap() - 1.0 / 3.0).abs() < 1e-12);
	}

	#[test]
	fn parallel_training_matches_sequential() {
		let corpus: Vec<Vec<Token>> = (0..50u32)
			.map(|i| (0..12).map(|j| (i * 7 + j * 3) % 11).collect())
			.collect();

		let sequential = trained(3, 0.75, &corpus);
		let mut parallel = KneserNeyModel::new(ModelConfig::new(3, 0.75).unwrap());
		parallel.train_parallel(&corpus).unwrap();

		assert_eq!(parallel.counts(), sequential.counts());
		assert_eq!(parallel.continuation(), sequential.continuation());
	}

	#[test]
	fn training_accumulates() {
		let mut model = trained(2, 0.5, &[vec![1, 2]]);
		model.train([vec![1, 2]]);
		assert_eq!(model.counts().ngram_count(&[1, 2]), 2);
		assert_eq!(model.continuation().continuation_count(2, &[1]), 1);
	}
}
