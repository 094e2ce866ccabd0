use std::collections::{BTreeSet, HashMap};

use crate::error::KnError;
use super::Token;

/// Occurrence counts for every n-gram order `1..=order` of a tokenized corpus.
///
/// # Responsibilities
/// - Slide a window of each order `k >= 2` over every training sequence
/// - Count each k-gram and the (k-1)-token context it starts with
/// - Record unigram counts and the vocabulary
/// - Merge with another store of the same order (parallel counting)
///
/// # Invariants
/// - `order >= 2`
/// - `ngrams[k - 2]` only holds keys of length `k`, `contexts[k - 2]` keys of length `k - 1`
/// - For every context `h` of order `k`: `contexts[h] == Σ_w ngrams[h + w]`
/// - Every stored count is strictly positive
#[derive(Clone, Debug, PartialEq)]
pub struct CountStore {
	order: usize,
	unigrams: HashMap<Token, u64>,
	/// k-gram counts for `k = 2..=order`, indexed by `k - 2`.
	ngrams: Vec<HashMap<Vec<Token>, u64>>,
	/// (k-1)-token context counts for `k = 2..=order`, indexed by `k - 2`.
	contexts: Vec<HashMap<Vec<Token>, u64>>,
	vocabulary: BTreeSet<Token>,
}

impl CountStore {
	/// Creates an empty store for orders `1..=order`.
	///
	/// # Errors
	/// Returns an error if `order < 2`.
	pub fn new(order: usize) -> Result<Self, KnError> {
		if order < 2 {
			return Err(KnError::config(format!("order must be >= 2, got {order}")));
		}
		Ok(Self::with_order(order))
	}

	/// Empty store for an order that was already validated (`ModelConfig`).
	pub(crate) fn with_order(order: usize) -> Self {
		Self {
			order,
			unigrams: HashMap::new(),
			ngrams: vec![HashMap::new(); order.saturating_sub(1)],
			contexts: vec![HashMap::new(); order.saturating_sub(1)],
			vocabulary: BTreeSet::new(),
		}
	}

	pub fn order(&self) -> usize {
		self.order
	}

	/// Counts every sequence of the corpus. Accumulates onto existing counts.
	pub fn train<I, S>(&mut self, corpus: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<[Token]>,
	{
		for sequence in corpus {
			self.add_sequence(sequence.as_ref());
		}
	}

	/// Adds one token sequence.
	///
	/// # Notes
	/// - Empty sequences are ignored.
	/// - A sequence shorter than `k` contributes nothing at order `k`, but still
	///   counts at every lower order.
	pub fn add_sequence(&mut self, sequence: &[Token]) {
		for &token in sequence {
			self.vocabulary.insert(token);
			*self.unigrams.entry(token).or_insert(0) += 1;
		}

		for k in 2..=self.order {
			if sequence.len() < k {
				break;
			}
			let ngrams = &mut self.ngrams[k - 2];
			let contexts = &mut self.contexts[k - 2];
			for window in sequence.windows(k) {
				increment(ngrams, window);
				increment(contexts, &window[..k - 1]);
			}
		}
	}

	/// Merges another store into this one, summing every count.
	///
	/// # Errors
	/// Returns an error if the orders do not match.
	pub fn merge(&mut self, other: &Self) -> Result<(), KnError> {
		if self.order != other.order {
			return Err(KnError::config(format!(
				"order mismatch: self={}, other={}",
				self.order, other.order
			)));
		}

		for (token, count) in &other.unigrams {
			*self.unigrams.entry(*token).or_insert(0) += count;
		}
		for (mine, theirs) in self.ngrams.iter_mut().zip(&other.ngrams) {
			merge_table(mine, theirs);
		}
		for (mine, theirs) in self.contexts.iter_mut().zip(&other.contexts) {
			merge_table(mine, theirs);
		}
		self.vocabulary.extend(other.vocabulary.iter().copied());

		Ok(())
	}

	/// Raw count of an n-gram of any length `1..=order`; 0 when unseen.
	pub fn ngram_count(&self, ngram: &[Token]) -> u64 {
		match ngram.len() {
			0 => 0,
			1 => self.unigrams.get(&ngram[0]).copied().unwrap_or(0),
			k if k <= self.order => self.ngrams[k - 2].get(ngram).copied().unwrap_or(0),
			_ => 0,
		}
	}

	/// Occurrences of `context` as the first `order - 1` tokens of an `order`-gram.
	pub fn context_count(&self, order: usize, context: &[Token]) -> u64 {
		self.context_table(order)
			.and_then(|table| table.get(context))
			.copied()
			.unwrap_or(0)
	}

	/// All counted n-grams of order `k >= 2`, or `None` when `k` is out of range.
	pub fn ngram_table(&self, order: usize) -> Option<&HashMap<Vec<Token>, u64>> {
		if order < 2 || order > self.order {
			return None;
		}
		Some(&self.ngrams[order - 2])
	}

	/// All counted contexts of order `k >= 2`, or `None` when `k` is out of range.
	pub fn context_table(&self, order: usize) -> Option<&HashMap<Vec<Token>, u64>> {
		if order < 2 || order > self.order {
			return None;
		}
		Some(&self.contexts[order - 2])
	}

	pub fn unigrams(&self) -> &HashMap<Token, u64> {
		&self.unigrams
	}

	/// Tokens seen during training, in ascending order.
	pub fn vocabulary(&self) -> &BTreeSet<Token> {
		&self.vocabulary
	}

	/// Total number of tokens counted.
	pub fn total_unigrams(&self) -> u64 {
		self.unigrams.values().sum()
	}

	/// Number of distinct n-grams at order `k` (`k = 1` counts distinct tokens).
	pub fn distinct_ngrams(&self, order: usize) -> usize {
		match order {
			1 => self.unigrams.len(),
			k => self.ngram_table(k).map_or(0, HashMap::len),
		}
	}

	/// Rebuilds a store from already-validated tables.
	pub(crate) fn from_tables(
		order: usize,
		unigrams: HashMap<Token, u64>,
		ngrams: Vec<HashMap<Vec<Token>, u64>>,
		contexts: Vec<HashMap<Vec<Token>, u64>>,
		vocabulary: BTreeSet<Token>,
	) -> Self {
		Self { order, unigrams, ngrams, contexts, vocabulary }
	}
}

fn increment(table: &mut HashMap<Vec<Token>, u64>, key: &[Token]) {
	// Avoid allocating a key for grams that are already present.
	match table.get_mut(key) {
		Some(count) => *count += 1,
		None => {
			table.insert(key.to_vec(), 1);
		}
	}
}

fn merge_table(mine: &mut HashMap<Vec<Token>, u64>, theirs: &HashMap<Vec<Token>, u64>) {
	for (key, count) in theirs {
		match mine.get_mut(key) {
			Some(existing) => *existing += count,
			None => {
				mine.insert(key.clone(), *count);
			}
		}
	}
}
