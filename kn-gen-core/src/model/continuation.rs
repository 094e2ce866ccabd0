use std::collections::HashMap;

use super::Token;
use super::counts::CountStore;

/// Distinct-continuation counts (N1+) used by Kneser–Ney discounting.
///
/// Every count here measures *how many different* tokens were observed,
/// never how often: an n-gram seen a thousand times contributes exactly one.
///
/// # Invariants
/// - `continuations[k - 2][h] <= CountStore::context_count(k, h)`
/// - `total_unigram_continuations == Σ unigram_continuations`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContinuationStats {
	/// N1+(h ·) per order `k = 2..=order`, indexed by `k - 2`.
	continuations: Vec<HashMap<Vec<Token>, u64>>,
	/// N1+(· w): distinct tokens observed right before `w`.
	unigram_continuations: HashMap<Token, u64>,
	total_unigram_continuations: u64,
}

impl ContinuationStats {
	/// Derives the statistics from a fully counted store.
	pub fn build(counts: &CountStore) -> Self {
		let mut continuations = Vec::with_capacity(counts.order() - 1);
		for k in 2..=counts.order() {
			let mut table: HashMap<Vec<Token>, u64> = HashMap::new();
			if let Some(ngrams) = counts.ngram_table(k) {
				// Keys are unique, so each positive n-gram is one distinct successor.
				for (ngram, &count) in ngrams {
					if count == 0 {
						continue;
					}
					let context = &ngram[..k - 1];
					match table.get_mut(context) {
						Some(distinct) => *distinct += 1,
						None => {
							table.insert(context.to_vec(), 1);
						}
					}
				}
			}
			continuations.push(table);
		}

		let mut unigram_continuations: HashMap<Token, u64> = HashMap::new();
		if let Some(bigrams) = counts.ngram_table(2) {
			for (bigram, &count) in bigrams {
				if count > 0 {
					*unigram_continuations.entry(bigram[1]).or_insert(0) += 1;
				}
			}
		}
		let total_unigram_continuations = unigram_continuations.values().sum();

		Self { continuations, unigram_continuations, total_unigram_continuations }
	}

	/// N1+(h ·) at order `k`; 0 for unseen contexts or out-of-range orders.
	pub fn continuation_count(&self, order: usize, context: &[Token]) -> u64 {
		self.continuation_table(order)
			.and_then(|table| table.get(context))
			.copied()
			.unwrap_or(0)
	}

	pub fn continuation_table(&self, order: usize) -> Option<&HashMap<Vec<Token>, u64>> {
		order.checked_sub(2).and_then(|index| self.continuations.get(index))
	}

	/// N1+(· w); 0 for tokens never seen as the second element of a bigram.
	pub fn unigram_continuation(&self, token: Token) -> u64 {
		self.unigram_continuations.get(&token).copied().unwrap_or(0)
	}

	pub fn unigram_continuations(&self) -> &HashMap<Token, u64> {
		&self.unigram_continuations
	}

	pub fn total_unigram_continuations(&self) -> u64 {
		self.total_unigram_continuations
	}

	/// Rebuilds the statistics from already-validated tables.
	pub(crate) fn from_tables(
		continuations: Vec<HashMap<Vec<Token>, u64>>,
		unigram_continuations: HashMap<Token, u64>,
		total_unigram_continuations: u64,
	) -> Self {
		Self { continuations, unigram_continuations, total_unigram_continuations }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn stats_for(order: usize, corpus: &[Vec<Token>]) -> (CountStore, ContinuationStats) {
		let mut counts = CountStore::new(order).unwrap();
		counts.train(corpus);
		let stats = ContinuationStats::build(&counts);
		(counts, stats)
	}

	#[test]
	fn counts_distinct_successors_not_frequency() {
		// [1] is followed by 2 three times and by 3 once.
		let (counts, stats) = stats_for(2, &[vec![1, 2, 1, 2, 1, 2, 1, 3]]);

		assert_eq!(counts.context_count(2, &[1]), 4);
		assert_eq!(stats.continuation_count(2, &[1]), 2);
		assert_eq!(stats.continuation_count(2, &[2]), 1);
		assert_eq!(stats.continuation_count(2, &[3]), 0);
	}

	#[test]
	fn unigram_continuations_count_distinct_predecessors() {
		let (_, stats) = stats_for(3, &[vec![1, 3, 2, 3, 2, 3], vec![4]]);

		// 3 follows 1 and 2; 2 follows 3 only; 1 and 4 never follow anything.
		assert_eq!(stats.unigram_continuation(3), 2);
		assert_eq!(stats.unigram_continuation(2), 1);
		assert_eq!(stats.unigram_continuation(1), 0);
		assert_eq!(stats.unigram_continuation(4), 0);
		assert_eq!(stats.total_unigram_continuations(), 3);
	}

	#[test]
	fn continuation_never_exceeds_context_count() {
		let (counts, stats) = stats_for(4, &[
			vec![5, 1, 2, 3, 1, 2, 4, 1, 2, 3],
			vec![2, 2, 2, 2, 1],
			vec![3, 1],
		]);

		for k in 2..=4 {
			for (context, &distinct) in stats.continuation_table(k).unwrap() {
				assert!(distinct >= 1);
				assert!(distinct <= counts.context_count(k, context));
			}
		}
	}

	#[test]
	fn single_token_sequences_have_no_continuations() {
		let (_, stats) = stats_for(3, &[vec![1], vec![2]]);
		assert_eq!(stats.total_unigram_continuations(), 0);
		assert!(stats.continuation_table(2).unwrap().is_empty());
	}
}
