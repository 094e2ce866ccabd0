use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::KnError;
use crate::io::build_output_path;
use super::Token;
use super::continuation::ContinuationStats;
use super::counts::CountStore;
use super::kneser_ney::KneserNeyModel;

/// One table entry: the token tuple itself is the key, stored as an integer
/// array so that its length and element boundaries are explicit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GramEntry {
	pub gram: Vec<Token>,
	pub count: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TokenEntry {
	pub token: Token,
	pub count: u64,
}

/// Complete persisted state of a `KneserNeyModel`.
///
/// Tables are keyed by order; entries are sorted so that saving the same
/// model twice yields identical bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelRecord {
	pub order: usize,
	pub discount: f64,
	/// Orders `1..=order`.
	pub count_tables: BTreeMap<usize, Vec<GramEntry>>,
	/// Orders `2..=order`, keys of length `order - 1`.
	pub context_count_tables: BTreeMap<usize, Vec<GramEntry>>,
	/// Orders `2..=order`, keys of length `order - 1`.
	pub continuation_tables: BTreeMap<usize, Vec<GramEntry>>,
	pub unigram_continuation_counts: Vec<TokenEntry>,
	pub total_unigram_continuations: u64,
	pub vocabulary: Vec<Token>,
}

impl ModelRecord {
	/// Snapshots a model.
	pub fn from_model(model: &KneserNeyModel) -> Self {
		let counts = model.counts();
		let continuation = model.continuation();

		let mut count_tables = BTreeMap::new();
		let unigrams = counts
			.unigrams()
			.iter()
			.map(|(&token, &count)| (vec![token], count));
		count_tables.insert(1, sorted_entries(unigrams));

		let mut context_count_tables = BTreeMap::new();
		let mut continuation_tables = BTreeMap::new();
		for k in 2..=model.order() {
			count_tables.insert(k, sorted_entries(cloned(counts.ngram_table(k))));
			context_count_tables.insert(k, sorted_entries(cloned(counts.context_table(k))));
			continuation_tables.insert(k, sorted_entries(cloned(continuation.continuation_table(k))));
		}

		let mut unigram_continuation_counts: Vec<TokenEntry> = continuation
			.unigram_continuations()
			.iter()
			.map(|(&token, &count)| TokenEntry { token, count })
			.collect();
		unigram_continuation_counts.sort_by_key(|entry| entry.token);

		Self {
			order: model.order(),
			discount: model.discount(),
			count_tables,
			context_count_tables,
			continuation_tables,
			unigram_continuation_counts,
			total_unigram_continuations: continuation.total_unigram_continuations(),
			vocabulary: model.vocabulary().iter().copied().collect(),
		}
	}

	/// Validates the record and rebuilds the model.
	///
	/// # Errors
	/// Returns `KnError::Format` if the order or discount is out of range, if a
	/// table sits at an impossible order, if a key has the wrong length or
	/// appears twice, if a count is zero, or if the derived tables disagree with
	/// the n-gram counts. Nothing is returned unless every check passes.
	pub fn into_model(self) -> Result<KneserNeyModel, KnError> {
		let config = ModelConfig::new(self.order, self.discount).map_err(KnError::format)?;
		let order = config.order();

		let mut unigrams: HashMap<Token, u64> = HashMap::new();
		let mut ngrams = vec![HashMap::new(); order - 1];
		for (k, entries) in self.count_tables {
			check_order("count_tables", k, 1, order)?;
			if k == 1 {
				for (gram, count) in table_from_entries("count_tables", k, 1, entries)? {
					unigrams.insert(gram[0], count);
				}
			} else {
				ngrams[k - 2] = table_from_entries("count_tables", k, k, entries)?;
			}
		}

		let mut contexts = vec![HashMap::new(); order - 1];
		for (k, entries) in self.context_count_tables {
			check_order("context_count_tables", k, 2, order)?;
			contexts[k - 2] = table_from_entries("context_count_tables", k, k - 1, entries)?;
		}

		let mut continuations = vec![HashMap::new(); order - 1];
		for (k, entries) in self.continuation_tables {
			check_order("continuation_tables", k, 2, order)?;
			continuations[k - 2] = table_from_entries("continuation_tables", k, k - 1, entries)?;
		}

		let mut unigram_continuations = HashMap::new();
		for entry in self.unigram_continuation_counts {
			if entry.count == 0 {
				return Err(KnError::format(format!("unigram continuation of token {} is zero", entry.token)));
			}
			if unigram_continuations.insert(entry.token, entry.count).is_some() {
				return Err(KnError::format(format!("duplicate unigram continuation for token {}", entry.token)));
			}
		}

		let vocabulary: BTreeSet<Token> = self.vocabulary.into_iter().collect();
		if let Some(token) = unigrams.keys().find(|token| !vocabulary.contains(token)) {
			return Err(KnError::format(format!("token {token} is counted but missing from the vocabulary")));
		}

		check_context_sums(order, &ngrams, &contexts)?;
		for k in 2..=order {
			for (context, &distinct) in &continuations[k - 2] {
				let total = contexts[k - 2].get(context).copied().unwrap_or(0);
				if distinct > total {
					return Err(KnError::format(format!(
						"continuation count {distinct} exceeds context count {total} for {context:?} at order {k}"
					)));
				}
			}
		}

		let sum: u64 = unigram_continuations.values().sum();
		if sum != self.total_unigram_continuations {
			return Err(KnError::format(format!(
				"total_unigram_continuations is {} but the table sums to {sum}",
				self.total_unigram_continuations
			)));
		}

		let counts = CountStore::from_tables(order, unigrams, ngrams, contexts, vocabulary);
		let continuation = ContinuationStats::from_tables(continuations, unigram_continuations, sum);
		check_continuations(&ContinuationStats::build(&counts), &continuation, order)?;
		Ok(KneserNeyModel::from_parts(config, counts, continuation))
	}
}

/// Serializes a model as self-describing JSON.
pub fn encode_json(model: &KneserNeyModel) -> Result<Vec<u8>, KnError> {
	serde_json::to_vec(&ModelRecord::from_model(model)).map_err(KnError::format)
}

/// Rebuilds a model from JSON produced by `encode_json`.
///
/// # Errors
/// Returns `KnError::Format` for malformed JSON, missing fields, negative or
/// non-integer counts, and every check of `ModelRecord::into_model`.
pub fn decode_json(bytes: &[u8]) -> Result<KneserNeyModel, KnError> {
	let record: ModelRecord = serde_json::from_slice(bytes).map_err(KnError::format)?;
	record.into_model()
}

/// Serializes a model with postcard (compact, not self-describing).
pub fn encode_binary(model: &KneserNeyModel) -> Result<Vec<u8>, KnError> {
	postcard::to_stdvec(&ModelRecord::from_model(model)).map_err(KnError::format)
}

/// Rebuilds a model from bytes produced by `encode_binary`.
pub fn decode_binary(bytes: &[u8]) -> Result<KneserNeyModel, KnError> {
	let record: ModelRecord = postcard::from_bytes(bytes).map_err(KnError::format)?;
	record.into_model()
}

/// Writes a model to `path`: postcard for a `.bin` extension, JSON otherwise.
pub fn save<P: AsRef<Path>>(model: &KneserNeyModel, path: P) -> Result<(), KnError> {
	let path = path.as_ref();
	let bytes = if is_binary(path) { encode_binary(model)? } else { encode_json(model)? };
	fs::write(path, bytes)?;
	info!("Kneser–Ney {}-gram model saved to {}", model.order(), path.display());
	Ok(())
}

/// Reads a model from `path`: postcard for a `.bin` extension, JSON otherwise.
pub fn load<P: AsRef<Path>>(path: P) -> Result<KneserNeyModel, KnError> {
	let path = path.as_ref();
	let bytes = fs::read(path)?;
	let model = if is_binary(path) { decode_binary(&bytes)? } else { decode_json(&bytes)? };
	info!("Kneser–Ney {}-gram model loaded from {}", model.order(), path.display());
	Ok(model)
}

/// Loads `path`, preferring the postcard cache next to it when one exists.
///
/// Example: `models/kn.json` is read from `models/kn.bin` if that file exists.
pub fn load_cached<P: AsRef<Path>>(path: P) -> Result<KneserNeyModel, KnError> {
	let binary_path = build_output_path(&path, "bin")?;
	if binary_path.exists() {
		return load(binary_path);
	}
	load(path)
}

fn is_binary(path: &Path) -> bool {
	path.extension().is_some_and(|extension| extension == "bin")
}

fn cloned(table: Option<&HashMap<Vec<Token>, u64>>) -> impl Iterator<Item = (Vec<Token>, u64)> + '_ {
	table
		.into_iter()
		.flat_map(|table| table.iter().map(|(gram, &count)| (gram.clone(), count)))
}

fn sorted_entries(entries: impl Iterator<Item = (Vec<Token>, u64)>) -> Vec<GramEntry> {
	let mut entries: Vec<GramEntry> = entries.map(|(gram, count)| GramEntry { gram, count }).collect();
	entries.sort_by(|a, b| a.gram.cmp(&b.gram));
	entries
}

fn check_order(table: &str, k: usize, min: usize, order: usize) -> Result<(), KnError> {
	if k < min || k > order {
		return Err(KnError::format(format!("{table} has order {k}, expected {min}..={order}")));
	}
	Ok(())
}

fn table_from_entries(
	table: &str,
	k: usize,
	key_len: usize,
	entries: Vec<GramEntry>,
) -> Result<HashMap<Vec<Token>, u64>, KnError> {
	let mut map = HashMap::with_capacity(entries.len());
	for GramEntry { gram, count } in entries {
		if gram.len() != key_len {
			return Err(KnError::format(format!(
				"{table}[{k}] key {gram:?} has length {}, expected {key_len}",
				gram.len()
			)));
		}
		if count == 0 {
			return Err(KnError::format(format!("{table}[{k}] key {gram:?} has a zero count")));
		}
		if let Some(previous) = map.insert(gram, count) {
			return Err(KnError::format(format!("{table}[{k}] has a duplicate key (previous count {previous})")));
		}
	}
	Ok(map)
}

fn check_context_sums(
	order: usize,
	ngrams: &[HashMap<Vec<Token>, u64>],
	contexts: &[HashMap<Vec<Token>, u64>],
) -> Result<(), KnError> {
	for k in 2..=order {
		let mut sums: HashMap<&[Token], u64> = HashMap::new();
		for (ngram, &count) in &ngrams[k - 2] {
			*sums.entry(&ngram[..k - 1]).or_insert(0) += count;
		}
		if sums.len() != contexts[k - 2].len() {
			return Err(KnError::format(format!(
				"order {k} has {} contexts but its n-grams imply {}",
				contexts[k - 2].len(),
				sums.len()
			)));
		}
		for (context, sum) in sums {
			let stored = contexts[k - 2].get(context).copied().unwrap_or(0);
			if stored != sum {
				return Err(KnError::format(format!(
					"context {context:?} at order {k} has count {stored}, its n-grams sum to {sum}"
				)));
			}
		}
	}
	Ok(())
}

/// Stored N1+ tables must be exactly what the n-gram counts imply.
fn check_continuations(derived: &ContinuationStats, stored: &ContinuationStats, order: usize) -> Result<(), KnError> {
	for k in 2..=order {
		if derived.continuation_table(k) != stored.continuation_table(k) {
			return Err(KnError::format(format!(
				"continuation_tables[{k}] disagrees with the order {k} n-gram counts"
			)));
		}
	}
	if derived.unigram_continuations() != stored.unigram_continuations() {
		return Err(KnError::format("unigram_continuation_counts disagree with the bigram counts"));
	}
	Ok(())
}
