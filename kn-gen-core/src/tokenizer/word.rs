use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::model::Token;
use super::{Tokenizer, TokenizerError};

/// End of sentence.
pub const EOS: Token = 0;
/// End of paragraph.
pub const EOP: Token = 1;
/// End of story.
pub const EOT: Token = 2;
/// Unknown word.
pub const UNK: Token = 3;

const SPECIAL_TOKENS: [(&str, Token); 4] = [("<EOS>", EOS), ("<EOP>", EOP), ("<EOT>", EOT), ("<UNK>", UNK)];

/// Private-use characters the corpus preprocessor glues to the end of words.
const MARKERS: [(char, &str); 3] = [('\u{E001}', "<EOS>"), ('\u{E002}', "<EOP>"), ('\u{E003}', "<EOT>")];

const KIND: &str = "word";

/// Word-level tokenizer: every whitespace-separated word is one token.
///
/// # Responsibilities
/// - Split text on whitespace, separating trailing boundary markers
/// - Build a vocabulary of the most frequent words
/// - Encode words to ids (unknown words → `UNK`) and decode ids back to text
///
/// # Invariants
/// - Ids `0..=3` are always the special tokens `EOS`, `EOP`, `EOT`, `UNK`
/// - `index` is the exact inverse of `vocab`
#[derive(Clone, Debug)]
pub struct WordTokenizer {
	min_freq: usize,
	max_vocab_size: usize,
	vocab: BTreeMap<Token, String>,
	index: HashMap<String, Token>,
}

#[derive(Serialize, Deserialize)]
struct WordTokenizerFile {
	#[serde(rename = "type")]
	kind: String,
	min_freq: usize,
	max_vocab_size: usize,
	vocab: BTreeMap<Token, String>,
}

impl Default for WordTokenizer {
	/// Keeps words seen at least twice, up to 8000 ids.
	fn default() -> Self {
		Self::new(2, 8000)
	}
}

impl WordTokenizer {
	/// Creates a tokenizer holding only the special tokens.
	pub fn new(min_freq: usize, max_vocab_size: usize) -> Self {
		let mut tokenizer = Self { min_freq, max_vocab_size, vocab: BTreeMap::new(), index: HashMap::new() };
		tokenizer.reset();
		tokenizer
	}

	fn reset(&mut self) {
		self.vocab.clear();
		self.index.clear();
		for (name, id) in SPECIAL_TOKENS {
			self.insert(id, name.to_owned());
		}
	}

	fn insert(&mut self, id: Token, word: String) {
		self.index.insert(word.clone(), id);
		self.vocab.insert(id, word);
	}

	/// Builds the vocabulary from a corpus, replacing any previous one.
	///
	/// Words are ranked by frequency (ties broken lexically); only words seen
	/// at least `min_freq` times are kept, and ids stop at `max_vocab_size`.
	pub fn train<I, S>(&mut self, corpus: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut frequencies: HashMap<String, usize> = HashMap::new();
		for text in corpus {
			for word in split_words(text.as_ref()) {
				*frequencies.entry(word).or_insert(0) += 1;
			}
		}
		for (name, _) in SPECIAL_TOKENS {
			frequencies.remove(name);
		}

		let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
		ranked.sort_by(|(a_word, a_count), (b_word, b_count)| b_count.cmp(a_count).then_with(|| a_word.cmp(b_word)));

		self.reset();
		let mut next_id = SPECIAL_TOKENS.len() as Token;
		for (word, count) in ranked {
			if count < self.min_freq || next_id as usize >= self.max_vocab_size {
				break;
			}
			self.insert(next_id, word);
			next_id += 1;
		}

		info!("Word tokenizer vocabulary size: {}", self.vocab.len());
		info!("Words in vocabulary: {}", self.vocab.len() - SPECIAL_TOKENS.len());
	}

	/// Word for an id, special tokens included.
	pub fn token_str(&self, id: Token) -> Option<&str> {
		self.vocab.get(&id).map(String::as_str)
	}

	pub fn to_json(&self) -> Result<Vec<u8>, TokenizerError> {
		let file = WordTokenizerFile {
			kind: KIND.to_owned(),
			min_freq: self.min_freq,
			max_vocab_size: self.max_vocab_size,
			vocab: self.vocab.clone(),
		};
		serde_json::to_vec_pretty(&file).map_err(TokenizerError::serialization)
	}

	/// Parses a file written by `to_json`.
	///
	/// # Errors
	/// Fails on malformed JSON, a `type` other than `"word"`, or a vocabulary
	/// without the special tokens.
	pub fn from_json(bytes: &[u8]) -> Result<Self, TokenizerError> {
		let file: WordTokenizerFile = serde_json::from_slice(bytes).map_err(TokenizerError::serialization)?;
		if file.kind != KIND {
			return Err(TokenizerError::UnsupportedKind(file.kind));
		}
		for (name, id) in SPECIAL_TOKENS {
			if file.vocab.get(&id).map(String::as_str) != Some(name) {
				return Err(TokenizerError::MissingSpecialToken(name));
			}
		}

		let mut tokenizer = Self {
			min_freq: file.min_freq,
			max_vocab_size: file.max_vocab_size,
			vocab: BTreeMap::new(),
			index: HashMap::new(),
		};
		for (id, word) in file.vocab {
			tokenizer.insert(id, word);
		}
		Ok(tokenizer)
	}

	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TokenizerError> {
		fs::write(&path, self.to_json()?)?;
		info!("Tokenizer saved to {}", path.as_ref().display());
		Ok(())
	}

	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
		let tokenizer = Self::from_json(&fs::read(&path)?)?;
		info!("Tokenizer loaded from {}", path.as_ref().display());
		Ok(tokenizer)
	}
}

impl Tokenizer for WordTokenizer {
	fn encode(&self, text: &str) -> Vec<Token> {
		split_words(text)
			.into_iter()
			.map(|word| self.index.get(&word).copied().unwrap_or(UNK))
			.collect()
	}

	/// Joins words with single spaces, stops at `EOT`, and leaves out
	/// `EOS`, `EOP`, `UNK` and ids outside the vocabulary.
	fn decode(&self, tokens: &[Token]) -> String {
		let mut words = Vec::new();
		for &id in tokens {
			match id {
				EOT => break,
				EOS | EOP | UNK => continue,
				_ => {
					if let Some(word) = self.vocab.get(&id) {
						words.push(word.as_str());
					}
				}
			}
		}
		words.join(" ")
	}

	fn eot_token(&self) -> Token {
		EOT
	}

	fn vocab_size(&self) -> usize {
		self.vocab.len()
	}
}

/// Splits on whitespace; boundary markers at the end of a word become their
/// own special-token words, after the word itself.
///
/// Earlier corpora were tokenized with the markers placed before the word
/// (`word\u{E001}` → `<EOS>`, `word`); this keeps reading order instead, so
/// models trained on those token streams do not match this tokenizer.
fn split_words(text: &str) -> Vec<String> {
	let mut words = Vec::new();
	for raw in text.split_whitespace() {
		let mut stem = raw;
		let mut trailing = Vec::new();
		while let Some(last) = stem.chars().next_back() {
			let Some(&(_, name)) = MARKERS.iter().find(|(marker, _)| *marker == last) else {
				break;
			};
			trailing.push(name);
			stem = &stem[..stem.len() - last.len_utf8()];
		}
		if !stem.is_empty() {
			words.push(stem.to_owned());
		}
		words.extend(trailing.into_iter().rev().map(str::to_owned));
	}
	words
}
