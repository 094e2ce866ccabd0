use std::fs;
use std::path::PathBuf;

use rand::SeedableRng;
use rand::rngs::StdRng;

use kn_gen_core::io::build_output_path;
use kn_gen_core::model::codec;
use kn_gen_core::tokenizer::word::EOT;
use kn_gen_core::{KnError, KneserNeyModel, ModelConfig, Token, Tokenizer, WordTokenizer};

const CORPUS: [&str; 4] = [
	"ایک دن ایک لڑکا بازار گیا\u{E001} وہاں بہت لوگ تھے\u{E002} لڑکا خوش ہوا\u{E003}",
	"ایک دن بارش ہوئی\u{E001} لڑکا گھر میں رہا\u{E003}",
	"ایک لڑکی بازار گئی\u{E001} وہاں بہت پھل تھے\u{E003}",
	"لڑکا اور لڑکی دوست تھے\u{E001} وہ ہر دن کھیلتے تھے\u{E003}",
];

fn scratch(tag: &str) -> PathBuf {
	let dir = std::env::temp_dir().join(format!("kn-gen-pipeline-{tag}-{}", std::process::id()));
	fs::create_dir_all(&dir).unwrap();
	dir
}

fn pipeline() -> (WordTokenizer, KneserNeyModel) {
	let mut tokenizer = WordTokenizer::new(1, 8000);
	tokenizer.train(CORPUS);
	let mut model = KneserNeyModel::new(ModelConfig::default());
	model.train(CORPUS.iter().map(|story| tokenizer.encode(story)));
	(tokenizer, model)
}

fn sample_pairs(model: &KneserNeyModel) -> Vec<(Vec<Token>, Token)> {
	let vocabulary: Vec<Token> = model.vocabulary().iter().copied().collect();
	let mut pairs = Vec::new();
	for (i, &a) in vocabulary.iter().enumerate() {
		let b = vocabulary[(i * 7 + 3) % vocabulary.len()];
		let c = vocabulary[(i * 5 + 1) % vocabulary.len()];
		pairs.push((vec![a, b, c], vocabulary[(i * 3) % vocabulary.len()]));
		pairs.push((vec![a], b));
		pairs.push((Vec::new(), c));
	}
	pairs
}

#[test]
fn saved_models_evaluate_like_the_original() {
	let (_, model) = pipeline();
	let dir = scratch("persist");
	let json = dir.join("kn.json");
	let binary = build_output_path(&json, "bin").unwrap();
	codec::save(&model, &json).unwrap();
	codec::save(&model, &binary).unwrap();

	for path in [&json, &binary] {
		let restored = codec::load(path).unwrap();
		assert_eq!(restored.order(), model.order());
		assert_eq!(restored.vocabulary(), model.vocabulary());
		for (history, token) in sample_pairs(&model) {
			let expected = model.prob(&history, token).unwrap();
			let actual = restored.prob(&history, token).unwrap();
			assert!((expected - actual).abs() < 1e-12, "{history:?} -> {token}: {expected} vs {actual}");
		}
	}

	fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn cached_binary_is_preferred() {
	let (tokenizer, model) = pipeline();
	let dir = scratch("cache");
	let json = dir.join("kn.json");
	codec::save(&model, &json).unwrap();

	let mut other = KneserNeyModel::new(ModelConfig::new(2, 0.5).unwrap());
	other.train(CORPUS.iter().map(|story| tokenizer.encode(story)));
	codec::save(&other, build_output_path(&json, "bin").unwrap()).unwrap();

	assert_eq!(codec::load_cached(&json).unwrap().order(), 2);
	assert_eq!(codec::load(&json).unwrap().order(), 4);

	fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn continuation_never_exceeds_context_count() {
	let (_, model) = pipeline();
	for k in 2..=model.order() {
		let contexts = model.counts().context_table(k).unwrap();
		let continuations = model.continuation().continuation_table(k).unwrap();
		for (context, distinct) in continuations {
			assert!(*distinct <= contexts[context]);
		}
	}
}

#[test]
fn end_of_text_prefix_at_limit_is_returned_as_is() {
	let (_, model) = pipeline();
	let mut rng = StdRng::seed_from_u64(0);
	assert_eq!(model.generate(&[EOT], 1, EOT, 1.0, &mut rng).unwrap(), vec![EOT]);
}

#[test]
fn generated_stories_decode_from_the_prefix() {
	let (tokenizer, model) = pipeline();
	let prefix = tokenizer.encode("ایک دن");
	assert_eq!(prefix.len(), 2);

	let mut first_rng = StdRng::seed_from_u64(42);
	let mut second_rng = StdRng::seed_from_u64(42);
	let first = model.generate(&prefix, 60, tokenizer.eot_token(), 0.9, &mut first_rng).unwrap();
	let second = model.generate(&prefix, 60, tokenizer.eot_token(), 0.9, &mut second_rng).unwrap();

	assert_eq!(first, second);
	assert_eq!(&first[..2], prefix.as_slice());
	assert!(first.len() <= 60);
	if first.len() < 60 {
		assert_eq!(first.last(), Some(&EOT));
	}
	assert!(tokenizer.decode(&first).starts_with("ایک دن"));
}

#[test]
fn persisted_input_without_order_is_a_format_error() {
	let (_, model) = pipeline();
	let mut value: serde_json::Value = serde_json::from_slice(&codec::encode_json(&model).unwrap()).unwrap();
	value.as_object_mut().unwrap().remove("order");
	let bytes = serde_json::to_vec(&value).unwrap();
	assert!(matches!(codec::decode_json(&bytes), Err(KnError::Format(_))));
}
