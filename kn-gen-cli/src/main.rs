use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;

use kn_gen_core::io::{build_output_path, ensure_parent, read_corpus};
use kn_gen_core::model::codec;
use kn_gen_core::tokenizer::load_tokenizer;
use kn_gen_core::{KneserNeyModel, ModelConfig, Token, WordTokenizer};

#[derive(Parser)]
#[command(name = "kn-gen", about = "Train and sample Kneser–Ney story models")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a word vocabulary from a corpus (one story per line)
    Tokenizer {
        #[arg(long, default_value = "data/processed/corpus.txt")]
        corpus: PathBuf,
        #[arg(long, default_value = "models/tokenizer.json")]
        output: PathBuf,
        /// Minimum number of occurrences for a word to get an id
        #[arg(long, default_value = "2")]
        min_freq: usize,
        /// Maximum number of ids, special tokens included
        #[arg(long, default_value = "8000")]
        max_vocab: usize,
    },
    /// Train a model and write it as JSON plus a binary cache
    Train {
        #[arg(long, default_value = "data/processed/corpus.txt")]
        corpus: PathBuf,
        #[arg(long, default_value = "models/tokenizer.json")]
        tokenizer: PathBuf,
        #[arg(long, default_value = "models/kneser_ney_4gram.json")]
        output: PathBuf,
        #[arg(long, default_value = "4")]
        order: usize,
        #[arg(long, default_value = "0.75")]
        discount: f64,
        /// Count chunks of the corpus on every core
        #[arg(long)]
        parallel: bool,
    },
    /// Generate a story from a prefix
    Generate {
        #[arg(long, default_value = "models/kneser_ney_4gram.json")]
        model: PathBuf,
        #[arg(long, default_value = "models/tokenizer.json")]
        tokenizer: PathBuf,
        #[arg(long)]
        prefix: String,
        #[arg(long, default_value = "100")]
        max_length: usize,
        #[arg(long, default_value = "1.0")]
        temperature: f64,
        /// Fixed seed for a reproducible story
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Tokenizer { corpus, output, min_freq, max_vocab } => {
            let stories = read_corpus(&corpus)?;
            info!("Loaded {} stories", stories.len());

            let mut tokenizer = WordTokenizer::new(min_freq, max_vocab);
            tokenizer.train(&stories);
            ensure_parent(&output)?;
            tokenizer.save(&output)?;
        }
        Command::Train { corpus, tokenizer, output, order, discount, parallel } => {
            let config = ModelConfig::new(order, discount)?;
            let tokenizer = load_tokenizer(&tokenizer)?;
            let stories = read_corpus(&corpus)?;
            info!("Loaded {} stories", stories.len());

            // Stories made only of whitespace encode to nothing and carry no n-grams.
            let tokenized: Vec<Vec<Token>> = stories
                .iter()
                .map(|story| tokenizer.encode(story))
                .filter(|tokens| !tokens.is_empty())
                .collect();
            info!("Tokenized {} stories", tokenized.len());

            let mut model = KneserNeyModel::new(config);
            if parallel {
                model.train_parallel(&tokenized)?;
            } else {
                model.train(&tokenized);
            }

            ensure_parent(&output)?;
            codec::save(&model, &output)?;
            codec::save(&model, build_output_path(&output, "bin")?)?;
        }
        Command::Generate { model, tokenizer, prefix, max_length, temperature, seed } => {
            let tokenizer = load_tokenizer(&tokenizer)?;
            let model = codec::load_cached(&model)?;

            let prefix_tokens = tokenizer.encode(&prefix);
            if prefix_tokens.is_empty() {
                return Err("Prefix could not be tokenized".into());
            }

            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let tokens = model.generate(&prefix_tokens, max_length, tokenizer.eot_token(), temperature, &mut rng)?;
            info!("Generated {} tokens", tokens.len() - prefix_tokens.len());
            println!("{}", tokenizer.decode(&tokens));
        }
    }

    Ok(())
}
