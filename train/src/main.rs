//! 係り受け解析モデルの学習ユーティリティ
//!
//! CoNLL-X形式のコーパスと素性テンプレートファイルからモデルを学習し、
//! zstdで圧縮して書き出します。

use std::fs::File;
use std::io;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use dualparse::errors::DualParseError;
use dualparse::trainer::{Corpus, Trainer, TrainerConfig};

/// 学習コマンドの引数
#[derive(Parser, Debug)]
#[clap(name = "train", about = "Dependency parser trainer")]
struct Args {
    /// Corpus file in the CoNLL-X format.
    #[clap(short = 't', long)]
    corpus: PathBuf,

    /// Feature template file (feature.def).
    #[clap(short = 'f', long)]
    feature_def: PathBuf,

    /// A file to which the model is output. The file is compressed by zstd.
    #[clap(short = 'o', long)]
    model_out: PathBuf,

    /// Number of passes over the corpus.
    #[clap(long, default_value = "10")]
    epochs: u32,

    /// Learning rate of the perceptron updates.
    #[clap(long, default_value = "1.0")]
    learning_rate: f64,

    /// Share of the edge weights given to the arborescence problem, in [0, 1].
    #[clap(long, default_value = "0.5")]
    beta: f64,

    /// Maximum number of subgradient steps per sentence.
    #[clap(long, default_value = "50")]
    max_steps: u32,

    /// Loss weight for loss-augmented decoding. Zero disables it.
    #[clap(long, default_value = "0.0")]
    loss_weight: f64,

    /// Uses the last weights instead of the averaged ones.
    #[clap(long)]
    no_average: bool,

    /// Number of threads used for the per-head subproblems.
    #[clap(long, default_value = "1")]
    num_threads: u32,
}

/// 学習処理中に発生する可能性のあるエラー
#[derive(Debug, Error)]
enum TrainError {
    /// 入出力エラー
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 学習処理エラー
    #[error("Training process failed: {0}")]
    DualParse(#[from] DualParseError),

    /// 引数エラー
    #[error("Invalid argument: {0}")]
    Argument(String),
}

fn validate(args: &Args) -> Result<(), TrainError> {
    if args.epochs == 0 {
        return Err(TrainError::Argument("--epochs must be at least 1".into()));
    }
    if args.num_threads == 0 {
        return Err(TrainError::Argument("--num-threads must be at least 1".into()));
    }
    if !(0.0..=1.0).contains(&args.beta) {
        return Err(TrainError::Argument("--beta must be in [0, 1]".into()));
    }
    if !(args.learning_rate.is_finite() && args.learning_rate > 0.0) {
        return Err(TrainError::Argument("--learning-rate must be positive".into()));
    }
    if !(args.loss_weight.is_finite() && args.loss_weight >= 0.0) {
        return Err(TrainError::Argument("--loss-weight must be non-negative".into()));
    }
    Ok(())
}

fn main() -> Result<(), TrainError> {
    let args = Args::parse();
    validate(&args)?;

    let feature_templates_rdr = File::open(&args.feature_def)?;
    let config = TrainerConfig::from_reader(feature_templates_rdr)?;

    eprintln!("Loading the corpus...");
    let corpus_rdr = File::open(&args.corpus)?;
    let corpus = Corpus::from_reader(corpus_rdr)?;
    eprintln!("Loaded {} sentences", corpus.len());

    let trainer = Trainer::new(config)
        .epochs(args.epochs)
        .learning_rate(args.learning_rate)
        .beta(args.beta)
        .max_steps(args.max_steps)
        .loss_weight(args.loss_weight)
        .averaged(!args.no_average)
        .num_threads(args.num_threads);

    eprintln!("Starting model training...");
    let parser = trainer.train(corpus)?;
    eprintln!("Trained {} features", parser.num_features());

    eprintln!("Writing the model to {}...", args.model_out.display());
    let file = File::create(&args.model_out)?;
    let mut encoder = zstd::stream::Encoder::new(file, 19)?;
    parser.write(&mut encoder)?;
    encoder.finish()?;

    eprintln!("Successfully trained and wrote the model.");
    Ok(())
}
