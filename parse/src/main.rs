//! 係り受け解析を実行するユーティリティ
//!
//! 標準入力から読み込んだCoNLL-X形式の文を解析し、
//! 予測した親を HEAD 列に埋めて標準出力に書き出します。

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;

use dualparse::trainer::{Corpus, Example};
use dualparse::{DecoderConfig, RootPolicy};

/// コマンドライン引数
#[derive(Parser, Debug)]
#[clap(name = "parse", about = "Predicts dependency heads")]
struct Args {
    /// Model file (in zstd).
    #[clap(short = 'i', long)]
    model: PathBuf,

    /// Overrides the maximum number of subgradient steps stored in the model.
    #[clap(long)]
    max_steps: Option<u32>,

    /// Allows more than one token to attach to the root.
    #[clap(long)]
    multiple_roots: bool,

    /// Prints a summary of each decoding to stderr.
    #[clap(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    eprintln!("Loading the model...");
    let decoder = zstd::Decoder::new(File::open(&args.model)?)?;
    let mut parser = dualparse::Parser::read(decoder)?;

    let mut config: DecoderConfig = *parser.decoder_config();
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    if args.multiple_roots {
        config.root_policy = RootPolicy::Multiple;
    }
    parser.set_decoder_config(config)?;

    eprintln!("Ready to parse");

    let corpus = Corpus::from_reader(std::io::stdin().lock())?;

    let out = std::io::stdout();
    let mut out = BufWriter::new(out.lock());
    for (i, example) in corpus.iter().enumerate() {
        let (heads, report) = parser.parse_with_report(example.sentence())?;
        if args.verbose {
            eprintln!(
                "sentence {i}: steps={} converged={} objective={}",
                report.steps, report.converged, report.best_objective
            );
        }
        Example::new(example.sentence().clone(), heads)?.write(&mut out)?;
    }
    out.flush()?;

    Ok(())
}
