//! # dualparse
//!
//! 双対分解による推論と構造化パーセプトロンによる学習を備えた、二次の係り受け解析器です。
//!
//! ## 概要
//!
//! 係り受け木のスコアを、辺・祖父母・兄弟の3種類の因子の素性の線形和として定義します。
//! 二次の因子を含む木の厳密な最大化は難しいため、推論エンジンは問題を
//! 全域有向木問題と主辞ごとの部分問題に分解し、劣勾配法で両者の解を一致させます。
//!
//! ## 主な機能
//!
//! - **双対分解による推論**: [`decoder`] モジュール
//! - **因子の入出力データモデル**: [`input`]、[`output`] モジュール
//! - **構造化パーセプトロン**: [`model`]、[`trainer`] モジュール
//! - **学習済み解析器の保存と読み込み**: rkyvを使用した [`Parser`]
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use dualparse::trainer::{Corpus, Trainer, TrainerConfig};
//! use dualparse::Sentence;
//!
//! let feature_def = "EDGE %h.pos_%m.pos\nEDGE %h.pos_%m.pos_%dir%dist";
//! let corpus_conll = "\
//! 1\tJohn\t_\tN\tNNP\t_\t2\t_\t_\t_
//! 2\tsaw\t_\tV\tVBD\t_\t0\t_\t_\t_
//! 3\tMary\t_\tN\tNNP\t_\t2\t_\t_\t_
//! ";
//!
//! let config = TrainerConfig::from_reader(feature_def.as_bytes())?;
//! let corpus = Corpus::from_reader(corpus_conll.as_bytes())?;
//! let parser = Trainer::new(config).epochs(3).train(corpus)?;
//!
//! let sentence: Sentence = [("Bob", "NNP"), ("met", "VBD"), ("Ann", "NNP")]
//!     .into_iter()
//!     .collect();
//! let heads = parser.parse(&sentence)?;
//! assert_eq!(vec![Some(1), None, Some(1)], heads);
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("`target_pointer_width` must be 32 or 64");

/// 双対分解による推論エンジン
pub mod decoder;

/// エラー型の定義
pub mod errors;

/// 因子素性の入力データ構造
pub mod input;

/// 線形モデル
pub mod model;

/// 係り受け構造の出力データ構造
pub mod output;

/// 学習済みの解析器
pub mod parser;

/// 文の表現
pub mod sentence;

/// 部分問題のソルバー
pub mod solver;

/// モデル学習機能
pub mod trainer;

/// 内部ユーティリティ関数
pub mod utils;

#[cfg(test)]
mod tests;

// Re-exports
pub use decoder::{DecodeReport, Decoder, DecoderConfig};
pub use parser::Parser;
pub use sentence::{Sentence, Token};
pub use solver::RootPolicy;

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
