//! dualparseのテストモジュール群
//!
//! 学習から保存、読み込み、解析までの一連の流れを検証するテストを含みます。

mod parser;
