//! 双対分解による二次の係り受け解析の推論エンジン。
//!
//! 辺・祖父母・兄弟の各因子をまとめた目的関数は厳密に最大化することが難しいため、
//! 辺変数を2つに複製し、次の2つの部分問題に分解します。
//!
//! 1. 全域有向木問題（辺の重みのβ倍と双対変数）
//! 2. 主辞ごとの祖父母・兄弟連鎖の問題（辺の重みの(1-β)倍と因子の重みから双対変数を引いたもの）
//!
//! 両者の辺の選び方が一致するまで、劣勾配法で双対変数を更新します。
//! 一致しなかった場合でも、これまでに見つかった最良の木を返します。
//!
//! # 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::num::NonZeroU32;
//!
//! use dualparse::decoder::{Decoder, DecoderConfig};
//! use dualparse::input::DependencyInputBuilder;
//! use dualparse::model::Model;
//! use dualparse::output::DependencyOutput;
//!
//! let id = |x| NonZeroU32::new(x).unwrap();
//!
//! // 0 -> 1 is the only edge with a positive weight.
//! let mut builder = DependencyInputBuilder::new(2)?;
//! builder.edge(0, 1, vec![id(1)])?;
//! builder.edge(1, 0, vec![id(2)])?;
//! let input = builder.build();
//!
//! let mut model = Model::new();
//! model.add_weight(id(1), 1.0);
//! model.add_weight(id(2), -1.0);
//!
//! let decoder = Decoder::new(DecoderConfig::default())?;
//! let mut worker = decoder.new_worker();
//! let mut output = DependencyOutput::new(input.len());
//! let report = worker.decode(&model, &input, &mut output)?;
//!
//! assert!(report.converged);
//! assert_eq!(&[None, Some(0)], output.heads());
//! # Ok(())
//! # }
//! ```

mod tables;
mod worker;

use std::sync::Arc;

use rkyv::{Archive, Deserialize, Serialize};

use crate::errors::{DualParseError, Result};
use crate::solver::RootPolicy;

pub use crate::decoder::worker::Worker;

/// 推論エンジンの設定。
#[derive(Clone, Copy, Debug, PartialEq, Archive, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// 辺の重みのうち、全域有向木問題に割り当てる割合。[0, 1]
    pub beta: f64,

    /// 劣勾配法の最大ステップ数
    pub max_steps: u32,

    /// 損失付き推論で、正解と異なる係り受けを含む祖父母因子に加える重み
    pub loss_weight: f64,

    /// 根の選び方
    pub root_policy: RootPolicy,

    /// `true` の場合、全域有向木問題で重みが正でない辺を使いません
    pub positive_edges_only: bool,

    /// 主辞ごとの部分問題を解くスレッド数
    pub num_threads: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            beta: 0.5,
            max_steps: 50,
            loss_weight: 0.0,
            root_policy: RootPolicy::Unique,
            positive_edges_only: false,
            num_threads: 1,
        }
    }
}

/// 1回の推論の結果の要約。
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeReport {
    /// 実行した劣勾配ステップ数
    pub steps: u32,

    /// 2つの部分問題の解が一致して停止したかどうか
    pub converged: bool,

    /// 最良の木の目的関数値
    pub best_objective: f64,

    /// 最後の双対目的関数値（最良の木の目的関数値の上界の推定）
    pub dual_objective: f64,

    /// 双対変数が0のときの最初の全域有向木の重み
    pub initial_tree_weight: f64,

    /// 初期状態と各ステップ後の、それまでの最良の目的関数値。単調非減少です。
    pub best_trace: Vec<f64>,
}

impl DecodeReport {
    fn empty() -> Self {
        Self {
            steps: 0,
            converged: true,
            best_objective: 0.0,
            dual_objective: 0.0,
            initial_tree_weight: 0.0,
            best_trace: vec![0.0],
        }
    }
}

/// 推論エンジン。
///
/// 設定とスレッドプールを保持します。複製は安価で、
/// 推論の作業領域は [`Worker`] が保持します。
#[derive(Clone)]
pub struct Decoder {
    config: DecoderConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Decoder {
    /// 新しい推論エンジンを作成します。
    ///
    /// # 引数
    ///
    /// * `config` - 推論エンジンの設定
    ///
    /// # エラー
    ///
    /// 以下の場合に [`DualParseError`] が返されます：
    ///
    /// - `beta` が [0, 1] の範囲外の場合
    /// - `loss_weight` が有限でない場合
    /// - `num_threads` が0の場合、またはスレッドプールの構築に失敗した場合
    pub fn new(config: DecoderConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.beta) {
            return Err(DualParseError::invalid_argument(
                "beta",
                format!("must be in [0, 1], but got {}", config.beta),
            ));
        }
        if !config.loss_weight.is_finite() {
            return Err(DualParseError::invalid_argument(
                "loss_weight",
                "must be finite",
            ));
        }
        if config.num_threads == 0 {
            return Err(DualParseError::invalid_argument(
                "num_threads",
                "must be at least 1",
            ));
        }
        let pool = if config.num_threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_threads as usize)
                .thread_name(|i| format!("dualparse-head-{i}"))
                .build()?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(Self { config, pool })
    }

    /// 設定を返します。
    #[inline(always)]
    pub const fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// 新しいワーカーを作成します。
    pub fn new_worker(&self) -> Worker {
        Worker::new(self.clone())
    }
}
