//! 構造化パーセプトロンによるモデル学習のためのモジュール。
//!
//! コーパスの各例文について双対分解で係り受けを推論し、
//! 正解と異なる場合に因子素性の重みを更新します。
//!
//! # 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::fs::File;
//!
//! use dualparse::trainer::{Corpus, Trainer, TrainerConfig};
//!
//! let feature_templates_rdr = File::open("src/tests/resources/feature.def")?;
//! let config = TrainerConfig::from_reader(feature_templates_rdr)?;
//!
//! let trainer = Trainer::new(config).epochs(5).max_steps(30);
//!
//! let corpus_rdr = File::open("src/tests/resources/corpus.conll")?;
//! let corpus = Corpus::from_reader(corpus_rdr)?;
//!
//! let parser = trainer.train(corpus)?;
//!
//! let mut model_data = vec![];
//! parser.write(&mut model_data)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod corpus;
mod feature_extractor;

use crate::decoder::{Decoder, DecoderConfig};
use crate::errors::{DualParseError, Result};
use crate::input::DependencyInput;
use crate::model::Model;
use crate::output::DependencyOutput;
use crate::parser::Parser;
use crate::solver::RootPolicy;

pub use crate::trainer::config::TrainerConfig;
pub use crate::trainer::corpus::{Corpus, Example};
pub(crate) use crate::trainer::feature_extractor::FeatureExtractor;

/// 係り受け解析器のトレーナー。
pub struct Trainer {
    config: TrainerConfig,
    decoder_config: DecoderConfig,
    epochs: u32,
    learning_rate: f64,
    averaged: bool,
}

impl Trainer {
    /// 指定された設定を使用して新しい [`Trainer`] を作成します。
    ///
    /// # 引数
    ///
    ///  * `config` - 学習設定
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            decoder_config: DecoderConfig::default(),
            epochs: 10,
            learning_rate: 1.0,
            averaged: true,
        }
    }

    /// エポック数を変更します。
    ///
    /// デフォルト値は 10 です。
    ///
    /// # パニック
    ///
    /// 値が1未満の場合、パニックします。
    pub fn epochs(mut self, n: u32) -> Self {
        assert!(n >= 1);
        self.epochs = n;
        self
    }

    /// 学習率を変更します。
    ///
    /// デフォルト値は 1.0 です。
    ///
    /// # パニック
    ///
    /// 値が正の有限値でない場合、パニックします。
    pub fn learning_rate(mut self, rate: f64) -> Self {
        assert!(rate.is_finite() && rate > 0.0);
        self.learning_rate = rate;
        self
    }

    /// 辺の重みのうち、全域有向木問題に割り当てる割合を変更します。
    ///
    /// デフォルト値は 0.5 です。
    ///
    /// # パニック
    ///
    /// 値が [0, 1] の範囲外の場合、パニックします。
    pub fn beta(mut self, beta: f64) -> Self {
        assert!((0.0..=1.0).contains(&beta));
        self.decoder_config.beta = beta;
        self
    }

    /// 劣勾配法の最大ステップ数を変更します。
    ///
    /// デフォルト値は 50 です。
    pub const fn max_steps(mut self, n: u32) -> Self {
        self.decoder_config.max_steps = n;
        self
    }

    /// 損失付き推論の損失の重みを変更します。
    ///
    /// 0より大きい場合、学習時の推論は損失付きになります。
    /// デフォルト値は 0.0 です。
    ///
    /// # パニック
    ///
    /// 値が0以上の有限値でない場合、パニックします。
    pub fn loss_weight(mut self, weight: f64) -> Self {
        assert!(weight.is_finite() && weight >= 0.0);
        self.decoder_config.loss_weight = weight;
        self
    }

    /// 根の選び方を変更します。
    ///
    /// デフォルトは [`RootPolicy::Unique`] です。
    pub const fn root_policy(mut self, policy: RootPolicy) -> Self {
        self.decoder_config.root_policy = policy;
        self
    }

    /// 主辞ごとの部分問題を解くスレッド数を変更します。
    ///
    /// デフォルト値は 1（シングルスレッド）です。
    ///
    /// # パニック
    ///
    /// 値が1未満の場合、パニックします。
    pub fn num_threads(mut self, n: u32) -> Self {
        assert!(n >= 1);
        self.decoder_config.num_threads = n;
        self
    }

    /// 平均化パーセプトロンを使うかどうかを変更します。
    ///
    /// デフォルト値は `true` です。
    pub const fn averaged(mut self, yes: bool) -> Self {
        self.averaged = yes;
        self
    }

    /// 学習を開始し、解析器を返します。
    ///
    /// 素性はすべての例文から最初に一度だけ抽出されます。
    /// 各エポックではコーパスの順に推論と更新を行います。
    ///
    /// # 引数
    ///
    /// * `corpus` - 学習に使用するコーパス
    ///
    /// # 戻り値
    ///
    /// 学習済みの解析器
    ///
    /// # エラー
    ///
    /// 例文が不正な場合、その番号を含む [`DualParseError`] が返されます。
    pub fn train(mut self, corpus: Corpus) -> Result<Parser> {
        if corpus.is_empty() {
            log::warn!("training on an empty corpus");
        }

        let mut inputs: Vec<DependencyInput> = Vec::with_capacity(corpus.len());
        let mut references = Vec::with_capacity(corpus.len());
        for (i, example) in corpus.iter().enumerate() {
            let input = self
                .config
                .feature_extractor
                .extract_growing(example.sentence())
                .map_err(|e| DualParseError::malformed_example(i, e))?;
            let reference = DependencyOutput::from_heads(example.heads().to_vec())
                .map_err(|e| DualParseError::malformed_example(i, e))?;
            inputs.push(input);
            references.push(reference);
        }
        log::info!(
            "extracted {} features from {} examples",
            self.config.feature_extractor.num_features(),
            inputs.len()
        );

        let decoder = Decoder::new(self.decoder_config)?;
        let mut worker = decoder.new_worker();
        let mut predictions: Vec<DependencyOutput> = inputs
            .iter()
            .map(|input| DependencyOutput::new(input.len()))
            .collect();
        let mut model = Model::new();
        let loss_augmented = self.decoder_config.loss_weight > 0.0;

        for epoch in 1..=self.epochs {
            let mut num_tokens = 0;
            let mut num_correct = 0;
            let mut num_updates = 0;
            let mut num_unconverged = 0;
            for (i, ((input, reference), predicted)) in inputs
                .iter()
                .zip(&references)
                .zip(&mut predictions)
                .enumerate()
            {
                let report = if loss_augmented {
                    worker.decode_loss_augmented(&model, input, reference, predicted)
                } else {
                    worker.decode(&model, input, predicted)
                }
                .map_err(|e| DualParseError::malformed_example(i, e))?;
                if !report.converged {
                    num_unconverged += 1;
                }
                predicted.derive_factor_structures();

                let correct = predicted.num_matching_heads(reference);
                num_tokens += input.len();
                num_correct += correct;
                if correct != input.len() {
                    model
                        .update(input, reference, predicted, self.learning_rate)
                        .map_err(|e| DualParseError::malformed_example(i, e))?;
                    num_updates += 1;
                }
                if self.averaged {
                    model.accumulate();
                }
            }
            let accuracy = if num_tokens == 0 {
                0.0
            } else {
                num_correct as f64 / num_tokens as f64
            };
            log::info!(
                "epoch {epoch}/{}: accuracy={accuracy:.4} updates={num_updates} unconverged={num_unconverged}",
                self.epochs
            );
        }

        if self.averaged {
            model.finalize_average();
        }

        // Remove unused feature strings
        self.config
            .feature_extractor
            .retain_features(|id| model.weight(id) != 0.0);
        Parser::new(self.config.feature_extractor, model, self.decoder_config)
    }
}
