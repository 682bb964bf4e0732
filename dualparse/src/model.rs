//! 線形モデルと構造化パーセプトロンの更新。

mod weights;

use crate::errors::{DualParseError, Result};
use crate::input::{DependencyInput, FactorScorer, FeatureId};
use crate::model::weights::WeightStore;
use crate::output::DependencyOutput;

/// 素性の重みを保持する線形モデル。
///
/// 推論時はスコアリングオラクル（[`FactorScorer`]）として読み取り専用で使われ、
/// 学習時のみ [`update()`](Self::update) によって変更されます。
#[derive(Clone, Debug, Default)]
pub struct Model {
    weights: WeightStore,
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

impl Model {
    /// すべての重みが0の新しいモデルを作成します。
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_weights<I>(weights: I) -> Self
    where
        I: IntoIterator<Item = (FeatureId, f64)>,
    {
        Self {
            weights: weights.into_iter().collect(),
        }
    }

    /// 素性の重みを返します。
    #[inline(always)]
    pub fn weight(&self, id: FeatureId) -> f64 {
        self.weights.get(id)
    }

    /// 素性の重みに値を加えます。
    pub fn add_weight(&mut self, id: FeatureId, delta: f64) {
        *self.weights.get_or_insert(id) += delta;
    }

    /// 重みを持つ素性の数を返します。
    pub fn num_features(&self) -> usize {
        self.weights.len()
    }

    /// 重みを持つ素性を列挙します。順序は不定です。
    pub fn weights(&self) -> impl Iterator<Item = (FeatureId, f64)> + '_ {
        self.weights.iter()
    }

    /// 現在の重みを平均化用の累積値に加えます。
    pub fn accumulate(&mut self) {
        self.weights.accumulate();
    }

    /// 重みを累積値の平均で置き換えます。
    pub fn finalize_average(&mut self) {
        self.weights.finalize_average();
    }

    fn add_features(&mut self, features: Option<&[FeatureId]>, delta: f64) {
        if let Some(features) = features {
            for &id in features {
                *self.weights.get_or_insert(id) += delta;
            }
        }
    }

    fn add_grandparent(
        &mut self,
        input: &DependencyInput,
        head: usize,
        modifier: usize,
        grandparent: Option<usize>,
        delta: f64,
    ) {
        if let Some(g) = grandparent {
            self.add_features(input.grandparent_features(head, modifier, g), delta);
        }
    }

    /// 正解と予測の係り受け構造を比較し、重みを更新します。
    ///
    /// 各主辞の左右について、子を主辞に近い順にたどります。
    /// 正解側と予測側で別々に直前の子を記録し、
    ///
    /// * 片方だけが子として選んだトークンは、辺・祖父母・兄弟の各因子を更新します
    /// * 両方が選んだトークンは、祖父母または直前の子が異なる因子のみを更新します
    /// * 最後に終端の兄弟因子を比較します
    ///
    /// 正解の因子には `+rate`、予測の因子には `-rate` を加えます。
    /// 祖父母と子の集合は、引数の出力が保持しているものをそのまま使用します。
    ///
    /// # 引数
    ///
    /// * `input` - 因子素性
    /// * `correct` - 正解
    /// * `predicted` - 予測
    /// * `rate` - 学習率
    ///
    /// # エラー
    ///
    /// 入力と出力の長さが異なる場合、[`DualParseError`] が返されます。
    pub fn update(
        &mut self,
        input: &DependencyInput,
        correct: &DependencyOutput,
        predicted: &DependencyOutput,
        rate: f64,
    ) -> Result<()> {
        let len = input.len();
        if correct.len() != len || predicted.len() != len {
            return Err(DualParseError::invalid_argument(
                "predicted",
                format!(
                    "lengths {} and {} do not match the input length {len}",
                    correct.len(),
                    predicted.len()
                ),
            ));
        }
        for head in 0..len {
            self.update_chain(input, correct, predicted, rate, head, Side::Left);
            self.update_chain(input, correct, predicted, rate, head, Side::Right);
        }
        Ok(())
    }

    fn update_chain(
        &mut self,
        input: &DependencyInput,
        correct: &DependencyOutput,
        predicted: &DependencyOutput,
        rate: f64,
        head: usize,
        side: Side,
    ) {
        let end = input.len();
        let positions: Box<dyn Iterator<Item = usize>> = match side {
            Side::Left => Box::new((0..head).rev()),
            Side::Right => Box::new(head + 1..end),
        };

        let mut prev_correct = head;
        let mut prev_predicted = head;
        for m in positions {
            match (correct.is_modifier(head, m), predicted.is_modifier(head, m)) {
                (true, false) => {
                    self.add_features(input.edge_features(head, m), rate);
                    self.add_grandparent(input, head, m, correct.grandparent(m), rate);
                    self.add_features(input.sibling_features(head, m, prev_correct), rate);
                    prev_correct = m;
                }
                (false, true) => {
                    self.add_features(input.edge_features(head, m), -rate);
                    self.add_grandparent(input, head, m, predicted.grandparent(m), -rate);
                    self.add_features(input.sibling_features(head, m, prev_predicted), -rate);
                    prev_predicted = m;
                }
                (true, true) => {
                    let g_correct = correct.grandparent(m);
                    let g_predicted = predicted.grandparent(m);
                    if g_correct != g_predicted {
                        self.add_grandparent(input, head, m, g_correct, rate);
                        self.add_grandparent(input, head, m, g_predicted, -rate);
                    }
                    if prev_correct != prev_predicted {
                        self.add_features(input.sibling_features(head, m, prev_correct), rate);
                        self.add_features(input.sibling_features(head, m, prev_predicted), -rate);
                    }
                    prev_correct = m;
                    prev_predicted = m;
                }
                (false, false) => {}
            }
        }

        if prev_correct != prev_predicted {
            self.add_features(input.sibling_features(head, end, prev_correct), rate);
            self.add_features(input.sibling_features(head, end, prev_predicted), -rate);
        }
    }
}

impl FactorScorer for Model {
    #[inline]
    fn score(&self, features: Option<&[FeatureId]>) -> f64 {
        features.map_or(f64::NAN, |features| {
            features.iter().map(|&id| self.weights.get(id)).sum()
        })
    }
}
