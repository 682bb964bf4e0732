//! 因子の重みテーブル。

use crate::input::{DependencyInput, FactorScorer};
use crate::output::DependencyOutput;
use crate::solver::HeadProblem;
use crate::utils::finite_or_zero;

/// 1文分の因子の重み。
///
/// 因子が存在しない箇所はNaNです。
///
/// * `edges[h * len + m]`
/// * `grandparents[(h * len + m) * len + g]`
/// * `siblings[(h * (len + 1) + m) * (len + 1) + prev]` (`h < len`)
#[derive(Default)]
pub(crate) struct FactorTables {
    len: usize,
    edges: Vec<f64>,
    grandparents: Vec<f64>,
    siblings: Vec<f64>,
}

impl FactorTables {
    /// スコアリングオラクルから重みテーブルを構築します。
    ///
    /// `loss` が与えられた場合、係り受け `h → m` が正解と異なる祖父母因子
    /// `(h, m, g)` に損失の重みを加えます。
    pub fn build<S>(
        &mut self,
        scorer: &S,
        input: &DependencyInput,
        loss: Option<(&DependencyOutput, f64)>,
    ) where
        S: FactorScorer + ?Sized,
    {
        let len = input.len();
        let stride = len + 1;
        self.len = len;

        self.edges.clear();
        self.edges.resize(len * len, f64::NAN);
        for h in 0..len {
            for m in 0..len {
                if h != m {
                    self.edges[h * len + m] = scorer.score(input.edge_features(h, m));
                }
            }
        }

        self.grandparents.clear();
        self.grandparents.resize(len * len * len, f64::NAN);
        for ((h, m, g), features) in input.grandparent_factors() {
            let mut weight = scorer.score(Some(features));
            if let Some((reference, loss_weight)) = loss
                && reference.head(m) != Some(h)
            {
                weight += loss_weight;
            }
            self.grandparents[(h * len + m) * len + g] = weight;
        }

        self.siblings.clear();
        self.siblings.resize(len * stride * stride, f64::NAN);
        for ((h, m, p), features) in input.sibling_factors() {
            self.siblings[(h * stride + m) * stride + p] = scorer.score(Some(features));
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    #[inline(always)]
    fn grandparent(&self, h: usize, m: usize, g: usize) -> f64 {
        self.grandparents[(h * self.len + m) * self.len + g]
    }

    #[inline(always)]
    fn sibling(&self, h: usize, m: usize, prev: usize) -> f64 {
        let stride = self.len + 1;
        self.siblings[(h * stride + m) * stride + prev]
    }

    /// 主辞 `head` の部分問題を作成します。
    pub fn head_problem<'a>(
        &'a self,
        head: usize,
        edge_share: f64,
        dual_grandparent: &'a [f64],
        dual_modifier: &'a [f64],
    ) -> HeadProblem<'a> {
        let len = self.len;
        let gp_block = len * len;
        let sib_block = (len + 1) * (len + 1);
        HeadProblem {
            len,
            head,
            edge_share,
            edges: &self.edges,
            grandparents: &self.grandparents[head * gp_block..(head + 1) * gp_block],
            siblings: &self.siblings[head * sib_block..(head + 1) * sib_block],
            dual_grandparent,
            dual_modifier,
        }
    }

    /// 木の真の目的関数値を計算します。
    ///
    /// 祖父母と兄弟の連鎖は常に `heads` から導出します。
    /// 存在しない因子は加算しません。
    pub fn objective(&self, heads: &[Option<usize>]) -> f64 {
        let len = self.len;
        if len < 2 {
            return 0.0;
        }

        let mut children = vec![vec![]; len];
        let mut total = 0.0;
        for (m, &head) in heads.iter().enumerate() {
            let Some(h) = head else {
                continue;
            };
            children[h].push(m);
            total += finite_or_zero(self.edges[h * len + m]);
            if let Some(g) = heads[h]
                && g != m
            {
                total += finite_or_zero(self.grandparent(h, m, g));
            }
        }

        let end = len;
        for (h, mods) in children.iter().enumerate() {
            let mut prev = h;
            for &m in mods.iter().filter(|&&m| m < h).rev() {
                total += finite_or_zero(self.sibling(h, m, prev));
                prev = m;
            }
            total += finite_or_zero(self.sibling(h, end, prev));

            let mut prev = h;
            for &m in mods.iter().filter(|&&m| m > h) {
                total += finite_or_zero(self.sibling(h, m, prev));
                prev = m;
            }
            total += finite_or_zero(self.sibling(h, end, prev));
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::num::NonZeroU32;

    use crate::input::{DependencyInputBuilder, FeatureId};

    struct Fixed;

    impl FactorScorer for Fixed {
        fn score(&self, features: Option<&[FeatureId]>) -> f64 {
            features.map_or(f64::NAN, |fs| fs.iter().map(|f| f64::from(f.get())).sum())
        }
    }

    fn id(x: u32) -> FeatureId {
        NonZeroU32::new(x).unwrap()
    }

    #[test]
    fn test_objective() {
        let mut builder = DependencyInputBuilder::new(3).unwrap();
        builder.edge(0, 1, vec![id(1)]).unwrap();
        builder.edge(1, 2, vec![id(2)]).unwrap();
        builder.grandparent(1, 2, 0, vec![id(10)]).unwrap();
        builder.sibling(0, 1, 0, vec![id(100)]).unwrap();
        builder.sibling(0, 3, 1, vec![id(200)]).unwrap();
        // 0 has no left modifiers and 1 has no modifiers on the left.
        builder.sibling(0, 3, 0, vec![id(1000)]).unwrap();
        let input = builder.build();

        let mut tables = FactorTables::default();
        tables.build(&Fixed, &input, None);
        assert!(tables.edges()[3].is_nan());

        // 1 + 2 + 10 + 100 + 200 + 1000 (empty left chain of 0)
        assert_eq!(1313.0, tables.objective(&[None, Some(0), Some(1)]));
    }

    #[test]
    fn test_loss_augmentation() {
        let mut builder = DependencyInputBuilder::new(3).unwrap();
        builder.edge(0, 1, vec![id(1)]).unwrap();
        builder.edge(1, 2, vec![id(1)]).unwrap();
        builder.edge(0, 2, vec![id(1)]).unwrap();
        builder.grandparent(1, 2, 0, vec![]).unwrap();
        let input = builder.build();

        let reference = DependencyOutput::from_heads(vec![None, Some(0), Some(0)]).unwrap();
        let mut tables = FactorTables::default();
        tables.build(&Fixed, &input, Some((&reference, 3.0)));
        assert_eq!(3.0, tables.grandparent(1, 2, 0));

        let reference = DependencyOutput::from_heads(vec![None, Some(0), Some(1)]).unwrap();
        tables.build(&Fixed, &input, Some((&reference, 3.0)));
        assert_eq!(0.0, tables.grandparent(1, 2, 0));
    }

    #[test]
    fn test_single_token_objective() {
        let input = DependencyInputBuilder::new(1).unwrap().build();
        let mut tables = FactorTables::default();
        tables.build(&Fixed, &input, None);
        assert_eq!(0.0, tables.objective(&[None]));
    }
}
