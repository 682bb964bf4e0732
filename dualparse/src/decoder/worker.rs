//! 推論の作業領域を保持するワーカー。
//!
//! ワーカーは重みテーブルや双対変数を保持し、再利用することで
//! 文ごとのメモリ再割り当てを抑えます。

use rayon::prelude::*;

use crate::decoder::tables::FactorTables;
use crate::decoder::{DecodeReport, Decoder};
use crate::errors::{DualParseError, Result};
use crate::input::{DependencyInput, FactorScorer};
use crate::output::DependencyOutput;
use crate::solver::{Arborescence, HeadSolution, RootPolicy};

/// 推論ルーチンを提供する構造体。
///
/// # 例
///
/// ```ignore
/// let mut worker = decoder.new_worker();
/// let mut output = DependencyOutput::new(input.len());
/// let report = worker.decode(&model, &input, &mut output)?;
/// ```
pub struct Worker {
    decoder: Decoder,
    tables: FactorTables,
    graph: Vec<f64>,
    dual_grandparent: Vec<f64>,
    dual_modifier: Vec<f64>,
    head_solutions: Vec<HeadSolution>,
    relaxed_modifiers: Vec<bool>,
    changed: Vec<bool>,
}

impl Worker {
    pub(crate) fn new(decoder: Decoder) -> Self {
        Self {
            decoder,
            tables: FactorTables::default(),
            graph: vec![],
            dual_grandparent: vec![],
            dual_modifier: vec![],
            head_solutions: vec![],
            relaxed_modifiers: vec![],
            changed: vec![],
        }
    }

    /// 係り受け構造を推論します。
    ///
    /// 結果の木は `output` の親の配列に書き込まれます。
    /// 祖父母と子の集合は最後の部分問題の解を反映しているため、
    /// 木と整合させたい場合は [`DependencyOutput::derive_factor_structures()`] を呼び出してください。
    ///
    /// # 引数
    ///
    /// * `scorer` - 因子のスコアリングオラクル
    /// * `input` - 因子素性
    /// * `output` - 書き込み先
    ///
    /// # 戻り値
    ///
    /// 推論の要約
    ///
    /// # エラー
    ///
    /// 入力と出力の長さが異なる場合や、固定された根が範囲外の場合、
    /// [`DualParseError`] が返されます。
    pub fn decode<S>(
        &mut self,
        scorer: &S,
        input: &DependencyInput,
        output: &mut DependencyOutput,
    ) -> Result<DecodeReport>
    where
        S: FactorScorer + ?Sized,
    {
        self.run(scorer, input, None, output)
    }

    /// 損失付きの推論を行います。
    ///
    /// 設定された損失の重みを、正解と異なる係り受けを含む祖父母因子に加えてから推論します。
    ///
    /// # 引数
    ///
    /// * `scorer` - 因子のスコアリングオラクル
    /// * `input` - 因子素性
    /// * `reference` - 正解の係り受け構造
    /// * `output` - 書き込み先
    ///
    /// # エラー
    ///
    /// [`decode()`](Self::decode) と同じ条件に加えて、正解の長さが入力と異なる場合に
    /// [`DualParseError`] が返されます。
    pub fn decode_loss_augmented<S>(
        &mut self,
        scorer: &S,
        input: &DependencyInput,
        reference: &DependencyOutput,
        output: &mut DependencyOutput,
    ) -> Result<DecodeReport>
    where
        S: FactorScorer + ?Sized,
    {
        if reference.len() != input.len() {
            return Err(DualParseError::invalid_argument(
                "reference",
                format!(
                    "length {} does not match the input length {}",
                    reference.len(),
                    input.len()
                ),
            ));
        }
        self.run(scorer, input, Some(reference), output)
    }

    fn run<S>(
        &mut self,
        scorer: &S,
        input: &DependencyInput,
        reference: Option<&DependencyOutput>,
        output: &mut DependencyOutput,
    ) -> Result<DecodeReport>
    where
        S: FactorScorer + ?Sized,
    {
        let len = input.len();
        let config = *self.decoder.config();
        if output.len() != len {
            return Err(DualParseError::invalid_argument(
                "output",
                format!(
                    "length {} does not match the input length {len}",
                    output.len()
                ),
            ));
        }
        if let RootPolicy::Fixed(r) = config.root_policy
            && len != 0
            && r as usize >= len
        {
            return Err(DualParseError::invalid_argument(
                "root_policy",
                format!("fixed root {r} is out of range for length {len}"),
            ));
        }
        if len == 0 {
            return Ok(DecodeReport::empty());
        }

        self.tables
            .build(scorer, input, reference.map(|r| (r, config.loss_weight)));
        self.reset(len);

        let solver = Arborescence::new(config.root_policy, config.positive_edges_only);
        self.update_graph(config.beta);
        let mut tree = solver.solve(len, &self.graph);
        let initial_tree_weight = tree.weight;
        self.solve_heads(1.0 - config.beta);

        // The dual value covers both relaxed problems.
        let mut dual_objective = tree.weight + self.head_objective();
        let mut best_heads = tree.heads.clone();
        let mut best_objective = self.tables.objective(&best_heads);
        let mut best_trace = vec![best_objective];

        let mut scale = dual_objective - best_objective;
        if !(scale.is_finite() && scale > 0.0) {
            log::trace!("non-positive duality gap {scale}; falling back to unit step scale");
            scale = 1.0;
        }
        let mut step_size = scale;
        let mut num_dual_increments = 0u32;
        let mut steps = 0;
        let mut converged = false;

        loop {
            let disagreements = self.update_duals(&tree.heads, step_size);
            if disagreements == 0 {
                converged = true;
                break;
            }
            if steps >= config.max_steps {
                break;
            }
            steps += 1;
            step_size = scale / f64::from(1 + num_dual_increments);

            self.update_graph(config.beta);
            tree = solver.solve(len, &self.graph);
            self.solve_heads(1.0 - config.beta);

            let objective = self.tables.objective(&tree.heads);
            if objective > best_objective {
                best_objective = objective;
                best_heads.clone_from(&tree.heads);
            }
            best_trace.push(best_objective);

            let new_dual_objective = tree.weight + self.head_objective();
            if new_dual_objective > dual_objective {
                num_dual_increments += 1;
            }
            dual_objective = new_dual_objective;
        }

        output.set_heads(&best_heads);
        for m in 0..len {
            output.set_grandparent(m, None);
        }
        for (h, solution) in self.head_solutions.iter().enumerate() {
            output.set_modifiers(h, &solution.modifiers);
            for &m in &solution.modifiers {
                output.set_grandparent(m, solution.parent);
            }
        }

        log::debug!(
            "decoded {len} tokens: steps={steps} converged={converged} best={best_objective:.4} dual={dual_objective:.4}"
        );

        Ok(DecodeReport {
            steps,
            converged,
            best_objective,
            dual_objective,
            initial_tree_weight,
            best_trace,
        })
    }

    fn reset(&mut self, len: usize) {
        self.graph.clear();
        self.graph.resize(len * len, f64::NAN);
        self.dual_grandparent.clear();
        self.dual_grandparent.resize(len * len, 0.0);
        self.dual_modifier.clear();
        self.dual_modifier.resize(len * len, 0.0);
        self.relaxed_modifiers.clear();
        self.relaxed_modifiers.resize(len * len, false);
        self.head_solutions.clear();
        self.head_solutions.resize(len, HeadSolution::default());
        self.changed.clear();
        self.changed.resize(len, true);
    }

    /// 木の問題の重みを、双対変数と辺の重みのβ倍から計算し直します。
    fn update_graph(&mut self, beta: f64) {
        let edges = self.tables.edges();
        for (i, w) in self.graph.iter_mut().enumerate() {
            // NaN edges stay NaN and remain forbidden.
            *w = self.dual_grandparent[i] + self.dual_modifier[i] + beta * edges[i];
        }
    }

    /// 変更のあった主辞の部分問題を解き直します。
    fn solve_heads(&mut self, edge_share: f64) {
        let len = self.tables.len();
        let targets: Vec<usize> = (0..len).filter(|&h| self.changed[h]).collect();

        let tables = &self.tables;
        let dual_grandparent = &self.dual_grandparent;
        let dual_modifier = &self.dual_modifier;
        let solve = |h: usize| {
            tables
                .head_problem(h, edge_share, dual_grandparent, dual_modifier)
                .solve()
        };
        let solutions: Vec<HeadSolution> = match &self.decoder.pool {
            Some(pool) => pool.install(|| targets.par_iter().map(|&h| solve(h)).collect()),
            None => targets.iter().map(|&h| solve(h)).collect(),
        };

        for (h, solution) in targets.into_iter().zip(solutions) {
            let row = &mut self.relaxed_modifiers[h * len..(h + 1) * len];
            row.fill(false);
            for &m in &solution.modifiers {
                row[m] = true;
            }
            self.head_solutions[h] = solution;
        }
    }

    fn head_objective(&self) -> f64 {
        self.head_solutions.iter().map(|s| s.objective).sum()
    }

    /// 木と部分問題の解の食い違いに応じて双対変数を更新します。
    ///
    /// 双対関数を最小化する向きに `u -= step_size * (tree - relaxed)` とします。
    /// 木だけが辺を選んだ場合、木の問題ではその辺が不利になり、
    /// 主辞の問題では有利になります。
    ///
    /// # 戻り値
    ///
    /// 食い違いの数
    fn update_duals(&mut self, heads: &[Option<usize>], step_size: f64) -> usize {
        let len = heads.len();
        self.changed.fill(false);
        let mut disagreements = 0;
        for h in 0..len {
            for m in 0..len {
                if h == m {
                    continue;
                }
                let idx = h * len + m;
                let in_tree = heads[m] == Some(h);

                let as_grandparent = self.head_solutions[m].parent == Some(h);
                if in_tree != as_grandparent {
                    self.dual_grandparent[idx] -=
                        step_size * indicator_diff(in_tree, as_grandparent);
                    self.changed[m] = true;
                    disagreements += 1;
                }

                let as_modifier = self.relaxed_modifiers[idx];
                if in_tree != as_modifier {
                    self.dual_modifier[idx] -= step_size * indicator_diff(in_tree, as_modifier);
                    self.changed[h] = true;
                    disagreements += 1;
                }
            }
        }
        disagreements
    }
}

/// `tree - relaxed` を 0/1 の指示値で計算します。
#[inline(always)]
fn indicator_diff(in_tree: bool, relaxed: bool) -> f64 {
    f64::from(u8::from(in_tree)) - f64::from(u8::from(relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::num::NonZeroU32;

    use hashbrown::HashMap;

    use crate::decoder::DecoderConfig;
    use crate::input::{DependencyInputBuilder, FeatureId};

    /// 素性IDごとに重みを与えるスコアラー
    struct Table(HashMap<u32, f64>);

    impl FactorScorer for Table {
        fn score(&self, features: Option<&[FeatureId]>) -> f64 {
            features.map_or(f64::NAN, |fs| {
                fs.iter().map(|f| self.0.get(&f.get()).copied().unwrap_or(0.0)).sum()
            })
        }
    }

    fn id(x: u32) -> FeatureId {
        NonZeroU32::new(x).unwrap()
    }

    /// 辺 `h -> m` の素性IDを `100 * (h + 1) + m` とする入力
    fn dense_input(len: usize) -> DependencyInput {
        let mut builder = DependencyInputBuilder::new(len).unwrap();
        let mut next = 10_000;
        for h in 0..len {
            for m in 0..len {
                if h == m {
                    continue;
                }
                builder
                    .edge(h, m, vec![id(100 * (h as u32 + 1) + m as u32)])
                    .unwrap();
                for g in 0..len {
                    if g != h && g != m {
                        builder.grandparent(h, m, g, vec![id(next)]).unwrap();
                        next += 1;
                    }
                }
            }
        }
        for h in 0..len {
            let right: Vec<usize> = (h + 1..len).collect();
            let left: Vec<usize> = (0..h).rev().collect();
            for side in [left, right] {
                for (i, &m) in side.iter().enumerate() {
                    builder.sibling(h, m, h, vec![id(next)]).unwrap();
                    next += 1;
                    for &p in &side[..i] {
                        builder.sibling(h, m, p, vec![id(next)]).unwrap();
                        next += 1;
                    }
                }
                for &p in &side {
                    builder.sibling(h, len, p, vec![id(next)]).unwrap();
                    next += 1;
                }
            }
            builder.sibling(h, len, h, vec![id(next)]).unwrap();
            next += 1;
        }
        builder.build()
    }

    fn weights(entries: &[(u32, f64)]) -> Table {
        Table(entries.iter().copied().collect())
    }

    #[test]
    fn test_star_converges_immediately() {
        let mut builder = DependencyInputBuilder::new(4).unwrap();
        builder.edge(0, 1, vec![id(1)]).unwrap();
        builder.edge(0, 2, vec![id(2)]).unwrap();
        builder.edge(0, 3, vec![id(3)]).unwrap();
        for (h, m, g) in [(0, 1, 2), (0, 2, 1), (0, 3, 1)] {
            builder.grandparent(h, m, g, vec![]).unwrap();
        }
        builder.sibling(0, 1, 0, vec![]).unwrap();
        builder.sibling(0, 4, 3, vec![]).unwrap();
        let input = builder.build();
        let scorer = weights(&[(1, 5.0), (2, 10.0), (3, 1.0)]);

        let decoder = Decoder::new(DecoderConfig::default()).unwrap();
        let mut worker = decoder.new_worker();
        let mut output = DependencyOutput::new(4);
        let report = worker.decode(&scorer, &input, &mut output).unwrap();

        assert!(report.converged);
        assert_eq!(0, report.steps);
        assert_eq!(&[None, Some(0), Some(0), Some(0)], output.heads());
        assert_eq!(16.0, report.best_objective);
        assert!(output.is_consistent());
    }

    #[test]
    fn test_single_token() {
        let input = DependencyInputBuilder::new(1).unwrap().build();
        let decoder = Decoder::new(DecoderConfig::default()).unwrap();
        let mut worker = decoder.new_worker();
        let mut output = DependencyOutput::new(1);
        let report = worker.decode(&weights(&[]), &input, &mut output).unwrap();
        assert!(report.converged);
        assert_eq!(&[None], output.heads());
        assert_eq!(0.0, report.best_objective);
    }

    #[test]
    fn test_empty_sentence() {
        let input = DependencyInputBuilder::new(0).unwrap().build();
        let decoder = Decoder::new(DecoderConfig::default()).unwrap();
        let mut worker = decoder.new_worker();
        let mut output = DependencyOutput::new(0);
        let report = worker.decode(&weights(&[]), &input, &mut output).unwrap();
        assert!(report.converged);
        assert!(output.is_empty());
    }

    #[test]
    fn test_length_mismatch() {
        let input = dense_input(3);
        let decoder = Decoder::new(DecoderConfig::default()).unwrap();
        let mut worker = decoder.new_worker();
        let mut output = DependencyOutput::new(2);
        assert!(worker.decode(&weights(&[]), &input, &mut output).is_err());

        let mut output = DependencyOutput::new(3);
        let reference = DependencyOutput::new(4);
        assert!(
            worker
                .decode_loss_augmented(&weights(&[]), &input, &reference, &mut output)
                .is_err()
        );
    }

    #[test]
    fn test_fixed_root_out_of_range() {
        let input = dense_input(3);
        let config = DecoderConfig {
            root_policy: RootPolicy::Fixed(3),
            ..DecoderConfig::default()
        };
        let decoder = Decoder::new(config).unwrap();
        let mut worker = decoder.new_worker();
        let mut output = DependencyOutput::new(3);
        assert!(worker.decode(&weights(&[]), &input, &mut output).is_err());
    }

    #[test]
    fn test_beta_one_matches_plain_arborescence() {
        let input = dense_input(4);
        let scorer = weights(&[
            (101, 3.0),
            (102, -1.0),
            (103, 2.0),
            (201, 4.0),
            (203, 1.5),
            (302, 2.5),
            (401, -2.0),
            (402, 0.5),
        ]);
        let config = DecoderConfig {
            beta: 1.0,
            ..DecoderConfig::default()
        };
        let decoder = Decoder::new(config).unwrap();
        let mut worker = decoder.new_worker();
        let mut output = DependencyOutput::new(4);
        let report = worker.decode(&scorer, &input, &mut output).unwrap();

        let mut raw = vec![f64::NAN; 16];
        for h in 0..4 {
            for m in 0..4 {
                if h != m {
                    raw[h * 4 + m] = scorer.score(input.edge_features(h, m));
                }
            }
        }
        let plain = Arborescence::default().solve(4, &raw);
        assert_eq!(plain.weight, report.initial_tree_weight);
    }

    #[test]
    fn test_second_order_tree_properties() {
        let input = dense_input(5);
        // Edge weights favour a chain while grandparent and sibling factors pull elsewhere.
        let mut entries = vec![];
        for h in 0..5u32 {
            for m in 0..5u32 {
                if h != m {
                    let w = if m == h + 1 { 2.0 } else { f64::from(h + m) * 0.1 - 0.3 };
                    entries.push((100 * (h + 1) + m, w));
                }
            }
        }
        for (i, f) in (10_000..10_400).enumerate() {
            let w = match i % 7 {
                0 => 1.5,
                3 => -1.0,
                5 => 0.7,
                _ => 0.0,
            };
            entries.push((f, w));
        }
        let scorer = weights(&entries);

        let config = DecoderConfig {
            max_steps: 200,
            ..DecoderConfig::default()
        };
        let decoder = Decoder::new(config).unwrap();
        let mut worker = decoder.new_worker();
        let mut output = DependencyOutput::new(5);
        let report = worker.decode(&scorer, &input, &mut output).unwrap();

        assert!(output.is_tree());
        assert_eq!(1, output.heads().iter().filter(|h| h.is_none()).count());
        assert!(report.steps <= 200);
        assert_eq!(report.steps as usize + 1, report.best_trace.len());
        for pair in report.best_trace.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(report.best_objective, *report.best_trace.last().unwrap());

        // The best tree is scored with its own tree-derived structures.
        let mut tables = FactorTables::default();
        tables.build(&scorer, &input, None);
        assert_eq!(report.best_objective, tables.objective(output.heads()));

        // Decoding is deterministic.
        let mut again = DependencyOutput::new(5);
        let report_again = worker.decode(&scorer, &input, &mut again).unwrap();
        assert_eq!(output.heads(), again.heads());
        assert_eq!(report, report_again);
    }

    #[test]
    fn test_parallel_heads_match_sequential() {
        let input = dense_input(6);
        let mut entries = vec![];
        for (i, f) in (101..700).enumerate() {
            entries.push((f, ((i * 37) % 11) as f64 * 0.3 - 1.2));
        }
        for (i, f) in (10_000..10_900).enumerate() {
            entries.push((f, ((i * 13) % 5) as f64 * 0.2 - 0.4));
        }
        let scorer = weights(&entries);

        let sequential = Decoder::new(DecoderConfig::default()).unwrap();
        let parallel = Decoder::new(DecoderConfig {
            num_threads: 3,
            ..DecoderConfig::default()
        })
        .unwrap();

        let mut a = DependencyOutput::new(6);
        let mut b = DependencyOutput::new(6);
        let report_a = sequential.new_worker().decode(&scorer, &input, &mut a).unwrap();
        let report_b = parallel.new_worker().decode(&scorer, &input, &mut b).unwrap();
        assert_eq!(a, b);
        assert_eq!(report_a, report_b);
    }

    #[test]
    fn test_converged_example_is_idempotent() {
        let input = dense_input(3);
        let scorer = weights(&[(101, 5.0), (102, 4.0)]);
        let decoder = Decoder::new(DecoderConfig::default()).unwrap();
        let mut worker = decoder.new_worker();

        let mut first = DependencyOutput::new(3);
        let report = worker.decode(&scorer, &input, &mut first).unwrap();
        assert!(report.converged);
        for _ in 0..3 {
            let mut output = DependencyOutput::new(3);
            worker.decode(&scorer, &input, &mut output).unwrap();
            assert_eq!(first.heads(), output.heads());
        }
    }

    #[test]
    fn test_loss_augmented_decoding() {
        // Only 0 -> 1, 0 -> 2 and 1 -> 2 exist, so token 0 is always the root and
        // the candidates are the star [root, 0, 0] and the chain [root, 0, 1].
        let mut builder = DependencyInputBuilder::new(3).unwrap();
        builder.edge(0, 1, vec![id(1)]).unwrap();
        builder.edge(0, 2, vec![id(2)]).unwrap();
        builder.edge(1, 2, vec![id(3)]).unwrap();
        builder.grandparent(1, 2, 0, vec![]).unwrap();
        let input = builder.build();
        let scorer = weights(&[(1, 2.0), (2, 2.0), (3, 1.0)]);
        let reference = DependencyOutput::from_heads(vec![None, Some(0), Some(0)]).unwrap();

        let decoder = Decoder::new(DecoderConfig::default()).unwrap();
        let mut output = DependencyOutput::new(3);
        let report = decoder
            .new_worker()
            .decode(&scorer, &input, &mut output)
            .unwrap();
        assert_eq!(reference.heads(), output.heads());
        assert_eq!(4.0, report.best_objective);

        // The chain attaches 2 to 1 against the reference, so its grandparent
        // factor gains the loss weight and outscores the star.
        let decoder = Decoder::new(DecoderConfig {
            loss_weight: 10.0,
            ..DecoderConfig::default()
        })
        .unwrap();
        let mut output = DependencyOutput::new(3);
        let report = decoder
            .new_worker()
            .decode_loss_augmented(&scorer, &input, &reference, &mut output)
            .unwrap();
        assert_eq!(&[None, Some(0), Some(1)], output.heads());
        assert_eq!(13.0, report.best_objective);
    }

    #[test]
    fn test_dual_objective_includes_tree_problem() {
        let mut builder = DependencyInputBuilder::new(4).unwrap();
        builder.edge(0, 1, vec![id(1)]).unwrap();
        builder.edge(0, 2, vec![id(2)]).unwrap();
        builder.edge(0, 3, vec![id(3)]).unwrap();
        let input = builder.build();
        let scorer = weights(&[(1, 5.0), (2, 10.0), (3, 1.0)]);

        let decoder = Decoder::new(DecoderConfig::default()).unwrap();
        let mut output = DependencyOutput::new(4);
        let report = decoder
            .new_worker()
            .decode(&scorer, &input, &mut output)
            .unwrap();

        // Tree problem: 0.5 * 16, head problem of 0: 0.5 * 16.
        assert!(report.converged);
        assert_eq!(8.0, report.initial_tree_weight);
        assert_eq!(16.0, report.dual_objective);
        assert_eq!(report.best_objective, report.dual_objective);
    }
}
