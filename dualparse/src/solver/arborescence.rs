//! 最大全域有向木ソルバー。

use rkyv::{Archive, Deserialize, Serialize};

/// 根の選び方。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum RootPolicy {
    /// 根となるトークンを1つだけ許します。
    ///
    /// 単一の根で全域木を作れない場合に限り、複数の根が現れます。
    Unique,

    /// 任意個の根を許します。根への接続のスコアは0です。
    Multiple,

    /// 指定したトークンを根とします。
    Fixed(u32),
}

impl Default for RootPolicy {
    fn default() -> Self {
        Self::Unique
    }
}

/// 全域有向木の解。
#[derive(Clone, Debug, PartialEq)]
pub struct TreeSolution {
    /// 各トークンの親。根は `None`
    pub heads: Vec<Option<usize>>,

    /// 選ばれた辺の重みの合計。根への接続は含みません。
    pub weight: f64,
}

#[derive(Clone, Copy)]
struct WeightedEdge {
    src: usize,
    dst: usize,
    weight: f64,
    // Index into the edge list of the enclosing recursion level.
    orig: usize,
}

/// 最大全域有向木ソルバー。
///
/// 仮想的な根ノードを追加し、Chu-Liu-Edmonds法で最大重みの全域有向木を求めます。
/// NaNの辺は存在しないものとして扱われます。
/// 重みが等しい場合は `(head, modifier)` の昇順で最初の辺が選ばれるため、
/// 結果は常に決定的です。
#[derive(Clone, Copy, Debug, Default)]
pub struct Arborescence {
    root_policy: RootPolicy,
    positive_edges_only: bool,
}

impl Arborescence {
    /// 新しいソルバーを作成します。
    ///
    /// # 引数
    ///
    /// * `root_policy` - 根の選び方
    /// * `positive_edges_only` - `true` の場合、重みが正でない辺を使いません
    pub const fn new(root_policy: RootPolicy, positive_edges_only: bool) -> Self {
        Self {
            root_policy,
            positive_edges_only,
        }
    }

    /// 最大全域有向木を求めます。
    ///
    /// # 引数
    ///
    /// * `len` - トークン数
    /// * `weights` - `weights[head * len + modifier]` の形の重み行列
    ///
    /// # 戻り値
    ///
    /// 各トークンの親と木の重み
    ///
    /// # パニック
    ///
    /// `weights` の長さが `len * len` でない場合、パニックします。
    pub fn solve(&self, len: usize, weights: &[f64]) -> TreeSolution {
        assert_eq!(len * len, weights.len());
        if len == 0 {
            return TreeSolution {
                heads: vec![],
                weight: 0.0,
            };
        }
        let fixed_root = match self.root_policy {
            RootPolicy::Fixed(r) => Some(r as usize),
            _ => None,
        };

        let mut edges = vec![];
        let mut abs_total = 0.0;
        for h in 0..len {
            for m in 0..len {
                let w = weights[h * len + m];
                if h == m || !w.is_finite() || fixed_root == Some(m) {
                    continue;
                }
                if self.positive_edges_only && w <= 0.0 {
                    continue;
                }
                abs_total += w.abs();
                edges.push(WeightedEdge {
                    src: h,
                    dst: m,
                    weight: w,
                    orig: edges.len(),
                });
            }
        }

        // Root attachments are appended last so that token edges win ties.
        let root = len;
        let penalty = abs_total + 1.0;
        for m in 0..len {
            let weight = match self.root_policy {
                RootPolicy::Unique => -penalty,
                RootPolicy::Multiple => 0.0,
                RootPolicy::Fixed(_) if fixed_root == Some(m) => 0.0,
                RootPolicy::Fixed(_) => -penalty,
            };
            edges.push(WeightedEdge {
                src: root,
                dst: m,
                weight,
                orig: edges.len(),
            });
        }

        let chosen = chu_liu_edmonds(len + 1, root, &edges);

        let mut heads = vec![None; len];
        let mut weight = 0.0;
        for idx in chosen {
            let e = &edges[idx];
            if e.src != root {
                heads[e.dst] = Some(e.src);
                weight += e.weight;
            }
        }
        TreeSolution { heads, weight }
    }
}

/// Chu-Liu-Edmonds法で最大全域有向木を求めます。
///
/// # 戻り値
///
/// 選ばれた辺の `edges` 内での添字
fn chu_liu_edmonds(num_nodes: usize, root: usize, edges: &[WeightedEdge]) -> Vec<usize> {
    let mut best_in: Vec<Option<usize>> = vec![None; num_nodes];
    for (i, e) in edges.iter().enumerate() {
        if e.dst == root || e.src == e.dst {
            continue;
        }
        match best_in[e.dst] {
            Some(j) if e.weight <= edges[j].weight => {}
            _ => best_in[e.dst] = Some(i),
        }
    }

    let Some(cycle) = find_cycle(num_nodes, root, edges, &best_in) else {
        return best_in.into_iter().flatten().collect();
    };

    // Contracts the cycle into a single node.
    let mut in_cycle = vec![false; num_nodes];
    for &v in &cycle {
        in_cycle[v] = true;
    }
    let mut node_map = vec![0; num_nodes];
    let mut next_id = 0;
    for v in 0..num_nodes {
        if !in_cycle[v] {
            node_map[v] = next_id;
            next_id += 1;
        }
    }
    let cycle_id = next_id;
    for &v in &cycle {
        node_map[v] = cycle_id;
    }

    let mut contracted = vec![];
    for (i, e) in edges.iter().enumerate() {
        let src = node_map[e.src];
        let dst = node_map[e.dst];
        if src == dst {
            continue;
        }
        let weight = if in_cycle[e.dst] {
            // best_in is always set for cycle nodes.
            let replaced = best_in[e.dst].map_or(0.0, |j| edges[j].weight);
            e.weight - replaced
        } else {
            e.weight
        };
        contracted.push(WeightedEdge {
            src,
            dst,
            weight,
            orig: i,
        });
    }

    let sub = chu_liu_edmonds(cycle_id + 1, node_map[root], &contracted);

    // Expands the cycle: the edge entering the cycle replaces one cycle edge.
    let mut parent_edge: Vec<Option<usize>> = vec![None; num_nodes];
    for &v in &cycle {
        parent_edge[v] = best_in[v];
    }
    for idx in sub {
        let orig = contracted[idx].orig;
        parent_edge[edges[orig].dst] = Some(orig);
    }
    parent_edge.into_iter().flatten().collect()
}

fn find_cycle(
    num_nodes: usize,
    root: usize,
    edges: &[WeightedEdge],
    best_in: &[Option<usize>],
) -> Option<Vec<usize>> {
    let mut visited_from = vec![usize::MAX; num_nodes];
    for start in 0..num_nodes {
        let mut v = start;
        while v != root && visited_from[v] == usize::MAX {
            visited_from[v] = start;
            match best_in[v] {
                Some(i) => v = edges[i].src,
                None => break,
            }
        }
        if v != root && visited_from[v] == start && best_in[v].is_some() {
            let mut cycle = vec![v];
            let mut u = best_in[v].map(|i| edges[i].src)?;
            while u != v {
                cycle.push(u);
                u = best_in[u].map(|i| edges[i].src)?;
            }
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAN: f64 = f64::NAN;

    #[test]
    fn test_star() {
        #[rustfmt::skip]
        let weights = [
            NAN, 5.0, 10.0, 1.0,
            NAN, NAN, NAN,  NAN,
            NAN, NAN, NAN,  NAN,
            NAN, NAN, NAN,  NAN,
        ];
        let solution = Arborescence::default().solve(4, &weights);
        assert_eq!(vec![None, Some(0), Some(0), Some(0)], solution.heads);
        assert_eq!(16.0, solution.weight);
    }

    #[test]
    fn test_breaks_cycle() {
        // 1 and 2 prefer each other; the cycle must be broken.
        #[rustfmt::skip]
        let weights = [
            NAN, 3.0,  2.0,
            NAN, NAN,  10.0,
            NAN, 10.0, NAN,
        ];
        let solution = Arborescence::default().solve(3, &weights);
        assert_eq!(vec![None, Some(0), Some(1)], solution.heads);
        assert_eq!(13.0, solution.weight);
    }

    #[test]
    fn test_nested_cycles() {
        #[rustfmt::skip]
        let weights = [
            NAN, 1.0, NAN, NAN,
            NAN, NAN, 9.0, 1.0,
            NAN, 9.0, NAN, 8.0,
            NAN, NAN, 8.0, NAN,
        ];
        let solution = Arborescence::default().solve(4, &weights);
        let output = crate::output::DependencyOutput::from_heads(solution.heads.clone()).unwrap();
        assert!(output.is_tree());
        assert_eq!(Some(0), solution.heads[1]);
        assert_eq!(None, solution.heads[0]);
        // 0->1 (1) + 1->2 (9) + 2->3 (8)
        assert_eq!(18.0, solution.weight);
    }

    #[test]
    fn test_unique_root_with_negative_weights() {
        let weights = [NAN, -3.0, -1.0, NAN];
        let solution = Arborescence::new(RootPolicy::Unique, false).solve(2, &weights);
        assert_eq!(vec![Some(1), None], solution.heads);
        assert_eq!(-1.0, solution.weight);

        let solution = Arborescence::new(RootPolicy::Multiple, false).solve(2, &weights);
        assert_eq!(vec![None, None], solution.heads);
        assert_eq!(0.0, solution.weight);
    }

    #[test]
    fn test_fixed_root() {
        let weights = [NAN, 1.0, 5.0, NAN];
        let solution = Arborescence::new(RootPolicy::Fixed(0), false).solve(2, &weights);
        assert_eq!(vec![None, Some(0)], solution.heads);
        assert_eq!(1.0, solution.weight);
    }

    #[test]
    fn test_positive_edges_only() {
        #[rustfmt::skip]
        let weights = [
            NAN, 2.0,  -1.0,
            NAN, NAN,  NAN,
            NAN, NAN,  NAN,
        ];
        let solution = Arborescence::new(RootPolicy::Multiple, true).solve(3, &weights);
        assert_eq!(vec![None, Some(0), None], solution.heads);
        assert_eq!(2.0, solution.weight);
    }

    #[test]
    fn test_all_nan_rows() {
        let weights = [NAN; 9];
        let solution = Arborescence::default().solve(3, &weights);
        assert_eq!(vec![None, None, None], solution.heads);
        assert_eq!(0.0, solution.weight);
    }

    #[test]
    fn test_deterministic_ties() {
        let weights = [NAN, 1.0, 1.0, 1.0, NAN, 1.0, 1.0, 1.0, NAN];
        let a = Arborescence::default().solve(3, &weights);
        let b = Arborescence::default().solve(3, &weights);
        assert_eq!(a, b);
        assert_eq!(2.0, a.weight);
    }
}
