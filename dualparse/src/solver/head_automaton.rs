//! 主辞ごとの祖父母・兄弟因子の部分問題ソルバー。

use crate::utils::finite_or_zero;

/// 1つの主辞に関する部分問題。
///
/// 主辞 `head` について、その親（祖父母因子から見た祖父母）と、
/// 左右それぞれの子の連鎖を同時に選びます。
///
/// 重み配列の形：
///
/// * `edges[h * len + m]` - 辺の重み（NaNは辺が存在しない）
/// * `grandparents[m * len + g]` - この主辞の祖父母因子 `g → head → m`
/// * `siblings[m * (len + 1) + prev]` - この主辞の兄弟因子。`m == len` は終端
/// * `dual_grandparent[g * len + h]`, `dual_modifier[h * len + m]` - 双対変数
pub struct HeadProblem<'a> {
    /// トークン数
    pub len: usize,
    /// 主辞
    pub head: usize,
    /// 辺の重みのうち、この部分問題が受け持つ割合（1 - β）
    pub edge_share: f64,
    /// 辺の重み行列
    pub edges: &'a [f64],
    /// この主辞の祖父母因子の重み
    pub grandparents: &'a [f64],
    /// この主辞の兄弟因子の重み
    pub siblings: &'a [f64],
    /// 木と祖父母割り当ての不一致に対する双対変数
    pub dual_grandparent: &'a [f64],
    /// 木と子の割り当ての不一致に対する双対変数
    pub dual_modifier: &'a [f64],
}

/// 部分問題の解。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeadSolution {
    /// 主辞の親。`None` は主辞が根であることを表します。
    pub parent: Option<usize>,

    /// 選ばれた子（左側は近い順、続いて右側を近い順）
    pub modifiers: Vec<usize>,

    /// 部分問題の目的関数値
    pub objective: f64,
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

impl HeadProblem<'_> {
    /// 部分問題を解きます。
    ///
    /// 親の候補は、親から主辞への辺が存在するトークンと「根」です。
    /// 各候補について左右の子の連鎖を動的計画法で求め、最良のものを返します。
    /// 値が等しい場合はトークンの候補が添字の昇順で優先され、「根」は最後に考慮されます。
    ///
    /// 2トークン未満の文には祖父母因子も兄弟因子も存在しないため、
    /// 空の割り当てと目的関数値0を返します。
    pub fn solve(&self) -> HeadSolution {
        let len = self.len;
        if len < 2 {
            return HeadSolution::default();
        }

        let candidates = (0..len)
            .filter(|&g| g != self.head && self.edges[g * len + self.head].is_finite())
            .map(Some)
            .chain(std::iter::once(None));

        let mut best: Option<HeadSolution> = None;
        for parent in candidates {
            let mut objective = parent.map_or(0.0, |g| -self.dual_grandparent[g * len + self.head]);
            let (left_score, mut modifiers) = self.best_chain(parent, Side::Left);
            let (right_score, right_modifiers) = self.best_chain(parent, Side::Right);
            objective += left_score + right_score;
            if best.as_ref().is_none_or(|b| objective > b.objective) {
                modifiers.extend(right_modifiers);
                best = Some(HeadSolution {
                    parent,
                    modifiers,
                    objective,
                });
            }
        }
        best.unwrap_or_default()
    }

    fn modifier_score(&self, parent: Option<usize>, m: usize) -> f64 {
        let idx = self.head * self.len + m;
        let mut score = self.edge_share * self.edges[idx] - self.dual_modifier[idx];
        if let Some(g) = parent {
            score += finite_or_zero(self.grandparents[m * self.len + g]);
        }
        score
    }

    #[inline(always)]
    fn sibling(&self, m: usize, prev: usize) -> f64 {
        finite_or_zero(self.siblings[m * (self.len + 1) + prev])
    }

    /// 片側の子の連鎖を求めます。
    ///
    /// # 戻り値
    ///
    /// 連鎖のスコアと、主辞に近い順に並んだ子
    fn best_chain(&self, parent: Option<usize>, side: Side) -> (f64, Vec<usize>) {
        let len = self.len;
        let head = self.head;
        let end = len;

        let positions: Vec<usize> = match side {
            Side::Left => (0..head).rev().collect(),
            Side::Right => (head + 1..len).collect(),
        };
        // A modifier needs an edge from the head, and the parent of the head
        // cannot also be its child.
        let positions: Vec<usize> = positions
            .into_iter()
            .filter(|&m| self.edges[head * len + m].is_finite() && Some(m) != parent)
            .collect();

        // scores[i]: best chain whose last modifier is positions[i]
        let mut scores = Vec::with_capacity(positions.len());
        let mut back: Vec<Option<usize>> = Vec::with_capacity(positions.len());
        for (i, &m) in positions.iter().enumerate() {
            let mut best = self.sibling(m, head);
            let mut best_prev = None;
            for (j, &p) in positions[..i].iter().enumerate() {
                let s = scores[j] + self.sibling(m, p);
                if s > best {
                    best = s;
                    best_prev = Some(j);
                }
            }
            scores.push(best + self.modifier_score(parent, m));
            back.push(best_prev);
        }

        let mut total = self.sibling(end, head);
        let mut last = None;
        for (i, &p) in positions.iter().enumerate() {
            let s = scores[i] + self.sibling(end, p);
            if s > total {
                total = s;
                last = Some(i);
            }
        }

        let mut chain = vec![];
        while let Some(i) = last {
            chain.push(positions[i]);
            last = back[i];
        }
        chain.reverse();
        (total, chain)
    }
}
