//! 1文分の係り受け構造を保持する出力データ構造のモジュール。

use crate::errors::{DualParseError, Result};

/// 1文分の係り受け構造。
///
/// 次の3つの並列な配列から構成されます。
///
/// * `heads[m]` - 木における `m` の親。根は `None`
/// * `grandparents[m]` - `m` の祖父母（親の親）
/// * `modifiers[h][m]` - `m` が `h` の子として選ばれているかどうか
///
/// 推論の収束時には `grandparents[m] == heads[heads[m]]` および
/// `modifiers[h][m] == (heads[m] == Some(h))` が成り立ちます。
/// 最適化の途中ではこの不変条件が崩れることがあり、その食い違いが劣勾配になります。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyOutput {
    heads: Vec<Option<usize>>,
    grandparents: Vec<Option<usize>>,
    modifiers: Vec<bool>,
}

impl DependencyOutput {
    /// すべてのトークンが根で、子を持たない出力を作成します。
    ///
    /// # 引数
    ///
    /// * `len` - トークン数
    pub fn new(len: usize) -> Self {
        Self {
            heads: vec![None; len],
            grandparents: vec![None; len],
            modifiers: vec![false; len * len],
        }
    }

    /// 親の配列から、祖父母と子の集合が整合した出力を作成します。
    ///
    /// # 引数
    ///
    /// * `heads` - 各トークンの親。根は `None`
    ///
    /// # エラー
    ///
    /// 親の添字が範囲外の場合や自己ループがある場合、[`DualParseError`] が返されます。
    pub fn from_heads(heads: Vec<Option<usize>>) -> Result<Self> {
        let len = heads.len();
        for (m, &head) in heads.iter().enumerate() {
            if let Some(h) = head {
                if h >= len {
                    return Err(DualParseError::invalid_argument(
                        "heads",
                        format!("head {h} of token {m} is out of range for length {len}"),
                    ));
                }
                if h == m {
                    return Err(DualParseError::invalid_argument(
                        "heads",
                        format!("token {m} is attached to itself"),
                    ));
                }
            }
        }
        let mut output = Self {
            heads,
            grandparents: vec![None; len],
            modifiers: vec![false; len * len],
        };
        output.derive_factor_structures();
        Ok(output)
    }

    /// トークン数を返します。
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    /// トークンが存在しないかどうかを返します。
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// 親の配列を返します。
    #[inline(always)]
    pub fn heads(&self) -> &[Option<usize>] {
        &self.heads
    }

    /// トークン `m` の親を返します。
    #[inline(always)]
    pub fn head(&self, m: usize) -> Option<usize> {
        self.heads[m]
    }

    /// トークン `m` の祖父母を返します。
    #[inline(always)]
    pub fn grandparent(&self, m: usize) -> Option<usize> {
        self.grandparents[m]
    }

    /// `modifier` が `head` の子として選ばれているかどうかを返します。
    #[inline(always)]
    pub fn is_modifier(&self, head: usize, modifier: usize) -> bool {
        self.modifiers[head * self.len() + modifier]
    }

    pub(crate) fn set_heads(&mut self, heads: &[Option<usize>]) {
        self.heads.copy_from_slice(heads);
    }

    pub(crate) fn set_grandparent(&mut self, m: usize, grandparent: Option<usize>) {
        self.grandparents[m] = grandparent;
    }

    /// `head` の子の集合を置き換えます。
    pub(crate) fn set_modifiers(&mut self, head: usize, modifiers: &[usize]) {
        let len = self.len();
        let row = &mut self.modifiers[head * len..(head + 1) * len];
        row.fill(false);
        for &m in modifiers {
            row[m] = true;
        }
    }

    /// 親の配列から祖父母と子の集合を導出し直します。
    ///
    /// 推論直後の `grandparents` と `modifiers` は最後の部分問題の解を反映しており、
    /// 木と整合しているとは限りません。整合性が必要な場合はこのメソッドを呼び出してください。
    pub fn derive_factor_structures(&mut self) {
        let len = self.len();
        self.modifiers.fill(false);
        for m in 0..len {
            self.grandparents[m] = self.heads[m].and_then(|h| self.heads[h]);
            if let Some(h) = self.heads[m] {
                self.modifiers[h * len + m] = true;
            }
        }
    }

    /// 祖父母と子の集合が親の配列と整合しているかどうかを返します。
    pub fn is_consistent(&self) -> bool {
        let len = self.len();
        (0..len).all(|m| self.grandparents[m] == self.heads[m].and_then(|h| self.heads[h]))
            && (0..len).all(|h| {
                (0..len).all(|m| self.modifiers[h * len + m] == (self.heads[m] == Some(h)))
            })
    }

    /// 親の配列が自己ループも閉路も持たないかどうかを返します。
    pub fn is_tree(&self) -> bool {
        let len = self.len();
        // 0: unvisited, 1: on the current path, 2: reaches a root
        let mut state = vec![0u8; len];
        for start in 0..len {
            let mut path = vec![];
            let mut v = start;
            loop {
                match state[v] {
                    1 => return false,
                    2 => break,
                    _ => {}
                }
                state[v] = 1;
                path.push(v);
                match self.heads[v] {
                    Some(h) if h < len && h != v => v = h,
                    Some(_) => return false,
                    None => break,
                }
            }
            for v in path {
                state[v] = 2;
            }
        }
        true
    }

    /// `head` の右側の子を、近い順に返します。
    pub fn right_modifiers(&self, head: usize) -> impl Iterator<Item = usize> + '_ {
        (head + 1..self.len()).filter(move |&m| self.is_modifier(head, m))
    }

    /// `head` の左側の子を、近い順に返します。
    pub fn left_modifiers(&self, head: usize) -> impl Iterator<Item = usize> + '_ {
        (0..head).rev().filter(move |&m| self.is_modifier(head, m))
    }

    /// 親が一致するトークン数を返します。
    ///
    /// # 引数
    ///
    /// * `other` - 比較対象の出力
    pub fn num_matching_heads(&self, other: &Self) -> usize {
        self.heads
            .iter()
            .zip(&other.heads)
            .filter(|(a, b)| a == b)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_heads_derives_structures() {
        let output = DependencyOutput::from_heads(vec![Some(1), None, Some(1), Some(2)]).unwrap();
        assert_eq!(Some(1), output.head(0));
        assert_eq!(None, output.grandparent(0));
        assert_eq!(Some(1), output.grandparent(3));
        assert!(output.is_modifier(1, 0));
        assert!(output.is_modifier(1, 2));
        assert!(!output.is_modifier(2, 1));
        assert_eq!(vec![2], output.right_modifiers(1).collect::<Vec<_>>());
        assert_eq!(vec![0], output.left_modifiers(1).collect::<Vec<_>>());
        assert!(output.is_consistent());
        assert!(output.is_tree());
    }

    #[test]
    fn test_from_heads_rejects_invalid() {
        assert!(DependencyOutput::from_heads(vec![None, Some(1)]).is_err());
        assert!(DependencyOutput::from_heads(vec![None, Some(2)]).is_err());
    }

    #[test]
    fn test_cycle_detection() {
        let output = DependencyOutput::from_heads(vec![Some(1), Some(2), Some(0)]).unwrap();
        assert!(!output.is_tree());
        let output = DependencyOutput::from_heads(vec![None, Some(2), Some(1)]).unwrap();
        assert!(!output.is_tree());
        let output = DependencyOutput::from_heads(vec![None, Some(0), Some(0)]).unwrap();
        assert!(output.is_tree());
    }

    #[test]
    fn test_inconsistency() {
        let mut output = DependencyOutput::from_heads(vec![None, Some(0), Some(1)]).unwrap();
        output.set_grandparent(2, None);
        assert!(!output.is_consistent());
        output.derive_factor_structures();
        assert!(output.is_consistent());
        output.set_modifiers(0, &[2]);
        assert!(!output.is_consistent());
    }
}
