//! 1文分の因子素性を保持する入力データ構造のモジュール。
//!
//! [`DependencyInput`] は、辺・祖父母・兄弟の各因子について、
//! その因子が発火する素性IDのリストを保持します。
//! 枝刈りされた因子は `None` として表現されます。

use std::num::NonZeroU32;

use hashbrown::HashMap;

use crate::errors::{DualParseError, Result};
use crate::utils::FromU32;

/// 素性ID。
///
/// 素性テンプレート文字列から割り当てられる1始まりの整数です。
pub type FeatureId = NonZeroU32;

/// 因子のスコアを計算するオラクル。
///
/// 推論エンジンはこのトレイトを通じて重みを参照します。
pub trait FactorScorer {
    /// 素性リストのスコアを計算します。
    ///
    /// # 引数
    ///
    /// * `features` - 因子の素性リスト。因子が存在しない場合は `None`
    ///
    /// # 戻り値
    ///
    /// 素性の重みの合計。`features` が `None` の場合は NaN
    fn score(&self, features: Option<&[FeatureId]>) -> f64;
}

/// 1文分の因子素性。
///
/// 構築後は読み取り専用で、推論エンジンやモデルが変更することはありません。
///
/// 添字の規約：
///
/// * トークンは `0..len`
/// * 兄弟因子の `modifier == len` は連鎖の終端（END）
/// * 兄弟因子の `previous == head` は連鎖の始端（START）
pub struct DependencyInput {
    len: usize,
    edges: Vec<Option<Box<[FeatureId]>>>,
    grandparents: HashMap<(u32, u32, u32), Box<[FeatureId]>>,
    siblings: HashMap<(u32, u32, u32), Box<[FeatureId]>>,
}

impl DependencyInput {
    /// トークン数を返します。
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// トークンが存在しないかどうかを返します。
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 辺因子 `head → modifier` の素性リストを返します。
    ///
    /// 範囲外の添字や枝刈りされた因子に対しては `None` を返します。
    pub fn edge_features(&self, head: usize, modifier: usize) -> Option<&[FeatureId]> {
        if head >= self.len || modifier >= self.len {
            return None;
        }
        self.edges[head * self.len + modifier].as_deref()
    }

    /// 祖父母因子 `grandparent → head → modifier` の素性リストを返します。
    pub fn grandparent_features(
        &self,
        head: usize,
        modifier: usize,
        grandparent: usize,
    ) -> Option<&[FeatureId]> {
        let key = (
            u32::try_from(head).ok()?,
            u32::try_from(modifier).ok()?,
            u32::try_from(grandparent).ok()?,
        );
        self.grandparents.get(&key).map(|f| &**f)
    }

    /// 兄弟因子 `(head, modifier, previous)` の素性リストを返します。
    ///
    /// `modifier == len()` は連鎖の終端、`previous == head` は始端を表します。
    pub fn sibling_features(
        &self,
        head: usize,
        modifier: usize,
        previous: usize,
    ) -> Option<&[FeatureId]> {
        let key = (
            u32::try_from(head).ok()?,
            u32::try_from(modifier).ok()?,
            u32::try_from(previous).ok()?,
        );
        self.siblings.get(&key).map(|f| &**f)
    }

    /// 存在する祖父母因子を `((head, modifier, grandparent), features)` の形で列挙します。
    ///
    /// 列挙の順序は不定です。
    pub fn grandparent_factors(
        &self,
    ) -> impl Iterator<Item = ((usize, usize, usize), &[FeatureId])> + '_ {
        self.grandparents.iter().map(|(&(h, m, g), f)| {
            (
                (usize::from_u32(h), usize::from_u32(m), usize::from_u32(g)),
                &**f,
            )
        })
    }

    /// 存在する兄弟因子を `((head, modifier, previous), features)` の形で列挙します。
    ///
    /// 列挙の順序は不定です。
    pub fn sibling_factors(
        &self,
    ) -> impl Iterator<Item = ((usize, usize, usize), &[FeatureId])> + '_ {
        self.siblings.iter().map(|(&(h, m, p), f)| {
            (
                (usize::from_u32(h), usize::from_u32(m), usize::from_u32(p)),
                &**f,
            )
        })
    }

    /// 存在する祖父母因子の数を返します。
    pub fn num_grandparent_factors(&self) -> usize {
        self.grandparents.len()
    }

    /// 存在する兄弟因子の数を返します。
    pub fn num_sibling_factors(&self) -> usize {
        self.siblings.len()
    }
}

/// [`DependencyInput`] のビルダー。
///
/// 因子を1つずつ登録し、最後に [`build()`](Self::build) で読み取り専用の入力を生成します。
pub struct DependencyInputBuilder {
    len: usize,
    len_u32: u32,
    edges: Vec<Option<Box<[FeatureId]>>>,
    grandparents: HashMap<(u32, u32, u32), Box<[FeatureId]>>,
    siblings: HashMap<(u32, u32, u32), Box<[FeatureId]>>,
}

impl DependencyInputBuilder {
    /// 指定したトークン数の空のビルダーを作成します。
    ///
    /// # 引数
    ///
    /// * `len` - トークン数
    ///
    /// # エラー
    ///
    /// トークン数が `u32` で表現できない場合、[`DualParseError`] が返されます。
    pub fn new(len: usize) -> Result<Self> {
        let len_u32 = u32::try_from(len)?;
        if len_u32 == u32::MAX {
            return Err(DualParseError::invalid_argument(
                "len",
                "the sentence is too long",
            ));
        }
        Ok(Self {
            len,
            len_u32,
            edges: vec![None; len * len],
            grandparents: HashMap::new(),
            siblings: HashMap::new(),
        })
    }

    fn check_token(&self, name: &'static str, idx: usize) -> Result<u32> {
        if idx < self.len {
            Ok(idx as u32)
        } else {
            Err(DualParseError::invalid_argument(
                name,
                format!("token index {idx} is out of range for length {}", self.len),
            ))
        }
    }

    /// 辺因子 `head → modifier` の素性を登録します。
    ///
    /// # エラー
    ///
    /// 添字が範囲外の場合や自己ループの場合、[`DualParseError`] が返されます。
    pub fn edge(&mut self, head: usize, modifier: usize, features: Vec<FeatureId>) -> Result<()> {
        self.check_token("head", head)?;
        self.check_token("modifier", modifier)?;
        if head == modifier {
            return Err(DualParseError::invalid_argument(
                "modifier",
                "an edge must not be a self-loop",
            ));
        }
        self.edges[head * self.len + modifier] = Some(features.into_boxed_slice());
        Ok(())
    }

    /// 祖父母因子 `grandparent → head → modifier` の素性を登録します。
    ///
    /// # エラー
    ///
    /// 添字が範囲外の場合や3つの添字が相異ならない場合、[`DualParseError`] が返されます。
    pub fn grandparent(
        &mut self,
        head: usize,
        modifier: usize,
        grandparent: usize,
        features: Vec<FeatureId>,
    ) -> Result<()> {
        let h = self.check_token("head", head)?;
        let m = self.check_token("modifier", modifier)?;
        let g = self.check_token("grandparent", grandparent)?;
        if h == m || h == g || m == g {
            return Err(DualParseError::invalid_argument(
                "grandparent",
                "head, modifier and grandparent must be distinct",
            ));
        }
        self.grandparents
            .insert((h, m, g), features.into_boxed_slice());
        Ok(())
    }

    /// 兄弟因子 `(head, modifier, previous)` の素性を登録します。
    ///
    /// `modifier` には終端を表す `len` を、`previous` には始端を表す `head` を指定できます。
    ///
    /// # エラー
    ///
    /// 添字が範囲外の場合、または `previous` が `head` から見て `modifier` より
    /// 外側にある場合、[`DualParseError`] が返されます。
    pub fn sibling(
        &mut self,
        head: usize,
        modifier: usize,
        previous: usize,
        features: Vec<FeatureId>,
    ) -> Result<()> {
        let h = self.check_token("head", head)?;
        let p = self.check_token("previous", previous)?;
        let m = if modifier == self.len {
            self.len_u32
        } else {
            self.check_token("modifier", modifier)?
        };
        if m == h {
            return Err(DualParseError::invalid_argument(
                "modifier",
                "a head cannot be its own sibling-chain modifier",
            ));
        }
        if m != self.len_u32 && p != h && (p < h) != (m < h) {
            return Err(DualParseError::invalid_argument(
                "previous",
                "a sibling pair must lie on one side of the head",
            ));
        }
        if m != self.len_u32 && p != h && m.abs_diff(h) <= p.abs_diff(h) {
            return Err(DualParseError::invalid_argument(
                "previous",
                "the previous modifier must be closer to the head",
            ));
        }
        self.siblings.insert((h, m, p), features.into_boxed_slice());
        Ok(())
    }

    /// 読み取り専用の [`DependencyInput`] を生成します。
    pub fn build(self) -> DependencyInput {
        DependencyInput {
            len: self.len,
            edges: self.edges,
            grandparents: self.grandparents,
            siblings: self.siblings,
        }
    }
}
