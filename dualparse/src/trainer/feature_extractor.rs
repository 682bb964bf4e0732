//! 素性テンプレートから因子素性を抽出するモジュール。

use std::num::NonZeroU32;
use std::sync::LazyLock;

use hashbrown::HashMap;
use regex::Regex;

use crate::errors::{DualParseError, Result};
use crate::input::{DependencyInput, DependencyInputBuilder, FeatureId};
use crate::sentence::Sentence;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%(?:([hmgs])\.(form|pos)|(dist)|(dir))").unwrap());

const START: &str = "<START>";
const END: &str = "<END>";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FactorKind {
    Edge,
    Grandparent,
    Sibling,
}

impl FactorKind {
    const fn prefix(self) -> char {
        match self {
            Self::Edge => 'E',
            Self::Grandparent => 'G',
            Self::Sibling => 'S',
        }
    }

    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Edge => "EDGE",
            Self::Grandparent => "GRANDPARENT",
            Self::Sibling => "SIBLING",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Head,
    Modifier,
    Grandparent,
    Sibling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attr {
    Form,
    Pos,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Piece {
    Text(String),
    Token(Role, Attr),
    Dist,
    Dir,
}

/// 1行分の素性テンプレート。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Template {
    kind: FactorKind,
    pieces: Vec<Piece>,
    source: String,
}

impl Template {
    /// テンプレート文字列を解析します。
    ///
    /// # エラー
    ///
    /// `%g` が GRANDPARENT 以外で、`%s` が SIBLING 以外で使われた場合、
    /// [`DualParseError`] が返されます。
    pub fn parse(kind: FactorKind, source: &str) -> Result<Self> {
        let mut pieces = vec![];
        let mut last = 0;
        for cap in PLACEHOLDER.captures_iter(source) {
            let Some(whole) = cap.get(0) else {
                continue;
            };
            if whole.start() > last {
                pieces.push(Piece::Text(source[last..whole.start()].to_string()));
            }
            last = whole.end();

            if cap.get(3).is_some() {
                pieces.push(Piece::Dist);
                continue;
            }
            if cap.get(4).is_some() {
                pieces.push(Piece::Dir);
                continue;
            }
            let role = match cap.get(1).map(|m| m.as_str()) {
                Some("h") => Role::Head,
                Some("m") => Role::Modifier,
                Some("g") => Role::Grandparent,
                _ => Role::Sibling,
            };
            let attr = if cap.get(2).map(|m| m.as_str()) == Some("form") {
                Attr::Form
            } else {
                Attr::Pos
            };
            if role == Role::Grandparent && kind != FactorKind::Grandparent {
                return Err(DualParseError::invalid_format(
                    "feature.def",
                    format!("%g is only available in GRANDPARENT templates: {source}"),
                ));
            }
            if role == Role::Sibling && kind != FactorKind::Sibling {
                return Err(DualParseError::invalid_format(
                    "feature.def",
                    format!("%s is only available in SIBLING templates: {source}"),
                ));
            }
            pieces.push(Piece::Token(role, attr));
        }
        if last < source.len() {
            pieces.push(Piece::Text(source[last..].to_string()));
        }
        Ok(Self {
            kind,
            pieces,
            source: source.to_string(),
        })
    }

    #[inline(always)]
    pub fn kind(&self) -> FactorKind {
        self.kind
    }

    #[inline(always)]
    pub fn source(&self) -> &str {
        &self.source
    }

    fn render(&self, sentence: &Sentence, factor: &Factor, buf: &mut String) {
        let tokens = sentence.tokens();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => buf.push_str(text),
                Piece::Token(role, attr) => {
                    let idx = match role {
                        Role::Head => Some(factor.head),
                        Role::Modifier => Some(factor.modifier),
                        Role::Grandparent | Role::Sibling => factor.other,
                    };
                    match idx {
                        // The previous modifier equals the head at the start of a chain.
                        Some(i) if *role == Role::Sibling && i == factor.head => {
                            buf.push_str(START)
                        }
                        Some(i) if i < tokens.len() => buf.push_str(match attr {
                            Attr::Form => tokens[i].form(),
                            Attr::Pos => tokens[i].pos(),
                        }),
                        _ => buf.push_str(END),
                    }
                }
                Piece::Dist => {
                    if factor.modifier >= tokens.len() {
                        buf.push_str(END);
                    } else {
                        let dist = match factor.head.abs_diff(factor.modifier) {
                            d @ 1..=4 => d,
                            5..=9 => 5,
                            _ => 10,
                        };
                        buf.push_str(&dist.to_string());
                    }
                }
                Piece::Dir => {
                    let side = if factor.modifier < tokens.len() {
                        Some(factor.modifier)
                    } else {
                        factor.other.filter(|&p| p != factor.head)
                    };
                    buf.push_str(match side {
                        Some(i) if i < factor.head => "L",
                        Some(_) => "R",
                        None => "-",
                    });
                }
            }
        }
    }
}

/// テンプレートを埋める因子の位置
struct Factor {
    head: usize,
    modifier: usize,
    other: Option<usize>,
}

/// 素性抽出器。
///
/// テンプレートと、素性文字列から素性IDへの対応表を保持します。
#[derive(Clone, Debug, Default)]
pub(crate) struct FeatureExtractor {
    templates: Vec<Template>,
    feature_ids: HashMap<String, FeatureId>,
}

impl FeatureExtractor {
    pub fn new(templates: Vec<Template>) -> Self {
        Self {
            templates,
            feature_ids: HashMap::new(),
        }
    }

    pub fn from_parts<I>(templates: Vec<Template>, feature_ids: I) -> Self
    where
        I: IntoIterator<Item = (String, FeatureId)>,
    {
        Self {
            templates,
            feature_ids: feature_ids.into_iter().collect(),
        }
    }

    #[inline(always)]
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn feature_ids(&self) -> impl Iterator<Item = (&str, FeatureId)> + '_ {
        self.feature_ids.iter().map(|(s, &id)| (s.as_str(), id))
    }

    pub fn num_features(&self) -> usize {
        self.feature_ids.len()
    }

    /// 条件を満たす素性文字列のみを残します。IDは変わりません。
    pub fn retain_features<F>(&mut self, mut keep: F)
    where
        F: FnMut(FeatureId) -> bool,
    {
        self.feature_ids.retain(|_, id| keep(*id));
    }

    /// 未知の素性文字列に新しいIDを割り当てながら、文の因子素性を抽出します。
    ///
    /// # エラー
    ///
    /// 素性IDが `u32` の範囲を超えた場合、[`DualParseError`] が返されます。
    pub fn extract_growing(&mut self, sentence: &Sentence) -> Result<DependencyInput> {
        let feature_ids = &mut self.feature_ids;
        build_input(&self.templates, sentence, |s| {
            if let Some(&id) = feature_ids.get(s) {
                return Ok(Some(id));
            }
            let id = NonZeroU32::try_from(u32::try_from(feature_ids.len() + 1)?)?;
            feature_ids.insert(s.to_string(), id);
            Ok(Some(id))
        })
    }

    /// 既知の素性のみを使って、文の因子素性を抽出します。
    ///
    /// 未知の素性文字列は無視されます。
    pub fn extract(&self, sentence: &Sentence) -> Result<DependencyInput> {
        build_input(&self.templates, sentence, |s| {
            Ok(self.feature_ids.get(s).copied())
        })
    }
}

fn templates_of(templates: &[Template], kind: FactorKind) -> Vec<(usize, &Template)> {
    templates
        .iter()
        .enumerate()
        .filter(|(_, t)| t.kind() == kind)
        .collect()
}

fn collect_features<F>(
    templates: &[(usize, &Template)],
    sentence: &Sentence,
    factor: &Factor,
    buf: &mut String,
    lookup: &mut F,
) -> Result<Vec<FeatureId>>
where
    F: FnMut(&str) -> Result<Option<FeatureId>>,
{
    let mut features = Vec::with_capacity(templates.len());
    for &(idx, template) in templates {
        buf.clear();
        buf.push(template.kind().prefix());
        buf.push_str(&idx.to_string());
        buf.push(':');
        template.render(sentence, factor, buf);
        if let Some(id) = lookup(buf.as_str())? {
            features.push(id);
        }
    }
    Ok(features)
}

fn build_input<F>(
    templates: &[Template],
    sentence: &Sentence,
    mut lookup: F,
) -> Result<DependencyInput>
where
    F: FnMut(&str) -> Result<Option<FeatureId>>,
{
    let len = sentence.len();
    let edge_templates = templates_of(templates, FactorKind::Edge);
    let grandparent_templates = templates_of(templates, FactorKind::Grandparent);
    let sibling_templates = templates_of(templates, FactorKind::Sibling);

    let mut builder = DependencyInputBuilder::new(len)?;
    let mut buf = String::new();

    for head in 0..len {
        for modifier in (0..len).filter(|&m| m != head) {
            let factor = Factor {
                head,
                modifier,
                other: None,
            };
            let features =
                collect_features(&edge_templates, sentence, &factor, &mut buf, &mut lookup)?;
            builder.edge(head, modifier, features)?;

            if grandparent_templates.is_empty() {
                continue;
            }
            for g in (0..len).filter(|&g| g != head && g != modifier) {
                let factor = Factor {
                    head,
                    modifier,
                    other: Some(g),
                };
                let features = collect_features(
                    &grandparent_templates,
                    sentence,
                    &factor,
                    &mut buf,
                    &mut lookup,
                )?;
                builder.grandparent(head, modifier, g, features)?;
            }
        }
    }

    if sibling_templates.is_empty() {
        return Ok(builder.build());
    }
    let mut add_sibling = |head: usize,
                           modifier: usize,
                           prev: usize,
                           builder: &mut DependencyInputBuilder|
     -> Result<()> {
        let factor = Factor {
            head,
            modifier,
            other: Some(prev),
        };
        let features =
            collect_features(&sibling_templates, sentence, &factor, &mut buf, &mut lookup)?;
        builder.sibling(head, modifier, prev, features)
    };
    for head in 0..len {
        let left: Vec<usize> = (0..head).rev().collect();
        let right: Vec<usize> = (head + 1..len).collect();
        for side in [left, right] {
            for (i, &m) in side.iter().enumerate() {
                add_sibling(head, m, head, &mut builder)?;
                for &prev in &side[..i] {
                    add_sibling(head, m, prev, &mut builder)?;
                }
                add_sibling(head, len, m, &mut builder)?;
            }
        }
        add_sibling(head, len, head, &mut builder)?;
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence() -> Sentence {
        [("John", "NNP"), ("saw", "VBD"), ("Mary", "NNP")]
            .into_iter()
            .collect()
    }

    fn extractor(lines: &[(FactorKind, &str)]) -> FeatureExtractor {
        FeatureExtractor::new(
            lines
                .iter()
                .map(|&(kind, src)| Template::parse(kind, src).unwrap())
                .collect(),
        )
    }

    fn names(extractor: &FeatureExtractor, features: Option<&[FeatureId]>) -> Vec<String> {
        let mut names: Vec<String> = features
            .unwrap()
            .iter()
            .map(|id| {
                extractor
                    .feature_ids()
                    .find(|&(_, x)| x == *id)
                    .map(|(s, _)| s.to_string())
                    .unwrap()
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_parse_template() {
        let t = Template::parse(FactorKind::Edge, "%h.pos>%m.form/%dir%dist").unwrap();
        assert_eq!(
            vec![
                Piece::Token(Role::Head, Attr::Pos),
                Piece::Text(">".to_string()),
                Piece::Token(Role::Modifier, Attr::Form),
                Piece::Text("/".to_string()),
                Piece::Dir,
                Piece::Dist,
            ],
            t.pieces
        );
        assert!(Template::parse(FactorKind::Edge, "%g.pos").is_err());
        assert!(Template::parse(FactorKind::Grandparent, "%s.pos").is_err());
        assert!(Template::parse(FactorKind::Sibling, "%s.pos_%m.pos").is_ok());
    }

    #[test]
    fn test_extract_edges() {
        let mut extractor = extractor(&[
            (FactorKind::Edge, "%h.form>%m.form"),
            (FactorKind::Edge, "%dir%dist"),
        ]);
        let input = extractor.extract_growing(&sentence()).unwrap();
        assert_eq!(3, input.len());
        assert_eq!(0, input.num_grandparent_factors());
        assert_eq!(0, input.num_sibling_factors());
        assert_eq!(
            vec!["E0:saw>John", "E1:L1"],
            names(&extractor, input.edge_features(1, 0))
        );
        assert_eq!(
            vec!["E0:John>Mary", "E1:R2"],
            names(&extractor, input.edge_features(0, 2))
        );
        // Both edges at distance 1 to the right share "E1:R1".
        let a = input.edge_features(0, 1).unwrap();
        let b = input.edge_features(1, 2).unwrap();
        assert_eq!(a[1], b[1]);
    }

    #[test]
    fn test_extract_sentinels() {
        let mut extractor = extractor(&[(FactorKind::Sibling, "%s.pos_%m.pos_%dir")]);
        let input = extractor.extract_growing(&sentence()).unwrap();
        assert_eq!(
            vec!["S0:<START>_NNP_R"],
            names(&extractor, input.sibling_features(1, 2, 1))
        );
        assert_eq!(
            vec!["S0:NNP_<END>_L"],
            names(&extractor, input.sibling_features(1, 3, 0))
        );
        assert_eq!(
            vec!["S0:<START>_<END>_-"],
            names(&extractor, input.sibling_features(0, 3, 0))
        );
        assert!(input.sibling_features(0, 1, 2).is_none());
    }

    #[test]
    fn test_frozen_skips_unknown() {
        let mut extractor = extractor(&[(FactorKind::Edge, "%h.form>%m.form")]);
        extractor.extract_growing(&sentence()).unwrap();
        let num_features = extractor.num_features();
        assert_eq!(6, num_features);

        let other: Sentence = [("John", "NNP"), ("ran", "VBD")].into_iter().collect();
        let input = extractor.extract(&other).unwrap();
        assert_eq!(Some(&[][..]), input.edge_features(0, 1));
        assert_eq!(num_features, extractor.num_features());
    }

    #[test]
    fn test_grandparent_factors() {
        let mut extractor = extractor(&[(FactorKind::Grandparent, "%g.pos>%h.pos>%m.pos")]);
        let input = extractor.extract_growing(&sentence()).unwrap();
        assert_eq!(6, input.num_grandparent_factors());
        assert_eq!(
            vec!["G0:NNP>VBD>NNP"],
            names(&extractor, input.grandparent_features(1, 2, 0))
        );
        // Edges exist without any features.
        assert_eq!(Some(&[][..]), input.edge_features(1, 2));
    }
}
