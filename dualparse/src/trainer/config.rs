//! トレーナーの設定モジュール。
//!
//! 素性テンプレートファイル（feature.def）を読み込みます。
//!
//! ```text
//! # comment
//! EDGE %h.pos_%m.pos_%dir%dist
//! GRANDPARENT %g.pos_%h.pos_%m.pos
//! SIBLING %s.pos_%m.pos_%dir
//! ```

use std::io::{BufRead, BufReader, Read};

use crate::errors::{DualParseError, Result};
use crate::trainer::feature_extractor::{FactorKind, FeatureExtractor, Template};

/// トレーナーの設定。
pub struct TrainerConfig {
    pub(crate) feature_extractor: FeatureExtractor,
}

impl TrainerConfig {
    /// テンプレートの1行を解析します。
    pub(crate) fn parse_template(line: &str) -> Result<Template> {
        for kind in [
            FactorKind::Edge,
            FactorKind::Grandparent,
            FactorKind::Sibling,
        ] {
            if let Some(template) = line
                .strip_prefix(kind.keyword())
                .and_then(|rest| rest.strip_prefix(' '))
            {
                return Template::parse(kind, template.trim());
            }
        }
        Err(DualParseError::invalid_format(
            "feature.def",
            format!("unknown template kind: {line}"),
        ))
    }

    /// 素性設定ファイルを解析します。
    ///
    /// # 引数
    ///
    /// * `rdr` - 素性設定ファイルのリーダー
    ///
    /// # エラー
    ///
    /// ファイル形式が不正な場合、またはEDGEテンプレートが1つもない場合、
    /// [`DualParseError`] が返されます。
    pub(crate) fn parse_feature_config<R>(rdr: R) -> Result<FeatureExtractor>
    where
        R: Read,
    {
        let reader = BufReader::new(rdr);

        let mut templates = vec![];
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            templates.push(Self::parse_template(line)?);
        }
        if !templates.iter().any(|t| t.kind() == FactorKind::Edge) {
            return Err(DualParseError::invalid_format(
                "feature.def",
                "at least one EDGE template is required",
            ));
        }

        Ok(FeatureExtractor::new(templates))
    }

    /// 素性設定ファイルのリーダーから設定を作成します。
    ///
    /// # 引数
    ///
    /// * `feature_templates_rdr` - 素性設定ファイル（feature.def）のリーダー
    ///
    /// # エラー
    ///
    /// ファイル形式が不正な場合、[`DualParseError`] が返されます。
    pub fn from_reader<R>(feature_templates_rdr: R) -> Result<Self>
    where
        R: Read,
    {
        Ok(Self {
            feature_extractor: Self::parse_feature_config(feature_templates_rdr)?,
        })
    }
}
