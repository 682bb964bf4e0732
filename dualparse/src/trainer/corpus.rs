//! コーパスデータ構造のモジュール。
//!
//! CoNLL-X形式の係り受けコーパスを読み書きします。

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::ops::{Deref, DerefMut};

use crate::errors::{DualParseError, Result};
use crate::sentence::{Sentence, Token};

/// 文と係り受けの組。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Example {
    /// トークン列。
    pub(crate) sentence: Sentence,

    /// 各トークンの親。根は `None`。
    pub(crate) heads: Vec<Option<usize>>,
}

impl Example {
    /// 新しい例文を作成します。
    ///
    /// # 引数
    ///
    /// * `sentence` - トークン列
    /// * `heads` - 各トークンの親（0始まり）。根は `None`
    ///
    /// # エラー
    ///
    /// 長さが一致しない場合、親が範囲外の場合、自己ループがある場合、
    /// [`DualParseError`] が返されます。
    pub fn new(sentence: Sentence, heads: Vec<Option<usize>>) -> Result<Self> {
        if sentence.len() != heads.len() {
            return Err(DualParseError::invalid_argument(
                "heads",
                format!(
                    "length {} does not match the sentence length {}",
                    heads.len(),
                    sentence.len()
                ),
            ));
        }
        for (m, &head) in heads.iter().enumerate() {
            if let Some(h) = head
                && (h >= heads.len() || h == m)
            {
                return Err(DualParseError::invalid_argument(
                    "heads",
                    format!("invalid head {h} for token {m}"),
                ));
            }
        }
        Ok(Self { sentence, heads })
    }

    #[inline(always)]
    pub fn sentence(&self) -> &Sentence {
        &self.sentence
    }

    #[inline(always)]
    pub fn heads(&self) -> &[Option<usize>] {
        &self.heads
    }

    /// 例文をCoNLL-X形式で書き込みます。
    ///
    /// 10列の行を出力し、最後に空行を出力します。
    /// 見出し語、素性、係り受けラベルの列は `_` になります。
    ///
    /// # エラー
    ///
    /// 書き込みに失敗した場合、I/Oエラーが返されます。
    pub fn write<W>(&self, wtr: W) -> Result<()>
    where
        W: Write,
    {
        let mut wtr = BufWriter::new(wtr);
        for (i, (token, head)) in self.sentence.tokens().iter().zip(&self.heads).enumerate() {
            let head = head.map_or(0, |h| h + 1);
            writeln!(
                &mut wtr,
                "{}\t{}\t_\t{}\t{}\t_\t{}\t_\t_\t_",
                i + 1,
                token.form(),
                token.pos(),
                token.pos(),
                head
            )?;
        }
        writeln!(&mut wtr)?;
        Ok(())
    }
}

/// コーパスの表現。
#[derive(Clone, Debug, Default)]
pub struct Corpus {
    /// 例文のリスト。
    pub(crate) examples: Vec<Example>,
}

impl Corpus {
    /// CoNLL-X形式のコーパスを読み込みます。
    ///
    /// 各行はタブ区切りで、少なくとも `ID FORM LEMMA CPOSTAG POSTAG FEATS HEAD` の7列を持ちます。
    /// 空行が文の区切りで、`#` で始まる行は無視されます。
    /// 品詞には POSTAG を使用し、それが `_` の場合は CPOSTAG を使用します。
    /// HEAD が `0` または `_` のトークンは根として扱います。
    ///
    /// # 引数
    ///
    /// * `rdr` - コーパスのリーダー
    ///
    /// # エラー
    ///
    /// 入力形式が不正な場合、行番号を含む [`DualParseError`] が返されます。
    pub fn from_reader<R>(rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let buf = BufReader::new(rdr);

        let mut examples = vec![];
        let mut sentence = Sentence::new();
        let mut heads = vec![];
        for (i, line) in buf.lines().enumerate() {
            let line = line?;
            let lineno = i + 1;
            let line = line.trim_end_matches('\r');
            if line.starts_with('#') {
                continue;
            }
            if line.trim().is_empty() {
                if !sentence.is_empty() {
                    examples.push(Self::finish(&mut sentence, &mut heads, lineno)?);
                }
                continue;
            }

            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 7 {
                return Err(DualParseError::invalid_format(
                    "rdr",
                    format!("line {lineno}: expected at least 7 columns, but got {}", cols.len()),
                ));
            }
            let id: usize = cols[0].parse().map_err(|_| {
                DualParseError::invalid_format(
                    "rdr",
                    format!("line {lineno}: invalid token id {}", cols[0]),
                )
            })?;
            if id != sentence.len() + 1 {
                return Err(DualParseError::invalid_format(
                    "rdr",
                    format!("line {lineno}: token ids must be consecutive from 1"),
                ));
            }
            let head = match cols[6] {
                "_" | "0" => None,
                h => Some(h.parse::<usize>().map_err(|_| {
                    DualParseError::invalid_format(
                        "rdr",
                        format!("line {lineno}: invalid head {h}"),
                    )
                })?),
            };
            let pos = if cols[4] == "_" { cols[3] } else { cols[4] };
            sentence.push(Token::new(cols[1], pos));
            heads.push(head.map(|h| (h, lineno)));
        }
        if !sentence.is_empty() {
            examples.push(Self::finish(&mut sentence, &mut heads, 0)?);
        }

        Ok(Self { examples })
    }

    /// 読み込み途中の文を例文に変換します。
    ///
    /// `heads` は1始まりの親と行番号の組です。
    fn finish(
        sentence: &mut Sentence,
        heads: &mut Vec<Option<(usize, usize)>>,
        lineno: usize,
    ) -> Result<Example> {
        let len = sentence.len();
        let mut converted = Vec::with_capacity(len);
        for (m, head) in heads.drain(..).enumerate() {
            converted.push(match head {
                Some((h, line)) if h > len || h == m + 1 => {
                    return Err(DualParseError::invalid_format(
                        "rdr",
                        format!("line {line}: head {h} is out of range or a self-loop"),
                    ));
                }
                Some((h, _)) => Some(h - 1),
                None => None,
            });
        }
        let sentence = std::mem::take(sentence);
        Example::new(sentence, converted).map_err(|e| {
            DualParseError::invalid_format("rdr", format!("sentence ending at line {lineno}: {e}"))
        })
    }

    /// 例文のベクタからコーパスを作成します。
    pub fn from_examples(examples: Vec<Example>) -> Self {
        Self { examples }
    }

    /// コーパス全体をCoNLL-X形式で書き込みます。
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        for example in &self.examples {
            example.write(&mut wtr)?;
        }
        Ok(())
    }
}

impl Deref for Corpus {
    type Target = [Example];

    fn deref(&self) -> &Self::Target {
        &self.examples
    }
}

impl DerefMut for Corpus {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.examples
    }
}
