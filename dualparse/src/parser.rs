//! 学習済みの係り受け解析器。

use std::io::{Read, Write};
use std::num::NonZeroU32;

use rayon::prelude::*;
use rkyv::api::serialize_using;
use rkyv::rancor::Error;
use rkyv::ser::Serializer;
use rkyv::ser::allocator::Arena;
use rkyv::ser::sharing::Share;
use rkyv::ser::writer::IoWriter;
use rkyv::util::{AlignedVec, with_arena};
use rkyv::{Archive, Deserialize, Serialize, from_bytes};

use crate::decoder::{DecodeReport, Decoder, DecoderConfig, Worker};
use crate::errors::{DualParseError, Result};
use crate::model::Model;
use crate::output::DependencyOutput;
use crate::sentence::Sentence;
use crate::trainer::{FeatureExtractor, TrainerConfig};

/// モデルファイルのマジックバイト列
pub const MODEL_MAGIC: &[u8] = b"DualParseModel 0.1\n";

const MODEL_MAGIC_LEN: usize = MODEL_MAGIC.len();
const RKYV_ALIGNMENT: usize = 16;
const PADDING_LEN: usize = (RKYV_ALIGNMENT - (MODEL_MAGIC_LEN % RKYV_ALIGNMENT)) % RKYV_ALIGNMENT;

/// 永続化される解析器のデータ。
#[derive(Archive, Serialize, Deserialize)]
struct ParserData {
    /// `KIND template` 形式のテンプレート行
    templates: Vec<String>,
    feature_ids: Vec<(String, u32)>,
    weights: Vec<(u32, f64)>,
    decoder_config: DecoderConfig,
}

/// 学習済みの係り受け解析器。
///
/// 素性抽出器、モデル、推論エンジンをまとめたものです。
pub struct Parser {
    extractor: FeatureExtractor,
    model: Model,
    decoder: Decoder,
}

impl Parser {
    pub(crate) fn new(
        extractor: FeatureExtractor,
        model: Model,
        decoder_config: DecoderConfig,
    ) -> Result<Self> {
        Ok(Self {
            extractor,
            model,
            decoder: Decoder::new(decoder_config)?,
        })
    }

    /// モデルを返します。
    #[inline(always)]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// 推論エンジンの設定を返します。
    #[inline(always)]
    pub fn decoder_config(&self) -> &DecoderConfig {
        self.decoder.config()
    }

    /// 推論エンジンの設定を置き換えます。
    ///
    /// # エラー
    ///
    /// 設定が不正な場合、[`DualParseError`] が返されます。
    pub fn set_decoder_config(&mut self, config: DecoderConfig) -> Result<()> {
        self.decoder = Decoder::new(config)?;
        Ok(())
    }

    /// 素性文字列の数を返します。
    pub fn num_features(&self) -> usize {
        self.extractor.num_features()
    }

    fn parse_with(
        &self,
        worker: &mut Worker,
        sentence: &Sentence,
    ) -> Result<(Vec<Option<usize>>, DecodeReport)> {
        let input = self.extractor.extract(sentence)?;
        let mut output = DependencyOutput::new(input.len());
        let report = worker.decode(&self.model, &input, &mut output)?;
        Ok((output.heads().to_vec(), report))
    }

    /// 文を解析し、各トークンの親を返します。根は `None` です。
    ///
    /// # エラー
    ///
    /// 推論に失敗した場合、[`DualParseError`] が返されます。
    pub fn parse(&self, sentence: &Sentence) -> Result<Vec<Option<usize>>> {
        self.parse_with_report(sentence).map(|(heads, _)| heads)
    }

    /// 文を解析し、各トークンの親と推論の要約を返します。
    pub fn parse_with_report(
        &self,
        sentence: &Sentence,
    ) -> Result<(Vec<Option<usize>>, DecodeReport)> {
        let mut worker = self.decoder.new_worker();
        self.parse_with(&mut worker, sentence)
    }

    /// 複数の文を並列に解析します。
    ///
    /// スレッドごとに1つのワーカーを使用し、結果は入力と同じ順に並びます。
    pub fn parse_batch(&self, sentences: &[Sentence]) -> Result<Vec<Vec<Option<usize>>>> {
        sentences
            .par_iter()
            .map_init(
                || self.decoder.new_worker(),
                |worker, sentence| self.parse_with(worker, sentence).map(|(heads, _)| heads),
            )
            .collect()
    }

    fn to_data(&self) -> ParserData {
        let mut feature_ids: Vec<(String, u32)> = self
            .extractor
            .feature_ids()
            .map(|(s, id)| (s.to_string(), id.get()))
            .collect();
        feature_ids.sort_unstable_by_key(|&(_, id)| id);
        let mut weights: Vec<(u32, f64)> = self
            .model
            .weights()
            .filter(|&(_, w)| w != 0.0)
            .map(|(id, w)| (id.get(), w))
            .collect();
        weights.sort_unstable_by_key(|&(id, _)| id);
        ParserData {
            templates: self
                .extractor
                .templates()
                .iter()
                .map(|t| format!("{} {}", t.kind().keyword(), t.source()))
                .collect(),
            feature_ids,
            weights,
            decoder_config: *self.decoder.config(),
        }
    }

    fn from_data(data: ParserData) -> Result<Self> {
        let templates = data
            .templates
            .iter()
            .map(|line| TrainerConfig::parse_template(line))
            .collect::<Result<Vec<_>>>()?;
        let mut feature_ids = Vec::with_capacity(data.feature_ids.len());
        for (s, id) in data.feature_ids {
            feature_ids.push((s, NonZeroU32::try_from(id)?));
        }
        let mut weights = Vec::with_capacity(data.weights.len());
        for (id, w) in data.weights {
            weights.push((NonZeroU32::try_from(id)?, w));
        }
        Self::new(
            FeatureExtractor::from_parts(templates, feature_ids),
            Model::from_weights(weights),
            data.decoder_config,
        )
    }

    /// 解析器を書き出します。
    ///
    /// # エラー
    ///
    /// 書き込みやシリアライズに失敗した場合、[`DualParseError`] が返されます。
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        wtr.write_all(MODEL_MAGIC)?;
        wtr.write_all(&[0xFF; PADDING_LEN])?;

        let data = self.to_data();
        with_arena(|arena: &mut Arena| {
            let writer = IoWriter::new(&mut wtr);
            let mut serializer = Serializer::new(writer, arena.acquire(), Share::new());
            serialize_using::<_, Error>(&data, &mut serializer)
        })
        .map_err(|e| {
            DualParseError::invalid_state("rkyv serialization failed".to_string(), e.to_string())
        })?;

        Ok(())
    }

    /// 解析器を読み込みます。
    ///
    /// # エラー
    ///
    /// マジックバイト列が一致しない場合や、データが壊れている場合、
    /// [`DualParseError`] が返されます。
    pub fn read<R>(mut rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut magic = [0; MODEL_MAGIC_LEN];
        rdr.read_exact(&mut magic)?;
        if !magic.starts_with(MODEL_MAGIC) {
            return Err(DualParseError::invalid_argument(
                "rdr",
                "The magic number of the input model mismatches.",
            ));
        }
        let mut padding_buf = [0; PADDING_LEN];
        rdr.read_exact(&mut padding_buf)?;

        let mut buffer = vec![];
        rdr.read_to_end(&mut buffer)?;
        let mut aligned_bytes = AlignedVec::<RKYV_ALIGNMENT>::with_capacity(buffer.len());
        aligned_bytes.extend_from_slice(&buffer);

        let data = from_bytes::<ParserData, Error>(&aligned_bytes).map_err(|e| {
            DualParseError::invalid_state(
                "rkyv deserialization failed. The model file may be corrupted.".to_string(),
                e.to_string(),
            )
        })?;
        Self::from_data(data)
    }
}
