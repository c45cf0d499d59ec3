//! Pretrained BERT-family sentence embedder served with candle.
//!
//! The artifact points at the three HuggingFace files (config.json, model.safetensors and
//! tokenizer.json), each fetched from the artifact store. Inputs are tokenized as one
//! padded batch, run through the encoder once and pooled into one vector per input.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use serde::Deserialize;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::errors::EngineError;
use crate::inference::model::EmbeddingModel;

#[derive(Debug, Clone, Deserialize)]
pub struct CandleBertConfig {
    /// Artifact-store locations of the HuggingFace files.
    pub config: String,
    pub weights: String,
    pub tokenizer: String,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub pooling: Pooling,
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

fn default_max_length() -> usize {
    256
}

fn default_normalize() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    /// Mean over non-padding tokens.
    #[default]
    Mean,
    /// Hidden state of the first token.
    Cls,
}

/// Raw bytes of a checkpoint, as fetched from the artifact store.
pub struct BertFiles {
    pub config: Vec<u8>,
    pub weights: Vec<u8>,
    pub tokenizer: Vec<u8>,
}

#[derive(Deserialize)]
struct HiddenSize {
    hidden_size: usize,
}

struct Encoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    pooling: Pooling,
    normalize: bool,
}

#[derive(Clone)]
pub struct CandleBertEmbedder {
    model_id: String,
    dimension: usize,
    encoder: Arc<Encoder>,
}

impl CandleBertEmbedder {
    pub fn from_files(model_id: &str, settings: &CandleBertConfig, files: BertFiles) -> Result<Self> {
        let device = Device::Cpu;
        let config: BertConfig =
            serde_json::from_slice(&files.config).context("invalid BERT config.json")?;
        let HiddenSize { hidden_size } =
            serde_json::from_slice(&files.config).context("config.json has no hidden_size")?;

        let vb = VarBuilder::from_buffered_safetensors(files.weights, DTYPE, &device)
            .context("invalid safetensors weights")?;
        let model = BertModel::load(vb, &config).context("weights do not match config.json")?;

        let mut tokenizer = Tokenizer::from_bytes(&files.tokenizer)
            .map_err(|e| anyhow!("invalid tokenizer.json: {e}"))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: settings.max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("invalid truncation settings: {e}"))?;

        Ok(Self {
            model_id: model_id.to_string(),
            dimension: hidden_size,
            encoder: Arc::new(Encoder {
                model,
                tokenizer,
                device,
                pooling: settings.pooling,
                normalize: settings.normalize,
            }),
        })
    }
}

impl Encoder {
    fn embed(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| anyhow!("tokenization failed: {e}"))?;

        let ids = encodings
            .iter()
            .map(|e| Tensor::new(e.get_ids(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let masks = encodings
            .iter()
            .map(|e| Tensor::new(e.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        // (batch, seq, hidden)
        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        let pooled = match self.pooling {
            Pooling::Cls => hidden.i((.., 0))?,
            Pooling::Mean => {
                let mask = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;
                let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
                summed.broadcast_div(&mask.sum(1)?)?
            }
        };
        let pooled = if self.normalize {
            let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-12)?;
            pooled.broadcast_div(&norms)?
        } else {
            pooled
        };

        Ok(pooled.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}

#[async_trait]
impl EmbeddingModel for CandleBertEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let encoder = self.encoder.clone();
        let inputs = inputs.to_vec();

        // The forward pass is CPU bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || encoder.embed(inputs))
            .await
            .map_err(|e| EngineError::inference(&self.model_id, e))?
            .map_err(|e| EngineError::inference(&self.model_id, format!("{e:#}")))
    }
}
