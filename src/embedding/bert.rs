// src/embedding/bert.rs - Sentence-transformer BERT exports run on candle
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use log::{debug, info};
use std::fs;
use std::path::Path;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::embedding::Embedder;
use crate::utils::candle::CANDLE_DEVICE;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Mean-pooled BERT sentence embeddings. The model directory must hold
/// `config.json`, `tokenizer.json` and `model.safetensors` (the layout of a
/// sentence-transformers export such as MiniLM).
pub struct BertEmbedder {
    name: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    batch_size: usize,
}

impl BertEmbedder {
    pub fn load(model_dir: &Path, batch_size: usize, max_tokens: usize) -> Result<Self> {
        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_dir.display().to_string());
        info!("Loading BERT embedding model {} from {}", name, model_dir.display());

        let config_path = model_dir.join(CONFIG_FILE);
        let config_json = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&config_json)
            .with_context(|| format!("Failed to parse BERT config {}", config_path.display()))?;

        let tokenizer_path = model_dir.join(TOKENIZER_FILE);
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            anyhow!("Failed to load tokenizer {}: {}", tokenizer_path.display(), e)
        })?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Invalid truncation settings for {}: {}", name, e))?;

        let device = CANDLE_DEVICE.clone();
        let weights_path = model_dir.join(WEIGHTS_FILE);
        // Safety: the weights file is only read through the mapping and is not
        // modified while the model is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&weights_path], DTYPE, &device) }
            .with_context(|| format!("Failed to map weights {}", weights_path.display()))?;
        let model = BertModel::load(vb, &config)
            .with_context(|| format!("Failed to build BERT model {}", name))?;

        info!(
            "✅ Model {} ready (hidden size {}, batch size {}, max tokens {})",
            name,
            config.hidden_size,
            batch_size,
            max_tokens
        );
        Ok(Self {
            name,
            model,
            tokenizer,
            device,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow!("Tokenization failed for model {}: {}", self.name, e))?;

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
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .with_context(|| format!("Forward pass failed for model {}", self.name))?;

        // Mean over real tokens only
        let mask = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.maximum(1e-9)?;
        let pooled = summed.broadcast_div(&counts)?.to_dtype(DType::F32)?;

        Ok(pooled.to_vec2::<f32>()?)
    }
}

impl Embedder for BertEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_idx, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                "Model {}: encoding batch {} ({} texts)",
                self.name,
                batch_idx + 1,
                batch.len()
            );
            vectors.extend(self.embed_batch(batch)?);
        }
        Ok(vectors)
    }
}
