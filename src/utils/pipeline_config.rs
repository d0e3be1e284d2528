// src/utils/pipeline_config.rs
use log::{info, warn};
use std::path::PathBuf;

use crate::utils::env::{env_opt, env_or};

pub const DEFAULT_SEMANTIC_THRESHOLD: f32 = 0.80;
pub const DEFAULT_MANUAL_FOUND_LABEL: &str = "Encontrado";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Sentence-transformer BERT export loaded with candle.
    Bert,
    /// Text to vector table computed ahead of time.
    Precomputed,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub semantic_threshold: f32,
    pub embedding_backend: EmbeddingBackend,
    pub match_model_dir: Option<PathBuf>,
    pub vertical_model_dir: Option<PathBuf>,
    pub embedding_table_path: Option<PathBuf>,
    pub embedding_batch_size: usize,
    pub embedding_max_tokens: usize,
    pub embedding_cache_size: usize,
    pub manual_found_label: String,
    /// Unresolved share of source rows above which the run is flagged.
    pub unresolved_anomaly_rate: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: DEFAULT_SEMANTIC_THRESHOLD,
            embedding_backend: EmbeddingBackend::Bert,
            match_model_dir: None,
            vertical_model_dir: None,
            embedding_table_path: None,
            embedding_batch_size: 64,
            embedding_max_tokens: 128,
            embedding_cache_size: 4096,
            manual_found_label: DEFAULT_MANUAL_FOUND_LABEL.to_string(),
            unresolved_anomaly_rate: 0.95,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let embedding_backend = match env_opt("EMBEDDING_BACKEND")
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("precomputed") => EmbeddingBackend::Precomputed,
            Some("bert") | None => EmbeddingBackend::Bert,
            Some(other) => {
                warn!("Unknown EMBEDDING_BACKEND {:?}, using bert", other);
                EmbeddingBackend::Bert
            }
        };

        let match_model_dir = env_opt("MATCH_MODEL_DIR").map(PathBuf::from);
        let vertical_model_dir = env_opt("VERTICAL_MODEL_DIR")
            .map(PathBuf::from)
            .or_else(|| match_model_dir.clone());

        Self {
            semantic_threshold: env_or("SEMANTIC_SIMILARITY_THRESHOLD", defaults.semantic_threshold),
            embedding_backend,
            match_model_dir,
            vertical_model_dir,
            embedding_table_path: env_opt("EMBEDDING_TABLE_PATH").map(PathBuf::from),
            embedding_batch_size: env_or("EMBEDDING_BATCH_SIZE", defaults.embedding_batch_size)
                .max(1),
            embedding_max_tokens: env_or("EMBEDDING_MAX_TOKENS", defaults.embedding_max_tokens),
            embedding_cache_size: env_or("EMBEDDING_CACHE_SIZE", defaults.embedding_cache_size)
                .max(1),
            manual_found_label: env_opt("MANUAL_FOUND_LABEL")
                .unwrap_or(defaults.manual_found_label),
            unresolved_anomaly_rate: env_or(
                "UNRESOLVED_ANOMALY_RATE",
                defaults.unresolved_anomaly_rate,
            ),
        }
    }

    pub fn log_config(&self) {
        info!("🧩 Reconciliation configuration:");
        info!("   Semantic similarity threshold: {:.2}", self.semantic_threshold);
        info!("   Embedding backend: {:?}", self.embedding_backend);
        match self.embedding_backend {
            EmbeddingBackend::Bert => {
                match &self.match_model_dir {
                    Some(dir) => info!("   Match model: {}", dir.display()),
                    None => warn!("   No MATCH_MODEL_DIR set; the semantic stage cannot run"),
                }
                if let Some(dir) = &self.vertical_model_dir {
                    info!("   Vertical model: {}", dir.display());
                }
                info!(
                    "   Batch size: {}, max tokens: {}",
                    self.embedding_batch_size, self.embedding_max_tokens
                );
            }
            EmbeddingBackend::Precomputed => match &self.embedding_table_path {
                Some(path) => info!("   Embedding table: {}", path.display()),
                None => warn!("   No EMBEDDING_TABLE_PATH set; the semantic stage cannot run"),
            },
        }
        info!("   Embedding cache size: {}", self.embedding_cache_size);
        info!("   Manual verdict label: {:?}", self.manual_found_label);
        info!(
            "   Unresolved anomaly rate: {:.0}%",
            self.unresolved_anomaly_rate * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.semantic_threshold, 0.80);
        assert_eq!(config.embedding_backend, EmbeddingBackend::Bert);
        assert_eq!(config.manual_found_label, "Encontrado");
        assert!(config.match_model_dir.is_none());
    }

    #[test]
    fn test_env_config() {
        env::set_var("SEMANTIC_SIMILARITY_THRESHOLD", "0.9");
        env::set_var("EMBEDDING_BACKEND", "Precomputed");
        env::set_var("MATCH_MODEL_DIR", "/models/minilm");
        env::remove_var("VERTICAL_MODEL_DIR");
        env::set_var("EMBEDDING_BATCH_SIZE", "0");

        let config = PipelineConfig::from_env();
        assert_eq!(config.semantic_threshold, 0.9);
        assert_eq!(config.embedding_backend, EmbeddingBackend::Precomputed);
        // Vertical model falls back to the match model
        assert_eq!(config.vertical_model_dir, Some(PathBuf::from("/models/minilm")));
        assert_eq!(config.embedding_batch_size, 1);

        env::remove_var("SEMANTIC_SIMILARITY_THRESHOLD");
        env::remove_var("EMBEDDING_BACKEND");
        env::remove_var("MATCH_MODEL_DIR");
        env::remove_var("EMBEDDING_BATCH_SIZE");
    }
}
