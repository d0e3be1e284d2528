// src/embedding/precomputed.rs
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::embedding::Embedder;

/// Text to vector lookup table computed ahead of time (for example exported
/// from the same sentence model offline). A text missing from the table is
/// an error, never a zero vector.
#[derive(Debug, Clone)]
pub struct PrecomputedEmbedder {
    name: String,
    table: HashMap<String, Vec<f32>>,
    dim: usize,
}

impl PrecomputedEmbedder {
    pub fn from_table(name: &str, table: HashMap<String, Vec<f32>>) -> Result<Self> {
        let dim = table.values().next().map(Vec::len).unwrap_or(0);
        for (text, vector) in &table {
            if vector.len() != dim {
                bail!(
                    "Embedding table {}: {:?} has {} dimensions, expected {}",
                    name,
                    text,
                    vector.len(),
                    dim
                );
            }
        }
        Ok(Self {
            name: name.to_string(),
            table,
            dim,
        })
    }

    /// Loads a JSON object mapping each text to its vector.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open embedding table {}", path.display()))?;
        let table: HashMap<String, Vec<f32>> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse embedding table {}", path.display()))?;
        log::info!(
            "Loaded {} precomputed embeddings from {}",
            table.len(),
            path.display()
        );
        Self::from_table(&path.display().to_string(), table)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Embedder for PrecomputedEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|text| match self.table.get(text) {
                Some(vector) => Ok(vector.clone()),
                None => bail!("Embedding table {} has no entry for {:?}", self.name, text),
            })
            .collect()
    }
}
