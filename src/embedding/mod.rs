// src/embedding/mod.rs
//! Sentence-embedding backends shared by the semantic matcher and the
//! vertical classifier.
use anyhow::{bail, Result};

pub mod bert;
pub mod cache;
pub mod precomputed;

pub use bert::BertEmbedder;
pub use cache::CachedEmbedder;
pub use precomputed::PrecomputedEmbedder;

/// Maps texts to fixed-width vectors, one per input, in input order.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Runs `embedder` and rejects malformed output: a vector count that does
/// not match the input, zero-width or ragged vectors, or non-finite values.
pub fn embed_checked(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = embedder.embed(texts)?;
    if vectors.len() != texts.len() {
        bail!(
            "Model {} returned {} vectors for {} texts",
            embedder.model_name(),
            vectors.len(),
            texts.len()
        );
    }

    let dim = vectors[0].len();
    if dim == 0 {
        bail!("Model {} returned zero-width vectors", embedder.model_name());
    }
    for (idx, vector) in vectors.iter().enumerate() {
        if vector.len() != dim {
            bail!(
                "Model {} returned a {}-dim vector for {:?}, expected {}",
                embedder.model_name(),
                vector.len(),
                texts[idx],
                dim
            );
        }
        if vector.iter().any(|v| !v.is_finite()) {
            bail!(
                "Model {} returned non-finite values for {:?}",
                embedder.model_name(),
                texts[idx]
            );
        }
    }
    Ok(vectors)
}
