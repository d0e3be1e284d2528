// src/embedding/cache.rs
use anyhow::{anyhow, bail, Result};
use log::debug;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::embedding::Embedder;

/// LRU cache in front of another embedder. Only texts missing from the
/// cache reach the wrapped model, each at most once per call.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// (hits, misses) since construction.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Embedder for CachedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut found: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut pending: HashSet<&str> = HashSet::new();
        let mut missing: Vec<&str> = Vec::new();
        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| anyhow!("Embedding cache lock poisoned"))?;
            for text in texts {
                if found.contains_key(text.as_str()) {
                    continue;
                }
                match cache.get(text) {
                    Some(vector) => {
                        found.insert(text.as_str(), vector.clone());
                    }
                    None => {
                        if pending.insert(text.as_str()) {
                            missing.push(text.as_str());
                        }
                    }
                }
            }
        }

        self.hits
            .fetch_add(texts.len() - missing.len(), Ordering::Relaxed);
        self.misses.fetch_add(missing.len(), Ordering::Relaxed);

        if !missing.is_empty() {
            debug!(
                "Model {}: {} of {} texts not cached",
                self.inner.model_name(),
                missing.len(),
                texts.len()
            );
            let request: Vec<String> = missing.iter().map(|t| t.to_string()).collect();
            let fresh = self.inner.embed(&request)?;
            if fresh.len() != missing.len() {
                bail!(
                    "Model {} returned {} vectors for {} texts",
                    self.inner.model_name(),
                    fresh.len(),
                    missing.len()
                );
            }

            let mut cache = self
                .cache
                .lock()
                .map_err(|_| anyhow!("Embedding cache lock poisoned"))?;
            for (text, vector) in missing.into_iter().zip(fresh) {
                cache.put(text.to_string(), vector.clone());
                found.insert(text, vector);
            }
        }

        texts
            .iter()
            .map(|text| {
                found
                    .get(text.as_str())
                    .cloned()
                    .ok_or_else(|| anyhow!("No embedding produced for {:?}", text))
            })
            .collect()
    }
}
