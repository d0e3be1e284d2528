// src/classification/vertical.rs - Marketplace category to business vertical
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::embedding::{embed_checked, Embedder};
use crate::matching::embedding::select_best_candidate;
use crate::models::matching::LinkedRow;
use crate::models::stats_models::ClassificationStats;
use crate::utils::candle::cosine_similarity_matrix;
use crate::utils::progress_bars::logging::{PipelineStage, StageLogger};

pub const VERTICALS: [&str; 13] = [
    "SPORTS",
    "T & B",
    "ENTERTAINMENT",
    "CONSTRUCTION & INDUSTRY",
    "HOME ELECTRONICS",
    "TECHNOLOGY",
    "OTHERS",
    "VEHICLE PARTS & ACCESSORIES",
    "FASHION",
    "BEAUTY",
    "HEALTH",
    "FURNISHING & HOUSEWARE",
    "CPG",
];

pub const DEFAULT_VERTICAL: &str = "OTHERS";

/// Curated category names with a known vertical. Keys are raw marketplace
/// category names; the misspelled "Eletônicos" appears in real feeds.
const CATEGORY_DICTIONARY: [(&str, &str); 8] = [
    ("Alimentos e Bebidas", "CPG"),
    ("Brinquedos e Hobbies", "T & B"),
    ("Eletônicos, Áudio e Vídeo", "HOME ELECTRONICS"),
    ("Eletrônicos, Áudio e Vídeo", "HOME ELECTRONICS"),
    ("Saúde", "HEALTH"),
    ("Beleza e Cuidado Pessoal", "BEAUTY"),
    ("Casa, Móveis e Decoração", "FURNISHING & HOUSEWARE"),
    ("Calçados, Roupas e Bolsas", "FASHION"),
];

pub fn dictionary_vertical(category_name: &str) -> Option<&'static str> {
    CATEGORY_DICTIONARY
        .iter()
        .find(|(category, _)| *category == category_name)
        .map(|(_, vertical)| *vertical)
}

/// Assigns every category the nearest vertical label. The vertical labels
/// are encoded once at construction.
pub struct VerticalClassifier {
    embedder: Arc<dyn Embedder>,
    vertical_vectors: Vec<Vec<f32>>,
}

impl VerticalClassifier {
    pub fn new(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let labels: Vec<String> = VERTICALS.iter().map(|v| v.to_string()).collect();
        let vertical_vectors = embed_checked(embedder.as_ref(), &labels).with_context(|| {
            format!("Failed to encode vertical labels with {}", embedder.model_name())
        })?;
        Ok(Self {
            embedder,
            vertical_vectors,
        })
    }

    /// Null or blank input is `OTHERS`; dictionary entries win; anything
    /// else takes the most similar vertical, with no threshold.
    pub fn classify(&self, category_name: Option<&str>) -> Result<String> {
        let names: Vec<String> = category_name.map(str::to_string).into_iter().collect();
        let mut verticals = self.classify_batch(&names)?;
        Ok(verticals.pop().unwrap_or_else(|| DEFAULT_VERTICAL.to_string()))
    }

    /// Vertical per name, in input order. Names outside the dictionary are
    /// encoded in one batch.
    pub fn classify_batch(&self, category_names: &[String]) -> Result<Vec<String>> {
        let mut verticals: Vec<Option<String>> = vec![None; category_names.len()];
        let mut to_encode: Vec<String> = Vec::new();
        let mut encode_slots: Vec<usize> = Vec::new();

        for (idx, name) in category_names.iter().enumerate() {
            if name.trim().is_empty() {
                verticals[idx] = Some(DEFAULT_VERTICAL.to_string());
            } else if let Some(vertical) = dictionary_vertical(name) {
                verticals[idx] = Some(vertical.to_string());
            } else {
                to_encode.push(name.clone());
                encode_slots.push(idx);
            }
        }

        if !to_encode.is_empty() {
            let vectors = embed_checked(self.embedder.as_ref(), &to_encode).with_context(|| {
                format!("Failed to encode category names with {}", self.embedder.model_name())
            })?;
            let scores = cosine_similarity_matrix(&vectors, &self.vertical_vectors)
                .context("Category to vertical similarity failed")?;
            for (slot, row) in encode_slots.into_iter().zip(scores) {
                let vertical = select_best_candidate(&row, f32::NEG_INFINITY)
                    .map(|(best, _)| VERTICALS[best])
                    .unwrap_or(DEFAULT_VERTICAL);
                verticals[slot] = Some(vertical.to_string());
            }
        }

        Ok(verticals
            .into_iter()
            .map(|v| v.unwrap_or_else(|| DEFAULT_VERTICAL.to_string()))
            .collect())
    }

    /// Fills `vertical` on every row that has none, classifying each distinct
    /// `category_name` once. Rows that already carry a vertical are kept.
    pub fn classify_rows(&self, rows: &mut [LinkedRow], run_id: &str) -> Result<ClassificationStats> {
        let logger = StageLogger::new(PipelineStage::Vertical);
        let mut stats = ClassificationStats::default();

        let mut distinct: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut pending = 0usize;
        let mut missing_category = 0usize;
        for row in rows.iter() {
            if row.vertical.is_some() {
                stats.already_classified += 1;
                continue;
            }
            pending += 1;
            match row.source.category_name.as_deref() {
                Some(name) if !name.trim().is_empty() => {
                    if seen.insert(name) {
                        distinct.push(name.to_string());
                    }
                }
                _ => missing_category += 1,
            }
        }
        logger.log_start(run_id, pending);
        stats.distinct_categories = distinct.len();

        let verticals = self.classify_batch(&distinct)?;
        for name in &distinct {
            if dictionary_vertical(name).is_some() {
                stats.dictionary_hits += 1;
            } else {
                stats.embedding_assignments += 1;
            }
        }
        let by_category: HashMap<&str, &str> = distinct
            .iter()
            .map(String::as_str)
            .zip(verticals.iter().map(String::as_str))
            .collect();

        for row in rows.iter_mut().filter(|r| r.vertical.is_none()) {
            let vertical = row
                .source
                .category_name
                .as_deref()
                .and_then(|name| by_category.get(name).copied())
                .unwrap_or(DEFAULT_VERTICAL);
            row.vertical = Some(vertical.to_string());
        }
        stats.defaulted = missing_category;

        logger.log_phase(
            "Categories classified",
            Some(&format!(
                "{} distinct categories: {} from the dictionary, {} by similarity, {} rows without a category",
                stats.distinct_categories,
                stats.dictionary_hits,
                stats.embedding_assignments,
                stats.defaulted
            )),
        );
        logger.log_completion(pending, 0);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::PrecomputedEmbedder;
    use crate::models::core::BrandRecord;
    use crate::models::matching::MatchOutcome;
    use chrono::{NaiveDate, TimeZone, Utc};

    /// One axis per vertical, plus category names pointing near one of them.
    fn classifier(extra: &[(&str, usize)]) -> VerticalClassifier {
        let dim = VERTICALS.len();
        let axis = |i: usize| {
            let mut v = vec![0.0_f32; dim];
            v[i] = 1.0;
            v
        };
        let mut table: HashMap<String, Vec<f32>> = VERTICALS
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), axis(i)))
            .collect();
        for (text, target) in extra {
            let mut v = axis(*target);
            v[(*target + 1) % dim] = 0.3;
            table.insert(text.to_string(), v);
        }
        let embedder = PrecomputedEmbedder::from_table("verticals", table).unwrap();
        VerticalClassifier::new(Arc::new(embedder)).unwrap()
    }

    fn linked(category: Option<&str>, vertical: Option<&str>) -> LinkedRow {
        LinkedRow {
            source: BrandRecord {
                source_username: Some("user".to_string()),
                source_brand_name: None,
                shop_id: 1,
                category_id: None,
                category_name: category.map(str::to_string),
                scrape_date: Utc.with_ymd_and_hms(2025, 6, 4, 0, 0, 0).unwrap(),
                first_appearance: None,
                identity_id: Some("AAAAA".to_string()),
            },
            outcome: MatchOutcome::unresolved("AAAAA"),
            is_new_store: false,
            found_by_automation: false,
            vertical: vertical.map(str::to_string),
            match_date: NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(),
        }
    }

    #[test]
    fn test_missing_category_is_others() {
        let classifier = classifier(&[]);
        assert_eq!(classifier.classify(None).unwrap(), "OTHERS");
        assert_eq!(classifier.classify(Some("  ")).unwrap(), "OTHERS");
    }

    #[test]
    fn test_dictionary_wins_without_encoding() {
        // Dictionary names are not in the table; encoding them would fail
        let classifier = classifier(&[]);
        assert_eq!(classifier.classify(Some("Saúde")).unwrap(), "HEALTH");
        assert_eq!(
            classifier.classify(Some("Eletônicos, Áudio e Vídeo")).unwrap(),
            "HOME ELECTRONICS"
        );
    }

    #[test]
    fn test_nearest_vertical_without_threshold() {
        let classifier = classifier(&[("Esporte e Lazer", 0), ("Ferramentas", 3)]);
        assert_eq!(classifier.classify(Some("Esporte e Lazer")).unwrap(), "SPORTS");
        assert_eq!(
            classifier.classify(Some("Ferramentas")).unwrap(),
            "CONSTRUCTION & INDUSTRY"
        );
    }

    #[test]
    fn test_unknown_category_model_failure_is_error() {
        let classifier = classifier(&[]);
        assert!(classifier.classify(Some("Never Seen")).is_err());
    }

    #[test]
    fn test_classify_rows_skips_already_classified() {
        let classifier = classifier(&[("Esporte e Lazer", 0)]);
        let mut rows = vec![
            linked(Some("Esporte e Lazer"), None),
            linked(Some("Saúde"), None),
            linked(Some("Esporte e Lazer"), None),
            linked(None, None),
            // Would fail to encode if it were not skipped
            linked(Some("Never Seen"), Some("FASHION")),
        ];

        let stats = classifier.classify_rows(&mut rows, "test").unwrap();
        let verticals: Vec<&str> = rows.iter().map(|r| r.vertical.as_deref().unwrap()).collect();
        assert_eq!(verticals, vec!["SPORTS", "HEALTH", "SPORTS", "OTHERS", "FASHION"]);
        assert_eq!(stats.distinct_categories, 2);
        assert_eq!(stats.dictionary_hits, 1);
        assert_eq!(stats.embedding_assignments, 1);
        assert_eq!(stats.defaulted, 1);
        assert_eq!(stats.already_classified, 1);
    }
}
