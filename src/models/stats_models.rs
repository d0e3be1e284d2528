// src/models/stats_models.rs
use std::time::Duration;

use crate::models::core::{ReferenceColumn, SourceColumn};

#[derive(Debug, Clone)]
pub struct CascadePassStats {
    pub source_column: SourceColumn,
    pub reference_column: ReferenceColumn,
    pub candidates: usize,
    pub matched: usize,
    /// Rows that joined to more than one reference in this pass.
    pub ambiguous: usize,
}

#[derive(Debug, Default, Clone)]
pub struct CascadeStats {
    pub passes: Vec<CascadePassStats>,
    pub matched: usize,
    pub unmatched: usize,
    pub processing_time: Duration,
}

#[derive(Debug, Default, Clone)]
pub struct SemanticMatchingStats {
    pub labels_encoded: usize,
    pub candidates_encoded: usize,
    pub matches_found: usize,
    pub rows_resolved: usize,
    pub below_threshold: usize,
    pub avg_similarity: f64,
    pub processing_time: Duration,
}

#[derive(Debug, Default, Clone)]
pub struct ManualOverrideStats {
    pub verdict_rows: usize,
    pub found_stores: usize,
    pub rows_relabelled: usize,
}

#[derive(Debug, Default, Clone)]
pub struct ClassificationStats {
    pub distinct_categories: usize,
    pub dictionary_hits: usize,
    pub embedding_assignments: usize,
    pub defaulted: usize,
    pub already_classified: usize,
}

#[derive(Debug, Default, Clone)]
pub struct DeduplicationStats {
    pub input_rows: usize,
    pub output_rows: usize,
    pub duplicated_names: usize,
}

/// Stores grouped by normalized username; found if any of their rows resolved.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StoreSummary {
    pub total_stores: usize,
    pub found_stores: usize,
    pub not_found_stores: usize,
}

#[derive(Debug, Default, Clone)]
pub struct ReconciliationStats {
    pub run_id: String,
    pub source_rows: usize,
    pub normalization_anomalies: usize,
    pub new_identities: usize,
    pub deduplication: DeduplicationStats,
    pub cascade: CascadeStats,
    pub semantic: SemanticMatchingStats,
    pub manual: ManualOverrideStats,
    pub classification: ClassificationStats,
    pub stores: StoreSummary,
    pub unresolved_rows: usize,
    /// Run-level data quality warnings (not failures).
    pub anomalies: Vec<String>,
    pub processing_time: Duration,
}

impl ReconciliationStats {
    pub fn unresolved_rate(&self) -> f64 {
        if self.source_rows == 0 {
            0.0
        } else {
            self.unresolved_rows as f64 / self.source_rows as f64
        }
    }
}
