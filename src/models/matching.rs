// src/models/matching.rs
use chrono::NaiveDate;
use serde::Serialize;

use crate::models::core::{BrandRecord, OfficialStoreRecord, ReferenceColumn, SourceColumn};

/// Sentinel written to both match fields when a reviewer confirmed the store.
pub const MANUAL_MATCH_SENTINEL: &str = "MANUAL_CONFIRMED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    Deterministic,
    Semantic,
    Manual,
    Unresolved,
}

impl MatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStage::Deterministic => "deterministic",
            MatchStage::Semantic => "semantic",
            MatchStage::Manual => "manual",
            MatchStage::Unresolved => "unresolved",
        }
    }

    /// Resolved by the cascade or the semantic matcher, i.e. without a human.
    pub fn is_automated(&self) -> bool {
        matches!(self, MatchStage::Deterministic | MatchStage::Semantic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedColumn {
    FantasyName,
    OfficialName,
    #[serde(rename = "MANUAL_CONFIRMED")]
    ManualConfirmation,
}

impl From<ReferenceColumn> for MatchedColumn {
    fn from(column: ReferenceColumn) -> Self {
        match column {
            ReferenceColumn::FantasyName => MatchedColumn::FantasyName,
            ReferenceColumn::OfficialName => MatchedColumn::OfficialName,
        }
    }
}

/// Resolution of exactly one source row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    /// Already carried by the flattened source record in output rows.
    #[serde(skip)]
    pub identity_id: String,
    pub match_stage: MatchStage,
    pub matched_value: Option<String>,
    pub matched_column: Option<MatchedColumn>,
    /// Source column whose key produced a deterministic join.
    pub matched_source_column: Option<SourceColumn>,
    pub similarity_score: Option<f32>,
    pub linked_reference: Option<OfficialStoreRecord>,
}

impl MatchOutcome {
    pub fn unresolved(identity_id: &str) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            match_stage: MatchStage::Unresolved,
            matched_value: None,
            matched_column: None,
            matched_source_column: None,
            similarity_score: None,
            linked_reference: None,
        }
    }

    /// Unresolved, or (equivalently) both match fields unset.
    pub fn is_unresolved(&self) -> bool {
        self.match_stage == MatchStage::Unresolved
            || (self.matched_value.is_none() && self.matched_column.is_none())
    }
}

/// Final output row: source fields, resolution outcome and annotations.
#[derive(Debug, Clone, Serialize)]
pub struct LinkedRow {
    #[serde(flatten)]
    pub source: BrandRecord,
    #[serde(flatten)]
    pub outcome: MatchOutcome,
    pub is_new_store: bool,
    pub found_by_automation: bool,
    pub vertical: Option<String>,
    pub match_date: NaiveDate,
}
