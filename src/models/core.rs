// src/models/core.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scraped marketplace row (one brand/shop pair per scraping cycle).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrandRecord {
    pub source_username: Option<String>,
    pub source_brand_name: Option<String>,
    pub shop_id: i64,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub category_name: Option<String>,
    pub scrape_date: DateTime<Utc>,
    #[serde(default)]
    pub first_appearance: Option<DateTime<Utc>>,
    /// Filled by the identity registry, never trusted from input.
    #[serde(default)]
    pub identity_id: Option<String>,
}

/// One row of the internal official-store registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfficialStoreRecord {
    pub official_store_id: String,
    pub site_id: String,
    pub official_name: Option<String>,
    pub fantasy_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category_id_l0: Option<i64>,
    #[serde(default)]
    pub category_id_l1: Option<i64>,
    #[serde(default)]
    pub category_name_l1: Option<String>,
}

/// Persisted `(normalized brand name, identity)` pair. The identity table is
/// append-only: rows are produced once and never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityRecord {
    pub brand_name: String,
    pub identity_id: String,
    #[serde(default)]
    pub shop_id: Option<i64>,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
}

/// Row of the human review worksheet. Every verdict column is optional; a
/// store counts as found if any of them carries the "found" label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualVerdictRow {
    pub store_name: Option<String>,
    #[serde(default)]
    pub match_selection: Option<String>,
    #[serde(default)]
    pub match_commercial: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceColumn {
    BrandName,
    Username,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceColumn {
    FantasyName,
    OfficialName,
}

impl SourceColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceColumn::BrandName => "brand_name",
            SourceColumn::Username => "username",
        }
    }
}

impl ReferenceColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceColumn::FantasyName => "fantasy_name",
            ReferenceColumn::OfficialName => "official_name",
        }
    }
}

/// Source row with its normalized join keys. `row_idx` is the position in the
/// input feed and is the identity every stage writes results back against.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub row_idx: usize,
    pub record: BrandRecord,
    pub username_key: Option<String>,
    pub brand_key: Option<String>,
}

impl SourceRow {
    /// Normalized value for `column`, or `None` when it is missing or blank.
    pub fn key(&self, column: SourceColumn) -> Option<&str> {
        let key = match column {
            SourceColumn::BrandName => self.brand_key.as_deref(),
            SourceColumn::Username => self.username_key.as_deref(),
        };
        key.filter(|k| !k.is_empty())
    }

    pub fn identity_id(&self) -> &str {
        self.record.identity_id.as_deref().unwrap_or_default()
    }
}

/// Reference row with normalized official and fantasy names.
#[derive(Debug, Clone)]
pub struct ReferenceRow {
    pub record: OfficialStoreRecord,
    pub official_key: Option<String>,
    pub fantasy_key: Option<String>,
}

impl ReferenceRow {
    pub fn key(&self, column: ReferenceColumn) -> Option<&str> {
        let key = match column {
            ReferenceColumn::FantasyName => self.fantasy_key.as_deref(),
            ReferenceColumn::OfficialName => self.official_key.as_deref(),
        };
        key.filter(|k| !k.is_empty())
    }
}

/// Reference-side text eligible as a semantic match target.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateLabel {
    pub text: String,
    /// Index into the deduplicated reference rows.
    pub reference_idx: usize,
    pub origin_column: ReferenceColumn,
}
