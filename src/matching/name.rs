// src/matching/name.rs - Brand and store name normalization
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::core::{BrandRecord, OfficialStoreRecord, ReferenceRow, SourceRow};

/// Characters removed outright.
const STRIPPED_CHARS: [char; 10] = ['!', '(', ')', '\'', '|', ',', '/', '=', '>', '<'];
/// Characters that separate words.
const SPACED_CHARS: [char; 3] = ['_', '.', '-'];

static AMPERSAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*&\s*").expect("ampersand pattern is valid"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Canonical comparable form of a brand or store name.
///
/// Diacritics are folded first (NFKD, non-ASCII dropped) so compatibility
/// forms such as fullwidth punctuation go through the same stripping rules
/// as their ASCII equivalents; this keeps the function idempotent. Empty
/// input is returned unchanged.
pub fn normalize_name(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let folded: String = raw.nfkd().filter(|c| c.is_ascii()).collect();

    let cleaned: String = folded
        .chars()
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .map(|c| if SPACED_CHARS.contains(&c) { ' ' } else { c })
        .collect();

    let with_e = AMPERSAND_RE.replace_all(&cleaned, " E ");
    let collapsed = WHITESPACE_RE.replace_all(&with_e, " ");

    collapsed.trim().to_uppercase()
}

/// Null-propagating [`normalize_name`].
pub fn normalize_optional(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_name)
}

/// True when a normalized value still carries characters outside `[A-Z0-9 ]`.
pub fn has_unexpected_characters(normalized: &str) -> bool {
    normalized
        .chars()
        .any(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == ' '))
}

/// Normalizes the join keys of every source row, keeping input order.
pub fn prepare_source_rows(records: Vec<BrandRecord>) -> Vec<SourceRow> {
    records
        .into_par_iter()
        .enumerate()
        .map(|(row_idx, record)| {
            let username_key = normalize_optional(record.source_username.as_deref());
            let brand_key = normalize_optional(record.source_brand_name.as_deref());
            SourceRow {
                row_idx,
                record,
                username_key,
                brand_key,
            }
        })
        .collect()
}

pub fn prepare_reference_rows(records: Vec<OfficialStoreRecord>) -> Vec<ReferenceRow> {
    records
        .into_par_iter()
        .map(|record| {
            let official_key = normalize_optional(record.official_name.as_deref());
            let fantasy_key = normalize_optional(record.fantasy_name.as_deref());
            ReferenceRow {
                record,
                official_key,
                fantasy_key,
            }
        })
        .collect()
}

/// Normalized values that failed the `[A-Z0-9 ]` post-condition, with a
/// label naming where each came from. Such rows are kept and only reported.
pub fn find_normalization_anomalies(
    sources: &[SourceRow],
    references: &[ReferenceRow],
) -> Vec<(String, String)> {
    let mut anomalies = Vec::new();
    for row in sources {
        for (label, key) in [("username", &row.username_key), ("brand_name", &row.brand_key)] {
            if let Some(k) = key {
                if has_unexpected_characters(k) {
                    anomalies.push((format!("source row {} {}", row.row_idx, label), k.clone()));
                }
            }
        }
    }
    for row in references {
        for (label, key) in [
            ("official_name", &row.official_key),
            ("fantasy_name", &row.fantasy_key),
        ] {
            if let Some(k) = key {
                if has_unexpected_characters(k) {
                    anomalies.push((
                        format!("official store {} {}", row.record.official_store_id, label),
                        k.clone(),
                    ));
                }
            }
        }
    }
    anomalies
}
