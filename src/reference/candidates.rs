// src/reference/candidates.rs
use crate::models::core::{CandidateLabel, ReferenceColumn, ReferenceRow};

/// Column order of the candidate list. All official names come first, then
/// all fantasy names, each in canonical reference order; the semantic
/// matcher's tie-break is "first in this list".
pub const CANDIDATE_COLUMNS: [ReferenceColumn; 2] =
    [ReferenceColumn::OfficialName, ReferenceColumn::FantasyName];

/// Semantic search space: up to two labels per deduplicated reference row.
pub fn build_candidate_labels(references: &[ReferenceRow]) -> Vec<CandidateLabel> {
    let mut labels = Vec::with_capacity(references.len() * CANDIDATE_COLUMNS.len());
    for column in CANDIDATE_COLUMNS {
        for (reference_idx, reference) in references.iter().enumerate() {
            if let Some(text) = reference.key(column) {
                labels.push(CandidateLabel {
                    text: text.trim().to_string(),
                    reference_idx,
                    origin_column: column,
                });
            }
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::OfficialStoreRecord;

    fn reference(official: Option<&str>, fantasy: Option<&str>) -> ReferenceRow {
        ReferenceRow {
            record: OfficialStoreRecord {
                official_store_id: "1".to_string(),
                site_id: "MLB".to_string(),
                official_name: official.map(str::to_string),
                fantasy_name: fantasy.map(str::to_string),
                status: None,
                last_updated: None,
                category_id_l0: None,
                category_id_l1: None,
                category_name_l1: None,
            },
            official_key: official.map(str::to_string),
            fantasy_key: fantasy.map(str::to_string),
        }
    }

    #[test]
    fn test_labels_are_column_major() {
        let refs = vec![
            reference(Some("ACME LTDA"), Some("ACME")),
            reference(None, Some("BETA")),
            reference(Some("GAMMA SA"), Some("")),
        ];
        let labels = build_candidate_labels(&refs);
        let summary: Vec<(&str, usize, ReferenceColumn)> = labels
            .iter()
            .map(|l| (l.text.as_str(), l.reference_idx, l.origin_column))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("ACME LTDA", 0, ReferenceColumn::OfficialName),
                ("GAMMA SA", 2, ReferenceColumn::OfficialName),
                ("ACME", 0, ReferenceColumn::FantasyName),
                ("BETA", 1, ReferenceColumn::FantasyName),
            ]
        );
    }

    #[test]
    fn test_no_references_no_labels() {
        assert!(build_candidate_labels(&[]).is_empty());
    }
}
