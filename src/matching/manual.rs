// src/matching/manual.rs - Reviewer verdicts for rows automation left unresolved
use std::collections::HashSet;

use crate::matching::name::normalize_name;
use crate::models::core::{ManualVerdictRow, SourceColumn, SourceRow};
use crate::models::matching::{MatchOutcome, MatchStage, MatchedColumn, MANUAL_MATCH_SENTINEL};
use crate::models::stats_models::ManualOverrideStats;
use crate::utils::progress_bars::logging::{PipelineStage, StageLogger};

/// Normalized store names a reviewer marked as found.
#[derive(Debug, Clone, Default)]
pub struct ManualVerdicts {
    found: HashSet<String>,
    verdict_rows: usize,
}

impl ManualVerdicts {
    /// A store is found when any verdict column equals `found_label`,
    /// ignoring case and surrounding whitespace.
    pub fn from_rows(rows: &[ManualVerdictRow], found_label: &str) -> Self {
        let label = found_label.trim().to_lowercase();
        let is_found = |value: &Option<String>| {
            value
                .as_deref()
                .map(|v| v.trim().to_lowercase() == label)
                .unwrap_or(false)
        };

        let found = rows
            .iter()
            .filter(|row| is_found(&row.match_selection) || is_found(&row.match_commercial))
            .filter_map(|row| row.store_name.as_deref())
            .map(normalize_name)
            .filter(|name| !name.is_empty())
            .collect();

        Self {
            found,
            verdict_rows: rows.len(),
        }
    }

    pub fn is_found(&self, normalized_store: &str) -> bool {
        self.found.contains(normalized_store)
    }

    pub fn found_count(&self) -> usize {
        self.found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }
}

/// Relabels still-unresolved rows whose normalized username carries a
/// "found" verdict. Manual rows get the confirmation sentinel in both match
/// fields and no linked reference. Deterministic and semantic rows are
/// never touched.
///
/// `outcomes[i]` belongs to `sources[i]`.
pub fn apply_manual_overrides(
    sources: &[SourceRow],
    outcomes: &mut [MatchOutcome],
    verdicts: &ManualVerdicts,
    run_id: &str,
) -> ManualOverrideStats {
    let logger = StageLogger::new(PipelineStage::Manual);
    let mut stats = ManualOverrideStats {
        verdict_rows: verdicts.verdict_rows,
        found_stores: verdicts.found_count(),
        rows_relabelled: 0,
    };

    let pending = outcomes.iter().filter(|o| o.is_unresolved()).count();
    logger.log_start(run_id, pending);
    if verdicts.is_empty() {
        logger.log_completion(0, pending);
        return stats;
    }

    for (row, outcome) in sources.iter().zip(outcomes.iter_mut()) {
        if outcome.match_stage != MatchStage::Unresolved {
            continue;
        }
        let Some(store) = row.key(SourceColumn::Username) else {
            continue;
        };
        if verdicts.is_found(store) {
            outcome.match_stage = MatchStage::Manual;
            outcome.matched_value = Some(MANUAL_MATCH_SENTINEL.to_string());
            outcome.matched_column = Some(MatchedColumn::ManualConfirmation);
            outcome.matched_source_column = None;
            outcome.similarity_score = None;
            outcome.linked_reference = None;
            stats.rows_relabelled += 1;
        }
    }

    logger.log_phase(
        "Verdicts applied",
        Some(&format!(
            "{} verdict rows, {} stores found",
            stats.verdict_rows, stats.found_stores
        )),
    );
    logger.log_completion(stats.rows_relabelled, pending - stats.rows_relabelled);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::name::prepare_source_rows;
    use crate::models::core::{BrandRecord, OfficialStoreRecord};
    use chrono::{TimeZone, Utc};

    fn verdict(store: &str, selection: Option<&str>, commercial: Option<&str>) -> ManualVerdictRow {
        ManualVerdictRow {
            store_name: Some(store.to_string()),
            match_selection: selection.map(str::to_string),
            match_commercial: commercial.map(str::to_string),
        }
    }

    fn sources(users: &[&str]) -> Vec<SourceRow> {
        let scrape = Utc.with_ymd_and_hms(2025, 6, 4, 0, 0, 0).unwrap();
        prepare_source_rows(
            users
                .iter()
                .enumerate()
                .map(|(i, user)| BrandRecord {
                    source_username: Some(user.to_string()),
                    source_brand_name: None,
                    shop_id: i as i64,
                    category_id: None,
                    category_name: None,
                    scrape_date: scrape,
                    first_appearance: None,
                    identity_id: Some(format!("ID{:03}", i)),
                })
                .collect(),
        )
    }

    fn resolved(stage: MatchStage) -> MatchOutcome {
        MatchOutcome {
            identity_id: "X".to_string(),
            match_stage: stage,
            matched_value: Some("ACME".to_string()),
            matched_column: Some(MatchedColumn::FantasyName),
            matched_source_column: None,
            similarity_score: None,
            linked_reference: Some(OfficialStoreRecord {
                official_store_id: "1".to_string(),
                site_id: "MLB".to_string(),
                official_name: Some("Acme".to_string()),
                fantasy_name: Some("Acme".to_string()),
                status: None,
                last_updated: None,
                category_id_l0: None,
                category_id_l1: None,
                category_name_l1: None,
            }),
        }
    }

    #[test]
    fn test_found_label_matching() {
        let verdicts = ManualVerdicts::from_rows(
            &[
                verdict("loja.limpa", Some(" encontrado "), None),
                verdict("Casa Bela", None, Some("Encontrado")),
                verdict("Nope", Some("Não encontrado"), Some("")),
            ],
            "Encontrado",
        );
        assert!(verdicts.is_found("LOJA LIMPA"));
        assert!(verdicts.is_found("CASA BELA"));
        assert!(!verdicts.is_found("NOPE"));
        assert_eq!(verdicts.found_count(), 2);
    }

    #[test]
    fn test_found_row_has_sentinel_and_no_reference() {
        let rows = sources(&["loja_limpa"]);
        let mut outcomes = vec![MatchOutcome::unresolved("ID000")];
        let verdicts =
            ManualVerdicts::from_rows(&[verdict("LOJA LIMPA", Some("Encontrado"), None)], "Encontrado");

        let stats = apply_manual_overrides(&rows, &mut outcomes, &verdicts, "test");
        assert_eq!(stats.rows_relabelled, 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.match_stage, MatchStage::Manual);
        assert_eq!(outcome.matched_value.as_deref(), Some(MANUAL_MATCH_SENTINEL));
        assert_eq!(outcome.matched_column, Some(MatchedColumn::ManualConfirmation));
        assert!(outcome.linked_reference.is_none());
        assert!(!outcome.is_unresolved());
    }

    #[test]
    fn test_never_touches_automated_rows() {
        let rows = sources(&["acme", "acme", "acme"]);
        let mut outcomes = vec![
            resolved(MatchStage::Deterministic),
            resolved(MatchStage::Semantic),
            MatchOutcome::unresolved("ID002"),
        ];
        let before = outcomes.clone();
        let verdicts =
            ManualVerdicts::from_rows(&[verdict("ACME", Some("Encontrado"), None)], "Encontrado");

        let stats = apply_manual_overrides(&rows, &mut outcomes, &verdicts, "test");
        assert_eq!(stats.rows_relabelled, 1);
        assert_eq!(outcomes[0], before[0]);
        assert_eq!(outcomes[1], before[1]);
        assert_eq!(outcomes[2].match_stage, MatchStage::Manual);
    }

    #[test]
    fn test_no_verdicts_changes_nothing() {
        let rows = sources(&["acme"]);
        let mut outcomes = vec![MatchOutcome::unresolved("ID000")];
        let stats = apply_manual_overrides(&rows, &mut outcomes, &ManualVerdicts::default(), "test");
        assert_eq!(stats.rows_relabelled, 0);
        assert!(outcomes[0].is_unresolved());
    }
}
