// src/reference/dedup.rs
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::core::ReferenceRow;
use crate::models::stats_models::DeduplicationStats;
use crate::utils::progress_bars::logging::{PipelineStage, StageLogger};

/// Newer `last_updated` first; a missing timestamp is older than any value.
fn newest_first(a: &ReferenceRow, b: &ReferenceRow) -> Ordering {
    b.record.last_updated.cmp(&a.record.last_updated)
}

/// Canonical reference order: fantasy name, then status, then store id.
/// Rows with a blank or missing fantasy name go last, in the same status and
/// id order. Every later tie-break (cascade joins, candidate labels) is
/// "first in this order".
fn canonical_order(a: &ReferenceRow, b: &ReferenceRow) -> Ordering {
    let a_key = a.fantasy_key.as_deref().filter(|k| !k.is_empty());
    let b_key = b.fantasy_key.as_deref().filter(|k| !k.is_empty());
    let by_name = match (a_key, b_key) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.fantasy_key.is_none().cmp(&b.fantasy_key.is_none()),
    };
    by_name
        .then_with(|| a.record.status.cmp(&b.record.status))
        .then_with(|| a.record.official_store_id.cmp(&b.record.official_store_id))
}

/// Collapses duplicate official-store rows to one current row per
/// (normalized fantasy name, status).
///
/// Names carried by a single row pass through untouched. Names carried by
/// several rows keep, per status, the row with the latest `last_updated`;
/// equal timestamps keep the row that came first in the input. An empty
/// normalized name is an ordinary key, and rows with no fantasy name at all
/// are collapsed the same way under their own key.
pub fn deduplicate(rows: Vec<ReferenceRow>, run_id: &str) -> (Vec<ReferenceRow>, DeduplicationStats) {
    let logger = StageLogger::new(PipelineStage::Deduplicate);
    logger.log_start(run_id, rows.len());

    let mut stats = DeduplicationStats {
        input_rows: rows.len(),
        ..Default::default()
    };

    let mut by_name: HashMap<Option<String>, Vec<ReferenceRow>> = HashMap::new();
    for row in rows {
        by_name.entry(row.fantasy_key.clone()).or_default().push(row);
    }

    let mut output: Vec<ReferenceRow> = Vec::with_capacity(stats.input_rows);
    for (name, mut group) in by_name {
        if group.len() == 1 {
            output.append(&mut group);
            continue;
        }

        stats.duplicated_names += 1;
        logger.log_debug(&format!("{:?} has {} registry rows", name, group.len()));

        // Stable sort keeps input order among equal timestamps
        group.sort_by(newest_first);
        let mut kept_statuses: Vec<Option<String>> = Vec::new();
        for row in group {
            if !kept_statuses.contains(&row.record.status) {
                kept_statuses.push(row.record.status.clone());
                output.push(row);
            }
        }
    }

    output.sort_by(canonical_order);

    stats.output_rows = output.len();
    logger.log_phase(
        "Deduplicated",
        Some(&format!(
            "{} rows -> {} rows ({} names had duplicates)",
            stats.input_rows, stats.output_rows, stats.duplicated_names
        )),
    );
    if stats.output_rows == 0 {
        logger.log_anomaly("Reference catalog is empty; every source row will be unresolved");
    }

    (output, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::OfficialStoreRecord;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashSet;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, day, 12, 0, 0).unwrap()
    }

    fn row(id: &str, fantasy: Option<&str>, status: &str, updated: Option<u32>) -> ReferenceRow {
        ReferenceRow {
            record: OfficialStoreRecord {
                official_store_id: id.to_string(),
                site_id: "MLB".to_string(),
                official_name: Some(format!("OFFICIAL {}", id)),
                fantasy_name: fantasy.map(str::to_string),
                status: Some(status.to_string()),
                last_updated: updated.map(ts),
                category_id_l0: None,
                category_id_l1: None,
                category_name_l1: None,
            },
            official_key: Some(format!("OFFICIAL {}", id)),
            fantasy_key: fantasy.map(str::to_string),
        }
    }

    #[test]
    fn test_keeps_latest_row_per_name_and_status() {
        let rows = vec![
            row("1", Some("ACME"), "active", Some(1)),
            row("2", Some("ACME"), "active", Some(9)),
            row("3", Some("ACME"), "inactive", Some(3)),
            row("4", Some("ACME"), "active", Some(5)),
            row("5", Some("SOLO"), "active", Some(2)),
        ];

        let (deduped, stats) = deduplicate(rows, "test");
        let ids: Vec<&str> = deduped
            .iter()
            .map(|r| r.record.official_store_id.as_str())
            .collect();
        assert_eq!(ids, vec!["2", "3", "5"]);
        assert_eq!(stats.input_rows, 5);
        assert_eq!(stats.output_rows, 3);
        assert_eq!(stats.duplicated_names, 1);
    }

    #[test]
    fn test_no_two_rows_share_name_and_status() {
        let mut rows = Vec::new();
        for i in 0..60u32 {
            let name = format!("NAME {}", i % 7);
            let status = if i % 3 == 0 { "active" } else { "paused" };
            rows.push(row(&i.to_string(), Some(&name), status, Some(1 + i % 27)));
        }
        let originals = rows.clone();

        let (deduped, stats) = deduplicate(rows, "test");
        assert!(stats.output_rows <= stats.input_rows);

        let mut seen = HashSet::new();
        for kept in &deduped {
            let key = (kept.fantasy_key.clone(), kept.record.status.clone());
            assert!(seen.insert(key.clone()), "duplicate {:?}", key);

            let max_updated = originals
                .iter()
                .filter(|o| (o.fantasy_key.clone(), o.record.status.clone()) == key)
                .map(|o| o.record.last_updated)
                .max()
                .unwrap();
            assert_eq!(kept.record.last_updated, max_updated);
        }
    }

    #[test]
    fn test_equal_timestamps_keep_first_input_row() {
        let rows = vec![
            row("B", Some("TIE"), "active", Some(4)),
            row("A", Some("TIE"), "active", Some(4)),
        ];
        let (deduped, _) = deduplicate(rows, "test");
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].record.official_store_id, "B");
    }

    #[test]
    fn test_missing_timestamp_loses_to_any_timestamp() {
        let rows = vec![
            row("1", Some("ACME"), "active", None),
            row("2", Some("ACME"), "active", Some(1)),
        ];
        let (deduped, _) = deduplicate(rows, "test");
        assert_eq!(deduped[0].record.official_store_id, "2");
    }

    #[test]
    fn test_keyless_rows_sort_last() {
        let rows = vec![
            row("1", None, "active", Some(1)),
            row("2", Some("ZED"), "active", Some(1)),
            row("3", None, "paused", Some(2)),
            row("4", Some("ALPHA"), "active", Some(1)),
            row("5", Some(""), "active", Some(1)),
        ];
        let (deduped, _) = deduplicate(rows, "test");
        let ids: Vec<&str> = deduped
            .iter()
            .map(|r| r.record.official_store_id.as_str())
            .collect();
        assert_eq!(ids, vec!["4", "2", "5", "1", "3"]);
    }

    #[test]
    fn test_blank_and_missing_names_are_deduplicated() {
        // "()" normalizes to an empty fantasy name
        let rows = vec![
            row("1", None, "active", Some(1)),
            row("2", None, "active", Some(6)),
            row("3", Some(""), "active", Some(8)),
            row("4", Some(""), "active", Some(2)),
            row("5", Some(""), "paused", Some(3)),
        ];
        let (deduped, stats) = deduplicate(rows, "test");
        let ids: Vec<&str> = deduped
            .iter()
            .map(|r| r.record.official_store_id.as_str())
            .collect();
        assert_eq!(ids, vec!["3", "5", "2"]);
        assert_eq!(stats.duplicated_names, 2);

        let mut seen = HashSet::new();
        for kept in &deduped {
            assert!(seen.insert((kept.fantasy_key.clone(), kept.record.status.clone())));
        }
    }

    #[test]
    fn test_empty_input() {
        let (deduped, stats) = deduplicate(Vec::new(), "test");
        assert!(deduped.is_empty());
        assert_eq!(stats.output_rows, 0);
    }
}
