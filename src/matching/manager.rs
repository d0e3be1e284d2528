// src/matching/manager.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::classification::VerticalClassifier;
use crate::embedding::Embedder;
use crate::identity::{assign_identities, IdentityRegistry};
use crate::matching::cascade::{cascade_match, DEFAULT_PASS_ORDER};
use crate::matching::embedding::{collect_unmatched_labels, semantic_match};
use crate::matching::manual::{apply_manual_overrides, ManualVerdicts};
use crate::matching::name::{find_normalization_anomalies, prepare_reference_rows, prepare_source_rows};
use crate::models::core::{
    BrandRecord, IdentityRecord, ManualVerdictRow, OfficialStoreRecord, SourceColumn, SourceRow,
};
use crate::models::matching::{LinkedRow, MatchOutcome, MatchStage, MatchedColumn};
use crate::models::stats_models::{ReconciliationStats, StoreSummary};
use crate::reference::{build_candidate_labels, deduplicate};
use crate::utils::pipeline_config::PipelineConfig;
use crate::utils::progress_bars::logging::{PipelineStage, StageLogger};
use crate::utils::progress_bars::progress_config::{stage_bar, ProgressConfig};

const PIPELINE_STEPS: u64 = 7;

/// Everything one scraping cycle feeds into the engine.
#[derive(Debug, Clone)]
pub struct ReconciliationInput {
    pub sources: Vec<BrandRecord>,
    pub references: Vec<OfficialStoreRecord>,
    pub manual_verdicts: Vec<ManualVerdictRow>,
    /// Written to every output row as `match_date`.
    pub run_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct ReconciliationOutput {
    /// One row per source row, in input order.
    pub rows: Vec<LinkedRow>,
    /// Identity pairs first issued in this run.
    pub identity_delta: Vec<IdentityRecord>,
    pub stats: ReconciliationStats,
}

/// Runs one reconciliation batch: normalize, assign identities, deduplicate
/// the reference catalog, then cascade, semantic and manual matching, and
/// finally vertical classification.
///
/// Identity issuance runs against a working copy of `registry` that replaces
/// it only when every stage succeeded, so a failed run leaves no trace.
pub async fn run_reconciliation(
    input: ReconciliationInput,
    registry: &mut IdentityRegistry,
    match_embedder: Arc<dyn Embedder>,
    classifier: &VerticalClassifier,
    config: &PipelineConfig,
    progress: &ProgressConfig,
) -> Result<ReconciliationOutput> {
    let start_time = Instant::now();
    let run_id = Uuid::new_v4().to_string();
    let ReconciliationInput {
        sources,
        references,
        manual_verdicts,
        run_date,
    } = input;

    info!(
        "🚀 Reconciliation run {} for {}: {} source rows, {} reference rows, {} verdict rows",
        run_id,
        run_date,
        sources.len(),
        references.len(),
        manual_verdicts.len()
    );

    let multi_progress = progress.create_multi_progress();
    let main_pb = stage_bar(multi_progress.as_ref(), PIPELINE_STEPS, "Normalizing names");

    let mut stats = ReconciliationStats {
        run_id: run_id.clone(),
        source_rows: sources.len(),
        ..Default::default()
    };

    // 1. Normalize
    let normalize_logger = StageLogger::new(PipelineStage::Normalize);
    normalize_logger.log_start(&run_id, sources.len() + references.len());
    let mut sources = prepare_source_rows(sources);
    let references = prepare_reference_rows(references);
    let leftovers = find_normalization_anomalies(&sources, &references);
    for (location, value) in &leftovers {
        debug!("Normalized value {:?} at {} has unexpected characters", value, location);
    }
    if !leftovers.is_empty() {
        normalize_logger.log_anomaly(&format!(
            "{} normalized values still contain characters outside [A-Z0-9 ]",
            leftovers.len()
        ));
    }
    stats.normalization_anomalies = leftovers.len();
    advance(&main_pb, "Resolving identities");

    // 2. Identity
    let mut working_registry = registry.clone();
    let delta_start = working_registry.new_registrations().len();
    stats.new_identities = assign_identities(&mut sources, &mut working_registry, &run_id);
    advance(&main_pb, "Deduplicating reference catalog");

    // 3. Reference dedup
    let (references, dedup_stats) = deduplicate(references, &run_id);
    if references.is_empty() {
        stats
            .anomalies
            .push("Reference catalog is empty; no row can be matched automatically".to_string());
    }
    stats.deduplication = dedup_stats;
    advance(&main_pb, "Running match cascade");

    // 4. Cascade
    let mut outcomes: Vec<MatchOutcome> = sources
        .iter()
        .map(|row| MatchOutcome::unresolved(row.identity_id()))
        .collect();
    let cascade = cascade_match(&sources, &references, &DEFAULT_PASS_ORDER, &run_id);
    for hit in &cascade.matched {
        let outcome = &mut outcomes[hit.row_idx];
        outcome.match_stage = MatchStage::Deterministic;
        outcome.matched_value = Some(hit.matched_value.clone());
        outcome.matched_column = Some(MatchedColumn::from(hit.pass.reference_column));
        outcome.matched_source_column = Some(hit.pass.source_column);
        outcome.linked_reference = Some(references[hit.reference_idx].record.clone());
    }
    advance(&main_pb, "Semantic fallback");

    // 5. Semantic fallback
    let labels = collect_unmatched_labels(&sources, &cascade.unmatched);
    let candidates = build_candidate_labels(&references);
    let (semantic_matches, mut semantic_stats) = semantic_match(
        &labels,
        &candidates,
        match_embedder,
        config.semantic_threshold,
        multi_progress
            .as_ref()
            .filter(|_| progress.should_show_detailed()),
        &run_id,
    )
    .await
    .context("Semantic matching failed")?;

    let by_label: HashMap<&str, _> = semantic_matches
        .iter()
        .map(|m| (m.label.as_str(), m))
        .collect();
    for &row_idx in &cascade.unmatched {
        let Some(found) = sources[row_idx]
            .key(SourceColumn::Username)
            .and_then(|key| by_label.get(key.trim()))
        else {
            continue;
        };
        let candidate = &candidates[found.candidate_idx];
        let outcome = &mut outcomes[row_idx];
        outcome.match_stage = MatchStage::Semantic;
        outcome.matched_value = Some(candidate.text.clone());
        outcome.matched_column = Some(MatchedColumn::from(candidate.origin_column));
        outcome.matched_source_column = Some(SourceColumn::Username);
        outcome.similarity_score = Some(found.score);
        outcome.linked_reference = Some(references[candidate.reference_idx].record.clone());
        semantic_stats.rows_resolved += 1;
    }
    stats.cascade = cascade.stats;
    stats.semantic = semantic_stats;
    advance(&main_pb, "Applying manual verdicts");

    // 6. Manual overrides
    let verdicts = ManualVerdicts::from_rows(&manual_verdicts, &config.manual_found_label);
    stats.manual = apply_manual_overrides(&sources, &mut outcomes, &verdicts, &run_id);
    stats.stores = summarize_stores(&sources, &outcomes);
    advance(&main_pb, "Classifying verticals");

    // 7. Assemble and classify
    let mut rows: Vec<LinkedRow> = sources
        .into_iter()
        .zip(outcomes)
        .map(|(row, outcome)| link_row(row, outcome, run_date))
        .collect();
    stats.classification = classifier
        .classify_rows(&mut rows, &run_id)
        .context("Vertical classification failed")?;
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.finish_with_message("Reconciliation complete");
    }

    stats.unresolved_rows = rows.iter().filter(|r| r.outcome.is_unresolved()).count();
    if stats.source_rows > 0 && stats.unresolved_rate() > config.unresolved_anomaly_rate {
        stats.anomalies.push(format!(
            "{:.1}% of source rows are unresolved",
            stats.unresolved_rate() * 100.0
        ));
    }
    for anomaly in &stats.anomalies {
        warn!("⚠️  Run {}: {}", run_id, anomaly);
    }

    let identity_delta = working_registry.new_registrations()[delta_start..].to_vec();
    *registry = working_registry;
    stats.processing_time = start_time.elapsed();
    log_run_summary(&stats);

    Ok(ReconciliationOutput {
        rows,
        identity_delta,
        stats,
    })
}

fn advance(pb: &Option<indicatif::ProgressBar>, next: &str) {
    if let Some(pb) = pb {
        pb.inc(1);
        pb.set_message(next.to_string());
    }
}

/// Final output row for one source row. A store is new when it first
/// appeared on the day it was scraped; an undated store is not new.
fn link_row(row: SourceRow, outcome: MatchOutcome, run_date: NaiveDate) -> LinkedRow {
    let is_new_store = row
        .record
        .first_appearance
        .map(|first| first.date_naive() == row.record.scrape_date.date_naive())
        .unwrap_or(false);
    let found_by_automation = outcome.match_stage.is_automated();
    LinkedRow {
        source: row.record,
        outcome,
        is_new_store,
        found_by_automation,
        vertical: None,
        match_date: run_date,
    }
}

/// Groups rows by normalized username (identity when there is none); a store
/// is found when any of its rows resolved.
pub fn summarize_stores(sources: &[SourceRow], outcomes: &[MatchOutcome]) -> StoreSummary {
    let mut stores: HashMap<&str, bool> = HashMap::new();
    for (row, outcome) in sources.iter().zip(outcomes) {
        let key = row
            .key(SourceColumn::Username)
            .unwrap_or_else(|| row.identity_id());
        let found = stores.entry(key).or_insert(false);
        *found |= !outcome.is_unresolved();
    }

    let found_stores = stores.values().filter(|found| **found).count();
    StoreSummary {
        total_stores: stores.len(),
        found_stores,
        not_found_stores: stores.len() - found_stores,
    }
}

fn log_run_summary(stats: &ReconciliationStats) {
    info!("📊 Reconciliation run {} summary:", stats.run_id);
    info!(
        "   Source rows: {} ({} new identities, {} normalization anomalies)",
        stats.source_rows, stats.new_identities, stats.normalization_anomalies
    );
    info!(
        "   Reference rows: {} -> {} after deduplication",
        stats.deduplication.input_rows, stats.deduplication.output_rows
    );
    for (idx, pass) in stats.cascade.passes.iter().enumerate() {
        info!(
            "   Cascade pass {} ({} = {}): {} matched, {} ambiguous",
            idx + 1,
            pass.source_column.as_str(),
            pass.reference_column.as_str(),
            pass.matched,
            pass.ambiguous
        );
    }
    info!(
        "   Semantic: {} labels, {} candidates, {} accepted (avg {:.3}), {} rows resolved",
        stats.semantic.labels_encoded,
        stats.semantic.candidates_encoded,
        stats.semantic.matches_found,
        stats.semantic.avg_similarity,
        stats.semantic.rows_resolved
    );
    info!("   Manual: {} rows confirmed", stats.manual.rows_relabelled);
    info!(
        "   Verticals: {} categories ({} dictionary, {} similarity)",
        stats.classification.distinct_categories,
        stats.classification.dictionary_hits,
        stats.classification.embedding_assignments
    );
    info!(
        "   Stores: {} total, {} found, {} not found",
        stats.stores.total_stores, stats.stores.found_stores, stats.stores.not_found_stores
    );
    info!(
        "   Unresolved rows: {} ({:.1}%), finished in {:.2?}",
        stats.unresolved_rows,
        stats.unresolved_rate() * 100.0,
        stats.processing_time
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::VERTICALS;
    use crate::embedding::PrecomputedEmbedder;
    use crate::models::matching::MANUAL_MATCH_SENTINEL;
    use chrono::{DateTime, TimeZone, Utc};

    const DIM: usize = 16;

    fn ts(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 9, 0, 0).unwrap()
    }

    fn vector(entries: &[(usize, f32)]) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        for (axis, value) in entries {
            v[*axis] = *value;
        }
        v
    }

    /// Verticals sit on axes 0..13, store names on 13..16.
    fn embedder(include_mystery: bool) -> Arc<PrecomputedEmbedder> {
        let mut table: HashMap<String, Vec<f32>> = VERTICALS
            .iter()
            .enumerate()
            .map(|(i, v)| (v.to_string(), vector(&[(i, 1.0)])))
            .collect();
        for (text, v) in [
            ("LOJA LIMPA", vector(&[(14, 1.0)])),
            ("LOJA LIMPA COMERCIO LTDA", vector(&[(14, 1.0)])),
            ("CASABELLA OFICIAL", vector(&[(13, 0.9), (14, 0.435_889_9)])),
            ("CASA BELLA MOVEIS SA", vector(&[(13, 0.6), (15, 0.8)])),
            ("CASA BELA", vector(&[(13, 1.0)])),
            ("TENIS TOP", vector(&[(0, 1.0)])),
            ("Casa e Jardim", vector(&[(11, 1.0), (12, 0.2)])),
            ("Esportes", vector(&[(0, 1.0), (1, 0.1)])),
        ] {
            table.insert(text.to_string(), v);
        }
        if include_mystery {
            table.insert("MYSTERY".to_string(), vector(&[(1, 1.0)]));
        }
        Arc::new(PrecomputedEmbedder::from_table("test", table).unwrap())
    }

    fn source(user: &str, brand: &str, category: Option<&str>) -> BrandRecord {
        BrandRecord {
            source_username: Some(user.to_string()),
            source_brand_name: Some(brand.to_string()),
            shop_id: 7,
            category_id: None,
            category_name: category.map(str::to_string),
            scrape_date: ts(6, 4),
            first_appearance: None,
            identity_id: None,
        }
    }

    fn official(id: &str, official: &str, fantasy: &str) -> OfficialStoreRecord {
        OfficialStoreRecord {
            official_store_id: id.to_string(),
            site_id: "MLB".to_string(),
            official_name: Some(official.to_string()),
            fantasy_name: Some(fantasy.to_string()),
            status: Some("active".to_string()),
            last_updated: Some(ts(5, 1)),
            category_id_l0: None,
            category_id_l1: None,
            category_name_l1: None,
        }
    }

    fn input() -> ReconciliationInput {
        ReconciliationInput {
            sources: vec![
                source("LOJA.LIMPA", "Loja_Limpa!", Some("Saúde")),
                source("casa_bela", "Casa Bela", Some("Casa e Jardim")),
                source("tenis.top", "Tenis Top", Some("Esportes")),
                source("mystery", "Mystery", None),
            ],
            references: vec![
                official("100", "Loja Limpa Comercio Ltda", "Loja Limpa"),
                official("200", "Casa Bella Moveis SA", "CasaBella Oficial"),
            ],
            manual_verdicts: vec![ManualVerdictRow {
                store_name: Some("Tenis Top".to_string()),
                match_selection: Some("Encontrado".to_string()),
                match_commercial: None,
            }],
            run_date: NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(),
        }
    }

    fn registry() -> IdentityRegistry {
        let mut registry = IdentityRegistry::with_seed(42);
        registry
            .load(vec![IdentityRecord {
                brand_name: "LOJA LIMPA".to_string(),
                identity_id: "LL001".to_string(),
                shop_id: Some(7),
                first_seen: Some(ts(1, 15)),
            }])
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_every_stage_resolves_its_rows() {
        let embedder = embedder(true);
        let classifier = VerticalClassifier::new(embedder.clone()).unwrap();
        let mut registry = registry();

        let output = run_reconciliation(
            input(),
            &mut registry,
            embedder,
            &classifier,
            &PipelineConfig::default(),
            &ProgressConfig::disabled(),
        )
        .await
        .unwrap();

        let rows = &output.rows;
        assert_eq!(rows.len(), 4);

        let stages: Vec<MatchStage> = rows.iter().map(|r| r.outcome.match_stage).collect();
        assert_eq!(
            stages,
            vec![
                MatchStage::Deterministic,
                MatchStage::Semantic,
                MatchStage::Manual,
                MatchStage::Unresolved
            ]
        );

        // Deterministic: pass 1, known identity, not new
        assert_eq!(rows[0].source.identity_id.as_deref(), Some("LL001"));
        assert_eq!(rows[0].outcome.matched_value.as_deref(), Some("LOJA LIMPA"));
        assert_eq!(rows[0].outcome.matched_column, Some(MatchedColumn::FantasyName));
        assert_eq!(
            rows[0].outcome.linked_reference.as_ref().map(|r| r.official_store_id.as_str()),
            Some("100")
        );
        assert!(!rows[0].is_new_store);
        assert!(rows[0].found_by_automation);

        // Semantic: 0.9 fantasy name beats the 0.6 official name
        assert_eq!(
            rows[1].outcome.matched_value.as_deref(),
            Some("CASABELLA OFICIAL")
        );
        assert!((rows[1].outcome.similarity_score.unwrap() - 0.9).abs() < 1e-4);
        assert_eq!(
            rows[1].outcome.linked_reference.as_ref().map(|r| r.official_store_id.as_str()),
            Some("200")
        );
        assert!(rows[1].found_by_automation);

        // Manual: sentinel, no reference, not automated
        assert_eq!(rows[2].outcome.matched_value.as_deref(), Some(MANUAL_MATCH_SENTINEL));
        assert!(rows[2].outcome.linked_reference.is_none());
        assert!(!rows[2].found_by_automation);

        assert!(rows[3].outcome.is_unresolved());
        assert!(rows[3].outcome.linked_reference.is_none());

        let verticals: Vec<&str> = rows.iter().map(|r| r.vertical.as_deref().unwrap()).collect();
        assert_eq!(
            verticals,
            vec!["HEALTH", "FURNISHING & HOUSEWARE", "SPORTS", "OTHERS"]
        );

        assert!(rows[1..].iter().all(|r| r.is_new_store));
        assert_eq!(output.identity_delta.len(), 3);
        assert_eq!(registry.len(), 4);
        assert_eq!(
            output.stats.stores,
            StoreSummary {
                total_stores: 4,
                found_stores: 3,
                not_found_stores: 1
            }
        );
        assert_eq!(output.stats.unresolved_rows, 1);
        assert_eq!(output.stats.semantic.rows_resolved, 1);
        assert_eq!(output.stats.manual.rows_relabelled, 1);
    }

    #[tokio::test]
    async fn test_model_failure_fails_run_and_keeps_registry() {
        let embedder = embedder(false);
        let classifier = VerticalClassifier::new(embedder.clone()).unwrap();
        let mut registry = registry();

        let result = run_reconciliation(
            input(),
            &mut registry,
            embedder,
            &classifier,
            &PipelineConfig::default(),
            &ProgressConfig::disabled(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(registry.len(), 1);
        assert!(registry.new_registrations().is_empty());
    }

    #[tokio::test]
    async fn test_identities_are_stable_across_runs() {
        let embedder = embedder(true);
        let classifier = VerticalClassifier::new(embedder.clone()).unwrap();
        let mut registry = registry();
        let config = PipelineConfig::default();
        let progress = ProgressConfig::disabled();

        let first = run_reconciliation(
            input(),
            &mut registry,
            embedder.clone(),
            &classifier,
            &config,
            &progress,
        )
        .await
        .unwrap();
        let second = run_reconciliation(input(), &mut registry, embedder, &classifier, &config, &progress)
            .await
            .unwrap();

        let ids = |out: &ReconciliationOutput| -> Vec<Option<String>> {
            out.rows.iter().map(|r| r.source.identity_id.clone()).collect()
        };
        assert_eq!(ids(&first), ids(&second));
        assert!(second.identity_delta.is_empty());
    }

    #[tokio::test]
    async fn test_empty_reference_is_anomaly_not_error() {
        let embedder = embedder(true);
        let classifier = VerticalClassifier::new(embedder.clone()).unwrap();
        let mut registry = registry();
        let mut input = input();
        input.references.clear();
        input.manual_verdicts.clear();

        let output = run_reconciliation(
            input,
            &mut registry,
            embedder,
            &classifier,
            &PipelineConfig::default(),
            &ProgressConfig::disabled(),
        )
        .await
        .unwrap();

        assert!(output.rows.iter().all(|r| r.outcome.is_unresolved()));
        assert_eq!(output.stats.anomalies.len(), 2);
    }

    #[tokio::test]
    async fn test_undated_known_brand_is_not_a_new_store() {
        let embedder = embedder(true);
        let classifier = VerticalClassifier::new(embedder.clone()).unwrap();
        let mut registry = IdentityRegistry::with_seed(42);
        registry
            .load(vec![IdentityRecord {
                brand_name: "LOJA LIMPA".to_string(),
                identity_id: "LL001".to_string(),
                shop_id: Some(7),
                first_seen: None,
            }])
            .unwrap();

        let output = run_reconciliation(
            input(),
            &mut registry,
            embedder,
            &classifier,
            &PipelineConfig::default(),
            &ProgressConfig::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(output.rows[0].source.identity_id.as_deref(), Some("LL001"));
        assert!(output.rows[0].source.first_appearance.is_none());
        assert!(!output.rows[0].is_new_store);
        assert!(output.rows[1..].iter().all(|r| r.is_new_store));
    }
}
