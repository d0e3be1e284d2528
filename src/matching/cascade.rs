// src/matching/cascade.rs - Ordered deterministic equality passes
use std::collections::HashMap;
use std::time::Instant;

use crate::models::core::{ReferenceColumn, ReferenceRow, SourceColumn, SourceRow};
use crate::models::stats_models::{CascadePassStats, CascadeStats};
use crate::utils::progress_bars::logging::{PipelineStage, StageLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadePass {
    pub source_column: SourceColumn,
    pub reference_column: ReferenceColumn,
}

impl CascadePass {
    pub const fn new(source_column: SourceColumn, reference_column: ReferenceColumn) -> Self {
        Self {
            source_column,
            reference_column,
        }
    }
}

/// Brand-name passes outrank username passes; fantasy names outrank
/// official names.
pub const DEFAULT_PASS_ORDER: [CascadePass; 4] = [
    CascadePass::new(SourceColumn::BrandName, ReferenceColumn::FantasyName),
    CascadePass::new(SourceColumn::BrandName, ReferenceColumn::OfficialName),
    CascadePass::new(SourceColumn::Username, ReferenceColumn::FantasyName),
    CascadePass::new(SourceColumn::Username, ReferenceColumn::OfficialName),
];

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeHit {
    pub row_idx: usize,
    /// Index into the (canonically ordered) reference rows.
    pub reference_idx: usize,
    pub pass_idx: usize,
    pub pass: CascadePass,
    pub matched_value: String,
    /// How many references the key joined to in this pass.
    pub join_hits: usize,
}

#[derive(Debug, Clone)]
pub struct CascadeResult {
    /// Hits in pass order, then source input order.
    pub matched: Vec<CascadeHit>,
    /// `row_idx` of every row no pass could join, in input order.
    pub unmatched: Vec<usize>,
    pub stats: CascadeStats,
}

/// Equality index over one reference column. Each key lists reference
/// indices in ascending (canonical) order.
fn build_reference_index(
    references: &[ReferenceRow],
    column: ReferenceColumn,
) -> HashMap<&str, Vec<usize>> {
    let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, reference) in references.iter().enumerate() {
        if let Some(key) = reference.key(column) {
            index.entry(key).or_default().push(idx);
        }
    }
    index
}

/// Strict waterfall of equality joins between normalized source keys and
/// reference keys.
///
/// Each pass only sees rows no earlier pass matched. A row joining several
/// references takes the first one in canonical reference order (see
/// [`crate::reference::dedup::deduplicate`]). Blank keys never join.
pub fn cascade_match(
    sources: &[SourceRow],
    references: &[ReferenceRow],
    pass_order: &[CascadePass],
    run_id: &str,
) -> CascadeResult {
    let start_time = Instant::now();
    let logger = StageLogger::new(PipelineStage::Cascade);
    logger.log_start(run_id, sources.len());

    let mut stats = CascadeStats::default();
    let mut matched: Vec<CascadeHit> = Vec::new();
    let mut remaining: Vec<&SourceRow> = sources.iter().collect();

    if references.is_empty() {
        logger.log_anomaly("No reference rows; every pass will fall through");
    }

    for (pass_idx, pass) in pass_order.iter().enumerate() {
        let index = build_reference_index(references, pass.reference_column);
        let mut pass_stats = CascadePassStats {
            source_column: pass.source_column,
            reference_column: pass.reference_column,
            candidates: remaining.len(),
            matched: 0,
            ambiguous: 0,
        };

        let mut still_remaining = Vec::with_capacity(remaining.len());
        for row in remaining {
            let hits = row
                .key(pass.source_column)
                .and_then(|key| index.get(key).map(|hits| (key, hits)));

            match hits {
                Some((key, hits)) if !hits.is_empty() => {
                    if hits.len() > 1 {
                        pass_stats.ambiguous += 1;
                        logger.log_debug(&format!(
                            "Row {} ({}={:?}) joins {} references on {}; taking store {}",
                            row.row_idx,
                            pass.source_column.as_str(),
                            key,
                            hits.len(),
                            pass.reference_column.as_str(),
                            references[hits[0]].record.official_store_id
                        ));
                    }
                    pass_stats.matched += 1;
                    matched.push(CascadeHit {
                        row_idx: row.row_idx,
                        reference_idx: hits[0],
                        pass_idx,
                        pass: *pass,
                        matched_value: key.to_string(),
                        join_hits: hits.len(),
                    });
                }
                _ => still_remaining.push(row),
            }
        }
        remaining = still_remaining;

        logger.log_phase(
            &format!(
                "Pass {} ({} = {})",
                pass_idx + 1,
                pass.source_column.as_str(),
                pass.reference_column.as_str()
            ),
            Some(&format!(
                "{} of {} rows matched, {} ambiguous",
                pass_stats.matched, pass_stats.candidates, pass_stats.ambiguous
            )),
        );
        if pass_stats.ambiguous > 0 {
            logger.log_anomaly(&format!(
                "{} rows joined more than one reference in pass {}; first in canonical order kept",
                pass_stats.ambiguous,
                pass_idx + 1
            ));
        }
        stats.passes.push(pass_stats);
    }

    let unmatched: Vec<usize> = remaining.iter().map(|row| row.row_idx).collect();
    stats.matched = matched.len();
    stats.unmatched = unmatched.len();
    stats.processing_time = start_time.elapsed();
    logger.log_completion(stats.matched, stats.unmatched);

    CascadeResult {
        matched,
        unmatched,
        stats,
    }
}
