// src/matching/embedding.rs - Sentence-embedding fallback for rows the cascade missed
use anyhow::{Context, Result};
use indicatif::MultiProgress;
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::embedding::{embed_checked, Embedder};
use crate::models::core::{CandidateLabel, SourceColumn, SourceRow};
use crate::models::stats_models::SemanticMatchingStats;
use crate::utils::candle::cosine_similarity_matrix;
use crate::utils::progress_bars::logging::{PipelineStage, StageLogger};
use crate::utils::progress_bars::progress_config::stage_bar;

/// Query rows scored per similarity matrix.
const SIMILARITY_CHUNK_ROWS: usize = 256;

/// Best candidate accepted for one unmatched label.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMatch {
    pub label: String,
    /// Index into the candidate list handed to [`semantic_match`].
    pub candidate_idx: usize,
    pub score: f32,
}

/// Argmax over one row of scores. Ties keep the earliest candidate. The
/// winner is accepted when its score is at least `threshold`.
pub fn select_best_candidate(scores: &[f32], threshold: f32) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((idx, score)),
        }
    }
    best.filter(|(_, score)| *score >= threshold)
}

/// Distinct normalized usernames of the rows in `unmatched` (by `row_idx`),
/// in first-seen order. Rows without a username cannot be queried.
pub fn collect_unmatched_labels(sources: &[SourceRow], unmatched: &[usize]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for &row_idx in unmatched {
        let Some(row) = sources.get(row_idx) else {
            continue;
        };
        if let Some(key) = row.key(SourceColumn::Username) {
            let label = key.trim();
            if !label.is_empty() && seen.insert(label.to_string()) {
                labels.push(label.to_string());
            }
        }
    }
    labels
}

/// Encodes `labels` and `candidates` with `embedder` and returns, per label,
/// the most similar candidate when its cosine similarity reaches
/// `threshold`.
///
/// The two corpora are encoded concurrently on the blocking pool. A failing
/// or malformed model is an error; "nothing above threshold" is an empty
/// result.
pub async fn semantic_match(
    labels: &[String],
    candidates: &[CandidateLabel],
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    multi_progress: Option<&MultiProgress>,
    run_id: &str,
) -> Result<(Vec<SemanticMatch>, SemanticMatchingStats)> {
    let start_time = Instant::now();
    let logger = StageLogger::new(PipelineStage::Semantic);
    logger.log_start(run_id, labels.len());

    let mut stats = SemanticMatchingStats::default();
    if labels.is_empty() {
        logger.log_completion(0, 0);
        return Ok((Vec::new(), stats));
    }
    if candidates.is_empty() {
        logger.log_anomaly("No candidate labels to compare against; semantic stage skipped");
        stats.below_threshold = labels.len();
        stats.processing_time = start_time.elapsed();
        logger.log_completion(0, labels.len());
        return Ok((Vec::new(), stats));
    }

    logger.log_phase(
        "Encoding",
        Some(&format!(
            "{} labels and {} candidates with model {}",
            labels.len(),
            candidates.len(),
            embedder.model_name()
        )),
    );
    let label_texts = labels.to_vec();
    let candidate_texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
    let label_embedder = embedder.clone();
    let candidate_embedder = embedder.clone();
    let label_task = tokio::task::spawn_blocking(move || {
        embed_checked(label_embedder.as_ref(), &label_texts)
    });
    let candidate_task = tokio::task::spawn_blocking(move || {
        embed_checked(candidate_embedder.as_ref(), &candidate_texts)
    });
    let (label_vectors, candidate_vectors) = tokio::try_join!(label_task, candidate_task)
        .context("Embedding task did not complete")?;
    let label_vectors = label_vectors
        .with_context(|| format!("Failed to encode unmatched labels with {}", embedder.model_name()))?;
    let candidate_vectors = candidate_vectors
        .with_context(|| format!("Failed to encode candidate labels with {}", embedder.model_name()))?;
    stats.labels_encoded = label_vectors.len();
    stats.candidates_encoded = candidate_vectors.len();

    logger.log_phase("Scoring", None);
    let pb = stage_bar(multi_progress, labels.len() as u64, "Scoring labels");
    let mut matches = Vec::new();
    let mut score_sum = 0.0_f64;

    for (chunk_idx, chunk) in label_vectors.chunks(SIMILARITY_CHUNK_ROWS).enumerate() {
        let offset = chunk_idx * SIMILARITY_CHUNK_ROWS;
        let matrix = cosine_similarity_matrix(chunk, &candidate_vectors)
            .context("Similarity computation failed")?;

        for (row_offset, scores) in matrix.iter().enumerate() {
            let label = &labels[offset + row_offset];
            match select_best_candidate(scores, threshold) {
                Some((candidate_idx, score)) => {
                    debug!(
                        "{:?} -> {:?} ({:?}) at {:.4}",
                        label,
                        candidates[candidate_idx].text,
                        candidates[candidate_idx].origin_column,
                        score
                    );
                    score_sum += score as f64;
                    matches.push(SemanticMatch {
                        label: label.clone(),
                        candidate_idx,
                        score,
                    });
                }
                None => stats.below_threshold += 1,
            }
        }
        if let Some(pb) = &pb {
            pb.inc(chunk.len() as u64);
        }
    }
    if let Some(pb) = pb {
        pb.finish_with_message("Scoring complete");
    }

    stats.matches_found = matches.len();
    if !matches.is_empty() {
        stats.avg_similarity = score_sum / matches.len() as f64;
    }
    stats.processing_time = start_time.elapsed();

    if stats.matches_found == 0 {
        logger.log_anomaly(&format!(
            "No label reached the {:.2} similarity threshold",
            threshold
        ));
    }
    logger.log_completion(stats.matches_found, stats.below_threshold);
    Ok((matches, stats))
}
