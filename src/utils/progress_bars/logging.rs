// src/utils/progress_bars/logging.rs - Logging helpers shared by the pipeline stages
use log::{debug, info, warn};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Normalize,
    Identity,
    Deduplicate,
    Cascade,
    Semantic,
    Manual,
    Vertical,
}

#[derive(Clone)]
pub struct StageLogger {
    stage_name: &'static str,
    stage_emoji: &'static str,
    start_time: Instant,
}

impl StageLogger {
    pub fn new(stage: PipelineStage) -> Self {
        let (stage_name, stage_emoji) = match stage {
            PipelineStage::Normalize => ("NORMALIZE", "🧹"),
            PipelineStage::Identity => ("IDENTITY", "🔑"),
            PipelineStage::Deduplicate => ("DEDUP", "👯"),
            PipelineStage::Cascade => ("CASCADE", "🔗"),
            PipelineStage::Semantic => ("SEMANTIC", "🧠"),
            PipelineStage::Manual => ("MANUAL", "✋"),
            PipelineStage::Vertical => ("VERTICAL", "🏷️"),
        };

        Self {
            stage_name,
            stage_emoji,
            start_time: Instant::now(),
        }
    }

    pub fn log_start(&self, run_id: &str, input_count: usize) {
        info!(
            "[{}] {} 🚀 Starting {} stage (run ID: {}) with {} input rows",
            self.stage_name,
            self.stage_emoji,
            self.stage_name.to_lowercase(),
            run_id,
            input_count
        );
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        match details {
            Some(details) => info!(
                "[{}] {} 🔄 Phase: {} - {} [+{:.1}s]",
                self.stage_name,
                self.stage_emoji,
                phase,
                details,
                elapsed.as_secs_f32()
            ),
            None => info!(
                "[{}] {} 🔄 Phase: {} [+{:.1}s]",
                self.stage_name,
                self.stage_emoji,
                phase,
                elapsed.as_secs_f32()
            ),
        }
    }

    pub fn log_anomaly(&self, message: &str) {
        warn!("[{}] {} ⚠️  {}", self.stage_name, self.stage_emoji, message);
    }

    pub fn log_debug(&self, message: &str) {
        debug!("[{}] {} {}", self.stage_name, self.stage_emoji, message);
    }

    pub fn log_completion(&self, resolved: usize, remaining: usize) {
        info!(
            "[{}] {} ✅ Completed in {:.2?}: {} resolved, {} remaining",
            self.stage_name,
            self.stage_emoji,
            self.start_time.elapsed(),
            resolved,
            remaining
        );
    }
}
