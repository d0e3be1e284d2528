// src/utils/progress_bars/progress_config.rs
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::utils::env::env_or;

const STAGE_BAR_TEMPLATE: &str =
    "    {spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// Terminal progress settings for a reconciliation run.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub enabled: bool,
    /// Per-stage bars (semantic scoring) in addition to the run bar
    pub detailed: bool,
    /// Log process memory at the end of the run
    pub show_memory: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed: true,
            show_memory: true,
        }
    }
}

impl ProgressConfig {
    /// Reads `PROGRESS_ENABLED`, `PROGRESS_DETAILED` and `PROGRESS_SHOW_MEMORY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("PROGRESS_ENABLED", defaults.enabled),
            detailed: env_or("PROGRESS_DETAILED", defaults.detailed),
            show_memory: env_or("PROGRESS_SHOW_MEMORY", defaults.show_memory),
        }
    }

    /// Progress is off entirely (tests, CI).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            detailed: false,
            show_memory: false,
        }
    }

    pub fn create_multi_progress(&self) -> Option<MultiProgress> {
        self.enabled.then(MultiProgress::new)
    }

    pub fn should_show_detailed(&self) -> bool {
        self.enabled && self.detailed
    }

    pub fn should_show_memory(&self) -> bool {
        self.enabled && self.show_memory
    }
}

/// Adds a stage bar to `multi_progress`, or returns `None` when progress is off.
pub fn stage_bar(multi_progress: Option<&MultiProgress>, len: u64, message: &str) -> Option<ProgressBar> {
    let mp = multi_progress?;
    let pb = mp.add(ProgressBar::new(len));
    if let Ok(style) = ProgressStyle::default_bar().template(STAGE_BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    Some(pb)
}
