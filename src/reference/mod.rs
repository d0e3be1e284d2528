// src/reference/mod.rs
pub mod candidates;
pub mod dedup;

pub use candidates::build_candidate_labels;
pub use dedup::deduplicate;
