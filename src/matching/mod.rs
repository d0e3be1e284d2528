// src/matching/mod.rs
pub mod cascade;
pub mod embedding;
pub mod manager;
pub mod manual;
pub mod name;

pub use cascade::{cascade_match, CascadePass, DEFAULT_PASS_ORDER};
pub use embedding::{select_best_candidate, semantic_match};
pub use manual::{apply_manual_overrides, ManualVerdicts};
pub use name::normalize_name;
