// src/classification/mod.rs
pub mod vertical;

pub use vertical::{VerticalClassifier, DEFAULT_VERTICAL, VERTICALS};
