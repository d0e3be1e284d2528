// src/models/mod.rs
pub mod core;
pub mod matching;
pub mod stats_models;
