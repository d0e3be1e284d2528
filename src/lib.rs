// src/lib.rs
pub mod classification;
pub mod embedding;
pub mod identity;
pub mod matching;
pub mod models;
pub mod reference;
pub mod utils;

pub use matching::manager::{run_reconciliation, ReconciliationInput, ReconciliationOutput};
pub use models::core::{BrandRecord, IdentityRecord, ManualVerdictRow, OfficialStoreRecord};
pub use models::matching::{LinkedRow, MatchOutcome, MatchStage, MatchedColumn};
