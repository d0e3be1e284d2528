// src/identity/mod.rs
pub mod registry;

// Re-export main types for clean API
pub use registry::{assign_identities, identity_key, is_valid_identity_id, IdentityRegistry};
