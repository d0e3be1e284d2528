// src/identity/registry.rs
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};

use crate::models::core::{IdentityRecord, SourceColumn, SourceRow};
use crate::utils::progress_bars::logging::{PipelineStage, StageLogger};

pub const IDENTITY_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const IDENTITY_LENGTH: usize = 5;

/// Well-formed identities are exactly five symbols from `[A-Z0-9]`.
pub fn is_valid_identity_id(id: &str) -> bool {
    id.len() == IDENTITY_LENGTH && id.bytes().all(|b| IDENTITY_ALPHABET.contains(&b))
}

/// Durable brand identity state for one run.
///
/// Built from the persisted identity table, mutated only through
/// [`IdentityRegistry::resolve_identity`], and handed back as a delta of the
/// pairs issued during the run. `&mut self` on the single mutating entry
/// point is what serializes lookup-or-create: the issued-set check and the
/// insertion can never interleave with another resolution.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    by_brand: HashMap<String, String>,
    issued: HashSet<String>,
    first_seen: HashMap<String, DateTime<Utc>>,
    new_registrations: Vec<IdentityRecord>,
    rng: StdRng,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic issuance order, for tests and reproducible replays.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            by_brand: HashMap::new(),
            issued: HashSet::new(),
            first_seen: HashMap::new(),
            new_registrations: Vec::new(),
            rng,
        }
    }

    /// Loads the persisted table into a fresh registry.
    pub fn from_records(records: Vec<IdentityRecord>) -> Result<Self> {
        let mut registry = Self::new();
        registry.load(records)?;
        Ok(registry)
    }

    /// Adds persisted pairs. The first pair seen for a brand wins; a later
    /// conflicting pair is reported and ignored. Every identifier ever seen is
    /// reserved so it can never be issued again.
    pub fn load(&mut self, records: Vec<IdentityRecord>) -> Result<()> {
        let mut owners: HashMap<String, String> = self
            .by_brand
            .iter()
            .map(|(brand, id)| (id.clone(), brand.clone()))
            .collect();
        let mut malformed = 0usize;

        for record in records {
            if record.identity_id.is_empty() {
                bail!(
                    "Identity table row for brand {:?} has an empty identity",
                    record.brand_name
                );
            }
            if !is_valid_identity_id(&record.identity_id) {
                malformed += 1;
                debug!(
                    "Persisted identity {:?} for {:?} is not 5 alphanumerics; keeping it as issued",
                    record.identity_id, record.brand_name
                );
            }

            self.issued.insert(record.identity_id.clone());

            if let Some(seen) = record.first_seen {
                self.first_seen
                    .entry(record.identity_id.clone())
                    .and_modify(|current| {
                        if seen < *current {
                            *current = seen;
                        }
                    })
                    .or_insert(seen);
            }

            match self.by_brand.get(&record.brand_name) {
                Some(existing) if existing != &record.identity_id => {
                    warn!(
                        "Brand {:?} has identities {} and {} in the persisted table; keeping {}",
                        record.brand_name, existing, record.identity_id, existing
                    );
                }
                Some(_) => {}
                None => {
                    if let Some(other_brand) = owners.get(&record.identity_id) {
                        warn!(
                            "Identity {} is shared by brands {:?} and {:?} in the persisted table",
                            record.identity_id, other_brand, record.brand_name
                        );
                    }
                    owners.insert(record.identity_id.clone(), record.brand_name.clone());
                    self.by_brand
                        .insert(record.brand_name, record.identity_id);
                }
            }
        }

        if malformed > 0 {
            warn!("{} persisted identities do not follow the 5-symbol format", malformed);
        }
        info!(
            "Identity registry loaded: {} brands, {} issued identities",
            self.by_brand.len(),
            self.issued.len()
        );
        Ok(())
    }

    /// Lookup-or-create for one normalized brand name.
    ///
    /// Unknown names get a fresh identifier drawn uniformly from the 36-symbol
    /// alphabet and rejection-sampled against every identifier issued so far.
    /// Collisions are retried silently.
    pub fn resolve_identity(
        &mut self,
        brand_name: &str,
        shop_id: Option<i64>,
        seen_at: DateTime<Utc>,
    ) -> String {
        if let Some(existing) = self.by_brand.get(brand_name) {
            return existing.clone();
        }

        let identity_id = loop {
            let candidate = self.draw_identity();
            if !self.issued.contains(&candidate) {
                break candidate;
            }
            debug!("Identity collision on {}, drawing again", candidate);
        };

        self.issued.insert(identity_id.clone());
        self.by_brand
            .insert(brand_name.to_string(), identity_id.clone());
        self.first_seen.insert(identity_id.clone(), seen_at);
        self.new_registrations.push(IdentityRecord {
            brand_name: brand_name.to_string(),
            identity_id: identity_id.clone(),
            shop_id,
            first_seen: Some(seen_at),
        });

        identity_id
    }

    fn draw_identity(&mut self) -> String {
        (0..IDENTITY_LENGTH)
            .map(|_| IDENTITY_ALPHABET[self.rng.gen_range(0..IDENTITY_ALPHABET.len())] as char)
            .collect()
    }

    pub fn lookup(&self, brand_name: &str) -> Option<&str> {
        self.by_brand.get(brand_name).map(String::as_str)
    }

    /// Earliest first-seen timestamp known for an identity.
    pub fn first_seen(&self, identity_id: &str) -> Option<DateTime<Utc>> {
        self.first_seen.get(identity_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_brand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_brand.is_empty()
    }

    /// Pairs issued since the registry was loaded, in issuance order.
    pub fn new_registrations(&self) -> &[IdentityRecord] {
        &self.new_registrations
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Name an identity is keyed on: the normalized brand name, then the
/// normalized username, then the shop id, so every row gets one.
pub fn identity_key(row: &SourceRow) -> String {
    row.brand_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .or_else(|| row.username_key.as_deref().filter(|k| !k.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("SHOP {}", row.record.shop_id))
}

/// Assigns an identity to every source row and backfills `first_appearance`.
///
/// A row keeps its own first appearance when present; otherwise it takes the
/// earliest first-seen date recorded for its identity. A brand new identity
/// is first seen at this scrape. A known identity persisted without a date
/// stays `None` rather than being dated to today.
pub fn assign_identities(
    rows: &mut [SourceRow],
    registry: &mut IdentityRegistry,
    run_id: &str,
) -> usize {
    let logger = StageLogger::new(PipelineStage::Identity);
    logger.log_start(run_id, rows.len());
    let before = registry.new_registrations().len();

    let mut fallback_keys = 0usize;
    for row in rows.iter_mut() {
        if row.key(SourceColumn::BrandName).is_none() {
            fallback_keys += 1;
        }
        let key = identity_key(row);
        let identity_id =
            registry.resolve_identity(&key, Some(row.record.shop_id), row.record.scrape_date);

        // Issuance records the scrape date, so only known identities persisted
        // without a date stay undated here
        if row.record.first_appearance.is_none() {
            row.record.first_appearance = registry.first_seen(&identity_id);
        }
        row.record.identity_id = Some(identity_id);
    }

    if fallback_keys > 0 {
        logger.log_anomaly(&format!(
            "{} rows have no brand name; identities keyed on username or shop id",
            fallback_keys
        ));
    }

    let issued = registry.new_registrations().len() - before;
    logger.log_phase(
        "Identities resolved",
        Some(&format!("{} new identities, {} known brands", issued, registry.len())),
    );
    issued
}
