//! Content-addressed plan cache with lazy TTL expiry.
//!
//! Maps a request signature to a previously enforced [`ActionPlan`]. Expiry
//! is checked at read time, so no background sweeper is needed for
//! correctness. The cache is an optimization, never a correctness
//! dependency: storage failures degrade to a miss on reads and are logged
//! and swallowed on writes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contract::ActionPlan;
use crate::profile::Baseline;

use super::store::CacheStore;

/// One cached, already-enforced plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content-address of the request this plan answers.
    pub signature: String,
    /// Profile the plan belongs to; drives baseline-shift invalidation.
    pub owner_id: String,
    /// Canonical form of the request at write time, kept for diagnostics.
    pub canonical_input: String,
    pub plan: ActionPlan,
    /// Baseline scores at the time the plan was produced.
    pub baseline: Baseline,
    /// Optional human-readable title for dashboard lists.
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Content-addressed response cache over an external [`CacheStore`].
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    /// Outcome-shift magnitude at which an owner's entries become stale.
    shift_threshold: f64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, shift_threshold: f64) -> Self {
        Self {
            store,
            ttl,
            shift_threshold,
        }
    }

    /// Point lookup. Absence is not an error; an expired entry behaves as a
    /// miss and is removed best-effort. Storage failures degrade to a miss.
    pub async fn get(&self, signature: &str) -> Option<CacheEntry> {
        let entry = match self.store.fetch(signature).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(error = %e, "cache fetch failed, treating as miss");
                return None;
            }
        };
        if entry.is_expired_at(Utc::now()) {
            debug!(signature = %short(signature), "cache entry expired, removing");
            if let Err(e) = self.store.remove(signature).await {
                warn!(error = %e, "failed to remove expired cache entry");
            }
            return None;
        }
        debug!(signature = %short(signature), "cache hit");
        Some(entry)
    }

    /// Bulk lookup for list-rendering paths: one store round trip, then
    /// expired and foreign-owner entries are filtered out.
    pub async fn get_batch(
        &self,
        signatures: &[String],
        owner_id: &str,
    ) -> HashMap<String, CacheEntry> {
        let entries = match self.store.fetch_many(signatures).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cache batch fetch failed, treating as all-miss");
                return HashMap::new();
            }
        };
        let now = Utc::now();
        entries
            .into_iter()
            .filter(|e| e.owner_id == owner_id && !e.is_expired_at(now))
            .map(|e| (e.signature.clone(), e))
            .collect()
    }

    /// Idempotent upsert. Writing the same signature again replaces the
    /// prior entry and restarts its TTL. Failures are logged and swallowed.
    pub async fn set(
        &self,
        signature: &str,
        owner_id: &str,
        canonical_input: &str,
        plan: ActionPlan,
        baseline: Baseline,
        title: Option<String>,
    ) {
        let now = Utc::now();
        let entry = CacheEntry {
            signature: signature.to_string(),
            owner_id: owner_id.to_string(),
            canonical_input: canonical_input.to_string(),
            plan,
            baseline,
            title,
            created_at: now,
            expires_at: now + self.ttl,
        };
        if let Err(e) = self.store.upsert(entry).await {
            warn!(error = %e, signature = %short(signature), "cache write failed, continuing");
        }
    }

    /// Unconditional removal of one entry.
    pub async fn invalidate(&self, signature: &str) {
        if let Err(e) = self.store.remove(signature).await {
            warn!(error = %e, signature = %short(signature), "cache invalidation failed");
        }
    }

    /// Drop all of an owner's entries when a reported outcome shift is
    /// large enough that memoized advice is stale. Below the threshold
    /// this is a no-op.
    pub async fn invalidate_on_baseline_shift(&self, owner_id: &str, delta_magnitude: f64) {
        if delta_magnitude.abs() < self.shift_threshold {
            return;
        }
        match self.store.remove_owned_by(owner_id).await {
            Ok(removed) => {
                debug!(
                    owner = %owner_id,
                    removed,
                    delta = delta_magnitude,
                    "baseline shift invalidated cached plans"
                );
            }
            Err(e) => warn!(error = %e, owner = %owner_id, "baseline-shift invalidation failed"),
        }
    }
}

fn short(signature: &str) -> &str {
    &signature[..8.min(signature.len())]
}
