//! Per-caller daily token quota admission.
//!
//! One counter per (caller, UTC calendar day); day rollover supersedes the
//! counter naturally through the key. Recording is a single atomic
//! upsert-with-increment at the storage layer. There is deliberately no
//! read-then-overwrite fallback path, because that pattern loses updates
//! under concurrency.
//!
//! Enforcement is availability-biased: anonymous/internal callers and
//! storage failures are fail-open, and threshold crossings are emitted as
//! tracing signals rather than control flow.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::Result;

/// Default daily budget in tokens.
pub const DEFAULT_DAILY_TOKEN_LIMIT: u64 = 50_000;

/// Fraction of the daily limit at which a warning signal is emitted.
const WARNING_THRESHOLD: f64 = 0.8;

/// Rough characters-per-token divisor for the pre-call estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Storage boundary for quota counters.
///
/// `increment` MUST be atomic per (caller, day) key: two concurrent calls by
/// the same caller must both land in the final total.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically add `cost` to the (caller, day) counter, creating it at
    /// zero if absent, and return the new total.
    async fn increment(&self, caller_id: &str, day: &str, cost: u64) -> Result<u64>;

    /// Current total for the (caller, day) counter; 0 when absent.
    async fn usage_for(&self, caller_id: &str, day: &str) -> Result<u64>;
}

/// In-memory [`QuotaStore`]. The dashmap entry API gives the same
/// single-key atomicity an `UPSERT ... SET used = used + ?` would.
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    counters: DashMap<(String, String), u64>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn increment(&self, caller_id: &str, day: &str, cost: u64) -> Result<u64> {
        let mut entry = self
            .counters
            .entry((caller_id.to_string(), day.to_string()))
            .or_insert(0);
        *entry = entry.saturating_add(cost);
        Ok(*entry)
    }

    async fn usage_for(&self, caller_id: &str, day: &str) -> Result<u64> {
        Ok(self
            .counters
            .get(&(caller_id.to_string(), day.to_string()))
            .map(|v| *v)
            .unwrap_or(0))
    }
}

/// Derived usage report for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub used: u64,
    pub remaining: u64,
    pub limit: u64,
    /// Rounded, capped at 100.
    pub percentage: u8,
}

/// Gates provider calls against the caller's rolling daily budget.
pub struct QuotaAdmission {
    store: Arc<dyn QuotaStore>,
    daily_limit: u64,
}

impl QuotaAdmission {
    pub fn new(store: Arc<dyn QuotaStore>, daily_limit: u64) -> Self {
        Self { store, daily_limit }
    }

    /// Key for today's counter: `"YYYY-MM-DD"` in UTC.
    pub fn current_day_key() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    /// Cheap pre-call cost heuristic: prompt characters / 4 plus the
    /// requested output ceiling. Real enforcement happens on recorded
    /// actuals.
    pub fn estimate(prompt_chars: usize, max_output_tokens: u32) -> u64 {
        (prompt_chars / CHARS_PER_TOKEN) as u64 + u64::from(max_output_tokens)
    }

    /// Whether a call with the given estimated cost may proceed.
    ///
    /// Fail-open twice over: anonymous/internal callers (no id) are always
    /// admitted, and storage errors admit with a warning. Availability of
    /// advice generation is preferred over strict bookkeeping.
    pub async fn can_use(&self, caller_id: Option<&str>, estimated_cost: u64) -> bool {
        let Some(caller_id) = caller_id else {
            return true;
        };
        let day = Self::current_day_key();
        match self.store.usage_for(caller_id, &day).await {
            Ok(used) => used.saturating_add(estimated_cost) <= self.daily_limit,
            Err(e) => {
                warn!(error = %e, caller = %caller_id, "quota read failed, admitting fail-open");
                true
            }
        }
    }

    /// Record actual consumption via an atomic increment, emitting a
    /// one-time signal when this call crosses 80% (warn) or 100% (error)
    /// of the daily limit.
    pub async fn record(&self, caller_id: Option<&str>, actual_cost: u64) {
        let Some(caller_id) = caller_id else {
            return;
        };
        if actual_cost == 0 {
            return;
        }
        let day = Self::current_day_key();
        let new_total = match self.store.increment(caller_id, &day, actual_cost).await {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, caller = %caller_id, "quota increment failed, usage not recorded");
                return;
            }
        };
        let previous = new_total - actual_cost;
        let warn_mark = (self.daily_limit as f64 * WARNING_THRESHOLD) as u64;
        if previous < self.daily_limit && new_total >= self.daily_limit {
            error!(
                caller = %caller_id,
                used = new_total,
                limit = self.daily_limit,
                "daily token quota exhausted"
            );
        } else if previous < warn_mark && new_total >= warn_mark {
            warn!(
                caller = %caller_id,
                used = new_total,
                limit = self.daily_limit,
                "daily token quota above 80%"
            );
        }
    }

    /// Derived usage report. Never errors: a degraded store yields a
    /// zeroed, optimistic report.
    pub async fn usage(&self, caller_id: &str) -> UsageReport {
        let day = Self::current_day_key();
        let used = match self.store.usage_for(caller_id, &day).await {
            Ok(used) => used,
            Err(e) => {
                warn!(error = %e, caller = %caller_id, "quota read failed, reporting zero usage");
                0
            }
        };
        let percentage = if self.daily_limit == 0 {
            100
        } else {
            ((used as f64 / self.daily_limit as f64) * 100.0).round().min(100.0) as u8
        };
        UsageReport {
            used,
            remaining: self.daily_limit.saturating_sub(used),
            limit: self.daily_limit,
            percentage,
        }
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }
}
