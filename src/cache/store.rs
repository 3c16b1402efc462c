//! Cache storage boundary.
//!
//! The persistence engine is external; the gateway only sees this trait.
//! All mutation is a single-row upsert or removal keyed by signature, so no
//! multi-row transactions are needed.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

use super::response_cache::CacheEntry;

/// Key-value boundary for cached plans.
///
/// `fetch_many` exists so list-rendering paths can resolve a page of
/// signatures in one round trip; resolving them one by one through `fetch`
/// is an N+1 defect, not a style preference.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn fetch(&self, signature: &str) -> Result<Option<CacheEntry>>;

    /// Bulk point lookup. Missing signatures are simply absent from the
    /// result; order is not guaranteed.
    async fn fetch_many(&self, signatures: &[String]) -> Result<Vec<CacheEntry>>;

    /// Idempotent upsert keyed by `entry.signature`.
    async fn upsert(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, signature: &str) -> Result<()>;

    /// Remove every entry owned by `owner_id`; returns how many went away.
    async fn remove_owned_by(&self, owner_id: &str) -> Result<u64>;
}

/// In-memory [`CacheStore`] for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn fetch(&self, signature: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(signature).map(|e| e.clone()))
    }

    async fn fetch_many(&self, signatures: &[String]) -> Result<Vec<CacheEntry>> {
        Ok(signatures
            .iter()
            .filter_map(|sig| self.entries.get(sig).map(|e| e.clone()))
            .collect())
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        self.entries.insert(entry.signature.clone(), entry);
        Ok(())
    }

    async fn remove(&self, signature: &str) -> Result<()> {
        self.entries.remove(signature);
        Ok(())
    }

    async fn remove_owned_by(&self, owner_id: &str) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.owner_id != owner_id);
        Ok((before - self.entries.len()) as u64)
    }
}
