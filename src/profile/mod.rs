//! Profile baseline boundary.
//!
//! The profile store is an external collaborator: it supplies the per-subject
//! baseline scores used to seed new cache entries. [`BaselineCache`] is a
//! bounded LRU/TTL read cache in front of it, held as an explicit object
//! with its own lifecycle rather than a module-level global. It is a
//! performance hint only: the store remains the system of
//! record, and store failures fall back to a zeroed baseline.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Cumulative measured progress for one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub impact_score: f64,
    pub flow_score: f64,
}

/// Read-side boundary to the external profile store.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    async fn get_baseline(&self, profile_id: &str) -> Result<Baseline>;
}

#[derive(Debug, Clone, Copy)]
struct CachedBaseline {
    value: Baseline,
    cached_at: Instant,
    accessed_at: Instant,
}

/// Bounded LRU/TTL cache for baseline reads.
///
/// Capacity is clamped to a minimum of 1 so eviction can always terminate.
#[derive(Debug)]
pub struct BaselineCache {
    entries: Mutex<HashMap<String, CachedBaseline>>,
    capacity: usize,
    ttl: Duration,
}

impl BaselineCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Look up a cached baseline. Expired entries behave as absent and are
    /// removed on the spot.
    pub fn get(&self, profile_id: &str) -> Option<Baseline> {
        let mut guard = self.entries.lock().expect("baseline cache lock poisoned");
        let now = Instant::now();
        match guard.get_mut(profile_id) {
            Some(entry) if now.duration_since(entry.cached_at) <= self.ttl => {
                entry.accessed_at = now;
                Some(entry.value)
            }
            Some(_) => {
                guard.remove(profile_id);
                None
            }
            None => None,
        }
    }

    /// Insert or refresh a baseline, evicting the least recently used entry
    /// when at capacity.
    pub fn put(&self, profile_id: &str, value: Baseline) {
        let mut guard = self.entries.lock().expect("baseline cache lock poisoned");
        let now = Instant::now();
        while guard.len() >= self.capacity && !guard.contains_key(profile_id) {
            let lru = guard
                .iter()
                .min_by_key(|(_, e)| e.accessed_at)
                .map(|(k, _)| k.clone());
            match lru {
                Some(key) => {
                    debug!(profile = %key, "evicting LRU baseline cache entry");
                    guard.remove(&key);
                }
                None => break,
            }
        }
        guard.insert(
            profile_id.to_string(),
            CachedBaseline {
                value,
                cached_at: now,
                accessed_at: now,
            },
        );
    }

    /// Drop one subject's cached baseline (after an outcome event changes it).
    pub fn forget(&self, profile_id: &str) {
        self.entries
            .lock()
            .expect("baseline cache lock poisoned")
            .remove(profile_id);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("baseline cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("baseline cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(impact: f64) -> Baseline {
        Baseline {
            impact_score: impact,
            flow_score: 1.0,
        }
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = BaselineCache::new(4, Duration::from_secs(60));
        assert!(cache.get("p1").is_none());
        cache.put("p1", baseline(2.0));
        assert_eq!(cache.get("p1"), Some(baseline(2.0)));
    }

    #[test]
    fn test_ttl_expiry_behaves_as_miss() {
        let cache = BaselineCache::new(4, Duration::ZERO);
        cache.put("p1", baseline(2.0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("p1").is_none());
        assert!(cache.is_empty(), "expired entry should be removed on read");
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = BaselineCache::new(2, Duration::from_secs(60));
        cache.put("p1", baseline(1.0));
        std::thread::sleep(Duration::from_millis(2));
        cache.put("p2", baseline(2.0));
        std::thread::sleep(Duration::from_millis(2));
        // Touch p1 so p2 becomes least recently used.
        let _ = cache.get("p1");
        std::thread::sleep(Duration::from_millis(2));
        cache.put("p3", baseline(3.0));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("p2").is_none(), "p2 was LRU and should be evicted");
        assert!(cache.get("p1").is_some());
        assert!(cache.get("p3").is_some());
    }

    #[test]
    fn test_put_refreshes_existing_without_evicting() {
        let cache = BaselineCache::new(2, Duration::from_secs(60));
        cache.put("p1", baseline(1.0));
        cache.put("p2", baseline(2.0));
        cache.put("p1", baseline(9.0));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("p1"), Some(baseline(9.0)));
        assert!(cache.get("p2").is_some());
    }

    #[test]
    fn test_forget_and_clear() {
        let cache = BaselineCache::new(4, Duration::from_secs(60));
        cache.put("p1", baseline(1.0));
        cache.put("p2", baseline(2.0));
        cache.forget("p1");
        assert!(cache.get("p1").is_none());
        assert!(cache.get("p2").is_some());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_zero_clamped() {
        let cache = BaselineCache::new(0, Duration::from_secs(60));
        cache.put("p1", baseline(1.0));
        assert_eq!(cache.len(), 1);
    }
}
