//! Content-addressed response caching over an external key-value store.

pub mod response_cache;
pub mod store;

pub use response_cache::{CacheEntry, ResponseCache};
pub use store::{CacheStore, MemoryCacheStore};
