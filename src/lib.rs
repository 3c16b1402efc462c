//! uplift-gateway: the LLM invocation gateway behind the advice surface.
//!
//! Every generation request funnels through a single choke point,
//! [`Gateway::generate_or_retrieve`], which layers:
//!
//! - content-addressed request fingerprinting ([`fingerprint`])
//! - a TTL response cache over pluggable storage ([`cache`])
//! - per-caller daily token quotas ([`quota`])
//! - retrying provider invocation with error classification ([`providers`])
//! - output contract enforcement that repairs instead of rejecting
//!   ([`contract`])
//!
//! The cache and quota layers are availability-biased: storage trouble
//! degrades to cache misses and fail-open admission rather than failed
//! requests.

pub mod cache;
pub mod config;
pub mod contract;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod profile;
pub mod providers;
pub mod quota;

pub use cache::{CacheEntry, CacheStore, MemoryCacheStore, ResponseCache};
pub use config::{GatewayConfig, RetryConfig};
pub use contract::{ActionPlan, ImmediateAction, PlanMeta, Risk, TimeToImpact};
pub use error::{GatewayError, Result};
pub use fingerprint::FingerprintInput;
pub use gateway::{Gateway, GatewayResponse};
pub use profile::{Baseline, BaselineCache, BaselineStore};
pub use providers::{HttpProvider, LlmProvider, ResilientInvoker, RetryPolicy};
pub use quota::{MemoryQuotaStore, QuotaAdmission, QuotaStore, UsageReport};
