//! Gateway configuration.
//!
//! Every field has a sensible default; a missing or corrupt config file
//! yields the defaults with a warning rather than an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry bounds for the provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Per-caller daily token budget.
    pub daily_token_limit: u64,
    /// Cached plan lifetime in seconds.
    pub cache_ttl_secs: u64,
    /// Outcome-shift magnitude that invalidates an owner's cached plans.
    pub baseline_shift_threshold: f64,
    /// Output ceiling requested from the provider.
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub retry: RetryConfig,
    /// Long-call budget for one provider request, in seconds.
    pub provider_timeout_secs: u64,
    /// Baseline read cache bounds.
    pub baseline_cache_capacity: usize,
    pub baseline_cache_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            daily_token_limit: 50_000,
            cache_ttl_secs: 24 * 60 * 60,
            baseline_shift_threshold: 2.0,
            max_output_tokens: 1_024,
            temperature: 0.7,
            retry: RetryConfig::default(),
            provider_timeout_secs: 60,
            baseline_cache_capacity: 256,
            baseline_cache_ttl_secs: 300,
        }
    }
}

impl GatewayConfig {
    /// Canonical config path: `~/.uplift/gateway.json`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".uplift")
            .join("gateway.json")
    }

    /// Load from the canonical path, falling back to defaults.
    pub fn load_or_default() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`. A missing file is the normal first-run case; a
    /// corrupt file logs a warning and yields defaults.
    pub fn load_from(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read gateway config, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "gateway config is corrupt, using defaults");
                Self::default()
            }
        }
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs as i64)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn baseline_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.baseline_cache_ttl_secs)
    }

    pub fn retry_policy(&self) -> crate::providers::RetryPolicy {
        crate::providers::RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.daily_token_limit, 50_000);
        assert_eq!(config.cache_ttl_secs, 86_400);
        assert_eq!(config.baseline_shift_threshold, 2.0);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.provider_timeout_secs, 60);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = GatewayConfig::load_from(&tmp.path().join("nope.json"));
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gateway.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(GatewayConfig::load_from(&path), GatewayConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_only_named_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gateway.json");
        std::fs::write(&path, r#"{"daily_token_limit": 500}"#).unwrap();
        let config = GatewayConfig::load_from(&path);
        assert_eq!(config.daily_token_limit, 500);
        assert_eq!(config.cache_ttl_secs, 86_400, "unnamed fields keep defaults");
    }

    #[test]
    fn test_retry_policy_conversion() {
        let config = GatewayConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = GatewayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
