//! Gateway error taxonomy.
//!
//! Request-path failures fall into four caller-visible classes (validation,
//! signature mismatch, quota, upstream) plus one internal class (`Storage`)
//! that is never surfaced: storage failures on the cache/quota read paths
//! degrade to conservative defaults instead.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or missing input fields. Maps to a 4xx at the HTTP layer.
    /// Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The presented request signature does not verify against the payload.
    /// Treated as authorization-adjacent; never retried.
    #[error("request signature does not match its payload")]
    SignatureMismatch,

    /// The caller's daily token budget would be exceeded. Carries usage
    /// figures so the UI can show remaining/limit rather than a generic
    /// rate-limit message.
    #[error("daily token quota exceeded: {used} of {limit} tokens used")]
    QuotaExceeded { used: u64, limit: u64 },

    /// The provider call failed fatally or exhausted its retries. `status`
    /// is the upstream HTTP status when one was observed.
    #[error("upstream provider error (status {status:?}): {message}")]
    Upstream { status: Option<u16>, message: String },

    /// A storage backend failed. Internal only: the request path catches
    /// this and degrades (cache miss, fail-open quota, zeroed usage report).
    #[error("storage degraded: {0}")]
    Storage(String),

    /// JSON encode/decode failure outside the provider-output repair path.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure (config loading).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_message_names_figures() {
        let err = GatewayError::QuotaExceeded {
            used: 49_900,
            limit: 50_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("49900"), "{msg}");
        assert!(msg.contains("50000"), "{msg}");
    }

    #[test]
    fn test_upstream_message_includes_status() {
        let err = GatewayError::Upstream {
            status: Some(503),
            message: "service unavailable".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"), "{msg}");
        assert!(msg.contains("service unavailable"), "{msg}");
    }

    #[test]
    fn test_serde_error_converts() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: GatewayError = bad.unwrap_err().into();
        assert!(matches!(err, GatewayError::Serialization(_)));
    }
}
