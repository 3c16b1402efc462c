//! Bounded retry around the provider call.
//!
//! State machine: attempt → success → done; attempt → failure → classify →
//! retryable with attempts left → backoff and attempt again; otherwise
//! failed. Fatal classifications (4xx, malformed successes) short-circuit
//! with the original, actionable error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

use super::{Completion, CompletionRequest, ErrorClass, LlmProvider, ProviderError};

/// Exponential backoff bounds for the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry following `attempt` (1-based): doubles from
    /// the initial delay, capped.
    fn backoff_after(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        doubled.min(self.max_backoff)
    }
}

/// Wraps a provider with bounded retry and error classification.
pub struct ResilientInvoker {
    provider: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl ResilientInvoker {
    pub fn new(provider: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        // A zero attempt bound would return without ever calling.
        let policy = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        };
        Self { provider, policy }
    }

    /// Call the provider, retrying transient failures with exponential
    /// backoff. An ostensibly successful call with an empty payload is an
    /// upstream contract violation and fails without retry.
    pub async fn invoke(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                provider = %self.provider.name(),
                attempt,
                max = self.policy.max_attempts,
                "provider attempt"
            );

            let err = match self.provider.complete(request).await {
                Ok(completion) if completion.text.trim().is_empty() => {
                    ProviderError::EmptyCompletion
                }
                Ok(completion) => {
                    if attempt > 1 {
                        debug!(attempt, "provider call succeeded after retries");
                    }
                    return Ok(completion);
                }
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::Fatal => {
                    warn!(error = %err, attempt, "fatal provider error, not retrying");
                    return Err(err.into());
                }
                ErrorClass::Retryable if attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_after(attempt);
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retryable provider error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                ErrorClass::Retryable => {
                    let status = err.status();
                    return Err(GatewayError::Upstream {
                        status,
                        message: format!(
                            "provider call failed after {} attempts: {err}",
                            self.policy.max_attempts
                        ),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "sys".into(),
            user_prompt: "user".into(),
            max_output_tokens: 64,
            temperature: 0.7,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    /// Fails with the scripted error until `fail_for` calls have happened,
    /// then succeeds.
    struct ScriptedProvider {
        calls: AtomicU32,
        fail_for: u32,
        error: fn() -> ProviderError,
        success_text: &'static str,
    }

    impl ScriptedProvider {
        fn new(fail_for: u32, error: fn() -> ProviderError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_for,
                error,
                success_text: "{\"headline\":\"ok\"}",
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<Completion, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_for {
                Err((self.error)())
            } else {
                Ok(Completion {
                    text: self.success_text.to_string(),
                    total_tokens: Some(100),
                })
            }
        }
    }

    fn server_error() -> ProviderError {
        ProviderError::Http {
            status: 503,
            message: "unavailable".into(),
        }
    }

    fn auth_error() -> ProviderError {
        ProviderError::Http {
            status: 401,
            message: "bad key".into(),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success_does_not_retry() {
        let provider = Arc::new(ScriptedProvider::new(0, server_error));
        let invoker = ResilientInvoker::new(provider.clone(), fast_policy(3));
        let completion = invoker.invoke(&request()).await.unwrap();
        assert_eq!(completion.total_tokens, Some(100));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_to_success() {
        let provider = Arc::new(ScriptedProvider::new(2, server_error));
        let invoker = ResilientInvoker::new(provider.clone(), fast_policy(3));
        assert!(invoker.invoke(&request()).await.is_ok());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_upstream_error() {
        let provider = Arc::new(ScriptedProvider::new(u32::MAX, server_error));
        let invoker = ResilientInvoker::new(provider.clone(), fast_policy(3));
        let err = invoker.invoke(&request()).await.unwrap_err();
        match err {
            GatewayError::Upstream { status, message } => {
                assert_eq!(status, Some(503));
                assert!(message.contains("3 attempts"), "{message}");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_client_error_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new(u32::MAX, auth_error));
        let invoker = ResilientInvoker::new(provider.clone(), fast_policy(3));
        let err = invoker.invoke(&request()).await.unwrap_err();
        match err {
            GatewayError::Upstream { status, message } => {
                assert_eq!(status, Some(401));
                assert!(message.contains("bad key"), "{message}");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
        assert_eq!(provider.calls(), 1, "4xx must not be retried");
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let provider = Arc::new(ScriptedProvider::new(1, || {
            ProviderError::Timeout(Duration::from_secs(60))
        }));
        let invoker = ResilientInvoker::new(provider.clone(), fast_policy(3));
        assert!(invoker.invoke(&request()).await.is_ok());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_success_body_is_fatal() {
        struct EmptyProvider {
            calls: AtomicU32,
        }

        #[async_trait]
        impl LlmProvider for EmptyProvider {
            fn name(&self) -> &str {
                "empty"
            }
            async fn complete(
                &self,
                _request: &CompletionRequest,
            ) -> std::result::Result<Completion, ProviderError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Completion {
                    text: "   ".into(),
                    total_tokens: None,
                })
            }
        }

        let provider = Arc::new(EmptyProvider {
            calls: AtomicU32::new(0),
        });
        let invoker = ResilientInvoker::new(provider.clone(), fast_policy(3));
        let err = invoker.invoke(&request()).await.unwrap_err();
        assert!(
            matches!(err, GatewayError::Upstream { status: None, .. }),
            "got {err:?}"
        );
        assert_eq!(
            provider.calls.load(Ordering::SeqCst),
            1,
            "malformed success must not be retried"
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff_after(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_after(4), Duration::from_secs(5), "capped");
    }

    #[test]
    fn test_default_policy_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let provider = Arc::new(ScriptedProvider::new(0, server_error));
        let invoker = ResilientInvoker::new(provider, fast_policy(0));
        assert_eq!(invoker.policy.max_attempts, 1);
    }
}
