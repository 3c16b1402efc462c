//! LLM provider boundary.
//!
//! The gateway sees a single `complete()` call and a tagged error type.
//! Retry classification works off [`ProviderError`] variants and structured
//! status codes, never off message strings.

pub mod http;
pub mod retry;

pub use http::HttpProvider;
pub use retry::{ResilientInvoker, RetryPolicy};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::GatewayError;

/// One completion request as the gateway hands it to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Total prompt size in characters, for cost estimation.
    pub fn prompt_chars(&self) -> usize {
        self.system_prompt.len() + self.user_prompt.len()
    }
}

/// A successful provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Provider-reported total token consumption, when available.
    pub total_tokens: Option<u64>,
}

/// Provider-level failures, tagged for retry classification.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Non-2xx HTTP response. 4xx means the request itself is wrong and
    /// retrying cannot fix it; 5xx is the upstream's problem.
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection-level failure (refused, reset, DNS).
    #[error("provider transport failure: {0}")]
    Transport(String),

    /// The request exceeded the long-call budget.
    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport succeeded but the payload carried no completion text.
    /// The upstream contract was violated, so retrying is pointless.
    #[error("provider returned an empty completion body")]
    EmptyCompletion,

    /// The response body was not decodable at all.
    #[error("provider response was malformed: {0}")]
    Malformed(String),
}

/// Retry classification for a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

impl ProviderError {
    /// 5xx, timeouts, and transport failures are retryable; 4xx and
    /// malformed successes short-circuit.
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Http { status, .. } if (500..=599).contains(status) => {
                ErrorClass::Retryable
            }
            ProviderError::Http { .. } => ErrorClass::Fatal,
            ProviderError::Transport(_) | ProviderError::Timeout(_) => ErrorClass::Retryable,
            ProviderError::EmptyCompletion | ProviderError::Malformed(_) => ErrorClass::Fatal,
        }
    }

    /// The HTTP status carried by this failure, when one was observed.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        GatewayError::Upstream {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

/// The external language-model provider, as seen by the gateway.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError>;
}
