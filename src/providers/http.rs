//! HTTP provider speaking the OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{Completion, CompletionRequest, LlmProvider, ProviderError};

/// Long-call budget for one provider request. Materially longer than
/// ordinary CRUD timeouts because completions routinely take tens of
/// seconds.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider client for any OpenAI-compatible chat completions endpoint.
pub struct HttpProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
    timeout: Duration,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self::with_timeout(base_url, api_key, model, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a provider whose long-call budget comes from the gateway
    /// config instead of the built-in default.
    pub fn from_config(
        config: &crate::config::GatewayConfig,
        base_url: &str,
        api_key: &str,
        model: &str,
    ) -> Self {
        Self::with_timeout(base_url, api_key, model, config.provider_timeout())
    }

    pub fn with_timeout(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout,
        }
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt }
            ],
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature
        })
    }

    /// Pull the completion text out of a chat completions response.
    fn extract_text(response: &Value) -> Option<String> {
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .filter(|text| !text.trim().is_empty())
    }

    /// Provider-reported total token count, when present.
    fn extract_total_tokens(response: &Value) -> Option<u64> {
        response["usage"]["total_tokens"].as_u64()
    }

    /// Pull a useful message out of an error body, falling back to the raw
    /// text when the body is not the usual `{"error":{"message":...}}`.
    fn extract_error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| body.to_string())
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        "http-chat"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        debug!(model = %self.model, "provider request");

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: Self::extract_error_message(&body),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let text = Self::extract_text(&body).ok_or(ProviderError::EmptyCompletion)?;
        Ok(Completion {
            text,
            total_tokens: Self::extract_total_tokens(&body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> HttpProvider {
        HttpProvider::new("https://api.example.com/v1/", "test-key", "advisor-large")
    }

    #[test]
    fn test_from_config_uses_configured_timeout() {
        let config = crate::config::GatewayConfig {
            provider_timeout_secs: 120,
            ..crate::config::GatewayConfig::default()
        };
        let provider =
            HttpProvider::from_config(&config, "https://api.example.com/v1", "k", "m");
        assert_eq!(provider.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_new_uses_default_timeout() {
        assert_eq!(provider().timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_api_url_strips_trailing_slash() {
        assert_eq!(provider().api_url(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_build_body_shape() {
        let body = provider().build_body(&CompletionRequest {
            system_prompt: "be brief".into(),
            user_prompt: "plan my week".into(),
            max_output_tokens: 512,
            temperature: 0.4,
        });
        assert_eq!(body["model"], "advisor-large");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn test_extract_text_normal_response() {
        let response = json!({
            "choices": [{ "message": { "content": "do the thing" } }]
        });
        assert_eq!(
            HttpProvider::extract_text(&response).as_deref(),
            Some("do the thing")
        );
    }

    #[test]
    fn test_extract_text_empty_content_is_none() {
        let response = json!({
            "choices": [{ "message": { "content": "   " } }]
        });
        assert!(HttpProvider::extract_text(&response).is_none());
    }

    #[test]
    fn test_extract_text_missing_choices_is_none() {
        assert!(HttpProvider::extract_text(&json!({})).is_none());
    }

    #[test]
    fn test_extract_total_tokens() {
        let response = json!({ "usage": { "total_tokens": 321 } });
        assert_eq!(HttpProvider::extract_total_tokens(&response), Some(321));
        assert_eq!(HttpProvider::extract_total_tokens(&json!({})), None);
    }

    #[test]
    fn test_extract_error_message_from_structured_body() {
        let body = r#"{"error":{"message":"invalid api key"}}"#;
        assert_eq!(HttpProvider::extract_error_message(body), "invalid api key");
    }

    #[test]
    fn test_extract_error_message_falls_back_to_raw() {
        assert_eq!(
            HttpProvider::extract_error_message("<html>bad gateway</html>"),
            "<html>bad gateway</html>"
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", provider());
        assert!(!rendered.contains("test-key"), "{rendered}");
        assert!(rendered.contains("[REDACTED]"), "{rendered}");
    }
}
