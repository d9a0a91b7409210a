//! Adapter for OpenAI-compatible `/chat/completions` endpoints.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// A single-shot chat completion provider. No retries at this layer.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// =============================================================================
// ADAPTER
// =============================================================================

pub const DEFAULT_BASE_URL: &str = "https://llmfoundry.straive.com/openai/v1";

const PROVIDER: &str = "chat_completions";

/// Maximum allowed response content length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input size in bytes of message content (~125k tokens).
const MAX_INPUT_BYTES: usize = 500_000;

/// HTTP adapter for an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct ChatCompletionsAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl ChatCompletionsAdapter {
    /// Create from API key with the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(60))
    }

    /// Create from environment variables.
    ///
    /// `CABINET_API_KEY` is required; `CABINET_BASE_URL` and
    /// `CABINET_TIMEOUT_SECONDS` are optional.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("CABINET_API_KEY")
            .map_err(|_| ProviderError::config("CABINET_API_KEY not set"))?;

        let base_url =
            std::env::var("CABINET_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("CABINET_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        Self::with_config(api_key, base_url, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Retry-After in delta-seconds form. HTTP-date values are ignored.
    fn extract_retry_after(headers: &HeaderMap) -> Option<Duration> {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }

    /// Map a non-2xx status onto the failure taxonomy.
    fn status_error(model: &str, status: u16, message: String, ctx: ErrorContext) -> ProviderError {
        match status {
            404 => ProviderError::NotFound {
                model: model.to_string(),
                message: if message.is_empty() {
                    "Model not found".to_string()
                } else {
                    message
                },
                context: Some(ctx),
            },
            429 => ProviderError::rate_limited(ctx.retry_after, ctx),
            500 | 502 | 503 | 504 => {
                ProviderError::provider_with_context(PROVIDER, message, true, ctx)
            }
            _ => ProviderError::provider_with_context(PROVIDER, message, false, ctx),
        }
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for ChatCompletionsAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let total_bytes: usize = req.messages.iter().map(|m| m.content.len()).sum();
        if total_bytes > MAX_INPUT_BYTES {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_bytes} bytes (max {MAX_INPUT_BYTES})"
            )));
        }

        let start = Instant::now();

        let api_req = ChatApiRequest {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let mut response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let retry_after = Self::extract_retry_after(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    PROVIDER,
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        let mut ctx = ErrorContext::new().with_status(status.as_u16());
        if let Some(id) = &request_id {
            ctx = ctx.with_request_id(id);
        }
        if let Some(delay) = retry_after {
            ctx = ctx.with_retry_after(delay);
        }

        if !status.is_success() {
            let mut message = format!("HTTP {}", status.as_u16());
            if let Ok(parsed) = serde_json::from_str::<ChatApiResponse>(&body) {
                if let Some(error) = parsed.error {
                    if let Some(m) = error.message.filter(|m| !m.is_empty()) {
                        message = m;
                    }
                    if let Some(code) = error.code {
                        let code = match code {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        ctx = ctx.with_code(code);
                    }
                }
            }
            return Err(Self::status_error(&req.model, status.as_u16(), message, ctx));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider_with_context(PROVIDER, format!("Invalid JSON: {e}"), false, ctx.clone())
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            return Err(ProviderError::provider_with_context(PROVIDER, message, false, ctx));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider(PROVIDER, "No choices in response", false))?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_accepts_fractional_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(
            ChatCompletionsAdapter::extract_retry_after(&headers),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn oversized_retry_after_saturates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("99999999999999999999999"),
        );
        assert_eq!(
            ChatCompletionsAdapter::extract_retry_after(&headers),
            Some(Duration::MAX)
        );

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e400"));
        assert_eq!(ChatCompletionsAdapter::extract_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn input_limit_counts_bytes() {
        let adapter =
            ChatCompletionsAdapter::with_config("sk", "http://127.0.0.1:9", Duration::from_secs(1))
                .unwrap();
        // Two bytes per char: under the limit in chars, over it in bytes.
        let content = "é".repeat(MAX_INPUT_BYTES / 2 + 1);
        let req = ChatRequest::new("m", vec![Message::user(content)], Attribution::new("test"));
        let err = adapter.chat(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    }

    #[test]
    fn retry_after_ignores_http_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(ChatCompletionsAdapter::extract_retry_after(&headers), None);
    }

    #[test]
    fn status_mapping_covers_taxonomy() {
        use crate::gateway::ErrorClass;

        let class = |status| {
            ChatCompletionsAdapter::status_error("m", status, String::new(), ErrorContext::new())
                .class()
        };
        assert_eq!(class(404), ErrorClass::NotFound);
        assert_eq!(class(429), ErrorClass::Transient);
        for s in [500, 502, 503, 504] {
            assert_eq!(class(s), ErrorClass::Transient);
        }
        assert_eq!(class(400), ErrorClass::Unclassified);
        assert_eq!(class(401), ErrorClass::Unclassified);
        assert_eq!(class(501), ErrorClass::Unclassified);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let adapter =
            ChatCompletionsAdapter::with_config("sk", "http://localhost:1/v1/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(adapter.chat_url(), "http://localhost:1/v1/chat/completions");
    }
}
