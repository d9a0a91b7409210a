//! Provider gateway for chat completions.
//!
//! `ChatGateway` is the capability the orchestrator depends on: one model,
//! one message list, text back or a classified `ProviderError`. The
//! `ProviderGateway` implementation retries transient and network failures
//! against the same model; crossing to another model is the caller's job.

pub mod chat_completions;
pub mod error;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;

use chat_completions::{ChatCompletionsAdapter, ChatProvider};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorClass, ErrorContext, ProviderError};
pub use types::*;
pub use usage::{NoopUsageSink, StderrUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Extra attempts allowed per failure class (transient and network
    /// failures are counted separately).
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Upper bound of the uniform jitter added to every backoff.
    pub max_jitter: Duration,
    /// Cap applied to a provider's `Retry-After` hint.
    pub max_retry_after: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `CABINET_API_MAX_RETRIES` and
    /// `CABINET_API_BACKOFF` (seconds, fractional allowed).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = std::env::var("CABINET_API_MAX_RETRIES")
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            config.max_retries = n;
        }
        if let Some(delay) = std::env::var("CABINET_API_BACKOFF")
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            config.retry_base_delay = delay;
        }
        config
    }

    /// Delay before retry number `retry` (1-based).
    fn retry_delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = backoff_delay(self.retry_base_delay, retry);
        let floor = retry_after.map_or(backoff, |ra| ra.min(self.max_retry_after).max(backoff));
        floor.saturating_add(jitter(self.max_jitter))
    }
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    adapter: ChatCompletionsAdapter,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let adapter = ChatCompletionsAdapter::from_env()?;
        Ok(Self {
            adapter,
            usage_sink,
            config: GatewayConfig::from_env(),
        })
    }

    pub fn with_config(
        adapter: ChatCompletionsAdapter,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            adapter,
            usage_sink,
            config,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut transient_retries = 0u32;
        let mut network_retries = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let start = Instant::now();
            match self.adapter.chat(&req).await {
                Ok(resp) => {
                    let record = self
                        .base_record(&req, attempt, start)
                        .tokens(resp.input_tokens, resp.output_tokens);
                    self.usage_sink.record(record).await;
                    return Ok(resp);
                }
                Err(err) => {
                    let record = self.base_record(&req, attempt, start).error(err.code());
                    self.usage_sink.record(record).await;

                    let retries = match err.class() {
                        ErrorClass::Transient => &mut transient_retries,
                        ErrorClass::Network => &mut network_retries,
                        ErrorClass::NotFound | ErrorClass::Unclassified => return Err(err),
                    };
                    if *retries >= self.config.max_retries {
                        return Err(err);
                    }
                    *retries += 1;

                    let delay = self.config.retry_delay(*retries, err.retry_after());
                    tracing::debug!(
                        model = %req.model,
                        class = %err.class(),
                        retry = *retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn base_record(&self, req: &ChatRequest, attempt: u32, start: Instant) -> ProviderCallRecord {
        ProviderCallRecord::new(req.model.clone(), req.attribution.caller)
            .run(req.attribution.run_id)
            .attempt(attempt)
            .latency(start.elapsed().as_millis() as u64)
    }
}

/// `base * 2^(retry-1)`, exponent capped at 5.
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(5);
    base.checked_mul(2u32.pow(exponent)).unwrap_or(Duration::MAX)
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
