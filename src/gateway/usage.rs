//! Usage tracking via the UsageSink trait.
//!
//! The gateway reports every attempt through a UsageSink, so the
//! orchestrator never needs to know where call records end up:
//! - the CLI uses StderrUsageSink when asked to, NoopUsageSink otherwise
//! - tests use NoopUsageSink or a collecting sink

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of a single provider attempt.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    /// Model requested.
    pub model: String,
    /// Which code path made this call.
    pub caller: &'static str,
    /// Answer run this call belongs to (if any).
    pub run_id: Option<Uuid>,
    /// 1-based attempt number within the gateway retry loop.
    pub attempt: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    pub fn new(model: impl Into<String>, caller: &'static str) -> Self {
        Self {
            model: model.into(),
            caller,
            run_id: None,
            attempt: 1,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn run(mut self, run_id: Option<Uuid>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }
}

/// Trait for recording provider call usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. Fire-and-forget: failures are not propagated.
    async fn record(&self, record: ProviderCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Usage sink that writes one JSON line per call to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrUsageSink;

#[async_trait]
impl UsageSink for StderrUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        let line = serde_json::json!({
            "ts": record.timestamp.to_rfc3339(),
            "model": record.model,
            "caller": record.caller,
            "run_id": record.run_id,
            "attempt": record.attempt,
            "tokens": record.input_tokens + record.output_tokens,
            "latency_ms": record.latency_ms,
            "status": record.status.as_str(),
            "error": record.error_code,
        });
        eprintln!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_marks_status() {
        let rec = ProviderCallRecord::new("m", "test")
            .attempt(3)
            .error("rate_limited");
        assert_eq!(rec.status, CallStatus::Error);
        assert_eq!(rec.error_code.as_deref(), Some("rate_limited"));
        assert_eq!(rec.attempt, 3);
    }
}
