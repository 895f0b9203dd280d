// ============================================
// File: crates/ecowatt-server/src/sink.rs
// ============================================
//! # Downstream Telemetry Sink
//!
//! ## Creation Reason
//! Flushed telemetry summaries are pushed to a downstream consumer
//! (dashboarding pipeline) the core depends on but does not own.
//! Delivery is best-effort by contract: the locally committed flush
//! record is the system of record, so a sink failure is logged and
//! swallowed — no retry, no data loss.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The HTTP client carries a short request timeout. The scheduler
//!   loop awaits deliveries inline; without the timeout a dead sink
//!   would stall flushes for every other device.
//!
//! ## Last Modified
//! v0.1.0 - Initial sink client

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::services::telemetry::FlushSummary;

/// Sink delivery failure. Never fatal to the caller.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("sink returned status {0}")]
    Status(u16),
}

/// Destination for flushed telemetry summaries.
///
/// Behind a trait so tests and sink-less deployments swap the HTTP
/// client out without touching the scheduler.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Delivers one flush summary, bounded by the sink's timeout.
    async fn deliver(&self, summary: &FlushSummary) -> Result<(), SinkError>;
}

// ============================================
// HttpSink
// ============================================

/// POSTs each summary as JSON to a configured URL.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    /// Creates a sink with a per-request timeout.
    #[must_use]
    pub fn new(url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, url }
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn deliver(&self, summary: &FlushSummary) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(summary).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        debug!(
            device_id = %summary.device_id,
            status = status.as_u16(),
            "Flush delivered downstream"
        );
        Ok(())
    }
}

// ============================================
// NullSink
// ============================================

/// Sink used when no downstream URL is configured.
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn deliver(&self, summary: &FlushSummary) -> Result<(), SinkError> {
        debug!(device_id = %summary.device_id, "No sink configured, flush kept locally only");
        Ok(())
    }
}
