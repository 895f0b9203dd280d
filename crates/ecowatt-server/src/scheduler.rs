// ============================================
// File: crates/ecowatt-server/src/scheduler.rs
// ============================================
//! # Background Flush Scheduler
//!
//! ## Creation Reason
//! The debounce contract needs something to notice that a device has
//! gone quiet. This is the only autonomously-running logic in the
//! server: one task, one-second cadence, sweeping the aggregator and
//! pushing whatever flushed to the downstream sink.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Sweeping and delivering are strictly sequential per tick but the
//!   sweep itself holds the buffer lock only while collecting; sink
//!   I/O happens entirely outside it. Keep it that way.
//! - Sink failures are logged and dropped — the flush record is
//!   already committed locally before delivery is attempted.
//!
//! ## Last Modified
//! v0.1.0 - Initial scheduler

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::services::telemetry::TelemetryAggregator;
use crate::sink::TelemetrySink;

/// Sweep cadence. The debounce window is measured in seconds, so a
/// one-second tick bounds flush lateness to under a tick.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns the flush sweep task.
///
/// Runs until a shutdown signal arrives on `shutdown_rx`.
pub fn spawn_flush_task(
    aggregator: Arc<TelemetryAggregator>,
    sink: Arc<dyn TelemetrySink>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        debug!("Flush scheduler started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Flush scheduler received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    let due = aggregator.sweep_due();
                    for summary in due {
                        if let Err(e) = sink.deliver(&summary).await {
                            // Best-effort by contract: the record is
                            // already committed locally.
                            error!(
                                device_id = %summary.device_id,
                                "Downstream delivery failed: {e}"
                            );
                        }
                    }
                }
            }
        }

        debug!("Flush scheduler exiting");
    })
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::sink::SinkError;
    use ecowatt_core::protocol::TelemetrySample;

    struct RecordingSink {
        delivered: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl TelemetrySink for RecordingSink {
        async fn deliver(
            &self,
            summary: &crate::services::telemetry::FlushSummary,
        ) -> Result<(), SinkError> {
            self.delivered.lock().push(summary.device_id.clone());
            if self.fail {
                Err(SinkError::Status(502))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_scheduler_delivers_due_flushes() {
        let aggregator = Arc::new(TelemetryAggregator::new(0));
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
            fail: false,
        });
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        aggregator.ingest_at(
            "dev",
            &[TelemetrySample {
                timestamp: 0,
                reg_addr: 1,
                value: 2.0,
            }],
            9,
            0,
        );

        let task = spawn_flush_task(
            Arc::clone(&aggregator),
            Arc::clone(&sink) as Arc<dyn TelemetrySink>,
            shutdown_rx,
        );

        // Zero debounce: the first tick flushes immediately.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(sink.delivered.lock().as_slice(), ["dev"]);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_kill_scheduler() {
        let aggregator = Arc::new(TelemetryAggregator::new(0));
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        });
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        aggregator.ingest_at(
            "dev",
            &[TelemetrySample {
                timestamp: 0,
                reg_addr: 1,
                value: 2.0,
            }],
            9,
            0,
        );

        let task = spawn_flush_task(
            Arc::clone(&aggregator),
            Arc::clone(&sink) as Arc<dyn TelemetrySink>,
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        // The failed delivery was attempted, the record kept, and the
        // task is still alive to accept the shutdown signal.
        assert_eq!(sink.delivered.lock().len(), 1);
        assert_eq!(aggregator.records().len(), 1);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
