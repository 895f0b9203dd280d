// ============================================
// File: crates/ecowatt-server/src/services/telemetry.rs
// ============================================
//! # Telemetry Aggregator
//!
//! ## Creation Reason
//! Devices upload bursts of samples over a lossy link; forwarding
//! every burst downstream would multiply traffic and defeat the
//! fleet's compression scheme. Instead, samples accumulate per device
//! and flush only after a fixed window of *inactivity* — the debounce
//! restarts on every upload.
//!
//! ## State Machine (per device)
//! ```text
//! IDLE ──ingest──► ACCUMULATING ──(debounce elapses, no new data)──► FLUSHING ──► IDLE
//!                      ▲  │
//!                      └──┘ every ingest restarts the timer
//! ```
//!
//! ## Flush Semantics
//! - one averaged sample per register (mean, 3 decimal places),
//!   stamped with the flush time — per-sample timestamps are gone
//!   once averaged
//! - aggregate min/avg/max over all raw values
//! - synthetic original size of 12 bytes per sample feeds the
//!   compression-ratio metric; ratio is "N/A" when zero bytes arrived
//! - the buffer is atomically replaced, with the flush time as the
//!   new inactivity baseline
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only the background scheduler calls [`TelemetryAggregator::sweep_due`];
//!   the request path must never flush, or the debounce contract with
//!   the benchmark tooling breaks.
//! - Keep critical sections short: the buffer lock is shared between
//!   every upload handler and the scheduler. Sink delivery happens
//!   strictly outside the lock.
//!
//! ## Last Modified
//! v0.1.0 - Initial aggregator

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use ecowatt_common::time::{iso_timestamp, unix_timestamp};
use ecowatt_core::protocol::TelemetrySample;

/// Synthetic per-sample size used for the compression-ratio metric.
/// Fixed convention shared with the device-side benchmark reports.
const UNCOMPRESSED_SAMPLE_SIZE: usize = 12;

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ============================================
// Buffer state
// ============================================

#[derive(Debug, Default)]
struct DeviceBuffer {
    /// register address → observed values, in arrival order.
    reg_values: BTreeMap<u8, Vec<f64>>,
    received_bytes: usize,
    last_seen: i64,
}

impl DeviceBuffer {
    fn has_samples(&self) -> bool {
        self.reg_values.values().any(|v| !v.is_empty())
    }
}

// ============================================
// Flush output
// ============================================

/// One averaged per-register sample in a flushed record.
#[derive(Debug, Clone, Serialize)]
pub struct AveragedSample {
    /// Flush time (unix seconds) — the original sample times are
    /// discarded once averaged.
    pub timestamp: i64,
    /// Register the values came from.
    pub reg_addr: u8,
    /// Arithmetic mean, rounded to 3 decimal places.
    pub value: f64,
}

/// Immutable record of one flush, kept in the append-only upload log.
#[derive(Debug, Clone, Serialize)]
pub struct FlushedRecord {
    /// ISO-8601 flush time.
    pub timestamp: String,
    /// Device the buffer belonged to.
    pub device_id: String,
    /// Raw bytes received since the previous flush.
    pub bytes: usize,
    /// One entry per register that had data.
    pub samples: Vec<AveragedSample>,
}

/// Compression ratio, or "N/A" when no bytes were received.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CompressionRatio {
    /// original / compressed, rounded to 2 decimal places.
    Value(f64),
    /// Ratio undefined for this flush.
    NotApplicable(&'static str),
}

/// Benchmark block pushed to the downstream sink with each flush.
#[derive(Debug, Clone, Serialize)]
pub struct FlushBenchmark {
    /// Aggregation method tag, derived from the debounce window.
    pub method: String,
    pub num_samples: usize,
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: CompressionRatio,
    /// Always false: these are aggregates, not raw samples.
    pub lossless_verified: bool,
    /// Not measured server-side.
    pub cpu_time_ms: Option<f64>,
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
}

/// The full payload delivered to the downstream sink per flush.
#[derive(Debug, Clone, Serialize)]
pub struct FlushSummary {
    pub device_id: String,
    /// ISO-8601 flush time.
    pub timestamp: String,
    pub benchmark: FlushBenchmark,
    /// The averaged values, register order.
    pub samples: Vec<f64>,
}

// ============================================
// TelemetryAggregator
// ============================================

/// Accumulates samples per device and flushes after inactivity.
pub struct TelemetryAggregator {
    buffers: Mutex<HashMap<String, DeviceBuffer>>,
    /// Append-only log of flushed records, served by `/api/uploads`.
    records: Mutex<Vec<FlushedRecord>>,
    /// Device-reported benchmark metadata (`/api/upload/meta`).
    benchmarks: Mutex<Vec<Value>>,
    debounce_secs: i64,
}

impl TelemetryAggregator {
    /// Creates an aggregator with the given debounce window.
    #[must_use]
    pub fn new(debounce_secs: i64) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
            benchmarks: Mutex::new(Vec::new()),
            debounce_secs,
        }
    }

    /// Accumulates decoded samples for a device.
    ///
    /// `raw_len` is the size of the raw upload body, counted even when
    /// it decoded to zero complete samples. Resets the device's
    /// inactivity clock — this IS the debounce.
    pub fn ingest(&self, device_id: &str, samples: &[TelemetrySample], raw_len: usize) {
        self.ingest_at(device_id, samples, raw_len, unix_timestamp());
    }

    /// [`Self::ingest`] with an explicit clock.
    pub fn ingest_at(
        &self,
        device_id: &str,
        samples: &[TelemetrySample],
        raw_len: usize,
        now: i64,
    ) {
        let mut buffers = self.buffers.lock();
        let buf = buffers.entry(device_id.to_string()).or_default();

        for sample in samples {
            buf.reg_values
                .entry(sample.reg_addr)
                .or_default()
                .push(round3(f64::from(sample.value)));
        }
        buf.received_bytes += raw_len;
        buf.last_seen = now;

        debug!(
            device_id = %device_id,
            samples = samples.len(),
            bytes = raw_len,
            "Telemetry buffered"
        );
    }

    /// Flushes every device that has been idle past the debounce
    /// window, returning the summaries to deliver downstream.
    ///
    /// Called only by the background scheduler.
    pub fn sweep_due(&self) -> Vec<FlushSummary> {
        self.sweep_due_at(unix_timestamp())
    }

    /// [`Self::sweep_due`] with an explicit clock.
    pub fn sweep_due_at(&self, now: i64) -> Vec<FlushSummary> {
        let mut flushed = Vec::new();
        {
            let mut buffers = self.buffers.lock();
            for (device_id, buf) in buffers.iter_mut() {
                let idle = now - buf.last_seen;
                if idle < self.debounce_secs {
                    continue;
                }
                if !buf.has_samples() && buf.received_bytes == 0 {
                    continue;
                }
                if let Some(out) = Self::flush_buffer(device_id, buf, now, self.debounce_secs) {
                    flushed.push(out);
                }
            }
        }

        let mut summaries = Vec::with_capacity(flushed.len());
        if !flushed.is_empty() {
            let mut records = self.records.lock();
            for (record, summary) in flushed {
                records.push(record);
                summaries.push(summary);
            }
        }
        summaries
    }

    /// Flushes one buffer in place. Returns `None` when there was
    /// nothing to average — the buffer is still normalized (byte
    /// counter reset) but no record is produced and the inactivity
    /// baseline is left untouched.
    fn flush_buffer(
        device_id: &str,
        buf: &mut DeviceBuffer,
        now: i64,
        debounce_secs: i64,
    ) -> Option<(FlushedRecord, FlushSummary)> {
        if !buf.has_samples() {
            *buf = DeviceBuffer {
                last_seen: buf.last_seen,
                ..DeviceBuffer::default()
            };
            return None;
        }

        let received_bytes = buf.received_bytes;
        let flush_time = iso_timestamp();

        let mut averaged = Vec::new();
        let mut values_flat = Vec::new();
        for (reg, values) in &buf.reg_values {
            if values.is_empty() {
                continue;
            }
            let avg = values.iter().sum::<f64>() / values.len() as f64;
            values_flat.extend_from_slice(values);
            averaged.push(AveragedSample {
                timestamp: now,
                reg_addr: *reg,
                value: round3(avg),
            });
        }

        let record = FlushedRecord {
            timestamp: flush_time.clone(),
            device_id: device_id.to_string(),
            bytes: received_bytes,
            samples: averaged.clone(),
        };

        let num_samples = averaged.len();
        let original_size = num_samples * UNCOMPRESSED_SAMPLE_SIZE;
        let compression_ratio = if received_bytes > 0 {
            CompressionRatio::Value(round2(original_size as f64 / received_bytes as f64))
        } else {
            CompressionRatio::NotApplicable("N/A")
        };
        let min = values_flat.iter().copied().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |m| m.min(v)))
        });
        let max = values_flat.iter().copied().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |m| m.max(v)))
        });
        let avg = if values_flat.is_empty() {
            None
        } else {
            Some(round2(
                values_flat.iter().sum::<f64>() / values_flat.len() as f64,
            ))
        };

        let summary = FlushSummary {
            device_id: device_id.to_string(),
            timestamp: flush_time,
            benchmark: FlushBenchmark {
                method: format!("delta-avg-{debounce_secs}s-inactivity"),
                num_samples,
                original_size,
                compressed_size: received_bytes,
                compression_ratio,
                lossless_verified: false,
                cpu_time_ms: None,
                min,
                avg,
                max,
            },
            samples: averaged.iter().map(|s| s.value).collect(),
        };

        // New inactivity baseline starts at the flush.
        *buf = DeviceBuffer {
            last_seen: now,
            ..DeviceBuffer::default()
        };

        debug!(
            device_id = %device_id,
            registers = num_samples,
            bytes = received_bytes,
            "Buffer flushed"
        );

        Some((record, summary))
    }

    /// Snapshot of all flushed records.
    #[must_use]
    pub fn records(&self) -> Vec<FlushedRecord> {
        self.records.lock().clone()
    }

    /// Stores a device-reported benchmark record.
    pub fn push_benchmark(&self, meta: Value) {
        self.benchmarks.lock().push(meta);
    }

    /// Snapshot of device-reported benchmark records.
    #[must_use]
    pub fn benchmarks(&self) -> Vec<Value> {
        self.benchmarks.lock().clone()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_718_000_000;
    const DEBOUNCE: i64 = 15;

    fn sample(reg: u8, value: f32) -> TelemetrySample {
        TelemetrySample {
            timestamp: NOW as u32,
            reg_addr: reg,
            value,
        }
    }

    fn aggregator() -> TelemetryAggregator {
        TelemetryAggregator::new(DEBOUNCE)
    }

    #[test]
    fn test_average_of_two_samples() {
        let agg = aggregator();
        agg.ingest_at("dev", &[sample(5, 12.0), sample(5, 14.0)], 18, NOW);

        let summaries = agg.sweep_due_at(NOW + DEBOUNCE);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].samples, vec![13.0]);

        let records = agg.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].samples.len(), 1);
        assert_eq!(records[0].samples[0].reg_addr, 5);
        assert_eq!(records[0].samples[0].value, 13.0);
        assert_eq!(records[0].bytes, 18);
    }

    #[test]
    fn test_debounce_restarts_on_every_ingest() {
        let agg = aggregator();
        agg.ingest_at("dev", &[sample(1, 1.0)], 9, NOW);
        // Second upload 10s later - inside the window, restarts it.
        agg.ingest_at("dev", &[sample(1, 3.0)], 9, NOW + 10);

        // 15s after the FIRST upload: only 5s idle, no flush.
        assert!(agg.sweep_due_at(NOW + DEBOUNCE).is_empty());

        // 15s after the second upload: flush, averaging both.
        let summaries = agg.sweep_due_at(NOW + 10 + DEBOUNCE);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].samples, vec![2.0]);
    }

    #[test]
    fn test_no_flush_before_window_elapses() {
        let agg = aggregator();
        agg.ingest_at("dev", &[sample(1, 1.0)], 9, NOW);
        assert!(agg.sweep_due_at(NOW + DEBOUNCE - 1).is_empty());
        assert_eq!(agg.sweep_due_at(NOW + DEBOUNCE).len(), 1);
    }

    #[test]
    fn test_flush_resets_baseline_not_reflush() {
        let agg = aggregator();
        agg.ingest_at("dev", &[sample(1, 1.0)], 9, NOW);

        assert_eq!(agg.sweep_due_at(NOW + DEBOUNCE).len(), 1);
        // Buffer is empty now: further sweeps are no-ops.
        assert!(agg.sweep_due_at(NOW + DEBOUNCE * 2).is_empty());
        assert_eq!(agg.records().len(), 1);
    }

    #[test]
    fn test_empty_buffer_normalizes_without_record() {
        let agg = aggregator();
        // Truncated upload: bytes arrived, zero complete samples.
        agg.ingest_at("dev", &[], 5, NOW);

        let summaries = agg.sweep_due_at(NOW + DEBOUNCE);
        assert!(summaries.is_empty());
        assert!(agg.records().is_empty());

        // Byte counter was reset: the stale 5 bytes must not leak
        // into a later flush's compression ratio.
        agg.ingest_at("dev", &[sample(1, 2.0)], 9, NOW + 20);
        let summaries = agg.sweep_due_at(NOW + 20 + DEBOUNCE);
        assert_eq!(summaries[0].benchmark.compressed_size, 9);
    }

    #[test]
    fn test_per_register_averages_and_aggregates() {
        let agg = aggregator();
        agg.ingest_at(
            "dev",
            &[sample(2, 10.0), sample(7, 30.0), sample(2, 20.0)],
            27,
            NOW,
        );

        let summaries = agg.sweep_due_at(NOW + DEBOUNCE);
        let b = &summaries[0].benchmark;

        // Registers are emitted in address order.
        assert_eq!(summaries[0].samples, vec![15.0, 30.0]);
        assert_eq!(b.num_samples, 2);
        assert_eq!(b.original_size, 2 * 12);
        assert_eq!(b.compressed_size, 27);
        assert_eq!(b.min, Some(10.0));
        assert_eq!(b.max, Some(30.0));
        assert_eq!(b.avg, Some(20.0));
        assert!(matches!(b.compression_ratio, CompressionRatio::Value(r) if (r - 0.89).abs() < 1e-9));
        assert_eq!(b.method, "delta-avg-15s-inactivity");
    }

    #[test]
    fn test_values_rounded_to_three_decimals() {
        let agg = aggregator();
        agg.ingest_at("dev", &[sample(1, 1.0001), sample(1, 1.0002)], 18, NOW);

        let summaries = agg.sweep_due_at(NOW + DEBOUNCE);
        // Both inputs round to 1.0 at ingest; the mean stays 1.0.
        assert_eq!(summaries[0].samples, vec![1.0]);
    }

    #[test]
    fn test_devices_flush_independently() {
        let agg = aggregator();
        agg.ingest_at("a", &[sample(1, 1.0)], 9, NOW);
        agg.ingest_at("b", &[sample(1, 2.0)], 9, NOW + 10);

        let summaries = agg.sweep_due_at(NOW + DEBOUNCE);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].device_id, "a");

        let summaries = agg.sweep_due_at(NOW + 10 + DEBOUNCE);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].device_id, "b");
    }

    #[test]
    fn test_compression_ratio_serializes_na() {
        let ratio = CompressionRatio::NotApplicable("N/A");
        assert_eq!(serde_json::to_string(&ratio).unwrap(), "\"N/A\"");

        let ratio = CompressionRatio::Value(1.33);
        assert_eq!(serde_json::to_string(&ratio).unwrap(), "1.33");
    }

    #[test]
    fn test_benchmark_store() {
        let agg = aggregator();
        agg.push_benchmark(serde_json::json!({"compression_method": "delta"}));
        assert_eq!(agg.benchmarks().len(), 1);
    }
}
