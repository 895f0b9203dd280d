// ============================================
// File: crates/ecowatt-core/src/protocol/telemetry.rs
// ============================================
//! # Binary Telemetry Sample Codec
//!
//! ## Creation Reason
//! Devices upload telemetry as a packed sequence of fixed-width
//! samples to keep airtime on the constrained link low. This module
//! decodes (and, for tooling and tests, encodes) that format.
//!
//! ## Wire Format
//! Each sample is 9 bytes, little-endian:
//! ```text
//! ┌──────────────────┬───────────────┬──────────────────┐
//! │ timestamp (u32)  │ reg_addr (u8) │ value (f32)      │
//! │ 4 bytes LE       │ 1 byte        │ 4 bytes LE       │
//! └──────────────────┴───────────────┴──────────────────┘
//! ```
//!
//! ## Parsing Strategy
//! Decoding is greedy: samples are consumed while at least 9 bytes
//! remain, and a trailing partial sample is silently dropped. Partial
//! data is preferable to total data loss for a lossy telemetry
//! stream, so truncation is never an error here.
//!
//! ## Last Modified
//! v0.1.0 - Initial sample codec

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

/// Wire size of a single sample in bytes.
pub const SAMPLE_WIRE_SIZE: usize = 4 + 1 + 4;

/// One decoded telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Device-side capture time, unix seconds.
    pub timestamp: u32,
    /// Register address the value was read from.
    pub reg_addr: u8,
    /// Observed register value.
    pub value: f32,
}

/// Decodes a packed upload payload into samples, greedily.
///
/// Consumes complete 9-byte records while they remain; any trailing
/// partial sample is dropped without error.
#[must_use]
pub fn decode_samples(data: &[u8]) -> Vec<TelemetrySample> {
    let mut buf = data;
    let mut samples = Vec::with_capacity(data.len() / SAMPLE_WIRE_SIZE);

    while buf.remaining() >= SAMPLE_WIRE_SIZE {
        let timestamp = buf.get_u32_le();
        let reg_addr = buf.get_u8();
        let value = buf.get_f32_le();
        samples.push(TelemetrySample {
            timestamp,
            reg_addr,
            value,
        });
    }

    samples
}

/// Encodes samples into the packed wire format.
///
/// The server never uploads telemetry itself; this exists for test
/// fixtures and operational tooling that simulate a device.
#[must_use]
pub fn encode_samples(samples: &[TelemetrySample]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(samples.len() * SAMPLE_WIRE_SIZE);
    for sample in samples {
        buf.put_u32_le(sample.timestamp);
        buf.put_u8(sample.reg_addr);
        buf.put_f32_le(sample.value);
    }
    buf.to_vec()
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: u32, reg: u8, value: f32) -> TelemetrySample {
        TelemetrySample {
            timestamp: ts,
            reg_addr: reg,
            value,
        }
    }

    #[test]
    fn test_roundtrip() {
        let original = vec![
            sample(1_718_000_000, 0, 230.5),
            sample(1_718_000_001, 5, 12.0),
            sample(1_718_000_002, 9, -3.25),
        ];

        let encoded = encode_samples(&original);
        assert_eq!(encoded.len(), 3 * SAMPLE_WIRE_SIZE);

        let decoded = decode_samples(&encoded);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_trailing_partial_sample_dropped() {
        let mut encoded = encode_samples(&[sample(100, 1, 1.0), sample(101, 2, 2.0)]);
        // Append 5 stray bytes - less than one full sample
        encoded.extend_from_slice(&[0xAA; 5]);

        let decoded = decode_samples(&encoded);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].reg_addr, 2);
    }

    #[test]
    fn test_short_payload_yields_nothing() {
        assert!(decode_samples(&[]).is_empty());
        assert!(decode_samples(&[0x01; SAMPLE_WIRE_SIZE - 1]).is_empty());
    }

    #[test]
    fn test_little_endian_layout() {
        let encoded = encode_samples(&[sample(0x0102_0304, 0x05, 1.0)]);
        // u32 LE
        assert_eq!(&encoded[..4], &[0x04, 0x03, 0x02, 0x01]);
        // register byte
        assert_eq!(encoded[4], 0x05);
        // f32 1.0 LE
        assert_eq!(&encoded[5..9], &1.0f32.to_le_bytes());
    }
}
