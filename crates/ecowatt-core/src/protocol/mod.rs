// ============================================
// File: crates/ecowatt-core/src/protocol/mod.rs
// ============================================
//! # Device Protocol
//!
//! ## Creation Reason
//! Defines the two wire formats a device and the cloud exchange: the
//! secured JSON envelope (and its header-auth sibling for GETs), and
//! the packed binary telemetry samples carried inside uploads.
//!
//! ## Main Functionality
//! - [`envelope`]: [`SecureEnvelope`], seal/open, MAC input builders
//! - [`telemetry`]: 9-byte little-endian sample codec
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol module

pub mod envelope;
pub mod telemetry;

pub use envelope::{
    compute_header_mac, decode_envelope_payload, envelope_mac_input, header_mac_input,
    open_envelope, seal_envelope, verify_envelope_mac, OpenOutcome, SecureEnvelope,
};
pub use telemetry::{decode_samples, encode_samples, TelemetrySample, SAMPLE_WIRE_SIZE};
