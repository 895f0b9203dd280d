// ============================================
// File: crates/ecowatt-core/src/lib.rs
// ============================================
//! # EcoWatt Core - Protocol & Cryptography Library
//!
//! ## Creation Reason
//! Provides the pure, stateless half of the device protocol: the
//! secured message envelope, the header-auth MAC construction, the
//! binary telemetry sample codec, and the keyed-hash primitives they
//! share. Everything stateful (nonce registries, buffers, firmware
//! tables) lives in `ecowatt-server`; this crate must stay free of
//! I/O and global state so its behavior is fully test-vector driven.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - [`protocol::SecureEnvelope`]: the authenticated message wrapper
//! - Seal/open operations and the exact MAC input concatenations
//! - Binary telemetry sample codec (9-byte little-endian records)
//!
//! ### Crypto Module ([`crypto`])
//! - Key types ([`crypto::PresharedKey`], [`crypto::ChunkKey`])
//! - HMAC-SHA256 / SHA-256 hex helpers with constant-time verification
//!
//! ## Security Guarantees
//! - **Integrity**: HMAC-SHA256 over a fixed field concatenation
//! - **Replay Protection**: monotonic nonces, validated by the server's
//!   session registry (not this crate)
//! - **Confidentiality**: none — the `encrypted` flag only gates a
//!   base64 encoding step, by contract with the deployed fleet
//!
//! ## ⚠️ Important Note for Next Developer
//! - The MAC input orderings in [`protocol::envelope`] are a wire
//!   contract with firmware in the field. Changing field order breaks
//!   verification parity with every deployed device.
//! - ALL keyed hashing uses audited RustCrypto implementations; never
//!   hand-roll a compare — use the constant-time helpers in [`crypto`].
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod protocol;

pub use crypto::{ChunkKey, PresharedKey};
pub use error::{CoreError, Result};
pub use protocol::{OpenOutcome, SecureEnvelope, TelemetrySample};
