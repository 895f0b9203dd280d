// ============================================
// File: crates/ecowatt-core/src/crypto/mod.rs
// ============================================
//! # Cryptographic Primitives
//!
//! ## Creation Reason
//! Groups the keyed-hash operations shared by the envelope codec, the
//! header-auth surface, and the firmware chunk tagger, plus the key
//! types that feed them.
//!
//! ## Main Functionality
//! - [`PresharedKey`]: 256-bit PSK for the nonce/envelope protocol
//! - [`ChunkKey`]: separate key context for firmware chunk tags
//! - [`mac`]: HMAC-SHA256 / SHA-256 hex helpers
//!
//! ## ⚠️ Important Note for Next Developer
//! - The PSK and the chunk key are distinct *contexts* even when an
//!   operator configures the same bytes for both. Keep the types
//!   separate so a future key rotation can split them safely.
//! - Key bytes are zeroized on drop.
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto module

pub mod keys;
pub mod mac;

pub use keys::{ChunkKey, PresharedKey, KEY_SIZE};
pub use mac::{hmac_sha256_hex, sha256_hex, verify_hmac_hex};
