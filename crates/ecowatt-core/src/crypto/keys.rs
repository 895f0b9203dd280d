// ============================================
// File: crates/ecowatt-core/src/crypto/keys.rs
// ============================================
//! # Key Types
//!
//! ## Creation Reason
//! The system carries two symmetric key contexts: the pre-shared key
//! that authenticates the nonce/envelope protocol, and the key that
//! tags firmware chunks. Both are 256-bit values configured as hex
//! strings; wrapping them in distinct types prevents one from being
//! passed where the other is expected.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Both types zeroize their bytes on drop (manual `Drop` impl, as
//!   the zeroize derive for drop behavior is not available on the
//!   pinned zeroize version).
//! - Neither type implements `Debug` output of its bytes.
//!
//! ## Last Modified
//! v0.1.0 - Initial key types

use std::fmt;

use zeroize::Zeroize;

use crate::error::{CoreError, Result};

/// Size of both symmetric keys in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

fn decode_key_hex(hex_str: &str, what: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CoreError::invalid_key(format!("{what} is not valid hex: {e}")))?;
    if bytes.len() != KEY_SIZE {
        return Err(CoreError::invalid_key(format!(
            "{what} must be {KEY_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

// ============================================
// PresharedKey
// ============================================

/// The pre-shared key authenticating the device protocol.
///
/// Keys both the envelope MAC (`nonce ∥ timestamp ∥ flag ∥ payload`)
/// and the header-auth MAC (`path ∥ nonce ∥ timestamp`).
#[derive(Clone, Zeroize)]
pub struct PresharedKey([u8; KEY_SIZE]);

impl Drop for PresharedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl PresharedKey {
    /// Parses a PSK from its 64-character hex representation.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidKey`] for bad hex or wrong length.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Ok(Self(decode_key_hex(hex_str, "pre-shared key")?))
    }

    /// Creates a PSK from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PresharedKey(<{KEY_SIZE} bytes>)")
    }
}

// ============================================
// ChunkKey
// ============================================

/// Key context for firmware chunk authentication tags.
///
/// Deliberately a separate type from [`PresharedKey`]: the chunk
/// tagging scheme is independent of the nonce protocol and may rotate
/// on its own schedule.
#[derive(Clone, Zeroize)]
pub struct ChunkKey([u8; KEY_SIZE]);

impl Drop for ChunkKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl ChunkKey {
    /// Parses a chunk key from its 64-character hex representation.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidKey`] for bad hex or wrong length.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Ok(Self(decode_key_hex(hex_str, "chunk key")?))
    }

    /// Creates a chunk key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkKey(<{KEY_SIZE} bytes>)")
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY_HEX: &str =
        "c41716a134168f52fbd4be3302fa5a88127ddde749501a199607b4c286ad29b3";

    #[test]
    fn test_psk_from_hex_roundtrip() {
        let key = PresharedKey::from_hex(TEST_KEY_HEX).unwrap();
        assert_eq!(hex::encode(key.as_bytes()), TEST_KEY_HEX);
    }

    #[test]
    fn test_psk_rejects_short_hex() {
        let result = PresharedKey::from_hex("deadbeef");
        assert!(matches!(result, Err(CoreError::InvalidKey { .. })));
    }

    #[test]
    fn test_psk_rejects_non_hex() {
        let result = PresharedKey::from_hex("not-hex-at-all");
        assert!(matches!(result, Err(CoreError::InvalidKey { .. })));
    }

    #[test]
    fn test_chunk_key_from_hex() {
        let key = ChunkKey::from_hex(TEST_KEY_HEX).unwrap();
        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_debug_hides_bytes() {
        let key = PresharedKey::from_hex(TEST_KEY_HEX).unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains("c417"));
    }
}
