// ============================================
// File: crates/ecowatt-core/src/crypto/mac.rs
// ============================================
//! # Keyed Hash Helpers
//!
//! ## Creation Reason
//! All three authentication surfaces (envelope MAC, header MAC,
//! firmware chunk tag) are HMAC-SHA256 digests transmitted as
//! lowercase hex. This module owns computation and constant-time
//! verification so no call site ever compares digests with `==`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - [`verify_hmac_hex`] decodes the received hex and delegates to the
//!   `hmac` crate's constant-time `verify_slice`. A hex decode failure
//!   is reported as a plain mismatch, not an error — malformed MACs
//!   from the wire must not be distinguishable from wrong ones.
//!
//! ## Last Modified
//! v0.1.0 - Initial MAC helpers

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Computes `HMAC-SHA256(key, data)` and returns the lowercase hex digest.
#[must_use]
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key)
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a received hex-encoded HMAC-SHA256 digest in constant time.
///
/// Returns `false` for a wrong digest *or* a digest that is not valid
/// hex of the right length; callers cannot distinguish the two, by
/// design of the wire contract.
#[must_use]
pub fn verify_hmac_hex(key: &[u8], data: &[u8], received_hex: &str) -> bool {
    let Ok(received) = hex::decode(received_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key)
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(data);
    mac.verify_slice(&received).is_ok()
}

/// Computes `SHA-256(data)` and returns the lowercase hex digest.
///
/// Used to verify uploaded firmware images against their declared hash.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"test-key";

    #[test]
    fn test_hmac_verify_roundtrip() {
        let mac = hmac_sha256_hex(KEY, b"hello");
        assert!(verify_hmac_hex(KEY, b"hello", &mac));
    }

    #[test]
    fn test_hmac_rejects_wrong_data() {
        let mac = hmac_sha256_hex(KEY, b"hello");
        assert!(!verify_hmac_hex(KEY, b"goodbye", &mac));
    }

    #[test]
    fn test_hmac_rejects_wrong_key() {
        let mac = hmac_sha256_hex(KEY, b"hello");
        assert!(!verify_hmac_hex(b"other-key", b"hello", &mac));
    }

    #[test]
    fn test_hmac_rejects_malformed_hex() {
        assert!(!verify_hmac_hex(KEY, b"hello", "zz-not-hex"));
        assert!(!verify_hmac_hex(KEY, b"hello", ""));
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc") - FIPS 180-2 test vector
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hmac_hex_is_lowercase() {
        let mac = hmac_sha256_hex(KEY, b"case-check");
        assert_eq!(mac, mac.to_lowercase());
        assert_eq!(mac.len(), 64);
    }
}
