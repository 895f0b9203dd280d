// ============================================
// File: crates/ecowatt-core/src/protocol/envelope.rs
// ============================================
//! # Secured Message Envelope
//!
//! ## Creation Reason
//! Every authenticated message between a device and the cloud travels
//! inside this envelope: a nonce, a timestamp, an encryption marker,
//! an opaque payload string, and an HMAC-SHA256 over exactly those
//! four fields. GET requests that cannot carry a body use the sibling
//! header-auth construction over `path ∥ nonce ∥ timestamp` instead.
//!
//! ## Wire Format
//! ```text
//! {
//!   "nonce":     204,            integer, strictly increasing per peer
//!   "timestamp": 1718000000,     unix seconds
//!   "encrypted": true,           marker only - gates base64 encoding
//!   "payload":   "eyJzdGF0...",  opaque string (base64 when encrypted)
//!   "mac":       "9f2c44..."     hex HMAC-SHA256
//! }
//! ```
//!
//! ## MAC Input Ordering
//! ```text
//! envelope: str(nonce) + str(timestamp) + ("1"|"0") + payload
//! headers:  request_path + nonce_string + timestamp_string
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The concatenation orders above are a contract with deployed
//!   firmware. Any reordering silently invalidates every device MAC.
//! - The `encrypted` flag performs NO confidentiality transformation;
//!   it only switches the payload to base64. This mirrors the fleet's
//!   firmware exactly and must not be "upgraded" unilaterally.
//! - Header MACs must be computed over the *raw header strings* as
//!   received, never over re-serialized integers: a device sending
//!   nonce `007` would otherwise fail verification.
//!
//! ## Last Modified
//! v0.1.0 - Initial envelope codec

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::crypto::{hmac_sha256_hex, verify_hmac_hex, PresharedKey};
use crate::error::{CoreError, Result};

// ============================================
// SecureEnvelope
// ============================================

/// The authenticated wrapper around an opaque payload.
///
/// Field names are fixed by the wire contract; see the module docs
/// for the MAC input ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureEnvelope {
    /// Sender-chosen, strictly increasing per session.
    pub nonce: u64,
    /// Unix seconds at sealing time.
    pub timestamp: i64,
    /// Marker flag: when set, `payload` is base64-encoded.
    pub encrypted: bool,
    /// Opaque payload string (typically serialized JSON).
    pub payload: String,
    /// Hex HMAC-SHA256 over `(nonce, timestamp, encrypted, payload)`.
    pub mac: String,
}

/// Outcome of opening an inbound envelope.
///
/// Verification failure is a value, not an error: route handlers map
/// `Failed` to an unauthorized response and a security log line, they
/// never unwind.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// MAC verified; contains the decoded payload string.
    Verified(String),
    /// Verification failed; contains a diagnostic for logging.
    Failed(String),
}

// ============================================
// MAC input builders
// ============================================

/// Builds the envelope MAC input: `nonce ∥ timestamp ∥ flag ∥ payload`.
#[must_use]
pub fn envelope_mac_input(nonce: u64, timestamp: i64, encrypted: bool, payload: &str) -> String {
    let flag = if encrypted { "1" } else { "0" };
    format!("{nonce}{timestamp}{flag}{payload}")
}

/// Builds the header-auth MAC input: `path ∥ nonce ∥ timestamp`.
///
/// `nonce` and `timestamp` are the raw header strings as received.
#[must_use]
pub fn header_mac_input(path: &str, nonce: &str, timestamp: &str) -> String {
    format!("{path}{nonce}{timestamp}")
}

// ============================================
// Seal / Open
// ============================================

/// Seals a payload into a [`SecureEnvelope`].
///
/// When `encrypted` is set the payload is base64-encoded before the
/// MAC is computed (the MAC always covers the on-wire payload string).
/// Nonce selection is the caller's responsibility — the server
/// allocates outbound nonces from its session registry.
#[must_use]
pub fn seal_envelope(
    payload: &str,
    nonce: u64,
    timestamp: i64,
    encrypted: bool,
    psk: &PresharedKey,
) -> SecureEnvelope {
    let wire_payload = if encrypted {
        BASE64.encode(payload.as_bytes())
    } else {
        payload.to_string()
    };
    let mac_input = envelope_mac_input(nonce, timestamp, encrypted, &wire_payload);
    let mac = hmac_sha256_hex(psk.as_bytes(), mac_input.as_bytes());

    SecureEnvelope {
        nonce,
        timestamp,
        encrypted,
        payload: wire_payload,
        mac,
    }
}

/// Recomputes the envelope MAC and compares it in constant time.
#[must_use]
pub fn verify_envelope_mac(envelope: &SecureEnvelope, psk: &PresharedKey) -> bool {
    let mac_input = envelope_mac_input(
        envelope.nonce,
        envelope.timestamp,
        envelope.encrypted,
        &envelope.payload,
    );
    verify_hmac_hex(psk.as_bytes(), mac_input.as_bytes(), &envelope.mac)
}

/// Decodes the on-wire payload of an already-verified envelope.
///
/// # Errors
/// Returns [`CoreError::PayloadEncoding`] when the payload of an
/// `encrypted` envelope is not valid base64/UTF-8.
pub fn decode_envelope_payload(envelope: &SecureEnvelope) -> Result<String> {
    if !envelope.encrypted {
        return Ok(envelope.payload.clone());
    }
    let raw = BASE64
        .decode(&envelope.payload)
        .map_err(|e| CoreError::payload_encoding(format!("invalid base64: {e}")))?;
    String::from_utf8(raw)
        .map_err(|e| CoreError::payload_encoding(format!("payload is not UTF-8: {e}")))
}

/// Opens an inbound envelope: verify the MAC, then decode the payload.
///
/// This is the pure codec contract. The server's authentication gate
/// additionally interleaves the nonce replay check between these two
/// steps; it calls [`verify_envelope_mac`] and
/// [`decode_envelope_payload`] directly.
#[must_use]
pub fn open_envelope(envelope: &SecureEnvelope, psk: &PresharedKey) -> OpenOutcome {
    if !verify_envelope_mac(envelope, psk) {
        return OpenOutcome::Failed("HMAC verification failed".to_string());
    }
    match decode_envelope_payload(envelope) {
        Ok(payload) => OpenOutcome::Verified(payload),
        Err(e) => OpenOutcome::Failed(e.to_string()),
    }
}

/// Computes the header-auth MAC for an outbound or expected request.
#[must_use]
pub fn compute_header_mac(
    psk: &PresharedKey,
    path: &str,
    nonce: &str,
    timestamp: &str,
) -> String {
    let input = header_mac_input(path, nonce, timestamp);
    hmac_sha256_hex(psk.as_bytes(), input.as_bytes())
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_psk() -> PresharedKey {
        PresharedKey::from_bytes([0x42; 32])
    }

    #[test]
    fn test_seal_open_roundtrip_encrypted() {
        let psk = test_psk();
        let payload = r#"{"status":"no_config"}"#;

        let envelope = seal_envelope(payload, 7, 1_718_000_000, true, &psk);
        assert!(envelope.encrypted);
        // On-wire payload is base64, not the original JSON
        assert_ne!(envelope.payload, payload);

        match open_envelope(&envelope, &psk) {
            OpenOutcome::Verified(decoded) => assert_eq!(decoded, payload),
            OpenOutcome::Failed(reason) => panic!("open failed: {reason}"),
        }
    }

    #[test]
    fn test_seal_open_roundtrip_plaintext() {
        let psk = test_psk();
        let payload = "plain payload";

        let envelope = seal_envelope(payload, 1, 1_718_000_000, false, &psk);
        assert_eq!(envelope.payload, payload);

        match open_envelope(&envelope, &psk) {
            OpenOutcome::Verified(decoded) => assert_eq!(decoded, payload),
            OpenOutcome::Failed(reason) => panic!("open failed: {reason}"),
        }
    }

    #[test]
    fn test_open_rejects_tampered_payload() {
        let psk = test_psk();
        let mut envelope = seal_envelope("original", 1, 1_718_000_000, false, &psk);
        envelope.payload.push('x');

        assert!(matches!(
            open_envelope(&envelope, &psk),
            OpenOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_open_rejects_tampered_nonce() {
        let psk = test_psk();
        let mut envelope = seal_envelope("original", 1, 1_718_000_000, false, &psk);
        envelope.nonce = 2;

        assert!(matches!(
            open_envelope(&envelope, &psk),
            OpenOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_open_rejects_flipped_encryption_flag() {
        let psk = test_psk();
        let mut envelope = seal_envelope("original", 1, 1_718_000_000, false, &psk);
        envelope.encrypted = true;

        // Flag is covered by the MAC, so flipping it must fail
        assert!(matches!(
            open_envelope(&envelope, &psk),
            OpenOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let psk = test_psk();
        let other = PresharedKey::from_bytes([0x43; 32]);
        let envelope = seal_envelope("original", 1, 1_718_000_000, true, &psk);

        assert!(matches!(
            open_envelope(&envelope, &other),
            OpenOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_mac_input_ordering() {
        // The exact concatenation is a wire contract; pin it.
        assert_eq!(
            envelope_mac_input(204, 1_718_000_000, true, "abc"),
            "20417180000001abc"
        );
        assert_eq!(
            envelope_mac_input(204, 1_718_000_000, false, "abc"),
            "20417180000000abc"
        );
        assert_eq!(
            header_mac_input("/api/inverter/config", "204", "1718000000"),
            "/api/inverter/config2041718000000"
        );
    }

    #[test]
    fn test_header_mac_matches_envelope_key() {
        let psk = test_psk();
        let mac = compute_header_mac(&psk, "/api/inverter/config", "12", "1718000000");
        // 64 hex chars of HMAC-SHA256
        assert_eq!(mac.len(), 64);
        assert!(mac.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_envelope_serde_field_names() {
        let psk = test_psk();
        let envelope = seal_envelope("p", 3, 1_718_000_000, false, &psk);
        let json = serde_json::to_value(&envelope).unwrap();

        for field in ["nonce", "timestamp", "encrypted", "payload", "mac"] {
            assert!(json.get(field).is_some(), "missing wire field {field}");
        }
    }

    #[test]
    fn test_decode_payload_rejects_bad_base64() {
        let envelope = SecureEnvelope {
            nonce: 1,
            timestamp: 1_718_000_000,
            encrypted: true,
            payload: "!!not-base64!!".to_string(),
            mac: String::new(),
        };
        assert!(decode_envelope_payload(&envelope).is_err());
    }
}
