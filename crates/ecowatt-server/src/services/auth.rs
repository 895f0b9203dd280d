// ============================================
// File: crates/ecowatt-server/src/services/auth.rs
// ============================================
//! # Authentication Gate
//!
//! ## Creation Reason
//! Single chokepoint for both authentication surfaces the fleet uses:
//! header-based auth for polling GETs (`X-Nonce`/`X-Timestamp`/`X-MAC`
//! over `path ∥ nonce ∥ timestamp`) and envelope-based auth for POST
//! bodies. Issues outbound envelopes with registry-allocated nonces.
//!
//! ## Main Logical Flow
//! ```text
//! header surface:   parse → replay check → MAC → commit nonce
//! envelope surface: MAC → replay check → commit nonce
//! ```
//! The two surfaces interleave the replay check differently; both
//! orders are part of the deployed contract and preserved as-is.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Failures are VALUES ([`AuthFailure`]), never errors. Handlers map
//!   them to 401 responses; nothing in this module unwinds on bad
//!   input from the network.
//! - Every verification, pass or fail, leaves a security log line.
//! - Header MACs are computed over the raw header strings; do not
//!   "normalize" the nonce before hashing.
//!
//! ## Last Modified
//! v0.1.0 - Initial authentication gate

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use ecowatt_common::time::unix_timestamp;
use ecowatt_core::crypto::{verify_hmac_hex, PresharedKey};
use ecowatt_core::protocol::{header_mac_input, seal_envelope, SecureEnvelope};

use crate::services::events::EventLog;
use crate::services::session::SessionRegistry;

// ============================================
// Failure taxonomy
// ============================================

/// Why an inbound request failed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureKind {
    /// One or more of the auth headers was absent.
    MissingHeaders,
    /// The nonce header was not an unsigned integer.
    MalformedNonce,
    /// The nonce was not strictly greater than the stored one.
    Replay,
    /// The MAC did not verify.
    MacMismatch,
}

impl AuthFailureKind {
    /// The event-log kind recorded for this failure.
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::MissingHeaders => "missing_headers",
            Self::MalformedNonce => "invalid_nonce",
            Self::Replay => "replay_attack",
            Self::MacMismatch => "hmac_failed",
        }
    }
}

/// A failed authentication attempt, ready to be mapped to a 401.
#[derive(Debug, Clone)]
pub struct AuthFailure {
    /// What went wrong.
    pub kind: AuthFailureKind,
    /// Human-readable detail, returned to the caller and logged.
    pub details: String,
}

impl AuthFailure {
    fn new(kind: AuthFailureKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: details.into(),
        }
    }
}

/// Rejection of a secured envelope body.
///
/// `Unauthorized` maps to 401; `MalformedPayload` (a verified envelope
/// whose payload cannot be decoded) maps to 400.
#[derive(Debug)]
pub enum EnvelopeRejection {
    /// MAC or nonce validation failed.
    Unauthorized(AuthFailure),
    /// Envelope verified but its payload encoding is broken.
    MalformedPayload(String),
}

/// Raw auth header values as received, before any parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderCredentials<'a> {
    /// `X-Nonce` value.
    pub nonce: Option<&'a str>,
    /// `X-Timestamp` value.
    pub timestamp: Option<&'a str>,
    /// `X-MAC` value.
    pub mac: Option<&'a str>,
}

// ============================================
// AuthGate
// ============================================

/// Validates inbound requests and seals outbound envelopes.
pub struct AuthGate {
    psk: PresharedKey,
    sessions: Arc<SessionRegistry>,
    events: Arc<EventLog>,
}

impl AuthGate {
    /// Creates a gate over the shared registry and event log.
    #[must_use]
    pub fn new(psk: PresharedKey, sessions: Arc<SessionRegistry>, events: Arc<EventLog>) -> Self {
        Self {
            psk,
            sessions,
            events,
        }
    }

    // ========================================
    // Header surface (polling GETs)
    // ========================================

    /// Verifies header-based credentials for a GET request.
    ///
    /// # Errors
    /// [`AuthFailure`] describing the first check that failed.
    pub fn verify_headers(
        &self,
        device_id: &str,
        path: &str,
        creds: HeaderCredentials<'_>,
    ) -> Result<u64, AuthFailure> {
        self.verify_headers_at(device_id, path, creds, unix_timestamp())
    }

    /// [`Self::verify_headers`] with an explicit clock.
    pub fn verify_headers_at(
        &self,
        device_id: &str,
        path: &str,
        creds: HeaderCredentials<'_>,
        now: i64,
    ) -> Result<u64, AuthFailure> {
        let (Some(nonce_str), Some(ts_str), Some(mac)) = (creds.nonce, creds.timestamp, creds.mac)
        else {
            return Err(self.fail(
                device_id,
                AuthFailureKind::MissingHeaders,
                format!(
                    "Missing security headers: nonce={:?}, ts={:?}, mac={:?}",
                    creds.nonce, creds.timestamp, creds.mac
                ),
            ));
        };

        let nonce: u64 = nonce_str.parse().map_err(|_| {
            self.fail(
                device_id,
                AuthFailureKind::MalformedNonce,
                format!("Invalid nonce format: {nonce_str}"),
            )
        })?;

        // Replay check (with lazy expiry reset) runs before the MAC so
        // a replayed request is reported as a replay, not a MAC error.
        self.sessions
            .check_nonce_at(device_id, nonce, now)
            .map_err(|e| {
                self.fail(
                    device_id,
                    AuthFailureKind::Replay,
                    format!("Replay attack detected: nonce {} <= {}", e.received, e.last),
                )
            })?;

        let mac_input = header_mac_input(path, nonce_str, ts_str);
        if !verify_hmac_hex(self.psk.as_bytes(), mac_input.as_bytes(), mac) {
            return Err(self.fail(
                device_id,
                AuthFailureKind::MacMismatch,
                "HMAC verification failed",
            ));
        }

        self.sessions.commit_nonce_at(device_id, nonce, now);
        self.events
            .security(device_id, "hmac_verified", format!("Nonce: {nonce}"));
        Ok(nonce)
    }

    // ========================================
    // Envelope surface (POST bodies)
    // ========================================

    /// Authenticates a secured envelope: MAC, then replay, then commit.
    ///
    /// Does NOT decode the payload — upload bodies are always base64
    /// binary while ack bodies are plain JSON, so payload handling
    /// stays with the route.
    ///
    /// # Errors
    /// [`AuthFailure`] when the MAC or the nonce check fails.
    pub fn authenticate_envelope(
        &self,
        device_id: &str,
        envelope: &SecureEnvelope,
    ) -> Result<(), AuthFailure> {
        self.authenticate_envelope_at(device_id, envelope, unix_timestamp())
    }

    /// [`Self::authenticate_envelope`] with an explicit clock.
    pub fn authenticate_envelope_at(
        &self,
        device_id: &str,
        envelope: &SecureEnvelope,
        now: i64,
    ) -> Result<(), AuthFailure> {
        if !ecowatt_core::protocol::verify_envelope_mac(envelope, &self.psk) {
            return Err(self.fail(
                device_id,
                AuthFailureKind::MacMismatch,
                "Envelope HMAC mismatch",
            ));
        }

        self.sessions
            .check_nonce_at(device_id, envelope.nonce, now)
            .map_err(|e| {
                self.fail(
                    device_id,
                    AuthFailureKind::Replay,
                    format!("Envelope nonce {} <= {}", e.received, e.last),
                )
            })?;

        self.sessions.commit_nonce_at(device_id, envelope.nonce, now);
        self.events.security(
            device_id,
            "hmac_verified",
            format!("Envelope authenticated, nonce: {}", envelope.nonce),
        );
        Ok(())
    }

    /// Verifies only the envelope MAC, without touching nonce state.
    ///
    /// Used by the config-ack path, where the nonce inside the
    /// envelope refers to the queued config being acknowledged rather
    /// than the device's session counter.
    ///
    /// # Errors
    /// [`AuthFailure`] of kind [`AuthFailureKind::MacMismatch`].
    pub fn verify_envelope_mac_only(
        &self,
        device_id: &str,
        envelope: &SecureEnvelope,
    ) -> Result<(), AuthFailure> {
        if ecowatt_core::protocol::verify_envelope_mac(envelope, &self.psk) {
            debug!(device_id = %device_id, nonce = envelope.nonce, "Envelope MAC verified");
            Ok(())
        } else {
            warn!(device_id = %device_id, "Envelope MAC mismatch on acknowledgment");
            Err(AuthFailure::new(
                AuthFailureKind::MacMismatch,
                "HMAC verification failed",
            ))
        }
    }

    /// Replay-checks a nonce carried inside a plain (non-envelope)
    /// body, committing it on success.
    ///
    /// Returns `false` and logs a security event on replay.
    pub fn check_payload_nonce(&self, device_id: &str, nonce: u64, event_type: &str) -> bool {
        match self.sessions.check_nonce(device_id, nonce) {
            Ok(()) => {
                self.sessions.commit_nonce(device_id, nonce);
                true
            }
            Err(e) => {
                self.events.security(
                    device_id,
                    event_type,
                    format!("Nonce {} <= {}", e.received, e.last),
                );
                false
            }
        }
    }

    // ========================================
    // Outbound
    // ========================================

    /// Seals a JSON payload into an outbound envelope.
    ///
    /// Allocates the nonce from the registry (device-aware when a
    /// device id is given), stamps the current time, and sets the
    /// encryption marker — server responses are always sent with the
    /// payload base64-encoded.
    #[must_use]
    pub fn seal(&self, payload: &Value, device_id: Option<&str>) -> SecureEnvelope {
        let nonce = self.sessions.allocate_outbound(device_id);
        let payload_str = payload.to_string();
        seal_envelope(&payload_str, nonce, unix_timestamp(), true, &self.psk)
    }

    /// Signs an arbitrary payload string with the PSK context.
    ///
    /// Used for the MAC attached to queued commands, which covers the
    /// serialized command body rather than an envelope.
    #[must_use]
    pub fn sign_payload(&self, data: &str) -> String {
        ecowatt_core::crypto::hmac_sha256_hex(self.psk.as_bytes(), data.as_bytes())
    }

    fn fail(&self, device_id: &str, kind: AuthFailureKind, details: impl Into<String>) -> AuthFailure {
        let failure = AuthFailure::new(kind, details);
        self.events
            .security(device_id, kind.event_type(), failure.details.clone());
        failure
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    use ecowatt_core::protocol::{compute_header_mac, open_envelope, OpenOutcome};

    const NOW: i64 = 1_718_000_000;
    const PATH: &str = "/api/inverter/config";

    fn test_gate() -> (AuthGate, Arc<SessionRegistry>, Arc<EventLog>) {
        let sessions = Arc::new(SessionRegistry::new(75, 50, 300));
        let events = Arc::new(EventLog::new());
        let gate = AuthGate::new(
            PresharedKey::from_bytes([0x42; 32]),
            Arc::clone(&sessions),
            Arc::clone(&events),
        );
        (gate, sessions, events)
    }

    fn signed_creds(psk: &PresharedKey, nonce: &str, ts: &str) -> (String, String, String) {
        let mac = compute_header_mac(psk, PATH, nonce, ts);
        (nonce.to_string(), ts.to_string(), mac)
    }

    #[test]
    fn test_header_auth_happy_path() {
        let (gate, sessions, _) = test_gate();
        let psk = PresharedKey::from_bytes([0x42; 32]);
        let (nonce, ts, mac) = signed_creds(&psk, "12", "1718000000");

        let creds = HeaderCredentials {
            nonce: Some(&nonce),
            timestamp: Some(&ts),
            mac: Some(&mac),
        };
        let accepted = gate.verify_headers_at("dev", PATH, creds, NOW).unwrap();
        assert_eq!(accepted, 12);
        assert_eq!(sessions.last_nonce("dev"), Some(12));
    }

    #[test]
    fn test_header_auth_missing_headers() {
        let (gate, _, events) = test_gate();
        let creds = HeaderCredentials {
            nonce: Some("12"),
            timestamp: None,
            mac: Some("aa"),
        };
        let failure = gate.verify_headers_at("dev", PATH, creds, NOW).unwrap_err();
        assert_eq!(failure.kind, AuthFailureKind::MissingHeaders);
        assert_eq!(events.security_count(), 1);
    }

    #[test]
    fn test_header_auth_malformed_nonce() {
        let (gate, _, _) = test_gate();
        let creds = HeaderCredentials {
            nonce: Some("not-a-number"),
            timestamp: Some("1718000000"),
            mac: Some("aa"),
        };
        let failure = gate.verify_headers_at("dev", PATH, creds, NOW).unwrap_err();
        assert_eq!(failure.kind, AuthFailureKind::MalformedNonce);
    }

    #[test]
    fn test_header_auth_replay_rejected_before_mac() {
        let (gate, sessions, _) = test_gate();
        sessions.commit_nonce_at("dev", 20, NOW);

        // Even with a garbage MAC the replay is what gets reported.
        let creds = HeaderCredentials {
            nonce: Some("20"),
            timestamp: Some("1718000000"),
            mac: Some("deadbeef"),
        };
        let failure = gate.verify_headers_at("dev", PATH, creds, NOW).unwrap_err();
        assert_eq!(failure.kind, AuthFailureKind::Replay);
    }

    #[test]
    fn test_header_auth_bad_mac_does_not_commit_nonce() {
        let (gate, sessions, _) = test_gate();
        let creds = HeaderCredentials {
            nonce: Some("12"),
            timestamp: Some("1718000000"),
            mac: Some("deadbeef"),
        };
        let failure = gate.verify_headers_at("dev", PATH, creds, NOW).unwrap_err();
        assert_eq!(failure.kind, AuthFailureKind::MacMismatch);
        // A nonce whose MAC never verified must not advance the session.
        assert_eq!(sessions.last_nonce("dev"), None);
    }

    #[test]
    fn test_header_auth_leading_zero_nonce_uses_raw_string() {
        let (gate, _, _) = test_gate();
        let psk = PresharedKey::from_bytes([0x42; 32]);
        // Device hashed "007", not "7" - raw-string hashing must match.
        let (nonce, ts, mac) = signed_creds(&psk, "007", "1718000000");

        let creds = HeaderCredentials {
            nonce: Some(&nonce),
            timestamp: Some(&ts),
            mac: Some(&mac),
        };
        assert!(gate.verify_headers_at("dev", PATH, creds, NOW).is_ok());
    }

    #[test]
    fn test_envelope_auth_and_replay() {
        let (gate, _, _) = test_gate();
        let psk = PresharedKey::from_bytes([0x42; 32]);
        let envelope = seal_envelope("cGF5bG9hZA==", 5, NOW, false, &psk);

        assert!(gate.authenticate_envelope_at("dev", &envelope, NOW).is_ok());

        // Same envelope again: replay.
        let failure = gate
            .authenticate_envelope_at("dev", &envelope, NOW + 1)
            .unwrap_err();
        assert_eq!(failure.kind, AuthFailureKind::Replay);
    }

    #[test]
    fn test_envelope_auth_rejects_bad_mac() {
        let (gate, sessions, _) = test_gate();
        let psk = PresharedKey::from_bytes([0x42; 32]);
        let mut envelope = seal_envelope("data", 5, NOW, false, &psk);
        envelope.mac = "00".repeat(32);

        let failure = gate
            .authenticate_envelope_at("dev", &envelope, NOW)
            .unwrap_err();
        assert_eq!(failure.kind, AuthFailureKind::MacMismatch);
        assert_eq!(sessions.last_nonce("dev"), None);
    }

    #[test]
    fn test_seal_roundtrips_through_codec() {
        let (gate, _, _) = test_gate();
        let psk = PresharedKey::from_bytes([0x42; 32]);
        let payload = serde_json::json!({"status": "no_config"});

        let envelope = gate.seal(&payload, Some("dev"));
        assert!(envelope.encrypted);

        match open_envelope(&envelope, &psk) {
            OpenOutcome::Verified(decoded) => {
                let value: Value = serde_json::from_str(&decoded).unwrap();
                assert_eq!(value["status"], "no_config");
            }
            OpenOutcome::Failed(reason) => panic!("open failed: {reason}"),
        }
    }

    #[test]
    fn test_seal_nonce_tracks_device_window() {
        let (gate, sessions, _) = test_gate();
        sessions.commit_nonce_at("dev", 3, NOW);

        let envelope = gate.seal(&serde_json::json!({}), Some("dev"));
        assert!(envelope.nonce <= 51, "first-contact seal overshot the window");
    }

    #[test]
    fn test_check_payload_nonce_logs_replay() {
        let (gate, sessions, events) = test_gate();
        // Committed against the real clock: check_payload_nonce runs
        // against wall time and must not see an expired session here.
        sessions.commit_nonce("dev", 50);

        assert!(!gate.check_payload_nonce("dev", 10, "replay_attack_command_result"));
        let (total, records) =
            events.query(crate::services::events::EventChannel::Security, None, 10);
        assert_eq!(total, 1);
        assert_eq!(records[0].event_type, "replay_attack_command_result");

        assert!(gate.check_payload_nonce("dev", 51, "replay_attack_command_result"));
        assert_eq!(sessions.last_nonce("dev"), Some(51));
    }
}
