// ============================================
// File: crates/ecowatt-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! The session registry, telemetry buffers, and event logs all stamp
//! wall-clock time in three different representations: unix seconds
//! (nonce expiry arithmetic, envelope timestamps), unix milliseconds
//! (command nonces), and ISO-8601 strings (human-facing records).
//! This module is the single source of all three.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Expiry arithmetic must always use [`unix_timestamp`] so that tests
//!   can pass an explicit `now` to the `*_at` method variants instead
//!   of sleeping on wall time.
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;

/// Returns the current unix timestamp in seconds.
#[must_use]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before Unix epoch")
        .as_secs() as i64
}

/// Returns the current unix timestamp in milliseconds.
///
/// Used as the nonce for queued device commands, which need a value
/// space that is strictly ahead of any per-session counter.
#[must_use]
pub fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before Unix epoch")
        .as_millis() as i64
}

/// Returns the current time as an ISO-8601 (RFC 3339) string.
///
/// Used for all human-facing record timestamps (event logs, flush
/// records, FOTA status, config history).
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339()
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_timestamp_reasonable() {
        let ts = unix_timestamp();
        // After 2020, before 2100
        assert!(ts > 1_577_836_800);
        assert!(ts < 4_102_444_800);
    }

    #[test]
    fn test_millis_ahead_of_seconds() {
        let secs = unix_timestamp();
        let millis = unix_timestamp_millis();
        assert!(millis >= secs * 1000);
    }

    #[test]
    fn test_iso_timestamp_parses_back() {
        let ts = iso_timestamp();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
