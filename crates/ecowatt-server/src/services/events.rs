// ============================================
// File: crates/ecowatt-server/src/services/events.rs
// ============================================
//! # Audit Event Logs
//!
//! ## Creation Reason
//! Field support reviews security incidents (replays, MAC failures)
//! and FOTA campaigns from the server's own records, not just its
//! stdout. Three append-only in-memory logs back the
//! `/api/cloud/logs/*` endpoints; every append also emits a tracing
//! line so the records and the live log never disagree.
//!
//! ## ⚠️ Important Note for Next Developer
//! - These logs are in-memory and unbounded by design: the fleet is
//!   small and operators clear the security log between test runs via
//!   `/api/cloud/security/clear`. Revisit before scaling the fleet.
//!
//! ## Last Modified
//! v0.1.0 - Initial event logs

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use ecowatt_common::time::iso_timestamp;

/// Which audit log an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventChannel {
    /// HMAC failures, replays, verified requests.
    Security,
    /// Firmware upload, download progress, verify, rollback.
    Fota,
    /// Command queueing and execution results.
    Command,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    /// ISO-8601 time the event was recorded.
    pub timestamp: String,
    /// Device the event concerns (`"cloud"` for operator actions).
    pub device_id: String,
    /// Short machine-readable kind, e.g. `replay_attack`.
    pub event_type: String,
    /// Human-readable detail string.
    pub details: String,
}

/// The three append-only audit logs.
pub struct EventLog {
    security: Mutex<Vec<EventRecord>>,
    fota: Mutex<Vec<EventRecord>>,
    command: Mutex<Vec<EventRecord>>,
}

impl EventLog {
    /// Creates empty logs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            security: Mutex::new(Vec::new()),
            fota: Mutex::new(Vec::new()),
            command: Mutex::new(Vec::new()),
        }
    }

    fn log(&self, channel: EventChannel, device_id: &str, event_type: &str, details: String) {
        let tag = match channel {
            EventChannel::Security => "SECURITY",
            EventChannel::Fota => "FOTA",
            EventChannel::Command => "COMMAND",
        };
        info!(
            device_id = %device_id,
            event = event_type,
            "[{}] {}",
            tag,
            details
        );

        let record = EventRecord {
            timestamp: iso_timestamp(),
            device_id: device_id.to_string(),
            event_type: event_type.to_string(),
            details,
        };
        self.channel(channel).lock().push(record);
    }

    fn channel(&self, channel: EventChannel) -> &Mutex<Vec<EventRecord>> {
        match channel {
            EventChannel::Security => &self.security,
            EventChannel::Fota => &self.fota,
            EventChannel::Command => &self.command,
        }
    }

    /// Records a security event (auth success and failure alike).
    pub fn security(&self, device_id: &str, event_type: &str, details: impl Into<String>) {
        self.log(EventChannel::Security, device_id, event_type, details.into());
    }

    /// Records a FOTA event.
    pub fn fota(&self, device_id: &str, event_type: &str, details: impl Into<String>) {
        self.log(EventChannel::Fota, device_id, event_type, details.into());
    }

    /// Records a command event.
    pub fn command(&self, device_id: &str, event_type: &str, details: impl Into<String>) {
        self.log(EventChannel::Command, device_id, event_type, details.into());
    }

    /// Returns `(total, matching tail)` for one log, optionally
    /// filtered by device, limited to the most recent `limit` entries.
    #[must_use]
    pub fn query(
        &self,
        channel: EventChannel,
        device_id: Option<&str>,
        limit: usize,
    ) -> (usize, Vec<EventRecord>) {
        let log = self.channel(channel).lock();
        let filtered: Vec<EventRecord> = match device_id {
            Some(id) => log.iter().filter(|r| r.device_id == id).cloned().collect(),
            None => log.clone(),
        };
        let total = filtered.len();
        let tail = filtered
            .into_iter()
            .skip(total.saturating_sub(limit))
            .collect();
        (total, tail)
    }

    /// Clears the security log (demo/test support).
    pub fn clear_security(&self) {
        self.security.lock().clear();
    }

    /// Number of security events currently recorded.
    #[must_use]
    pub fn security_count(&self) -> usize {
        self.security.lock().len()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_filters_by_device() {
        let log = EventLog::new();
        log.security("EcoWatt001", "hmac_verified", "Nonce: 1");
        log.security("EcoWatt002", "replay_attack", "nonce 3 <= 5");
        log.security("EcoWatt001", "hmac_verified", "Nonce: 2");

        let (total, records) = log.query(EventChannel::Security, Some("EcoWatt001"), 100);
        assert_eq!(total, 2);
        assert!(records.iter().all(|r| r.device_id == "EcoWatt001"));

        let (all, _) = log.query(EventChannel::Security, None, 100);
        assert_eq!(all, 3);
    }

    #[test]
    fn test_query_limit_returns_tail() {
        let log = EventLog::new();
        for i in 0..10 {
            log.fota("EcoWatt001", "chunk_received", format!("Chunk {i}/10"));
        }

        let (total, records) = log.query(EventChannel::Fota, None, 3);
        assert_eq!(total, 10);
        assert_eq!(records.len(), 3);
        assert!(records[2].details.contains("Chunk 9"));
    }

    #[test]
    fn test_clear_security_only_touches_security() {
        let log = EventLog::new();
        log.security("d", "hmac_failed", "x");
        log.fota("d", "boot_status", "Status: success");

        log.clear_security();

        assert_eq!(log.security_count(), 0);
        let (fota_total, _) = log.query(EventChannel::Fota, None, 10);
        assert_eq!(fota_total, 1);
    }

    #[test]
    fn test_channels_are_independent() {
        let log = EventLog::new();
        log.command("d", "command_queued", "Action: write_register");

        let (sec, _) = log.query(EventChannel::Security, None, 10);
        let (cmd, _) = log.query(EventChannel::Command, None, 10);
        assert_eq!(sec, 0);
        assert_eq!(cmd, 1);
    }
}
