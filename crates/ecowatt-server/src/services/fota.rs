// ============================================
// File: crates/ecowatt-server/src/services/fota.rs
// ============================================
//! # Firmware Distribution Manager
//!
//! ## Creation Reason
//! Splits an uploaded firmware image into authenticated chunks and
//! serves them to devices over many small polls, tracking per-device
//! download/verify/boot/rollback status along the way.
//!
//! ## Distribution Model
//! ```text
//! operator ──upload──► [verify SHA-256] ──► manifest + chunk table
//!                                              │
//! device ──manifest poll──────────────────────►│
//! device ──chunk N poll────────────────────────►│  (idempotent,
//! device ──status report──► DeviceFotaStatus    │   no ordering)
//! operator ──rollback──► one-shot flag ──► next device poll
//! ```
//! Exactly one manifest is active at a time; replacing it rebuilds
//! the whole chunk table and discards the old one. Devices caught
//! mid-download against the old image will see inconsistent chunk
//! numbering — chunk sets are not generation-tagged because the chunk
//! wire format is frozen with the deployed fleet.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Chunk HMAC verification is the DEVICE's job; the server never
//!   checks that chunk requests arrive in order. `chunk()` must stay
//!   stateless so retries are free.
//! - Status reports are informational sinks, not triggers: the device
//!   decides to roll back on its own, the server only records it.
//!   The operator-initiated path is the separate one-shot flag.
//!
//! ## Last Modified
//! v0.1.0 - Initial firmware distribution manager

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use ecowatt_common::time::iso_timestamp;
use ecowatt_core::crypto::{hmac_sha256_hex, sha256_hex, ChunkKey};

use crate::error::ServerError;
use crate::services::events::EventLog;

// ============================================
// Data model
// ============================================

/// Metadata for the single active firmware image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareManifest {
    pub version: String,
    /// Declared image size in bytes.
    pub size: u64,
    /// SHA-256 of the full image, hex.
    pub hash: String,
    pub chunk_size: usize,
    /// ISO-8601 upload time.
    pub uploaded_at: String,
}

/// One downloadable chunk, as served on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct FirmwareChunk {
    pub chunk_number: usize,
    /// Chunk bytes, base64.
    pub data: String,
    /// Hex HMAC-SHA256 over the raw chunk bytes, chunk-key context.
    pub mac: String,
    /// Raw byte length of this chunk.
    pub size: usize,
}

struct FirmwareImage {
    manifest: FirmwareManifest,
    chunks: Vec<FirmwareChunk>,
}

/// A device's FOTA status report, as parsed from `fota_status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusReport {
    pub chunk_received: Option<i64>,
    pub verified: Option<bool>,
    pub boot_status: Option<String>,
    #[serde(default)]
    pub rollback: bool,
    pub error: Option<String>,
}

/// Per-device FOTA state, merged from status reports and operator
/// rollback requests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceFotaStatus {
    pub chunk_received: Option<i64>,
    pub verified: Option<bool>,
    pub boot_status: Option<String>,
    /// Device-reported: it rolled back on its own.
    pub rollback: bool,
    pub error: Option<String>,
    pub last_update: Option<String>,
    /// Operator-requested: consumed exactly once by the next poll.
    pub rollback_requested: bool,
    pub rollback_reason: Option<String>,
    pub rollback_timestamp: Option<String>,
}

// ============================================
// FotaManager
// ============================================

/// Owns the active manifest/chunk table and per-device status.
///
/// The image is read on every chunk poll and written once per upload,
/// hence the read-mostly lock; status entries are sharded by device.
pub struct FotaManager {
    image: RwLock<Option<FirmwareImage>>,
    status: DashMap<String, DeviceFotaStatus>,
    chunk_key: ChunkKey,
    events: Arc<EventLog>,
}

impl FotaManager {
    /// Creates a manager with no active firmware.
    #[must_use]
    pub fn new(chunk_key: ChunkKey, events: Arc<EventLog>) -> Self {
        Self {
            image: RwLock::new(None),
            status: DashMap::new(),
            chunk_key,
            events,
        }
    }

    // ========================================
    // Upload / serving
    // ========================================

    /// Verifies and installs a new firmware image, replacing the
    /// active manifest and rebuilding the whole chunk table.
    ///
    /// Returns the number of chunks produced.
    ///
    /// # Errors
    /// [`ServerError::FirmwareIntegrity`] when the recomputed SHA-256
    /// disagrees with `declared_hash`; the previous manifest (if any)
    /// is left untouched and zero chunks are produced.
    pub fn upload(
        &self,
        version: &str,
        declared_size: u64,
        declared_hash: &str,
        chunk_size: usize,
        image: &[u8],
    ) -> Result<usize, ServerError> {
        let actual_hash = sha256_hex(image);
        if actual_hash != declared_hash {
            self.events.fota(
                "cloud",
                "upload_failed",
                format!("Hash mismatch: expected {declared_hash}, got {actual_hash}"),
            );
            return Err(ServerError::FirmwareIntegrity {
                expected: declared_hash.to_string(),
                actual: actual_hash,
            });
        }
        self.events
            .fota("cloud", "firmware_hash_verified", format!("Hash: {declared_hash}"));

        let num_chunks = image.len().div_ceil(chunk_size);
        self.events.fota(
            "cloud",
            "chunking_started",
            format!("Creating {num_chunks} chunks of {chunk_size} bytes"),
        );

        let chunks: Vec<FirmwareChunk> = image
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, raw)| FirmwareChunk {
                chunk_number: i,
                data: BASE64.encode(raw),
                mac: hmac_sha256_hex(self.chunk_key.as_bytes(), raw),
                size: raw.len(),
            })
            .collect();

        let manifest = FirmwareManifest {
            version: version.to_string(),
            size: declared_size,
            hash: declared_hash.to_string(),
            chunk_size,
            uploaded_at: iso_timestamp(),
        };

        *self.image.write() = Some(FirmwareImage { manifest, chunks });

        self.events.fota(
            "cloud",
            "firmware_uploaded",
            format!(
                "Version: {version}, Size: {declared_size} bytes, Chunks: {num_chunks}, Hash: {declared_hash}"
            ),
        );
        Ok(num_chunks)
    }

    /// The active manifest, if any.
    #[must_use]
    pub fn manifest(&self) -> Option<FirmwareManifest> {
        self.image.read().as_ref().map(|img| img.manifest.clone())
    }

    /// Fetches one chunk by index. Stateless and idempotent — devices
    /// retry and reorder freely.
    #[must_use]
    pub fn chunk(&self, index: usize) -> Option<FirmwareChunk> {
        self.image
            .read()
            .as_ref()
            .and_then(|img| img.chunks.get(index).cloned())
    }

    /// Number of chunks in the active table.
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.image.read().as_ref().map_or(0, |img| img.chunks.len())
    }

    // ========================================
    // Device status
    // ========================================

    /// Merges a device status report and logs the derived events.
    pub fn report_status(&self, device_id: &str, report: StatusReport) {
        let total = self.total_chunks();

        let mut entry = self.status.entry(device_id.to_string()).or_default();
        entry.chunk_received = report.chunk_received.or(entry.chunk_received);
        if report.verified.is_some() {
            entry.verified = report.verified;
        }
        if report.boot_status.is_some() {
            entry.boot_status = report.boot_status.clone();
        }
        entry.rollback = report.rollback;
        entry.error = report.error.clone();
        entry.last_update = Some(iso_timestamp());
        drop(entry);

        if let Some(chunk) = report.chunk_received {
            let progress = if total > 0 {
                (chunk + 1) as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            self.events.fota(
                device_id,
                "chunk_received",
                format!("Chunk {chunk}/{total} ({progress:.1}%)"),
            );
        }

        match report.verified {
            Some(true) => {
                self.events
                    .fota(device_id, "firmware_verified", "Hash verification successful");
            }
            Some(false) => {
                self.events.fota(
                    device_id,
                    "verification_failed",
                    format!("Error: {}", report.error.as_deref().unwrap_or("unknown")),
                );
            }
            None => {}
        }

        if report.rollback {
            let reason = report
                .error
                .clone()
                .unwrap_or_else(|| "Verification/Boot failure".to_string());
            self.events
                .fota(device_id, "rollback_triggered", format!("Reason: {reason}"));
            self.events.security(
                device_id,
                "fota_rollback",
                format!("Rolled back due to: {reason}"),
            );
        }

        if let Some(boot) = &report.boot_status {
            self.events
                .fota(device_id, "boot_status", format!("Status: {boot}"));
            match boot.as_str() {
                "success" => self.events.fota(
                    device_id,
                    "fota_completed",
                    "New firmware booted successfully",
                ),
                "failed" => {
                    self.events
                        .fota(device_id, "boot_failed", "Boot failed, rollback initiated");
                }
                _ => {}
            }
        }
    }

    /// Sets the one-shot rollback flag for a device (or the literal
    /// `"all"` key). Returns the request timestamp.
    pub fn request_rollback(&self, target: &str, reason: &str) -> String {
        let timestamp = iso_timestamp();
        let mut entry = self.status.entry(target.to_string()).or_default();
        entry.rollback_requested = true;
        entry.rollback_reason = Some(reason.to_string());
        entry.rollback_timestamp = Some(timestamp.clone());
        drop(entry);

        self.events
            .fota(target, "rollback_requested", reason.to_string());
        timestamp
    }

    /// Consumes the rollback flag for a device, exactly once.
    ///
    /// Returns the reason when a rollback was pending; subsequent
    /// calls return `None` until the next [`Self::request_rollback`].
    /// If the device never polls, the flag persists indefinitely.
    #[must_use]
    pub fn check_rollback(&self, device_id: &str) -> Option<String> {
        let mut entry = self.status.get_mut(device_id)?;
        if !entry.rollback_requested {
            return None;
        }
        entry.rollback_requested = false;
        let reason = entry
            .rollback_reason
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());
        self.events
            .fota(device_id, "rollback_flag_sent", reason.clone());
        Some(reason)
    }

    /// The chunk index a device should fetch next, if a download is
    /// in progress and chunks remain.
    #[must_use]
    pub fn next_chunk_hint(&self, device_id: &str) -> Option<usize> {
        let total = self.total_chunks();
        if total == 0 {
            return None;
        }
        let last = self
            .status
            .get(device_id)
            .and_then(|s| s.chunk_received)
            .unwrap_or(-1);
        let next = (last + 1) as usize;
        (next < total).then_some(next)
    }

    /// Snapshot of all device statuses for the operator dashboard.
    #[must_use]
    pub fn device_statuses(&self) -> std::collections::HashMap<String, DeviceFotaStatus> {
        self.status
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> FotaManager {
        FotaManager::new(ChunkKey::from_bytes([0x24; 32]), Arc::new(EventLog::new()))
    }

    fn upload_image(mgr: &FotaManager, image: &[u8], chunk_size: usize) -> usize {
        let hash = sha256_hex(image);
        mgr.upload("1.2.0", image.len() as u64, &hash, chunk_size, image)
            .unwrap()
    }

    #[test]
    fn test_chunking_sizes() {
        let mgr = manager();
        let image = vec![0xA5u8; 10_000];
        let chunks = upload_image(&mgr, &image, 4096);

        assert_eq!(chunks, 3);
        assert_eq!(mgr.total_chunks(), 3);
        assert_eq!(mgr.chunk(0).unwrap().size, 4096);
        assert_eq!(mgr.chunk(1).unwrap().size, 4096);
        assert_eq!(mgr.chunk(2).unwrap().size, 1808);
        assert!(mgr.chunk(3).is_none());
    }

    #[test]
    fn test_chunk_macs_verify_against_raw_bytes() {
        let mgr = manager();
        let image: Vec<u8> = (0..=255).collect();
        upload_image(&mgr, &image, 100);

        let chunk = mgr.chunk(1).unwrap();
        let raw = BASE64.decode(&chunk.data).unwrap();
        assert_eq!(raw, &image[100..200]);
        assert_eq!(chunk.mac, hmac_sha256_hex(&[0x24; 32], &raw));
    }

    #[test]
    fn test_hash_mismatch_keeps_previous_manifest() {
        let mgr = manager();
        upload_image(&mgr, b"old firmware image", 8);
        let old_manifest = mgr.manifest().unwrap();
        let old_chunks = mgr.total_chunks();

        let result = mgr.upload(
            "2.0.0",
            5,
            "0000000000000000000000000000000000000000000000000000000000000000",
            8,
            b"newer",
        );
        assert!(matches!(result, Err(ServerError::FirmwareIntegrity { .. })));

        // Old image still fully active.
        assert_eq!(mgr.manifest().unwrap().version, old_manifest.version);
        assert_eq!(mgr.total_chunks(), old_chunks);
    }

    #[test]
    fn test_hash_mismatch_with_no_manifest_produces_none() {
        let mgr = manager();
        let result = mgr.upload("1.0.0", 5, "deadbeef", 8, b"image");
        assert!(result.is_err());
        assert!(mgr.manifest().is_none());
        assert_eq!(mgr.total_chunks(), 0);
    }

    #[test]
    fn test_new_upload_replaces_chunk_table() {
        let mgr = manager();
        upload_image(&mgr, &vec![1u8; 300], 100);
        assert_eq!(mgr.total_chunks(), 3);

        upload_image(&mgr, &vec![2u8; 100], 100);
        assert_eq!(mgr.total_chunks(), 1);
        assert!(mgr.chunk(2).is_none());
    }

    #[test]
    fn test_rollback_flag_consumed_exactly_once() {
        let mgr = manager();
        mgr.request_rollback("dev", "Verification failed in canary ring");

        assert_eq!(
            mgr.check_rollback("dev").as_deref(),
            Some("Verification failed in canary ring")
        );
        assert!(mgr.check_rollback("dev").is_none());
        assert!(mgr.check_rollback("dev").is_none());

        // A second request re-arms the flag.
        mgr.request_rollback("dev", "again");
        assert_eq!(mgr.check_rollback("dev").as_deref(), Some("again"));
    }

    #[test]
    fn test_rollback_unknown_device_is_none() {
        let mgr = manager();
        assert!(mgr.check_rollback("never-seen").is_none());
    }

    #[test]
    fn test_status_report_merge_preserves_rollback_flag() {
        let mgr = manager();
        mgr.request_rollback("dev", "operator request");

        // A routine progress report must not erase the pending flag.
        mgr.report_status(
            "dev",
            StatusReport {
                chunk_received: Some(4),
                ..StatusReport::default()
            },
        );

        assert_eq!(mgr.check_rollback("dev").as_deref(), Some("operator request"));
    }

    #[test]
    fn test_next_chunk_hint_progression() {
        let mgr = manager();
        upload_image(&mgr, &vec![0u8; 300], 100);

        // Nothing reported yet: start at chunk 0.
        assert_eq!(mgr.next_chunk_hint("dev"), Some(0));

        mgr.report_status(
            "dev",
            StatusReport {
                chunk_received: Some(1),
                ..StatusReport::default()
            },
        );
        assert_eq!(mgr.next_chunk_hint("dev"), Some(2));

        mgr.report_status(
            "dev",
            StatusReport {
                chunk_received: Some(2),
                ..StatusReport::default()
            },
        );
        // All chunks acknowledged: no hint.
        assert_eq!(mgr.next_chunk_hint("dev"), None);
    }

    #[test]
    fn test_status_snapshot() {
        let mgr = manager();
        mgr.report_status(
            "dev",
            StatusReport {
                verified: Some(true),
                boot_status: Some("success".to_string()),
                ..StatusReport::default()
            },
        );

        let statuses = mgr.device_statuses();
        let status = statuses.get("dev").unwrap();
        assert_eq!(status.verified, Some(true));
        assert_eq!(status.boot_status.as_deref(), Some("success"));
        assert!(status.last_update.is_some());
    }
}
