// ============================================
// File: crates/ecowatt-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Every per-device store in the system (session registry, telemetry
//! buffers, FOTA status, pending queues) is keyed by the device
//! identifier the device sends in its `Device-ID` header. Wrapping it
//! in a newtype keeps those keys from being confused with arbitrary
//! strings at API seams.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Devices that omit the header fall back to [`DeviceId::fallback`];
//!   the fleet's provisioning scripts rely on that default, so do not
//!   change it without coordinating a firmware release.
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default identifier assumed when a request carries no `Device-ID`.
pub const DEFAULT_DEVICE_ID: &str = "EcoWatt001";

// ============================================
// DeviceId
// ============================================

/// Identifier of a field-deployed device.
///
/// Used as the key into every per-device store. Device ids are
/// free-form strings chosen at provisioning time; the server never
/// validates their shape, only uses them for keying and logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the fallback id used when a request omits `Device-ID`.
    #[must_use]
    pub fn fallback() -> Self {
        Self(DEFAULT_DEVICE_ID.to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::new("EcoWatt042");
        assert_eq!(id.to_string(), "EcoWatt042");
        assert_eq!(id.as_str(), "EcoWatt042");
    }

    #[test]
    fn test_device_id_fallback() {
        assert_eq!(DeviceId::fallback().as_str(), DEFAULT_DEVICE_ID);
    }

    #[test]
    fn test_device_id_serde_transparent() {
        let id = DeviceId::new("EcoWatt007");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"EcoWatt007\"");

        let parsed: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
