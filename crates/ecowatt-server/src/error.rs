// ============================================
// File: crates/ecowatt-server/src/error.rs
// ============================================
//! # Server Error Types
//!
//! Authentication failures are deliberately NOT part of this enum —
//! they are ordinary values ([`crate::services::auth::AuthFailure`])
//! consumed by route handlers, because a bad MAC from a device must
//! never unwind a handler.
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use ecowatt_core::error::CoreError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("Server failed to start: {reason}")]
    StartupFailed { reason: String },

    /// An uploaded firmware image disagreed with its declared SHA-256.
    /// The previously active manifest, if any, is left untouched.
    #[error("Firmware hash mismatch: expected {expected}, got {actual}")]
    FirmwareIntegrity { expected: String, actual: String },

    #[error("Storage error at '{path}': {reason}")]
    Storage { path: String, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    pub fn storage(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. } | Self::StartupFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::config_load("/etc/ecowatt/server.toml", "file not found");
        assert!(err.to_string().contains("/etc/ecowatt/server.toml"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ServerError::startup_failed("bind failed").is_fatal());
        assert!(!ServerError::FirmwareIntegrity {
            expected: "aa".into(),
            actual: "bb".into()
        }
        .is_fatal());
    }
}
