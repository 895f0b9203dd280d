// ============================================
// File: crates/ecowatt-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by the protocol and crypto layers.
///
/// Note that a MAC mismatch on an inbound envelope is deliberately
/// *not* represented here: verification failures are ordinary values
/// (see [`crate::protocol::OpenOutcome`]) because the caller must log
/// and respond to them, never unwind.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A key string was not valid hex or had the wrong length.
    #[error("Invalid key material: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// An envelope payload could not be decoded after verification.
    #[error("Payload encoding error: {context}")]
    PayloadEncoding {
        /// What failed while decoding.
        context: String,
    },

    /// A serialized structure could not be produced or parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates an [`CoreError::InvalidKey`].
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Creates a [`CoreError::PayloadEncoding`].
    pub fn payload_encoding(context: impl Into<String>) -> Self {
        Self::PayloadEncoding {
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_key("expected 32 bytes, got 16");
        assert!(err.to_string().contains("32 bytes"));
    }
}
