// ============================================
// File: crates/ecowatt-server/src/config.rs
// ============================================
//! # Server Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the EcoWatt cloud endpoint,
//! supporting TOML files with per-field defaults and validation.
//!
//! ## Configuration Sections
//! - `network`: HTTP listen address
//! - `security`: pre-shared key, chunk key, nonce policy parameters
//! - `telemetry`: debounce window, downstream sink
//! - `fota`: chunking defaults
//! - `storage`: data directory for persisted pending configs
//! - `logging`: log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! listen_addr = "0.0.0.0:8080"
//!
//! [security]
//! psk = "c41716a134168f52fbd4be3302fa5a88127ddde749501a199607b4c286ad29b3"
//! nonce_expiry_secs = 75
//!
//! [telemetry]
//! flush_debounce_secs = 15
//! sink_url = "http://localhost:1880/api/flask_push"
//!
//! [storage]
//! data_dir = "data"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `nonce_expiry_secs` and `first_contact_threshold` are part of the
//!   replay-protection contract with deployed firmware; changing them
//!   requires a coordinated fleet rollout.
//! - `nonce_window` is documented to devices but NOT enforced on the
//!   inbound side — see the session registry for why.
//! - All config changes require server restart.
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use ecowatt_core::crypto::{ChunkKey, PresharedKey};

use crate::error::{Result, ServerError};

// ============================================
// ServerConfig
// ============================================

/// Main server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Security / nonce policy configuration.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Telemetry aggregation configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Firmware distribution configuration.
    #[serde(default)]
    pub fota: FotaConfig,

    /// Persistence configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or if any
    /// field fails validation.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error on parse or validation failure.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.security.validate()?;
        self.telemetry.validate()?;
        self.fota.validate()?;
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
            telemetry: TelemetryConfig::default(),
            fota: FotaConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.listen_addr.port() == 0 {
            return Err(ServerError::config_invalid(
                "network.listen_addr",
                "port cannot be 0",
            ));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

// ============================================
// SecurityConfig
// ============================================

/// Security configuration section.
///
/// The defaults reproduce the parameters the deployed fleet was
/// provisioned against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Pre-shared key for the nonce/envelope protocol, hex-encoded.
    #[serde(default = "default_psk_hex")]
    pub psk: String,

    /// Key for firmware chunk tags, hex-encoded. Defaults to the PSK
    /// bytes but is a separate context and may be rotated alone.
    #[serde(default = "default_psk_hex")]
    pub chunk_key: String,

    /// Inactivity after which a device's stored nonce is discarded
    /// (reboot tolerance).
    #[serde(default = "default_nonce_expiry_secs")]
    pub nonce_expiry_secs: i64,

    /// Advertised anti-replay window size. Documented to devices but
    /// not enforced on the inbound side.
    #[serde(default = "default_nonce_window")]
    pub nonce_window: u64,

    /// Inbound nonces below this are treated as first-contact when
    /// allocating outbound nonces, to stay inside a fresh device's
    /// replay window.
    #[serde(default = "default_first_contact_threshold")]
    pub first_contact_threshold: u64,

    /// Initial value of the global outbound nonce counter.
    #[serde(default = "default_outbound_nonce_start")]
    pub outbound_nonce_start: u64,
}

fn default_psk_hex() -> String {
    "c41716a134168f52fbd4be3302fa5a88127ddde749501a199607b4c286ad29b3".to_string()
}

fn default_nonce_expiry_secs() -> i64 {
    75
}

fn default_nonce_window() -> u64 {
    100
}

fn default_first_contact_threshold() -> u64 {
    50
}

fn default_outbound_nonce_start() -> u64 {
    300
}

impl SecurityConfig {
    fn validate(&self) -> Result<()> {
        self.preshared_key()?;
        self.chunk_key()?;

        if self.nonce_expiry_secs <= 0 {
            return Err(ServerError::config_invalid(
                "security.nonce_expiry_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Parses the configured PSK.
    pub fn preshared_key(&self) -> Result<PresharedKey> {
        PresharedKey::from_hex(&self.psk)
            .map_err(|e| ServerError::config_invalid("security.psk", e.to_string()))
    }

    /// Parses the configured chunk key.
    pub fn chunk_key(&self) -> Result<ChunkKey> {
        ChunkKey::from_hex(&self.chunk_key)
            .map_err(|e| ServerError::config_invalid("security.chunk_key", e.to_string()))
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            psk: default_psk_hex(),
            chunk_key: default_psk_hex(),
            nonce_expiry_secs: default_nonce_expiry_secs(),
            nonce_window: default_nonce_window(),
            first_contact_threshold: default_first_contact_threshold(),
            outbound_nonce_start: default_outbound_nonce_start(),
        }
    }
}

// ============================================
// TelemetryConfig
// ============================================

/// Telemetry aggregation configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Inactivity window (seconds) before a device's buffer flushes.
    #[serde(default = "default_flush_debounce_secs")]
    pub flush_debounce_secs: i64,

    /// Downstream sink URL for flushed summaries. Delivery is
    /// best-effort; `None` disables the push entirely.
    #[serde(default)]
    pub sink_url: Option<String>,

    /// Per-delivery timeout for the downstream sink.
    #[serde(default = "default_sink_timeout_secs")]
    pub sink_timeout_secs: u64,
}

fn default_flush_debounce_secs() -> i64 {
    15
}

fn default_sink_timeout_secs() -> u64 {
    2
}

impl TelemetryConfig {
    fn validate(&self) -> Result<()> {
        if self.flush_debounce_secs <= 0 {
            return Err(ServerError::config_invalid(
                "telemetry.flush_debounce_secs",
                "must be greater than 0",
            ));
        }
        if self.sink_timeout_secs == 0 {
            return Err(ServerError::config_invalid(
                "telemetry.sink_timeout_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            flush_debounce_secs: default_flush_debounce_secs(),
            sink_url: None,
            sink_timeout_secs: default_sink_timeout_secs(),
        }
    }
}

// ============================================
// FotaConfig
// ============================================

/// Firmware distribution configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FotaConfig {
    /// Chunk size used when an upload does not specify one.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    1024
}

impl FotaConfig {
    fn validate(&self) -> Result<()> {
        if self.default_chunk_size == 0 {
            return Err(ServerError::config_invalid(
                "fota.default_chunk_size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for FotaConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: default_chunk_size(),
        }
    }
}

// ============================================
// StorageConfig
// ============================================

/// Persistence configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding persisted pending configs and history.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.security.nonce_expiry_secs, 75);
        assert_eq!(config.security.outbound_nonce_start, 300);
        assert_eq!(config.telemetry.flush_debounce_secs, 15);
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [network]
            listen_addr = "0.0.0.0:8080"

            [security]
            psk = "c41716a134168f52fbd4be3302fa5a88127ddde749501a199607b4c286ad29b3"
            nonce_expiry_secs = 75
            nonce_window = 100

            [telemetry]
            flush_debounce_secs = 15
            sink_url = "http://localhost:1880/api/flask_push"
            sink_timeout_secs = 2

            [fota]
            default_chunk_size = 1024

            [storage]
            data_dir = "data"

            [logging]
            level = "info"
        "#;

        let config = ServerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.network.listen_addr.port(), 8080);
        assert_eq!(
            config.telemetry.sink_url.as_deref(),
            Some("http://localhost:1880/api/flask_push")
        );
        assert_eq!(config.fota.default_chunk_size, 1024);
    }

    #[test]
    fn test_rejects_bad_psk() {
        let toml = r#"
            [security]
            psk = "too-short"
        "#;
        assert!(matches!(
            ServerConfig::from_toml_str(toml),
            Err(ServerError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_debounce() {
        let toml = r#"
            [telemetry]
            flush_debounce_secs = 0
        "#;
        assert!(ServerConfig::from_toml_str(toml).is_err());
    }
}
