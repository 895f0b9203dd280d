// ============================================
// File: crates/ecowatt-server/src/services/mod.rs
// ============================================
//! # Business Logic Services
//!
//! ## Main Functionality
//! - [`session`]: per-device nonce state and outbound allocation
//! - [`auth`]: the authentication gate over both auth surfaces
//! - [`telemetry`]: inactivity-debounced aggregation engine
//! - [`fota`]: firmware manifest/chunk distribution and status
//! - [`pending`]: per-device config/command queues with persistence
//! - [`events`]: security/FOTA/command audit logs
//!
//! ## Last Modified
//! v0.1.0 - Initial services module

pub mod auth;
pub mod events;
pub mod fota;
pub mod pending;
pub mod session;
pub mod telemetry;

pub use auth::AuthGate;
pub use events::EventLog;
pub use fota::FotaManager;
pub use pending::PendingStore;
pub use session::SessionRegistry;
pub use telemetry::TelemetryAggregator;
