// ============================================
// File: crates/ecowatt-server/src/http/mod.rs
// ============================================
//! # HTTP Surface
//!
//! ## Creation Reason
//! The device fleet and the operator tooling both speak plain HTTP
//! with fixed paths; this module wires those paths to the services.
//! Handlers stay thin: authentication gate → service call → JSON.
//!
//! ## Route Map
//! ```text
//! device-facing                         operator-facing
//! ─────────────────────────────         ──────────────────────────────
//! POST /api/upload                      POST /api/cloud/config/send
//! POST /api/upload/meta                 GET  /api/cloud/config/history
//! GET  /api/inverter/config             POST /api/cloud/command/send
//! GET  /api/inverter/config/simple      GET  /api/cloud/command/history
//! POST /api/inverter/config/ack         POST /api/cloud/fota/upload
//! GET  /api/inverter/command            GET  /api/cloud/fota/status
//! POST /api/inverter/command/result     POST /api/cloud/fota/rollback
//! GET  /api/inverter/fota/manifest      GET  /api/cloud/logs/{...}
//! GET  /api/inverter/fota/chunk         GET  /api/cloud/status
//! POST /api/inverter/fota/status        POST /api/cloud/security/clear
//! GET  /api/inverter/fota/rollback-status
//! POST /api/device/status               GET  /api/uploads
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Paths are a contract with deployed firmware; renaming one
//!   strands devices in the field.
//! - Authentication failures map to 401 with a `details` string, bad
//!   payloads to 400 — never to a 5xx.
//!
//! ## Last Modified
//! v0.1.0 - Initial HTTP surface

pub mod fota;
pub mod monitoring;
pub mod provisioning;
pub mod upload;

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use ecowatt_core::protocol::SecureEnvelope;

use crate::config::SecurityConfig;
use crate::services::auth::{AuthFailure, AuthGate, HeaderCredentials};
use crate::services::events::EventLog;
use crate::services::fota::FotaManager;
use crate::services::pending::PendingStore;
use crate::services::session::SessionRegistry;
use crate::services::telemetry::TelemetryAggregator;

/// Shared handler state.
pub struct AppState {
    pub gate: AuthGate,
    pub sessions: Arc<SessionRegistry>,
    pub aggregator: Arc<TelemetryAggregator>,
    pub fota: Arc<FotaManager>,
    pub pending: Arc<PendingStore>,
    pub events: Arc<EventLog>,
    pub security: SecurityConfig,
    pub default_chunk_size: usize,
}

/// State handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Builds the full router over the shared state.
pub fn router(state: SharedState) -> Router {
    Router::new()
        // Telemetry
        .route("/api/upload", post(upload::upload))
        .route("/api/upload/meta", post(upload::upload_meta))
        .route("/api/uploads", get(upload::uploads))
        // Configuration
        .route("/api/inverter/config", get(provisioning::device_config))
        .route(
            "/api/inverter/config/simple",
            get(provisioning::device_config_simple),
        )
        .route("/api/inverter/config/ack", post(provisioning::config_ack))
        .route("/api/cloud/config/send", post(provisioning::send_config))
        .route(
            "/api/cloud/config/history",
            get(provisioning::config_history),
        )
        // Commands
        .route("/api/cloud/command/send", post(provisioning::send_command))
        .route("/api/inverter/command", get(provisioning::pending_command))
        .route(
            "/api/inverter/command/result",
            post(provisioning::command_result),
        )
        .route(
            "/api/cloud/command/history",
            get(provisioning::command_history),
        )
        // Unified poll
        .route("/api/device/status", post(provisioning::device_status))
        // FOTA
        .route("/api/cloud/fota/upload", post(fota::upload_firmware))
        .route("/api/inverter/fota/manifest", get(fota::manifest))
        .route("/api/inverter/fota/chunk", get(fota::chunk))
        .route("/api/inverter/fota/status", post(fota::device_report))
        .route("/api/cloud/fota/status", get(fota::cloud_status))
        .route("/api/cloud/fota/rollback", post(fota::request_rollback))
        .route(
            "/api/inverter/fota/rollback-status",
            get(fota::rollback_status),
        )
        // Monitoring
        .route("/api/cloud/logs/security", get(monitoring::security_logs))
        .route("/api/cloud/logs/fota", get(monitoring::fota_logs))
        .route("/api/cloud/logs/commands", get(monitoring::command_logs))
        .route("/api/cloud/logs/all", get(monitoring::all_logs))
        .route("/api/cloud/status", get(monitoring::cloud_status))
        .route(
            "/api/cloud/security/clear",
            post(monitoring::clear_security_logs),
        )
        .with_state(state)
}

// ============================================
// Shared handler helpers
// ============================================

/// Reads a header as a string slice, dropping non-UTF-8 values.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolves the device id from the `Device-ID` header with an
/// endpoint-specific fallback.
pub(crate) fn device_from_headers(headers: &HeaderMap, fallback: &str) -> String {
    header_str(headers, "Device-ID")
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Extracts the header-auth credentials from a request.
pub(crate) fn credentials(headers: &HeaderMap) -> HeaderCredentials<'_> {
    HeaderCredentials {
        nonce: header_str(headers, "X-Nonce"),
        timestamp: header_str(headers, "X-Timestamp"),
        mac: header_str(headers, "X-MAC"),
    }
}

/// Maps an authentication failure to the 401 wire shape.
pub(crate) fn unauthorized(failure: &AuthFailure) -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "Unauthorized",
            "details": failure.details,
        })),
    )
}

/// Serializes an outbound envelope to the response body.
pub(crate) fn envelope_response(envelope: &SecureEnvelope) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(serde_json::to_value(envelope).unwrap_or_else(|_| json!({}))),
    )
}

/// Checks whether a JSON body carries the secured envelope fields.
pub(crate) fn looks_like_envelope(body: &Value) -> bool {
    body.get("payload").is_some() && body.get("nonce").is_some() && body.get("mac").is_some()
}
