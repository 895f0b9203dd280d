// ============================================
// File: crates/ecowatt-server/src/http/monitoring.rs
// ============================================
//! # Monitoring & Audit Handlers
//!
//! Read-only views over the audit logs and security state for field
//! support tooling, plus the demo-oriented security-log reset.
//!
//! ## Last Modified
//! v0.1.0 - Initial monitoring handlers

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::services::events::EventChannel;

use super::SharedState;

const DEFAULT_LOG_LIMIT: usize = 100;
const RECENT_LOG_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub device_id: Option<String>,
    pub limit: Option<usize>,
}

fn log_response(state: &SharedState, channel: EventChannel, query: &LogsQuery) -> Json<Value> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let (total, logs) = state
        .events
        .query(channel, query.device_id.as_deref(), limit);
    Json(json!({"total": total, "logs": logs}))
}

/// GET `/api/cloud/logs/security`.
pub async fn security_logs(
    State(state): State<SharedState>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    log_response(&state, EventChannel::Security, &query)
}

/// GET `/api/cloud/logs/fota`.
pub async fn fota_logs(
    State(state): State<SharedState>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    log_response(&state, EventChannel::Fota, &query)
}

/// GET `/api/cloud/logs/commands`.
pub async fn command_logs(
    State(state): State<SharedState>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    log_response(&state, EventChannel::Command, &query)
}

/// GET `/api/cloud/logs/all` — recent slice of every log.
pub async fn all_logs(State(state): State<SharedState>) -> Json<Value> {
    let (sec_total, sec_recent) = state.events.query(EventChannel::Security, None, RECENT_LOG_LIMIT);
    let (fota_total, fota_recent) = state.events.query(EventChannel::Fota, None, RECENT_LOG_LIMIT);
    let (cmd_total, cmd_recent) = state.events.query(EventChannel::Command, None, RECENT_LOG_LIMIT);

    Json(json!({
        "security": {"total": sec_total, "recent": sec_recent},
        "fota": {"total": fota_total, "recent": fota_recent},
        "commands": {"total": cmd_total, "recent": cmd_recent},
    }))
}

/// GET `/api/cloud/status` — security configuration and session view.
pub async fn cloud_status(State(state): State<SharedState>) -> Json<Value> {
    let device_nonces: HashMap<String, u64> = state.sessions.device_nonces().into_iter().collect();

    Json(json!({
        "security_enabled": true,
        "nonce_window": state.security.nonce_window,
        "nonce_expiry_seconds": state.security.nonce_expiry_secs,
        "device_nonces": device_nonces,
        "server_nonce_counter": state.sessions.outbound_value(),
        "total_security_events": state.events.security_count(),
        "total_devices_active": state.sessions.active_count(),
    }))
}

/// POST `/api/cloud/security/clear` — demo support.
pub async fn clear_security_logs(State(state): State<SharedState>) -> Json<Value> {
    state.events.clear_security();
    Json(json!({"status": "success", "message": "Security logs cleared"}))
}
