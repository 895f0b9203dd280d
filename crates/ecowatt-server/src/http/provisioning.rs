// ============================================
// File: crates/ecowatt-server/src/http/provisioning.rs
// ============================================
//! # Configuration & Command Handlers
//!
//! The config poll is the header-authenticated surface: devices GET
//! with `X-Nonce`/`X-Timestamp`/`X-MAC` and receive a sealed envelope
//! back. Acks arrive as envelopes whose payload is the ack JSON.
//! Commands ride a simpler path: queued by operators with a
//! millisecond nonce, polled without auth, and their results are
//! replay-checked against the session registry.
//!
//! ## Last Modified
//! v0.1.0 - Initial provisioning handlers

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use ecowatt_common::time::unix_timestamp_millis;
use ecowatt_common::types::DEFAULT_DEVICE_ID;
use ecowatt_core::protocol::SecureEnvelope;

use crate::services::pending::{CommandData, ConfigUpdate, PendingCommand};

use super::{
    credentials, device_from_headers, envelope_response, header_str, looks_like_envelope,
    unauthorized, SharedState,
};

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub device_id: Option<String>,
}

fn device_from_request(headers: &HeaderMap, query: &DeviceQuery) -> String {
    header_str(headers, "Device-ID")
        .map(str::to_string)
        .or_else(|| query.device_id.clone())
        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string())
}

// ============================================
// Configuration
// ============================================

/// GET `/api/inverter/config` — authenticated config poll.
pub async fn device_config(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<DeviceQuery>,
) -> (StatusCode, Json<Value>) {
    let device_id = device_from_request(&headers, &query);

    if let Err(failure) =
        state
            .gate
            .verify_headers(&device_id, uri.path(), credentials(&headers))
    {
        return unauthorized(&failure);
    }

    if let Some(pending) = state.pending.pending_config(&device_id) {
        info!(device_id = %device_id, nonce = pending.nonce, "Sending pending config");
        let payload = serde_json::to_value(&pending).unwrap_or_else(|_| json!({}));
        let envelope = state.gate.seal(&payload, Some(&device_id));
        return envelope_response(&envelope);
    }

    debug!(device_id = %device_id, "No pending config");
    let payload = json!({
        "status": "no_config",
        "nonce": state.sessions.next_raw(),
        "message": "No pending configuration updates",
    });
    let envelope = state.gate.seal(&payload, Some(&device_id));
    envelope_response(&envelope)
}

/// GET `/api/inverter/config/simple` — unsecured poll for debugging
/// the configuration flow.
pub async fn device_config_simple(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<DeviceQuery>,
) -> Json<Value> {
    let device_id = device_from_request(&headers, &query);

    match state.pending.pending_config(&device_id) {
        Some(pending) => {
            info!(device_id = %device_id, "Sending pending config (simple endpoint)");
            Json(serde_json::to_value(&pending).unwrap_or_else(|_| json!({})))
        }
        None => Json(json!({
            "status": "no_config",
            "message": "No pending configuration updates",
        })),
    }
}

/// POST `/api/inverter/config/ack` — device acknowledgment.
pub async fn config_ack(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let device_id = device_from_headers(&headers, DEFAULT_DEVICE_ID);

    let ack: Value = if looks_like_envelope(&body) {
        match serde_json::from_value::<SecureEnvelope>(body.clone()) {
            Ok(envelope) => {
                if let Err(failure) = state.gate.verify_envelope_mac_only(&device_id, &envelope) {
                    return unauthorized(&failure);
                }
                // Ack payloads travel as plain JSON text inside the
                // envelope; fall back to the outer body if unparsable.
                serde_json::from_str(&envelope.payload).unwrap_or(body)
            }
            Err(_) => body,
        }
    } else {
        body
    };

    let all_success = ack.get("all_success").and_then(Value::as_bool);
    info!(device_id = %device_id, all_success = ?all_success, "Config acknowledgment received");

    state.pending.record_config_ack(&device_id, ack);

    let payload = json!({"status": "success", "message": "Acknowledgment received"});
    // No device context here: the ack response nonce is not part of
    // the device's validated sequence.
    let envelope = state.gate.seal(&payload, None);
    envelope_response(&envelope)
}

#[derive(Debug, Deserialize)]
pub struct SendConfigRequest {
    pub device_id: Option<String>,
    pub sampling_interval: Option<u64>,
    pub registers: Option<Vec<u16>>,
}

/// POST `/api/cloud/config/send` — operator queues a config update.
pub async fn send_config(
    State(state): State<SharedState>,
    Json(req): Json<SendConfigRequest>,
) -> Json<Value> {
    let device_id = req.device_id.unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string());
    let nonce = state.sessions.next_raw();

    let update = ConfigUpdate {
        sampling_interval: req.sampling_interval,
        registers: req.registers.filter(|r| !r.is_empty()),
    };

    info!(
        device_id = %device_id,
        nonce = nonce,
        interval = ?update.sampling_interval,
        "Config update queued"
    );
    state.pending.queue_config(&device_id, nonce, update.clone());

    Json(json!({
        "status": "success",
        "message": format!("Configuration update queued for {device_id}"),
        "nonce": nonce,
        "config": update,
    }))
}

/// GET `/api/cloud/config/history`.
pub async fn config_history(
    State(state): State<SharedState>,
    Query(query): Query<DeviceQuery>,
) -> Json<Value> {
    let (total, history) = state.pending.config_history(query.device_id.as_deref());
    Json(json!({"total": total, "history": history}))
}

// ============================================
// Commands
// ============================================

#[derive(Debug, Deserialize)]
pub struct SendCommandRequest {
    pub device_id: Option<String>,
    pub action: Option<String>,
    pub target_register: Option<Value>,
    pub value: Option<Value>,
    #[serde(default)]
    pub encrypted: bool,
}

/// POST `/api/cloud/command/send` — operator queues a command.
pub async fn send_command(
    State(state): State<SharedState>,
    Json(req): Json<SendCommandRequest>,
) -> Json<Value> {
    let device_id = req.device_id.unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string());
    let action = req.action.unwrap_or_else(|| "write_register".to_string());
    // Millisecond nonce: disjoint from the session counter space.
    let nonce = unix_timestamp_millis() as u64;

    let data = CommandData {
        action: action.clone(),
        target_register: req.target_register,
        value: req.value,
    };
    let command_json = serde_json::to_string(&data).unwrap_or_default();
    let mac = state.gate.sign_payload(&command_json);

    let command = if req.encrypted {
        state.events.security(
            &device_id,
            "command_encrypted",
            format!("Command encrypted for nonce {nonce}"),
        );
        PendingCommand {
            nonce,
            command: None,
            encrypted: true,
            payload: Some(BASE64.encode(command_json.as_bytes())),
            mac,
        }
    } else {
        PendingCommand {
            nonce,
            command: Some(data.clone()),
            encrypted: false,
            payload: None,
            mac,
        }
    };

    state.pending.queue_command(&device_id, command, &data);
    state.events.command(
        &device_id,
        "command_queued",
        format!(
            "Action: {action}, Register: {}, Value: {}, Encrypted: {}",
            data.target_register.clone().unwrap_or(Value::Null),
            data.value.clone().unwrap_or(Value::Null),
            req.encrypted
        ),
    );

    Json(json!({
        "status": "success",
        "message": format!("Command queued for {device_id}"),
        "nonce": nonce,
        "encrypted": req.encrypted,
    }))
}

/// GET `/api/inverter/command` — device polls for a pending command.
pub async fn pending_command(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<DeviceQuery>,
) -> Json<Value> {
    let device_id = device_from_request(&headers, &query);

    match state.pending.pending_command(&device_id) {
        Some(command) => {
            info!(device_id = %device_id, nonce = command.nonce, "Sending pending command");
            Json(serde_json::to_value(&command).unwrap_or_else(|_| json!({})))
        }
        None => Json(json!({})),
    }
}

/// POST `/api/inverter/command/result` — device reports execution.
pub async fn command_result(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let device_id = device_from_headers(&headers, DEFAULT_DEVICE_ID);

    if let Some(nonce) = body.get("nonce").and_then(Value::as_u64) {
        if !state
            .gate
            .check_payload_nonce(&device_id, nonce, "replay_attack_command_result")
        {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({"status": "error", "message": "Invalid nonce (replay attack)"})),
            );
        }
    }

    let nonce = body.get("nonce").and_then(Value::as_u64);
    let cmd_result = body.get("command_result").cloned().unwrap_or_default();
    let executed_at = cmd_result
        .get("executed_at")
        .and_then(Value::as_str)
        .unwrap_or("N/A")
        .to_string();
    let modbus_response = cmd_result
        .get("modbus_response")
        .cloned()
        .unwrap_or_else(|| json!("N/A"));
    let modbus_frame = cmd_result.get("modbus_frame").and_then(Value::as_str);

    if let Some(frame) = modbus_frame {
        state
            .events
            .command(&device_id, "modbus_frame_sent", format!("Frame: {frame}"));
    }

    let (status, cleared) = state.pending.record_command_result(&device_id, body.clone());

    state.events.command(
        &device_id,
        &format!("command_result_{status}"),
        format!("Nonce: {nonce:?}, Executed: {executed_at}, Modbus Response: {modbus_response}"),
    );
    if cleared {
        state.events.command(
            &device_id,
            "command_completed",
            format!("Nonce: {nonce:?}, Status: {status}"),
        );
    }

    (
        StatusCode::OK,
        Json(json!({"status": "success", "message": "Command result received"})),
    )
}

/// GET `/api/cloud/command/history`.
pub async fn command_history(
    State(state): State<SharedState>,
    Query(query): Query<DeviceQuery>,
) -> Json<Value> {
    let (total, history) = state.pending.command_history(query.device_id.as_deref());
    Json(json!({"total": total, "history": history}))
}

// ============================================
// Unified device poll
// ============================================

/// POST `/api/device/status` — one poll for config + command + FOTA.
pub async fn device_status(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let device_id = body
        .get("device_id")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_DEVICE_ID)
        .to_string();

    let mut response = serde_json::Map::new();

    if let Some(pending) = state.pending.pending_config(&device_id) {
        if let Ok(value) = serde_json::to_value(&pending) {
            response.insert("config_update".to_string(), value);
        }
    }
    if let Some(command) = state.pending.pending_command(&device_id) {
        if let Ok(value) = serde_json::to_value(&command) {
            response.insert("command".to_string(), value);
        }
    }
    if let Some(manifest) = state.fota.manifest() {
        if let Some(next_chunk) = state.fota.next_chunk_hint(&device_id) {
            response.insert(
                "fota".to_string(),
                json!({"manifest": manifest, "next_chunk": next_chunk}),
            );
        }
    }

    Json(Value::Object(response))
}
