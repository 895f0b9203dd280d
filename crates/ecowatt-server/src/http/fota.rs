// ============================================
// File: crates/ecowatt-server/src/http/fota.rs
// ============================================
//! # Firmware Distribution Handlers
//!
//! Upload is all-or-nothing: a hash mismatch publishes nothing.
//! Manifest and chunk fetches are unauthenticated, stateless reads —
//! chunk integrity is carried by the per-chunk HMAC the device
//! verifies itself.
//!
//! ## Last Modified
//! v0.1.0 - Initial FOTA handlers

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ServerError;
use crate::services::fota::StatusReport;

use super::{device_from_headers, SharedState};

#[derive(Debug, Deserialize)]
pub struct FirmwareUploadRequest {
    pub version: Option<String>,
    pub size: Option<u64>,
    pub hash: Option<String>,
    pub chunk_size: Option<usize>,
    pub firmware_data: Option<String>,
}

/// POST `/api/cloud/fota/upload` — operator uploads an image.
pub async fn upload_firmware(
    State(state): State<SharedState>,
    Json(req): Json<FirmwareUploadRequest>,
) -> (StatusCode, Json<Value>) {
    let (Some(version), Some(size), Some(hash), Some(firmware_b64)) =
        (req.version, req.size, req.hash, req.firmware_data)
    else {
        state
            .events
            .fota("cloud", "upload_failed", "Missing required fields");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing required fields"})),
        );
    };
    let chunk_size = req.chunk_size.unwrap_or(state.default_chunk_size);

    let image = match BASE64.decode(firmware_b64.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            state
                .events
                .fota("cloud", "upload_failed", format!("Invalid base64: {e}"));
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("Invalid base64: {e}")})),
            );
        }
    };
    state.events.fota(
        "cloud",
        "firmware_decoded",
        format!("Size: {} bytes", image.len()),
    );

    match state.fota.upload(&version, size, &hash, chunk_size, &image) {
        Ok(total_chunks) => {
            info!(version = %version, chunks = total_chunks, "Firmware uploaded");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "success",
                    "message": "Firmware uploaded and chunked",
                    "manifest": state.fota.manifest(),
                    "total_chunks": total_chunks,
                })),
            )
        }
        Err(ServerError::FirmwareIntegrity { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Hash mismatch"})),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

/// GET `/api/inverter/fota/manifest` — device polls for the manifest.
pub async fn manifest(State(state): State<SharedState>) -> Json<Value> {
    match state.fota.manifest() {
        Some(manifest) => Json(json!({"fota": {"manifest": manifest}})),
        None => Json(json!({})),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub chunk_number: Option<usize>,
}

/// GET `/api/inverter/fota/chunk?chunk_number=N` — stateless fetch.
pub async fn chunk(
    State(state): State<SharedState>,
    Query(query): Query<ChunkQuery>,
) -> (StatusCode, Json<Value>) {
    let index = query.chunk_number.unwrap_or(0);
    match state.fota.chunk(index) {
        Some(chunk) => (
            StatusCode::OK,
            Json(serde_json::to_value(&chunk).unwrap_or_else(|_| json!({}))),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Chunk not found"})),
        ),
    }
}

/// POST `/api/inverter/fota/status` — device status report.
pub async fn device_report(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let device_id = device_from_headers(&headers, ecowatt_common::types::DEFAULT_DEVICE_ID);

    let report: StatusReport = body
        .get("fota_status")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    info!(
        device_id = %device_id,
        chunk = ?report.chunk_received,
        verified = ?report.verified,
        boot = ?report.boot_status,
        rollback = report.rollback,
        "FOTA status report"
    );
    state.fota.report_status(&device_id, report);

    Json(json!({"status": "success"}))
}

/// GET `/api/cloud/fota/status` — operator dashboard snapshot.
pub async fn cloud_status(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "manifest": state.fota.manifest(),
        "total_chunks": state.fota.total_chunks(),
        "device_status": state.fota.device_statuses(),
    }))
}

/// POST `/api/cloud/fota/rollback` — operator requests a rollback.
pub async fn request_rollback(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let device_id = body
        .get("device_id")
        .and_then(Value::as_str)
        .unwrap_or("all")
        .to_string();
    let reason = body
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("Manual rollback requested")
        .to_string();

    info!(device_id = %device_id, reason = %reason, "Rollback requested");
    state.fota.request_rollback(&device_id, &reason);

    Json(json!({
        "success": true,
        "message": format!("Rollback requested for device: {device_id}"),
        "device_id": device_id,
        "reason": reason,
    }))
}

/// GET `/api/inverter/fota/rollback-status` — one-shot flag poll.
pub async fn rollback_status(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Json<Value> {
    let device_id = device_from_headers(&headers, "unknown");

    match state.fota.check_rollback(&device_id) {
        Some(reason) => {
            info!(device_id = %device_id, "Rollback flag sent to device");
            Json(json!({"rollback_required": true, "reason": reason}))
        }
        None => Json(json!({"rollback_required": false})),
    }
}
