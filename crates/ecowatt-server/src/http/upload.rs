// ============================================
// File: crates/ecowatt-server/src/http/upload.rs
// ============================================
//! # Telemetry Upload Handlers
//!
//! `/api/upload` accepts either a secured JSON envelope (payload =
//! base64 of the packed binary samples) or, for legacy firmware, the
//! raw binary body directly. Decoded samples go to the aggregator;
//! the response acknowledges immediately — flushing happens later,
//! after the inactivity window.
//!
//! ## Last Modified
//! v0.1.0 - Initial upload handlers

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use ecowatt_core::protocol::{decode_samples, SecureEnvelope};

use super::{device_from_headers, unauthorized, SharedState};

/// POST `/api/upload` — telemetry ingest.
pub async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let device_id = device_from_headers(&headers, "Unknown-Device");

    let content_type = super::header_str(&headers, header::CONTENT_TYPE.as_str()).unwrap_or("");
    let payload: Vec<u8> = if content_type.contains("application/json") {
        match serde_json::from_slice::<SecureEnvelope>(&body) {
            Ok(envelope) => {
                debug!(device_id = %device_id, "Received secured upload envelope");
                if let Err(failure) = state.gate.authenticate_envelope(&device_id, &envelope) {
                    return unauthorized(&failure);
                }
                // Upload payloads are always base64 of the packed
                // binary samples, independent of the encrypted marker.
                match BASE64.decode(envelope.payload.as_bytes()) {
                    Ok(raw) => raw,
                    Err(_) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": "Invalid payload encoding"})),
                        );
                    }
                }
            }
            Err(e) => {
                // Not a recognizable envelope: treat the body as a
                // legacy raw-binary upload rather than dropping data.
                warn!(device_id = %device_id, "Unparseable upload envelope: {e}");
                body.to_vec()
            }
        }
    } else {
        body.to_vec()
    };

    let samples = decode_samples(&payload);
    debug!(
        device_id = %device_id,
        bytes = payload.len(),
        samples = samples.len(),
        "Upload decoded"
    );

    state.aggregator.ingest(&device_id, &samples, payload.len());

    (
        StatusCode::OK,
        Json(json!({"status": "success", "received": payload.len()})),
    )
}

/// GET `/api/uploads` — flushed records plus device benchmark meta.
pub async fn uploads(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "uploads": state.aggregator.records(),
        "benchmarks": state.aggregator.benchmarks(),
    }))
}

/// POST `/api/upload/meta` — device-computed benchmark record.
pub async fn upload_meta(
    State(state): State<SharedState>,
    Json(meta): Json<Value>,
) -> (StatusCode, Json<Value>) {
    info!(
        method = meta.get("compression_method").and_then(serde_json::Value::as_str),
        num_samples = meta.get("num_samples").and_then(serde_json::Value::as_u64),
        ratio = meta.get("compression_ratio").and_then(serde_json::Value::as_f64),
        "Benchmark meta received"
    );
    state.aggregator.push_benchmark(meta.clone());
    (
        StatusCode::OK,
        Json(json!({"status": "success", "benchmark": meta})),
    )
}
