// ============================================
// File: crates/ecowatt-server/src/services/pending.rs
// ============================================
//! # Pending Config & Command Queues
//!
//! ## Creation Reason
//! Operators queue configuration updates and one-off commands for
//! devices; devices pick them up on their next poll and acknowledge
//! with the nonce the item was queued under. At most one item of each
//! kind is outstanding per device — a newer queue replaces the older.
//!
//! ## Lifecycle
//! ```text
//! operator queue ──► pending (persisted for configs)
//!                       │ device polls
//!                       ▼
//!                 device processes
//!                       │ ack/result with matching nonce
//!                       ▼
//!                 pending cleared, history updated
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Config nonces come from the global outbound counter; command
//!   nonces are unix milliseconds. The two value spaces are disjoint
//!   by construction and must stay that way, or ack matching breaks.
//! - Only pending configs and config history persist to disk;
//!   command state is intentionally ephemeral.
//!
//! ## Last Modified
//! v0.1.0 - Initial pending queues

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use ecowatt_common::time::iso_timestamp;

use crate::storage::JsonStore;

const CONFIGS_DOC: &str = "pending_configs";
const HISTORY_DOC: &str = "config_history";

/// History entries kept on disk.
const PERSISTED_HISTORY_LIMIT: usize = 100;
/// History entries returned per query.
const QUERY_HISTORY_LIMIT: usize = 50;

fn is_false(v: &bool) -> bool {
    !*v
}

// ============================================
// Config types
// ============================================

/// The configuration payload an operator queues for a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdate {
    /// New acquisition interval, seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_interval: Option<u64>,
    /// Registers the device should sample.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registers: Option<Vec<u16>>,
}

/// A queued config update, keyed by its assigned nonce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfig {
    pub nonce: u64,
    pub config_update: ConfigUpdate,
}

/// One row of config history: either a queued update or a device ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigHistoryEntry {
    pub timestamp: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<Vec<Value>>,
}

// ============================================
// Command types
// ============================================

/// The command body a device executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandData {
    pub action: String,
    pub target_register: Option<Value>,
    pub value: Option<Value>,
}

/// A queued command, as served to the device.
///
/// Plain commands carry `command`; marker-encrypted commands carry
/// `encrypted` + base64 `payload` instead. `mac` always covers the
/// serialized command body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommand {
    pub nonce: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandData>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub mac: String,
}

/// One row of command history, updated in place when results arrive.
#[derive(Debug, Clone, Serialize)]
pub struct CommandHistoryEntry {
    pub device_id: String,
    pub timestamp: String,
    pub nonce: u64,
    pub action: String,
    pub target_register: Option<Value>,
    pub value: Option<Value>,
    pub status: String,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modbus_response: Option<Value>,
}

// ============================================
// PendingStore
// ============================================

/// Per-device pending queues plus acknowledgment/result stores.
pub struct PendingStore {
    configs: Mutex<HashMap<String, PendingConfig>>,
    config_acks: Mutex<Vec<Value>>,
    config_history: Mutex<Vec<ConfigHistoryEntry>>,
    commands: Mutex<HashMap<String, PendingCommand>>,
    command_results: Mutex<Vec<Value>>,
    command_history: Mutex<Vec<CommandHistoryEntry>>,
    store: JsonStore,
}

impl PendingStore {
    /// Creates the store, loading persisted configs and history.
    #[must_use]
    pub fn load(store: JsonStore) -> Self {
        let configs: HashMap<String, PendingConfig> = store.load_or_default(CONFIGS_DOC);
        let history: Vec<ConfigHistoryEntry> = store.load_or_default(HISTORY_DOC);

        Self {
            configs: Mutex::new(configs),
            config_acks: Mutex::new(Vec::new()),
            config_history: Mutex::new(history),
            commands: Mutex::new(HashMap::new()),
            command_results: Mutex::new(Vec::new()),
            command_history: Mutex::new(Vec::new()),
            store,
        }
    }

    fn persist_configs(&self) {
        let configs = self.configs.lock().clone();
        if let Err(e) = self.store.save(CONFIGS_DOC, &configs) {
            warn!("Failed to persist pending configs: {e}");
        }
    }

    fn persist_history(&self) {
        let history = self.config_history.lock();
        let tail: Vec<&ConfigHistoryEntry> = history
            .iter()
            .skip(history.len().saturating_sub(PERSISTED_HISTORY_LIMIT))
            .collect();
        if let Err(e) = self.store.save(HISTORY_DOC, &tail) {
            warn!("Failed to persist config history: {e}");
        }
    }

    // ========================================
    // Configs
    // ========================================

    /// Queues a config update for a device, replacing any outstanding
    /// one, and persists both the queue and the history.
    pub fn queue_config(&self, device_id: &str, nonce: u64, update: ConfigUpdate) {
        self.configs.lock().insert(
            device_id.to_string(),
            PendingConfig {
                nonce,
                config_update: update.clone(),
            },
        );
        self.persist_configs();

        self.config_history.lock().push(ConfigHistoryEntry {
            timestamp: iso_timestamp(),
            device_id: device_id.to_string(),
            nonce: Some(nonce),
            config: Some(update),
            status: Some("queued".to_string()),
            all_success: None,
            accepted: None,
            rejected: None,
            unchanged: None,
        });
        self.persist_history();
    }

    /// The pending config for a device, if any.
    #[must_use]
    pub fn pending_config(&self, device_id: &str) -> Option<PendingConfig> {
        self.configs.lock().get(device_id).cloned()
    }

    /// Records a device acknowledgment, clearing the pending config
    /// when the ack's nonce matches the queued one.
    pub fn record_config_ack(&self, device_id: &str, mut ack: Value) {
        let received_at = iso_timestamp();
        let ack_nonce = ack.get("nonce").and_then(Value::as_u64);
        let all_success = ack.get("all_success").and_then(Value::as_bool);
        let lists = |key: &str| -> Option<Vec<Value>> {
            ack.get("config_ack")
                .and_then(|c| c.get(key))
                .and_then(Value::as_array)
                .cloned()
        };

        self.config_history.lock().push(ConfigHistoryEntry {
            timestamp: received_at.clone(),
            device_id: device_id.to_string(),
            nonce: ack_nonce,
            config: None,
            status: None,
            all_success,
            accepted: lists("accepted").or_else(|| Some(Vec::new())),
            rejected: lists("rejected").or_else(|| Some(Vec::new())),
            unchanged: lists("unchanged").or_else(|| Some(Vec::new())),
        });
        self.persist_history();

        if let Value::Object(map) = &mut ack {
            map.insert("device_id".to_string(), Value::String(device_id.to_string()));
            map.insert("received_at".to_string(), Value::String(received_at));
        }
        self.config_acks.lock().push(ack);

        let mut configs = self.configs.lock();
        if let Some(pending) = configs.get(device_id) {
            if Some(pending.nonce) == ack_nonce {
                configs.remove(device_id);
                drop(configs);
                self.persist_configs();
            }
        }
    }

    /// Config history, optionally filtered by device. Returns
    /// `(matching total, most recent entries)`.
    #[must_use]
    pub fn config_history(&self, device_id: Option<&str>) -> (usize, Vec<ConfigHistoryEntry>) {
        let history = self.config_history.lock();
        let filtered: Vec<ConfigHistoryEntry> = match device_id {
            Some(id) => history
                .iter()
                .filter(|h| h.device_id == id)
                .cloned()
                .collect(),
            None => history.clone(),
        };
        let total = filtered.len();
        let tail = filtered
            .into_iter()
            .skip(total.saturating_sub(QUERY_HISTORY_LIMIT))
            .collect();
        (total, tail)
    }

    // ========================================
    // Commands
    // ========================================

    /// Queues a command for a device and records its history row.
    pub fn queue_command(&self, device_id: &str, command: PendingCommand, data: &CommandData) {
        self.command_history.lock().push(CommandHistoryEntry {
            device_id: device_id.to_string(),
            timestamp: iso_timestamp(),
            nonce: command.nonce,
            action: data.action.clone(),
            target_register: data.target_register.clone(),
            value: data.value.clone(),
            status: "pending".to_string(),
            encrypted: command.encrypted,
            executed_at: None,
            modbus_response: None,
        });
        self.commands
            .lock()
            .insert(device_id.to_string(), command);
    }

    /// The pending command for a device, if any.
    #[must_use]
    pub fn pending_command(&self, device_id: &str) -> Option<PendingCommand> {
        self.commands.lock().get(device_id).cloned()
    }

    /// Records a command result, updating the matching history row
    /// and clearing the pending command when its nonce matches.
    ///
    /// Returns `(status, cleared)` — the reported status string and
    /// whether a pending command was completed by this result.
    pub fn record_command_result(&self, device_id: &str, mut result: Value) -> (String, bool) {
        let received_at = iso_timestamp();
        let nonce = result.get("nonce").and_then(Value::as_u64);
        let cmd_result = result.get("command_result").cloned().unwrap_or_default();
        let status = cmd_result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let executed_at = cmd_result
            .get("executed_at")
            .and_then(Value::as_str)
            .map(String::from);
        let modbus_response = cmd_result.get("modbus_response").cloned();

        if let Value::Object(map) = &mut result {
            map.insert("device_id".to_string(), Value::String(device_id.to_string()));
            map.insert("received_at".to_string(), Value::String(received_at));
        }
        self.command_results.lock().push(result);

        if let Some(nonce) = nonce {
            let mut history = self.command_history.lock();
            if let Some(entry) = history
                .iter_mut()
                .find(|e| e.device_id == device_id && e.nonce == nonce)
            {
                entry.status = status.clone();
                entry.executed_at = executed_at;
                entry.modbus_response = modbus_response;
            }
        }

        let mut commands = self.commands.lock();
        let cleared = match (nonce, commands.get(device_id)) {
            (Some(nonce), Some(pending)) if pending.nonce == nonce => {
                commands.remove(device_id);
                true
            }
            _ => false,
        };
        (status, cleared)
    }

    /// Command history, optionally filtered by device. Returns
    /// `(matching total, most recent entries)`.
    #[must_use]
    pub fn command_history(&self, device_id: Option<&str>) -> (usize, Vec<CommandHistoryEntry>) {
        let history = self.command_history.lock();
        let filtered: Vec<CommandHistoryEntry> = match device_id {
            Some(id) => history
                .iter()
                .filter(|h| h.device_id == id)
                .cloned()
                .collect(),
            None => history.clone(),
        };
        let total = filtered.len();
        let tail = filtered
            .into_iter()
            .skip(total.saturating_sub(QUERY_HISTORY_LIMIT))
            .collect();
        (total, tail)
    }
}

// ============================================
// Tests
// ============================================
