// ============================================
// File: crates/ecowatt-server/src/storage.rs
// ============================================
//! # JSON File Store
//!
//! ## Creation Reason
//! Pending configuration updates must survive a server restart — a
//! device that polls after a redeploy still has to receive the config
//! an operator queued before it. The contract is deliberately small:
//! load named documents at startup, save after every mutation.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Writes are synchronous `std::fs` on the request path. The files
//!   are a few KB and mutations are operator-rate, so this is fine;
//!   do not move hot-path state here.
//! - A corrupt or missing file loads as the default value, never an
//!   error — losing a pending config beats refusing to start.
//!
//! ## Last Modified
//! v0.1.0 - Initial JSON store

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, ServerError};

/// Named-document JSON persistence under a data directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Creates a store rooted at `dir`. The directory is created on
    /// first save, not here.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Loads a named document, falling back to `T::default()` when
    /// the file is absent or unreadable.
    #[must_use]
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.path_for(name);
        if !path.exists() {
            info!("No saved {} found, starting fresh", name);
            return T::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(value) => {
                    info!("Loaded {} from {}", name, path.display());
                    value
                }
                Err(e) => {
                    warn!("Discarding corrupt {}: {}", path.display(), e);
                    T::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                T::default()
            }
        }
    }

    /// Saves a named document, creating the data directory if needed.
    ///
    /// # Errors
    /// [`ServerError::Storage`] on directory creation, serialization,
    /// or write failure.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path_for(name);
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ServerError::storage(self.dir.display().to_string(), e.to_string()))?;
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| ServerError::storage(path.display().to_string(), e.to_string()))?;
        std::fs::write(&path, json)
            .map_err(|e| ServerError::storage(path.display().to_string(), e.to_string()))?;
        Ok(())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let mut data = HashMap::new();
        data.insert("EcoWatt001".to_string(), 42u64);
        store.save("pending_configs", &data).unwrap();

        let loaded: HashMap<String, u64> = store.load_or_default("pending_configs");
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let loaded: HashMap<String, u64> = store.load_or_default("never_saved");
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let store = JsonStore::new(dir.path());

        let loaded: HashMap<String, u64> = store.load_or_default("broken");
        assert!(loaded.is_empty());
    }
}
