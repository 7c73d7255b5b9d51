//! Engine-state persistence
//!
//! The engine's Security, Server and Access Control state is serialized by
//! the engine itself; this module only decides when and where the blob is
//! written, using the same store as the option snapshot.

use crate::config::store::{SettingsStore, entry_key};
use crate::engine::Client;
use anyhow::{Context, Result};
use log::{debug, info};
use std::sync::Arc;

#[derive(Clone)]
pub struct StatePersistence {
    store: Arc<dyn SettingsStore>,
    key: String,
}

impl StatePersistence {
    /// State of the client configured under `namespace`
    pub fn new(store: Arc<dyn SettingsStore>, namespace: &str) -> Self {
        Self {
            store,
            key: entry_key(&format!("{}-state", namespace), "engine"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Restore previously persisted state into `client`
    ///
    /// Returns `Ok(false)` when nothing was persisted yet.
    pub fn restore(&self, client: &dyn Client) -> Result<bool> {
        let Some(blob) = self
            .store
            .load(&self.key)
            .context("Failed to read persisted engine state")?
        else {
            debug!("No persisted engine state under '{}'", self.key);
            return Ok(false);
        };

        client
            .restore_state(&blob)
            .context("Failed to restore engine state")?;
        info!("Restored engine state ({} bytes)", blob.len());
        Ok(true)
    }

    /// Write the client's state if it changed since the last write
    ///
    /// Returns whether anything was written.
    pub fn persist_if_required(&self, client: &dyn Client) -> Result<bool> {
        if !client.state_changed() {
            return Ok(false);
        }

        let blob = client.save_state()?;
        self.store
            .save(&self.key, &blob)
            .context("Failed to write engine state")?;
        debug!("Persisted engine state ({} bytes)", blob.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::MemoryStore;
    use crate::engine::simulated::SimulatedEngine;
    use crate::engine::{ClientEngine, DEFAULT_SSID, EngineConfig, ServerInstance};

    fn client_with_server(engine: &SimulatedEngine) -> Arc<dyn Client> {
        let client = engine.create_client(&EngineConfig::new("ep")).unwrap();
        client.install_core_objects(true).unwrap();
        client
            .add_server_instance(&ServerInstance {
                ssid: DEFAULT_SSID,
                lifetime: 300,
                binding: "U".to_string(),
            })
            .unwrap();
        client
    }

    #[test]
    fn test_persist_only_when_changed() {
        let store = Arc::new(MemoryStore::new());
        let persistence = StatePersistence::new(store.clone(), "lwm2m");
        let engine = SimulatedEngine::new();
        let client = client_with_server(&engine);

        assert!(persistence.persist_if_required(client.as_ref()).unwrap());
        assert!(!persistence.persist_if_required(client.as_ref()).unwrap());
        assert!(store.entries().contains_key("lwm2m-state/engine"));
    }

    #[test]
    fn test_restore_into_new_client() {
        let store = Arc::new(MemoryStore::new());
        let persistence = StatePersistence::new(store, "lwm2m");
        let engine = SimulatedEngine::new();

        let first = client_with_server(&engine);
        persistence.persist_if_required(first.as_ref()).unwrap();
        let saved = engine.last_client().unwrap().engine_state();
        drop(first);

        let second = engine.create_client(&EngineConfig::new("ep")).unwrap();
        second.install_core_objects(true).unwrap();
        assert!(persistence.restore(second.as_ref()).unwrap());
        assert_eq!(engine.last_client().unwrap().engine_state(), saved);
    }

    #[test]
    fn test_restore_without_state() {
        let persistence = StatePersistence::new(Arc::new(MemoryStore::new()), "lwm2m");
        let engine = SimulatedEngine::new();
        let client = engine.create_client(&EngineConfig::new("ep")).unwrap();
        assert!(!persistence.restore(client.as_ref()).unwrap());
    }

    #[test]
    fn test_write_failure_reported() {
        let store = Arc::new(MemoryStore::new());
        store.set_write_budget(Some(0));
        let persistence = StatePersistence::new(store, "lwm2m");
        let engine = SimulatedEngine::new();
        let client = client_with_server(&engine);

        assert!(persistence.persist_if_required(client.as_ref()).is_err());
    }
}
