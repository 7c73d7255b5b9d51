//! Persisted client configuration
//!
//! This module provides:
//! - The option table and its validators ([`options`])
//! - Key-value persistence backends ([`store`])
//! - Deployment settings read at boot ([`settings`])
//! - [`ClientConfig`], the in-memory snapshot of all option values

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub mod options;
pub mod settings;
pub mod store;

use options::types::{parse_flag, parse_uint32};
use options::{OptionDefinition, OptionKind, OptionsRegistry, ValidationError, keys};
use store::{SettingsStore, entry_key};

/// Errors from typed option accessors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Option '{0}' is not registered")]
    UnknownOption(String),

    #[error("Option '{key}' is a {actual} option, not {expected}")]
    WrongKind {
        key: String,
        expected: OptionKind,
        actual: OptionKind,
    },

    /// A stored value no longer passes its own validator
    #[error("Option '{key}' holds an unparseable value '{value}'")]
    InvariantViolation { key: String, value: String },
}

/// How the boot sequence obtained the current snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    Restored,
    /// The storage subsystem could not be brought up
    StoreUnavailable,
    /// Persisted entries were missing or malformed
    RestoredDefaults,
}

/// One option together with its value buffer
///
/// The buffer is always exactly `capacity` bytes: the value, a NUL
/// terminator, then zero padding. This is also the persisted format.
#[derive(Debug, Clone)]
struct OptionSlot {
    def: OptionDefinition,
    buffer: Vec<u8>,
}

impl OptionSlot {
    fn with_default(def: OptionDefinition) -> Self {
        let mut slot = Self {
            buffer: vec![0; def.capacity],
            def,
        };
        let default = slot.def.default.clone();
        slot.write(&default);
        slot
    }

    fn write(&mut self, value: &str) {
        self.buffer.fill(0);
        self.buffer[..value.len()].copy_from_slice(value.as_bytes());
    }

    fn value(&self) -> &str {
        let end = self
            .buffer
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.buffer.len());
        // Only validated UTF-8 is ever written into a buffer
        std::str::from_utf8(&self.buffer[..end]).unwrap_or_default()
    }

    /// Decode a persisted blob, `None` if it is not a valid buffer for this option
    fn decode(&self, blob: &[u8]) -> Option<String> {
        if blob.len() != self.def.capacity {
            return None;
        }
        let end = blob.iter().position(|&b| b == 0)?;
        let value = std::str::from_utf8(&blob[..end]).ok()?;
        self.def.validate(value).ok()?;
        Some(value.to_string())
    }
}

/// Current values of all registered options
pub struct ClientConfig {
    namespace: String,
    registry: Arc<OptionsRegistry>,
    store: Arc<dyn SettingsStore>,
    slots: RwLock<Vec<OptionSlot>>,
}

impl ClientConfig {
    /// Create a configuration holding the defaults of every registered option
    pub fn new(namespace: &str, registry: Arc<OptionsRegistry>, store: Arc<dyn SettingsStore>) -> Self {
        let slots = registry
            .list_all()
            .into_iter()
            .map(OptionSlot::with_default)
            .collect();

        Self {
            namespace: namespace.to_string(),
            registry,
            store,
            slots: RwLock::new(slots),
        }
    }

    pub fn registry(&self) -> &OptionsRegistry {
        &self.registry
    }

    /// Backing store, shared with engine-state persistence
    pub fn store(&self) -> Arc<dyn SettingsStore> {
        self.store.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Reset every option to its compiled-in default
    pub fn initialize_defaults(&self) {
        let mut slots = self.slots.write().unwrap();
        for slot in slots.iter_mut() {
            let default = slot.def.default.clone();
            slot.write(&default);
        }
        debug!("Initialized {} options with defaults", slots.len());
    }

    /// Boot sequence: defaults, storage init, then restore
    pub fn boot(&self) -> BootOutcome {
        self.initialize_defaults();

        if let Err(e) = self.store.init() {
            warn!("Failed to initialize settings subsystem: {:#}", e);
            return BootOutcome::StoreUnavailable;
        }

        if self.load_from_persistence() {
            info!("Configuration successfully restored");
            BootOutcome::Restored
        } else {
            warn!("Restoring default configuration");
            BootOutcome::RestoredDefaults
        }
    }

    /// Replace the snapshot with the persisted one
    ///
    /// All entries must be present and valid. Otherwise the whole snapshot is
    /// reset to defaults and `false` is returned; a partial restore never
    /// happens.
    pub fn load_from_persistence(&self) -> bool {
        match self.read_persisted() {
            Ok(values) => {
                let mut slots = self.slots.write().unwrap();
                for (slot, value) in slots.iter_mut().zip(values) {
                    slot.write(&value);
                }
                true
            }
            Err(e) => {
                debug!("Persisted configuration not usable: {:#}", e);
                self.initialize_defaults();
                false
            }
        }
    }

    fn read_persisted(&self) -> Result<Vec<String>> {
        let slots = self.slots.read().unwrap().clone();
        let mut values = Vec::with_capacity(slots.len());

        for slot in &slots {
            let key = entry_key(&self.namespace, &slot.def.key);
            let blob = self
                .store
                .load(&key)?
                .ok_or_else(|| anyhow::anyhow!("Entry '{}' is absent", key))?;
            let value = slot
                .decode(&blob)
                .ok_or_else(|| anyhow::anyhow!("Entry '{}' is malformed", key))?;
            values.push(value);
        }

        Ok(values)
    }

    /// Raw value of `key`, `None` if no such option is registered
    pub fn get(&self, key: &str) -> Option<String> {
        self.slots
            .read()
            .unwrap()
            .iter()
            .find(|slot| slot.def.key == key)
            .map(|slot| slot.value().to_string())
    }

    /// Validate and store a new value
    ///
    /// On rejection the option keeps its previous value.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not a registered option. Callers accepting keys
    /// from users must check [`OptionsRegistry::contains`] first.
    pub fn set(&self, key: &str, value: &str) -> Result<(), ValidationError> {
        let mut slots = self.slots.write().unwrap();
        let Some(slot) = slots.iter_mut().find(|slot| slot.def.key == key) else {
            unreachable!("Invalid option key: {}", key);
        };

        slot.def.validate(value)?;
        slot.write(value);
        debug!("Set option: {} = {}", key, value);
        Ok(())
    }

    /// Persist every option
    ///
    /// If any write fails, every entry of the snapshot is deleted so that the
    /// next boot sees either a complete snapshot or none at all.
    pub fn save(&self) -> Result<()> {
        let slots = self.slots.read().unwrap().clone();

        let result = slots.iter().try_for_each(|slot| {
            self.store
                .save(&entry_key(&self.namespace, &slot.def.key), &slot.buffer)
        });

        if let Err(e) = result {
            warn!("Cannot save the config: {:#}", e);
            for slot in &slots {
                let key = entry_key(&self.namespace, &slot.def.key);
                if let Err(e) = self.store.delete(&key) {
                    warn!("Failed to roll back '{}': {:#}", key, e);
                }
            }
            return Err(e.context("Configuration was not saved"));
        }

        info!("Saved {} options", slots.len());
        Ok(())
    }

    /// `(description, value)` pairs in declaration order
    pub fn describe(&self) -> Vec<(String, String)> {
        self.slots
            .read()
            .unwrap()
            .iter()
            .map(|slot| (slot.def.description.clone(), slot.value().to_string()))
            .collect()
    }

    fn typed_value(&self, key: &str, expected: OptionKind) -> Result<String, ConfigError> {
        let slots = self.slots.read().unwrap();
        let slot = slots
            .iter()
            .find(|slot| slot.def.key == key)
            .ok_or_else(|| ConfigError::UnknownOption(key.to_string()))?;

        if slot.def.kind != expected {
            return Err(ConfigError::WrongKind {
                key: key.to_string(),
                expected,
                actual: slot.def.kind,
            });
        }
        Ok(slot.value().to_string())
    }

    /// Value of an unsigned 32-bit option
    pub fn get_u32(&self, key: &str) -> Result<u32, ConfigError> {
        let value = self.typed_value(key, OptionKind::UnsignedInt32)?;
        parse_uint32(&value).ok_or_else(|| ConfigError::InvariantViolation {
            key: key.to_string(),
            value,
        })
    }

    /// Value of a flag option
    pub fn get_flag(&self, key: &str) -> Result<bool, ConfigError> {
        let value = self.typed_value(key, OptionKind::Flag)?;
        parse_flag(&value).ok_or_else(|| ConfigError::InvariantViolation {
            key: key.to_string(),
            value,
        })
    }

    fn get_registered(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::UnknownOption(key.to_string()))
    }

    pub fn server_uri(&self) -> Result<String, ConfigError> {
        self.get_registered(keys::URI)
    }

    pub fn endpoint_name(&self) -> Result<String, ConfigError> {
        self.get_registered(keys::ENDPOINT)
    }

    pub fn psk(&self) -> Result<String, ConfigError> {
        self.get_registered(keys::PSK)
    }

    pub fn lifetime(&self) -> Result<u32, ConfigError> {
        self.get_u32(keys::LIFETIME)
    }

    pub fn is_bootstrap(&self) -> Result<bool, ConfigError> {
        self.get_flag(keys::BOOTSTRAP)
    }

    /// Wi-Fi SSID, `None` on devices without Wi-Fi
    pub fn wifi_ssid(&self) -> Option<String> {
        self.get(keys::SSID)
    }

    pub fn wifi_password(&self) -> Option<String> {
        self.get(keys::PASSWORD)
    }

    /// GPS priority-mode timeout, `None` on devices without GPS
    pub fn gps_prio_mode_timeout(&self) -> Option<Result<u32, ConfigError>> {
        self.registry
            .contains(keys::GPS_PRIO_MODE_TIMEOUT)
            .then(|| self.get_u32(keys::GPS_PRIO_MODE_TIMEOUT))
    }

    pub fn gps_prio_mode_cooldown(&self) -> Option<Result<u32, ConfigError>> {
        self.registry
            .contains(keys::GPS_PRIO_MODE_COOLDOWN)
            .then(|| self.get_u32(keys::GPS_PRIO_MODE_COOLDOWN))
    }

    /// Whether engine state should be persisted; `false` without the capability
    pub fn use_persistence(&self) -> bool {
        if !self.registry.contains(keys::USE_PERSISTENCE) {
            return false;
        }
        self.get_flag(keys::USE_PERSISTENCE).unwrap_or_else(|e| {
            warn!("{}", e);
            false
        })
    }
}
