//! Registry of option definitions in declaration order

use super::types::OptionDefinition;
use anyhow::Result;
use std::sync::RwLock;

/// Thread-safe registry of option definitions
///
/// Unlike a plain map, the registry remembers the order options were
/// registered in; display and persistence iterate in that order.
pub struct OptionsRegistry {
    definitions: RwLock<Vec<OptionDefinition>>,
}

impl OptionsRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(Vec::new()),
        }
    }

    /// Register a new option definition
    ///
    /// Returns an error if an option with the same key is already registered
    pub fn register(&self, def: OptionDefinition) -> Result<()> {
        let mut defs = self.definitions.write().unwrap();
        if defs.iter().any(|existing| existing.key == def.key) {
            anyhow::bail!("Option '{}' is already registered", def.key);
        }
        log::debug!("Registered option: {} ({})", def.key, def.description);
        defs.push(def);
        Ok(())
    }

    /// Get option definition by key
    pub fn get(&self, key: &str) -> Option<OptionDefinition> {
        self.definitions
            .read()
            .unwrap()
            .iter()
            .find(|def| def.key == key)
            .cloned()
    }

    /// Check if an option is registered
    pub fn contains(&self, key: &str) -> bool {
        self.definitions
            .read()
            .unwrap()
            .iter()
            .any(|def| def.key == key)
    }

    /// Get total number of registered options
    pub fn count(&self) -> usize {
        self.definitions.read().unwrap().len()
    }

    /// List all option definitions in declaration order
    pub fn list_all(&self) -> Vec<OptionDefinition> {
        self.definitions.read().unwrap().clone()
    }

    /// List all keys in declaration order
    pub fn keys(&self) -> Vec<String> {
        self.definitions
            .read()
            .unwrap()
            .iter()
            .map(|def| def.key.clone())
            .collect()
    }
}

impl Default for OptionsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
