//! In-memory store, used for `--in-memory` runs and in tests

use super::SettingsStore;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Map-backed store with optional fault injection
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    faults: Mutex<Faults>,
}

#[derive(Default)]
struct Faults {
    fail_init: bool,
    fail_loads: bool,
    /// Number of saves that may still succeed; `None` is unlimited
    write_budget: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `init` fail, as when the flash subsystem is unavailable
    pub fn fail_init(&self, fail: bool) {
        self.faults.lock().unwrap().fail_init = fail;
    }

    /// Make every `load` fail
    pub fn fail_loads(&self, fail: bool) {
        self.faults.lock().unwrap().fail_loads = fail;
    }

    /// Allow only `budget` more successful saves
    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.faults.lock().unwrap().write_budget = budget;
    }

    /// Copy of all stored entries
    pub fn entries(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl SettingsStore for MemoryStore {
    fn init(&self) -> Result<()> {
        if self.faults.lock().unwrap().fail_init {
            anyhow::bail!("Storage subsystem unavailable");
        }
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.faults.lock().unwrap().fail_loads {
            anyhow::bail!("Failed to read '{}'", key);
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        {
            let mut faults = self.faults.lock().unwrap();
            if let Some(budget) = faults.write_budget.as_mut() {
                if *budget == 0 {
                    anyhow::bail!("Failed to write '{}': no space left", key);
                }
                *budget -= 1;
            }
        }

        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        log::debug!("Stored {} bytes under {}", value.len(), key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_delete() {
        let store = MemoryStore::new();
        store.save("ns/a", b"x\0").unwrap();
        assert_eq!(store.load("ns/a").unwrap(), Some(b"x\0".to_vec()));

        store.delete("ns/a").unwrap();
        assert_eq!(store.load("ns/a").unwrap(), None);
        store.delete("ns/a").unwrap();
    }

    #[test]
    fn test_write_budget() {
        let store = MemoryStore::new();
        store.set_write_budget(Some(1));

        store.save("ns/a", b"1").unwrap();
        assert!(store.save("ns/b", b"2").is_err());
        assert_eq!(store.entries().len(), 1);
    }
}
