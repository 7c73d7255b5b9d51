//! Key-value persistence backends for options and engine state
//!
//! A store maps string keys to opaque byte blobs. It knows nothing about
//! option kinds or capacities; those checks live in
//! [`crate::config::ClientConfig`].

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;

/// Persistence backend keyed by `"<namespace>/<name>"` strings
pub trait SettingsStore: Send + Sync {
    /// Bring the storage subsystem up
    ///
    /// Called once during boot before any other operation.
    fn init(&self) -> Result<()>;

    /// Read the blob stored under `key`, `None` if absent
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous blob
    fn save(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// Build the persisted key for `name` below `namespace`
pub fn entry_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
