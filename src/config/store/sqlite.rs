//! SQLite-backed store
//!
//! The rest of the crate is synchronous, so the store owns a small
//! current-thread runtime and blocks on each query. It must therefore not
//! be called from inside another tokio runtime.

use super::SettingsStore;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::runtime::Runtime;

/// Where the database lives
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

pub struct SqliteStore {
    runtime: Runtime,
    location: Location,
    pool: OnceLock<SqlitePool>,
}

impl SqliteStore {
    /// Store backed by the database file at `path`, created on `init`
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_location(Location::File(path.to_path_buf()))
    }

    /// Store backed by a private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::with_location(Location::Memory)
    }

    fn with_location(location: Location) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build storage runtime")?;

        Ok(Self {
            runtime,
            location,
            pool: OnceLock::new(),
        })
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get()
            .ok_or_else(|| anyhow::anyhow!("Settings database is not initialized"))
    }

    /// A single connection keeps an in-memory database alive and shared,
    /// so for that case it must never be recycled
    fn pool_options(location: &Location) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new().max_connections(1);
        match location {
            Location::File(_) => options,
            Location::Memory => options.idle_timeout(None).max_lifetime(None),
        }
    }

    async fn connect(location: &Location) -> Result<SqlitePool> {
        let options = match location {
            Location::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
            Location::Memory => SqliteConnectOptions::new().in_memory(true),
        };

        let pool = Self::pool_options(location)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {:?}", location))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&pool)
        .await
        .context("Failed to create settings table")?;

        log::debug!("Connected to settings database: {:?}", location);
        Ok(pool)
    }
}

impl SettingsStore for SqliteStore {
    fn init(&self) -> Result<()> {
        if self.pool.get().is_some() {
            return Ok(());
        }

        let pool = self.runtime.block_on(Self::connect(&self.location))?;
        // A concurrent init may have won; its pool is equivalent
        let _ = self.pool.set(pool);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let pool = self.pool()?;
        self.runtime
            .block_on(
                sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM settings WHERE key = ?")
                    .bind(key)
                    .fetch_optional(pool),
            )
            .with_context(|| format!("Failed to read '{}' from database", key))
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        let pool = self.pool()?;
        self.runtime
            .block_on(
                sqlx::query(
                    "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
                )
                .bind(key)
                .bind(value)
                .execute(pool),
            )
            .with_context(|| format!("Failed to write '{}' to database", key))?;

        log::debug!("Stored {} bytes under {}", value.len(), key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let pool = self.pool()?;
        let result = self
            .runtime
            .block_on(
                sqlx::query("DELETE FROM settings WHERE key = ?")
                    .bind(key)
                    .execute(pool),
            )
            .with_context(|| format!("Failed to delete '{}' from database", key))?;

        if result.rows_affected() > 0 {
            log::debug!("Deleted {}", key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_uninitialized_store_errors() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.load("lwm2m/uri").is_err());
    }

    #[test]
    fn test_in_memory_connection_never_recycled() {
        let options = SqliteStore::pool_options(&Location::Memory);
        assert_eq!(options.get_max_connections(), 1);
        assert_eq!(options.get_idle_timeout(), None);
        assert_eq!(options.get_max_lifetime(), None);
    }

    #[test]
    fn test_blob_roundtrip_in_memory() {
        let store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();

        assert_eq!(store.load("lwm2m/psk").unwrap(), None);
        store.save("lwm2m/psk", b"test\0\0\0\0").unwrap();
        store.save("lwm2m/psk", b"key\0\0\0\0\0").unwrap();
        assert_eq!(store.load("lwm2m/psk").unwrap(), Some(b"key\0\0\0\0\0".to_vec()));

        store.delete("lwm2m/psk").unwrap();
        assert_eq!(store.load("lwm2m/psk").unwrap(), None);
    }

    #[test]
    fn test_file_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.init().unwrap();
            store.save("lwm2m/bootstrap", b"y\0").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        store.init().unwrap();
        assert_eq!(store.load("lwm2m/bootstrap").unwrap(), Some(b"y\0".to_vec()));
    }
}
