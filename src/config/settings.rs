//! Application settings file
//!
//! These are deployment-time settings (which capabilities the device has,
//! where the settings database lives, loop timing). They are read once at
//! boot from a TOML file and are distinct from the user-tunable options
//! managed by [`crate::config::ClientConfig`].

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR_NAME: &str = "lwm2m-agent";

/// Network transport the device uses to reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Wifi,
    Cellular,
}

/// Optional features present on this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub transport: TransportKind,

    /// GPS receiver with priority-mode tuning
    #[serde(default)]
    pub gps: bool,

    /// Persisting and restoring engine state across runs
    #[serde(default = "default_true")]
    pub persistence: bool,

    /// Location assistance requests sent from the maintenance job
    #[serde(default)]
    pub location_services: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            gps: false,
            persistence: true,
            location_services: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub capabilities: Capabilities,

    /// SQLite file holding persisted options and engine state
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Root of all persisted keys
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_endpoint_prefix")]
    pub endpoint_prefix: String,

    /// Overrides the hardware id used for the default endpoint name
    #[serde(default)]
    pub device_id: Option<String>,

    /// Upper bound on one event-loop wait, and so on stop latency
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_interval_ms")]
    pub maintenance_interval_ms: u64,

    /// Every n-th maintenance cycle also runs the slow update group
    #[serde(default = "default_periodic_divisor")]
    pub periodic_divisor: u64,
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "lwm2m".to_string()
}

fn default_endpoint_prefix() -> String {
    "lwm2m-agent".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_periodic_divisor() -> u64 {
    5
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::default(),
            database_path: None,
            namespace: default_namespace(),
            endpoint_prefix: default_endpoint_prefix(),
            device_id: None,
            poll_interval_ms: default_interval_ms(),
            maintenance_interval_ms: default_interval_ms(),
            periodic_divisor: default_periodic_divisor(),
        }
    }
}

impl AppSettings {
    /// Directory holding the settings file and the database
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "linux") {
            dirs::config_dir()
                .context("Failed to get XDG config directory")?
                .join(APP_DIR_NAME)
        } else {
            dirs::home_dir()
                .context("Failed to get home directory")?
                .join(format!(".{}", APP_DIR_NAME))
        };

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
            info!("Created config directory: {:?}", config_dir);
        }

        Ok(config_dir)
    }

    /// Load settings from `path`, or from the default location when `None`
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_dir()?.join("settings.toml"),
        };
        debug!("Loading settings from: {:?}", path);

        if !path.exists() {
            info!("Settings file doesn't exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse settings file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: AppSettings = toml::from_str(content)?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> Result<()> {
        if self.namespace.is_empty() || self.namespace.contains('/') {
            anyhow::bail!("namespace must be non-empty and must not contain '/'");
        }
        if self.poll_interval_ms == 0 || self.maintenance_interval_ms == 0 {
            anyhow::bail!("poll and maintenance intervals must be non-zero");
        }
        if self.periodic_divisor == 0 {
            anyhow::bail!("periodic_divisor must be non-zero");
        }
        Ok(())
    }

    /// Resolved database path, defaulting into the config directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("settings.db")),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings = AppSettings::from_toml("").unwrap();
        assert_eq!(settings.namespace, "lwm2m");
        assert_eq!(settings.periodic_divisor, 5);
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.capabilities.transport, TransportKind::Wifi);
        assert!(settings.capabilities.persistence);
    }

    #[test]
    fn test_capabilities_parsed() {
        let settings = AppSettings::from_toml(
            r#"
            device_id = "abc123"

            [capabilities]
            transport = "cellular"
            gps = true
            persistence = false
            "#,
        )
        .unwrap();

        assert_eq!(settings.device_id.as_deref(), Some("abc123"));
        assert_eq!(settings.capabilities.transport, TransportKind::Cellular);
        assert!(settings.capabilities.gps);
        assert!(!settings.capabilities.persistence);
    }

    #[test]
    fn test_rejects_bad_namespace() {
        assert!(AppSettings::from_toml(r#"namespace = "a/b""#).is_err());
    }

    #[test]
    fn test_rejects_zero_divisor() {
        assert!(AppSettings::from_toml("periodic_divisor = 0").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = AppSettings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.endpoint_prefix, "lwm2m-agent");
    }
}
