//! Registration of all client options
//!
//! Options are registered in the order they are displayed and persisted.
//! Capability-gated groups are only registered when the device has the
//! matching capability.

pub mod client;
pub mod gps;
pub mod network;
pub mod persistence;

use super::OptionsRegistry;
use crate::config::settings::{AppSettings, TransportKind};
use anyhow::Result;

/// Option keys accepted by `config set`
pub mod keys {
    pub const SSID: &str = "ssid";
    pub const PASSWORD: &str = "password";
    pub const URI: &str = "uri";
    pub const LIFETIME: &str = "lifetime";
    pub const ENDPOINT: &str = "endpoint";
    pub const PSK: &str = "psk";
    pub const BOOTSTRAP: &str = "bootstrap";
    pub const GPS_PRIO_MODE_TIMEOUT: &str = "gps_prio_mode_timeout";
    pub const GPS_PRIO_MODE_COOLDOWN: &str = "gps_prio_mode_cooldown";
    pub const USE_PERSISTENCE: &str = "use_persistence";
}

/// Register all options for a device with the given settings
///
/// `device_id` feeds the default endpoint name.
pub fn register_all(
    registry: &OptionsRegistry,
    settings: &AppSettings,
    device_id: Option<&str>,
) -> Result<()> {
    let caps = &settings.capabilities;

    if caps.transport == TransportKind::Wifi {
        network::register(registry)?;
    }
    client::register(registry, &settings.endpoint_prefix, device_id)?;
    if caps.gps {
        gps::register(registry)?;
    }
    if caps.persistence {
        persistence::register(registry)?;
    }

    log::debug!("Registered {} options in total", registry.count());
    Ok(())
}
