//! Network bring-up before the client is started
//!
//! Radio drivers are not part of this crate. The transports here stand in
//! for them: they check the configuration and log what a real link would
//! do, then report success.

use crate::config::ClientConfig;
use crate::config::settings::TransportKind;
use anyhow::Result;
use log::{info, warn};

/// Link used to reach the server
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Bring the link up using the current configuration
    fn connect(&self, config: &ClientConfig) -> Result<()>;
}

/// Wi-Fi station using the `ssid` and `password` options
///
/// Simulated; only logs the association it would attempt.
#[derive(Default)]
pub struct WifiTransport;

impl Transport for WifiTransport {
    fn name(&self) -> &str {
        "wifi"
    }

    fn connect(&self, config: &ClientConfig) -> Result<()> {
        let Some(ssid) = config.wifi_ssid().filter(|ssid| !ssid.is_empty()) else {
            warn!("Wi-Fi SSID is not configured, skipping network connection");
            return Ok(());
        };
        let secured = config
            .wifi_password()
            .is_some_and(|password| !password.is_empty());

        info!(
            "Connecting to Wi-Fi network '{}' ({})",
            ssid,
            if secured { "WPA2-PSK" } else { "open" }
        );
        Ok(())
    }
}

/// Cellular modem link
///
/// Simulated; only logs the registration wait.
#[derive(Default)]
pub struct CellularTransport;

impl Transport for CellularTransport {
    fn name(&self) -> &str {
        "cellular"
    }

    fn connect(&self, _config: &ClientConfig) -> Result<()> {
        info!("Waiting for cellular network registration");
        Ok(())
    }
}

/// Transport strategy for the configured kind
pub fn for_kind(kind: TransportKind) -> Box<dyn Transport> {
    match kind {
        TransportKind::Wifi => Box::new(WifiTransport),
        TransportKind::Cellular => Box::new(CellularTransport),
    }
}
