//! Wi-Fi credential options registration

use super::keys;
use crate::config::options::{OptionDefBuilder, OptionsRegistry};
use anyhow::Result;

/// Register the Wi-Fi credentials
pub fn register(registry: &OptionsRegistry) -> Result<()> {
    registry.register(
        OptionDefBuilder::new(keys::SSID)
            .description("Wi-Fi SSID")
            .string_type("", 32)
            .build()?,
    )?;

    registry.register(
        OptionDefBuilder::new(keys::PASSWORD)
            .description("Wi-Fi password")
            .string_type("", 32)
            .build()?,
    )?;

    log::debug!("Registered {} network options", 2);
    Ok(())
}
