//! GPS priority-mode options registration

use super::keys;
use crate::config::options::{OptionDefBuilder, OptionsRegistry};
use anyhow::Result;

/// Register the GPS priority-mode timing options (seconds)
pub fn register(registry: &OptionsRegistry) -> Result<()> {
    registry.register(
        OptionDefBuilder::new(keys::GPS_PRIO_MODE_TIMEOUT)
            .description("GPS priority mode timeout")
            .uint32_type(0)
            .build()?,
    )?;

    registry.register(
        OptionDefBuilder::new(keys::GPS_PRIO_MODE_COOLDOWN)
            .description("GPS priority mode cooldown")
            .uint32_type(1800)
            .build()?,
    )?;

    log::debug!("Registered {} GPS options", 2);
    Ok(())
}
