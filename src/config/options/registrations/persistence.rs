//! Persistence toggle registration

use super::keys;
use crate::config::options::{OptionDefBuilder, OptionsRegistry};
use anyhow::Result;

/// Register the switch enabling engine-state persistence
pub fn register(registry: &OptionsRegistry) -> Result<()> {
    registry.register(
        OptionDefBuilder::new(keys::USE_PERSISTENCE)
            .description("Use persistence")
            .flag_type(false)
            .build()?,
    )?;

    log::debug!("Registered {} persistence options", 1);
    Ok(())
}
