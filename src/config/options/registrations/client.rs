//! Server connection options registration

use super::keys;
use crate::config::options::{OptionDefBuilder, OptionsRegistry};
use anyhow::Result;

pub const DEFAULT_SERVER_URI: &str = "coaps://localhost:5684";
pub const DEFAULT_LIFETIME: u32 = 50;
pub const DEFAULT_PSK: &str = "test";
pub const ENDPOINT_CAPACITY: usize = 64;

/// Register the options describing how to reach the server
pub fn register(registry: &OptionsRegistry, endpoint_prefix: &str, device_id: Option<&str>) -> Result<()> {
    registry.register(
        OptionDefBuilder::new(keys::URI)
            .description("LwM2M Server URI")
            .string_type(DEFAULT_SERVER_URI, 128)
            .build()?,
    )?;

    registry.register(
        OptionDefBuilder::new(keys::LIFETIME)
            .description("Device lifetime")
            .uint32_type(DEFAULT_LIFETIME)
            .build()?,
    )?;

    let endpoint = default_endpoint_name(endpoint_prefix, device_id);
    registry.register(
        OptionDefBuilder::new(keys::ENDPOINT)
            .description("Endpoint name")
            .string_type(&endpoint, ENDPOINT_CAPACITY)
            .build()?,
    )?;

    registry.register(
        OptionDefBuilder::new(keys::PSK)
            .description("PSK")
            .string_type(DEFAULT_PSK, 32)
            .build()?,
    )?;

    registry.register(
        OptionDefBuilder::new(keys::BOOTSTRAP)
            .description("Bootstrap")
            .flag_type(false)
            .build()?,
    )?;

    log::debug!("Registered {} client options", 5);
    Ok(())
}

/// `<prefix>-<device id>`, or the bare prefix when the id is unknown
///
/// The result is cut to fit the endpoint buffer.
pub fn default_endpoint_name(prefix: &str, device_id: Option<&str>) -> String {
    let mut name = match device_id {
        Some(id) if !id.is_empty() => format!("{}-{}", prefix, id),
        _ => prefix.to_string(),
    };

    let max = ENDPOINT_CAPACITY - 1;
    if name.len() > max {
        let mut cut = max;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_with_id() {
        assert_eq!(default_endpoint_name("demo", Some("1a2b")), "demo-1a2b");
    }

    #[test]
    fn test_endpoint_without_id() {
        assert_eq!(default_endpoint_name("demo", None), "demo");
        assert_eq!(default_endpoint_name("demo", Some("")), "demo");
    }

    #[test]
    fn test_endpoint_truncated_to_capacity() {
        let id = "f".repeat(100);
        let name = default_endpoint_name("demo", Some(&id));
        assert_eq!(name.len(), ENDPOINT_CAPACITY - 1);
        assert!(name.starts_with("demo-fff"));
    }
}
