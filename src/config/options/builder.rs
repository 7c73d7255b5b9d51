//! Fluent builder API for creating option definitions

use super::types::{FLAG_CAPACITY, OptionDefinition, OptionKind, UINT32_CAPACITY};
use anyhow::Result;

/// Builder for creating option definitions with a fluent API
pub struct OptionDefBuilder {
    key: String,
    description: Option<String>,
    kind: Option<OptionKind>,
    capacity: usize,
    default: Option<String>,
}

impl OptionDefBuilder {
    /// Create a new builder for the option with the given key
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            description: None,
            kind: None,
            capacity: 0,
            default: None,
        }
    }

    /// Set the description shown next to the value
    pub fn description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    /// Define as a bounded string with the given buffer capacity
    pub fn string_type(mut self, default: &str, capacity: usize) -> Self {
        self.kind = Some(OptionKind::String);
        self.capacity = capacity;
        self.default = Some(default.to_string());
        self
    }

    /// Define as a `y`/`n` flag
    pub fn flag_type(mut self, default: bool) -> Self {
        self.kind = Some(OptionKind::Flag);
        self.capacity = FLAG_CAPACITY;
        self.default = Some(if default { "y" } else { "n" }.to_string());
        self
    }

    /// Define as a decimal 32-bit unsigned integer
    pub fn uint32_type(mut self, default: u32) -> Self {
        self.kind = Some(OptionKind::UnsignedInt32);
        self.capacity = UINT32_CAPACITY;
        self.default = Some(default.to_string());
        self
    }

    /// Build the option definition
    ///
    /// Returns an error if required fields are missing or if the default
    /// would not pass the option's own validator.
    pub fn build(self) -> Result<OptionDefinition> {
        let description = self
            .description
            .ok_or_else(|| anyhow::anyhow!("description is required for '{}'", self.key))?;
        let kind = self.kind.ok_or_else(|| {
            anyhow::anyhow!("type is required (use string_type, flag_type or uint32_type)")
        })?;
        let default = self
            .default
            .ok_or_else(|| anyhow::anyhow!("default value is required"))?;

        if self.capacity == 0 {
            anyhow::bail!("Option '{}' must have a non-zero capacity", self.key);
        }

        let def = OptionDefinition {
            key: self.key,
            description,
            kind,
            capacity: self.capacity,
            default,
        };

        if let Err(e) = def.validate(&def.default) {
            anyhow::bail!("Default value of '{}' is invalid: {}", def.key, e);
        }

        Ok(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint32_builder() {
        let def = OptionDefBuilder::new("lifetime")
            .description("Device lifetime")
            .uint32_type(50)
            .build()
            .unwrap();

        assert_eq!(def.key, "lifetime");
        assert_eq!(def.kind, OptionKind::UnsignedInt32);
        assert_eq!(def.capacity, 11);
        assert_eq!(def.default, "50");
    }

    #[test]
    fn test_flag_builder() {
        let def = OptionDefBuilder::new("bootstrap")
            .description("Bootstrap")
            .flag_type(false)
            .build()
            .unwrap();

        assert_eq!(def.capacity, 2);
        assert_eq!(def.default, "n");
    }

    #[test]
    fn test_default_too_long() {
        let result = OptionDefBuilder::new("psk")
            .description("PSK")
            .string_type("0123456789", 8)
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_missing_description() {
        let result = OptionDefBuilder::new("uri").string_type("", 128).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_type() {
        let result = OptionDefBuilder::new("uri").description("URI").build();
        assert!(result.is_err());
    }
}
