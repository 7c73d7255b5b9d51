//! Core types for the options system

use thiserror::Error;

/// Buffer size needed to hold any `u32` in decimal plus the terminator
pub const UINT32_CAPACITY: usize = 11;

/// Buffer size of a flag: one of `y`/`n` plus the terminator
pub const FLAG_CAPACITY: usize = 2;

/// Reason a proposed option value was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Value too long, maximum length is {max}")]
    TooLong { max: usize },

    #[error("Value invalid, 'y' or 'n' is allowed")]
    InvalidFlag,

    #[error("Argument is not a valid 32-bit unsigned integer")]
    InvalidUint32,

    #[error("Value must not contain a NUL character")]
    EmbeddedNul,
}

/// Kind of an option, selecting its validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Flag,
    UnsignedInt32,
}

impl OptionKind {
    /// Validate a proposed value against this kind and the option's buffer capacity
    ///
    /// Lengths are counted in bytes and include the trailing terminator, so a
    /// capacity of 32 admits at most 31 bytes of payload.
    pub fn validate(&self, value: &str, capacity: usize) -> Result<(), ValidationError> {
        if value.as_bytes().contains(&0) {
            return Err(ValidationError::EmbeddedNul);
        }

        match self {
            OptionKind::String => validate_string(value, capacity),
            OptionKind::Flag => validate_flag(value),
            OptionKind::UnsignedInt32 => {
                validate_string(value, capacity)?;
                parse_uint32(value)
                    .map(|_| ())
                    .ok_or(ValidationError::InvalidUint32)
            }
        }
    }
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionKind::String => write!(f, "string"),
            OptionKind::Flag => write!(f, "flag"),
            OptionKind::UnsignedInt32 => write!(f, "uint32"),
        }
    }
}

fn validate_string(value: &str, capacity: usize) -> Result<(), ValidationError> {
    if value.len() + 1 > capacity {
        return Err(ValidationError::TooLong {
            max: capacity.saturating_sub(1),
        });
    }
    Ok(())
}

fn validate_flag(value: &str) -> Result<(), ValidationError> {
    match value {
        "y" | "n" => Ok(()),
        _ => Err(ValidationError::InvalidFlag),
    }
}

/// Strict base-10 parse: digits only, no sign, no surrounding whitespace
pub fn parse_uint32(value: &str) -> Option<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u32>().ok()
}

/// Parse a validated flag value
pub fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "y" => Some(true),
        "n" => Some(false),
        _ => None,
    }
}

/// Complete definition of an option
#[derive(Debug, Clone)]
pub struct OptionDefinition {
    /// Key used by the `config set` command and as the persisted entry suffix
    pub key: String,

    /// Human-readable description shown by `config show`
    pub description: String,

    pub kind: OptionKind,

    /// Size of the value buffer in bytes, terminator included
    pub capacity: usize,

    /// Compiled-in default value
    pub default: String,
}

impl OptionDefinition {
    /// Validate that a value is valid for this option
    pub fn validate(&self, value: &str) -> Result<(), ValidationError> {
        self.kind.validate(value, self.capacity)
    }
}
