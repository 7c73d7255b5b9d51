//! Options system for typed, bounded, persisted configuration
//!
//! The options system provides:
//! - Kind-specific validation (string, flag, 32-bit unsigned)
//! - Fixed-capacity buffers matching the persisted entry format
//! - Declaration-ordered registry for display and persistence

pub mod builder;
pub mod registrations;
pub mod registry;
pub mod types;

pub use builder::OptionDefBuilder;
pub use registrations::keys;
pub use registry::OptionsRegistry;
pub use types::{OptionDefinition, OptionKind, ValidationError};
