//! Configuration loading for trellis
//!
//! This crate parses and validates trellis.toml files, which carry resolver
//! switches, platform property dictionaries and bundle-set fixtures, and
//! layers them with a global config file and environment overrides.

pub mod merge;
pub mod toml;

// Re-export main types
pub use self::merge::{ConfigLayering, ConfigLoader, ConfigSource};
pub use self::toml::{ResolverConfig, TrellisToml};

use trellis_core::error::TrellisError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, TrellisError>;
