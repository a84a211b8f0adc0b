//! Error types and result aliases for trellis operations.
//!
//! Provides a unified error type for contract and input errors across the
//! trellis crates with actionable error messages. Resolution outcomes are not
//! errors; see [`crate::types::ResolverError`].

use crate::types::{FilterError, VersionError};
use thiserror::Error;

/// Unified error type for all trellis operations
#[derive(Error, Debug)]
pub enum TrellisError {
    // Resolver contract errors
    #[error("Resolver has no backing state")]
    NoState,

    #[error("Bundle {bundle_id} is not known to the state")]
    UnknownBundle { bundle_id: u64 },

    #[error("Bundle {bundle_id} is already present in the state")]
    DuplicateBundle { bundle_id: u64 },

    // Input errors
    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] VersionError),

    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    // Config errors
    #[error("Failed to parse trellis.toml: {message} at line {line}, column {column}")]
    TomlParse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Configuration field '{field}' is invalid: {reason}")]
    ConfigValidation { field: String, reason: String },

    #[error("Failed to serialize {what}: {message}")]
    Serialization { what: String, message: String },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for trellis operations
pub type TrellisResult<T> = Result<T, TrellisError>;

impl TrellisError {
    /// Create an IO error from std::io::Error
    pub fn io(message: String, source: std::io::Error) -> Self {
        Self::Io { message, source }
    }

    /// Create a config validation error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TrellisError::Io { .. })
    }

    /// Get a user-friendly suggestion for fixing this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            TrellisError::NoState => {
                Some("Attach a state with Resolver::set_state before resolving")
            }
            TrellisError::UnknownBundle { .. } => {
                Some("Add the bundle to the state before referring to it")
            }
            TrellisError::DuplicateBundle { .. } => {
                Some("Use update_bundle to replace an installed bundle")
            }
            TrellisError::InvalidVersion(_) => {
                Some("Versions look like 1.2.3.qualifier; ranges like [1.0,2.0)")
            }
            TrellisError::InvalidFilter(_) => Some("Filters look like (&(key=value)(other>=1))"),
            TrellisError::TomlParse { .. } => {
                Some("Check trellis.toml syntax at the reported position")
            }
            _ => None,
        }
    }
}
