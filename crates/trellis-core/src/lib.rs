//! # trellis-core
//!
//! Core types and utilities shared across all trellis crates.
//!
//! This crate provides:
//! - Version and VersionRange types with rkyv serialization support
//! - BundleDescriptor and the import/require/generic/host constraint specs
//! - LDAP-style filter expressions over typed attributes
//! - ResolverError records and the TrellisError enum for unified error handling
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `types`: Core data types (Version, BundleDescriptor, Filter, etc.)
//! - `error`: Error types and result aliases
//! - `utils`: Utility functions and helpers

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{TrellisError, TrellisResult};
pub use types::{
    AttrValue, Attributes, BundleDescriptor, BundleId, ConstraintKind, ConstraintRef, ExportSpec,
    Filter, GenericCapabilitySpec, GenericRequirementSpec, HostSpec, ImportSpec,
    PlatformProperties, RequireSpec, Resolution, ResolverError, ResolverErrorKind, Version,
    VersionRange,
};
