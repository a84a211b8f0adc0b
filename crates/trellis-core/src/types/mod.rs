//! Core data types for trellis bundle resolution.
//!
//! This module provides the fundamental types used throughout trellis:
//! - Version and version range types
//! - Attribute maps and filter expressions
//! - Bundle descriptors with their capability and constraint specs
//! - The resolver error taxonomy

pub mod attributes;
pub mod constraint;
pub mod descriptor;
pub mod filter;
pub mod resolver_error;
pub mod version;

// Re-export all public types
pub use attributes::{properties_to_attributes, AttrValue, Attributes, PlatformProperties};
pub use constraint::{GenericRequirementSpec, HostSpec, ImportSpec, RequireSpec, Resolution};
pub use descriptor::{BundleDescriptor, BundleId, ExportSpec, GenericCapabilitySpec};
pub use filter::{Filter, FilterError};
pub use resolver_error::{ConstraintKind, ConstraintRef, ResolverError, ResolverErrorKind};
pub use version::{Version, VersionError, VersionRange};
