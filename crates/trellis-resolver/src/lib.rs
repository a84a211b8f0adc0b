//! Bundle wiring resolver for trellis
//!
//! This crate resolves sets of bundle descriptors into a consistent wiring:
//! every import, require-bundle, generic requirement and fragment host of a
//! resolved bundle is bound to one supplier, with singleton exclusivity,
//! cycle atomicity and uses-constraint consistency enforced.
//!
//! The [`Resolver`] owns a [`State`] and publishes [`BundleResolution`]
//! records and [`ResolverError`](trellis_core::ResolverError) outcomes into it.

mod engine;
pub mod helper;
pub mod index;
pub mod policy;
pub mod report;
pub mod resolver;
pub mod state;

// Re-export main types
pub use helper::{SortedBundles, StateHelper, WireKind, WiringGraph};
pub use index::CandidateIndex;
pub use policy::{default_compare, SelectionPolicy, SupplierInfo};
pub use report::{BundleReport, WireReport, WiringReport};
pub use resolver::{Resolver, ResolverOptions};
pub use state::{
    BundleResolution, CapabilityRef, ExportRef, PendingRemoval, State, SupplierRef, Wire,
};

use trellis_core::error::TrellisError;

/// Result type for resolver operations
pub type ResolverResult<T> = Result<T, TrellisError>;
