//! Typed resolution errors attached to bundles after a resolve pass.
//!
//! These are outcomes, not failures of the resolver itself: a bundle that
//! cannot resolve stays unresolved and carries one or more of these records.

use super::descriptor::BundleId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which declared list a constraint comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintKind {
    ImportPackage,
    RequireBundle,
    GenericRequirement,
    Host,
}

/// Points at a declared constraint: `declared_by`'s clause list of `kind` at `index`
///
/// `name` is the concrete name being matched, which differs from the declared one
/// only for dynamic imports instantiated from a wildcard template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConstraintRef {
    pub kind: ConstraintKind,
    pub declared_by: BundleId,
    pub index: usize,
    pub name: String,
}

/// Kind of a resolver error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverErrorKind {
    MissingExecutionEnvironment,
    PlatformFilterMismatch,
    MissingImportedPackage,
    MissingRequiredBundle,
    MissingFragmentHost,
    MissingGenericCapability,
    ImportUsesConflict,
    RequireBundleUsesConflict,
    SingletonSelectionLost,
    FragmentConflict,
    /// Reserved for permission checks performed outside the resolver
    PermissionDenied,
}

/// A resolution error attached to a bundle
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {data}")]
pub struct ResolverError {
    pub bundle: BundleId,
    pub kind: ResolverErrorKind,
    /// Human-readable detail (the unsatisfied clause, the winning singleton, ...)
    pub data: String,
    pub constraint: Option<ConstraintRef>,
}

impl ConstraintRef {
    pub fn new(
        kind: ConstraintKind,
        declared_by: BundleId,
        index: usize,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            declared_by,
            index,
            name: name.into(),
        }
    }
}

impl ResolverErrorKind {
    /// The "missing supplier" error for a constraint kind
    pub fn missing(kind: ConstraintKind) -> Self {
        match kind {
            ConstraintKind::ImportPackage => ResolverErrorKind::MissingImportedPackage,
            ConstraintKind::RequireBundle => ResolverErrorKind::MissingRequiredBundle,
            ConstraintKind::GenericRequirement => ResolverErrorKind::MissingGenericCapability,
            ConstraintKind::Host => ResolverErrorKind::MissingFragmentHost,
        }
    }

    /// The uses-conflict error for a constraint kind
    pub fn uses_conflict(kind: ConstraintKind) -> Self {
        match kind {
            ConstraintKind::RequireBundle => ResolverErrorKind::RequireBundleUsesConflict,
            _ => ResolverErrorKind::ImportUsesConflict,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = match self {
            ConstraintKind::ImportPackage => "Import-Package",
            ConstraintKind::RequireBundle => "Require-Bundle",
            ConstraintKind::GenericRequirement => "Require-Capability",
            ConstraintKind::Host => "Fragment-Host",
        };
        f.write_str(header)
    }
}

impl fmt::Display for ResolverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResolverErrorKind::MissingExecutionEnvironment => {
                "Missing required execution environment"
            }
            ResolverErrorKind::PlatformFilterMismatch => "Platform filter did not match",
            ResolverErrorKind::MissingImportedPackage => "Missing imported package",
            ResolverErrorKind::MissingRequiredBundle => "Missing required bundle",
            ResolverErrorKind::MissingFragmentHost => "Missing fragment host",
            ResolverErrorKind::MissingGenericCapability => "Missing generic capability",
            ResolverErrorKind::ImportUsesConflict => "Package uses conflict",
            ResolverErrorKind::RequireBundleUsesConflict => "Required bundle uses conflict",
            ResolverErrorKind::SingletonSelectionLost => "Another singleton version selected",
            ResolverErrorKind::FragmentConflict => "Fragment conflicts with resolved host",
            ResolverErrorKind::PermissionDenied => "Permission denied",
        };
        f.write_str(text)
    }
}

impl ResolverError {
    pub fn new(bundle: BundleId, kind: ResolverErrorKind, data: impl Into<String>) -> Self {
        Self {
            bundle,
            kind,
            data: data.into(),
            constraint: None,
        }
    }

    pub fn with_constraint(mut self, constraint: ConstraintRef) -> Self {
        self.constraint = Some(constraint);
        self
    }
}
