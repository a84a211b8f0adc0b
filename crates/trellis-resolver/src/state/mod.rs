//! The bundle state the resolver reads descriptors from and publishes
//! wiring into.
//!
//! A [`State`] owns the installed descriptors, the published
//! [`BundleResolution`] of every bundle, the resolver errors from the last
//! pass that touched each bundle, and bundles whose removal is pending until
//! the next refresh.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trellis_core::types::{
    BundleDescriptor, BundleId, ConstraintKind, ConstraintRef, PlatformProperties, ResolverError,
    Version,
};
use trellis_core::{TrellisError, TrellisResult};

/// A selected package export, as published
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExportRef {
    /// Bundle the export is attributed to (host for fragment exports,
    /// re-exporter for re-export copies)
    pub exporter: BundleId,
    /// Bundle whose descriptor declares the export
    pub declared_by: BundleId,
    /// Position in the declaring descriptor's `exports`
    pub index: usize,
    pub name: String,
    pub version: Version,
    /// Offered through a re-exported require-bundle rather than declared
    #[serde(default)]
    pub reexport: bool,
}

/// A wired generic capability
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CapabilityRef {
    pub provider: BundleId,
    pub declared_by: BundleId,
    pub index: usize,
    pub name: String,
}

/// What a constraint is wired to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum SupplierRef {
    Export(ExportRef),
    Bundle { bundle: BundleId },
    Capability(CapabilityRef),
}

/// A single constraint-to-supplier wire
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Wire {
    pub constraint: ConstraintRef,
    pub supplier: SupplierRef,
}

/// Published resolution record of one bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BundleResolution {
    pub resolved: bool,
    /// Exports other bundles may wire to
    pub selected_exports: Vec<ExportRef>,
    /// Own exports dropped in favour of importing the same package
    pub substituted_exports: Vec<ExportRef>,
    pub wires: Vec<Wire>,
    /// Wires created on demand for dynamic imports
    pub dynamic_wires: Vec<Wire>,
    /// For fragments: the resolved hosts the fragment is attached to
    pub hosts: Vec<BundleId>,
}

/// A resolved bundle that was removed or updated while other bundles were
/// still wired to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PendingRemoval {
    pub descriptor: BundleDescriptor,
    pub resolution: BundleResolution,
}

/// Descriptor store plus published resolution results
#[derive(Debug, Clone, Default)]
pub struct State {
    bundles: BTreeMap<BundleId, BundleDescriptor>,
    resolutions: BTreeMap<BundleId, BundleResolution>,
    errors: BTreeMap<BundleId, Vec<ResolverError>>,
    removal_pending: BTreeMap<BundleId, Vec<PendingRemoval>>,
    removal_completed: Vec<BundleDescriptor>,
    platform_properties: Vec<PlatformProperties>,
    timestamp: u64,
}

impl BundleResolution {
    /// Wires of import-package constraints, static and dynamic
    pub fn import_wires(&self) -> impl Iterator<Item = &Wire> {
        self.wires
            .iter()
            .chain(self.dynamic_wires.iter())
            .filter(|w| w.constraint.kind == ConstraintKind::ImportPackage)
    }

    pub fn require_wires(&self) -> impl Iterator<Item = &Wire> {
        self.wires
            .iter()
            .filter(|w| w.constraint.kind == ConstraintKind::RequireBundle)
    }

    pub fn generic_wires(&self) -> impl Iterator<Item = &Wire> {
        self.wires
            .iter()
            .filter(|w| w.constraint.kind == ConstraintKind::GenericRequirement)
    }

    /// The export an import of `package` is wired to
    pub fn imported(&self, package: &str) -> Option<&ExportRef> {
        self.import_wires().find_map(|w| match &w.supplier {
            SupplierRef::Export(export) if export.name == package => Some(export),
            _ => None,
        })
    }

    /// Bundles required through require-bundle wires
    pub fn required_bundles(&self) -> Vec<BundleId> {
        self.require_wires()
            .filter_map(|w| match w.supplier {
                SupplierRef::Bundle { bundle } => Some(bundle),
                _ => None,
            })
            .collect()
    }
}

impl SupplierRef {
    /// Bundle the supplier belongs to
    pub fn bundle(&self) -> BundleId {
        match self {
            SupplierRef::Export(export) => export.exporter,
            SupplierRef::Bundle { bundle } => *bundle,
            SupplierRef::Capability(capability) => capability.provider,
        }
    }
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a bundle descriptor
    pub fn add_bundle(&mut self, descriptor: BundleDescriptor) -> TrellisResult<()> {
        let bundle_id = descriptor.bundle_id;
        if self.bundles.contains_key(&bundle_id) {
            return Err(TrellisError::DuplicateBundle { bundle_id });
        }
        self.bundles.insert(bundle_id, descriptor);
        self.timestamp += 1;
        Ok(())
    }

    /// Remove a bundle
    ///
    /// With `pending` set, a resolved bundle keeps its published wiring under
    /// [`State::removal_pending`] until a refresh completes the removal.
    pub fn remove_bundle(
        &mut self,
        bundle_id: BundleId,
        pending: bool,
    ) -> TrellisResult<BundleDescriptor> {
        let descriptor = self
            .bundles
            .remove(&bundle_id)
            .ok_or(TrellisError::UnknownBundle { bundle_id })?;
        let resolution = self.resolutions.remove(&bundle_id);
        self.errors.remove(&bundle_id);
        match resolution {
            Some(resolution) if pending && resolution.resolved => {
                self.removal_pending
                    .entry(bundle_id)
                    .or_default()
                    .push(PendingRemoval {
                        descriptor: descriptor.clone(),
                        resolution,
                    });
            }
            _ => self.removal_completed.push(descriptor.clone()),
        }
        self.timestamp += 1;
        Ok(descriptor)
    }

    /// Replace a bundle's descriptor; the new descriptor starts unresolved
    pub fn update_bundle(
        &mut self,
        descriptor: BundleDescriptor,
        pending: bool,
    ) -> TrellisResult<BundleDescriptor> {
        let previous = self.remove_bundle(descriptor.bundle_id, pending)?;
        self.add_bundle(descriptor)?;
        Ok(previous)
    }

    pub fn bundle(&self, bundle_id: BundleId) -> Option<&BundleDescriptor> {
        self.bundles.get(&bundle_id)
    }

    /// Installed descriptors in bundle id order
    pub fn bundles(&self) -> impl Iterator<Item = &BundleDescriptor> {
        self.bundles.values()
    }

    /// Installed descriptors sharing a symbolic name
    pub fn bundles_named<'a>(
        &'a self,
        symbolic_name: &'a str,
    ) -> impl Iterator<Item = &'a BundleDescriptor> {
        self.bundles
            .values()
            .filter(move |b| b.symbolic_name == symbolic_name)
    }

    pub fn contains(&self, bundle_id: BundleId) -> bool {
        self.bundles.contains_key(&bundle_id)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn resolution(&self, bundle_id: BundleId) -> Option<&BundleResolution> {
        self.resolutions.get(&bundle_id)
    }

    pub fn is_resolved(&self, bundle_id: BundleId) -> bool {
        self.resolutions.get(&bundle_id).map_or(false, |r| r.resolved)
    }

    pub fn resolved_bundles(&self) -> Vec<BundleId> {
        self.bundles
            .keys()
            .copied()
            .filter(|id| self.is_resolved(*id))
            .collect()
    }

    pub fn unresolved_bundles(&self) -> Vec<BundleId> {
        self.bundles
            .keys()
            .copied()
            .filter(|id| !self.is_resolved(*id))
            .collect()
    }

    /// Errors recorded for a bundle by the last pass that processed it
    pub fn resolver_errors(&self, bundle_id: BundleId) -> &[ResolverError] {
        self.errors.get(&bundle_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bundles removed or updated while still wired to, by bundle id
    pub fn removal_pending(&self) -> &BTreeMap<BundleId, Vec<PendingRemoval>> {
        &self.removal_pending
    }

    /// Descriptors whose removal has completed since the last drain
    pub fn removal_completed(&self) -> &[BundleDescriptor] {
        &self.removal_completed
    }

    pub fn take_removal_completed(&mut self) -> Vec<BundleDescriptor> {
        std::mem::take(&mut self.removal_completed)
    }

    /// Platform properties used by the last resolve pass
    pub fn platform_properties(&self) -> &[PlatformProperties] {
        &self.platform_properties
    }

    /// Bumped on every change to descriptors or published wiring
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// A descriptor by id, falling back to pending removals
    pub fn descriptor_any(&self, bundle_id: BundleId) -> Option<&BundleDescriptor> {
        self.bundles.get(&bundle_id).or_else(|| {
            self.removal_pending
                .get(&bundle_id)
                .and_then(|entries| entries.last())
                .map(|p| &p.descriptor)
        })
    }

    /// A resolution record by id, falling back to pending removals
    pub fn resolution_any(&self, bundle_id: BundleId) -> Option<&BundleResolution> {
        self.resolutions.get(&bundle_id).or_else(|| {
            self.removal_pending
                .get(&bundle_id)
                .and_then(|entries| entries.last())
                .map(|p| &p.resolution)
        })
    }

    pub(crate) fn set_resolution(
        &mut self,
        bundle_id: BundleId,
        resolution: Option<BundleResolution>,
    ) {
        let changed = match resolution {
            Some(resolution) => {
                self.resolutions.insert(bundle_id, resolution.clone()) != Some(resolution)
            }
            None => self.resolutions.remove(&bundle_id).is_some(),
        };
        if changed {
            self.timestamp += 1;
        }
    }

    pub(crate) fn set_errors(&mut self, bundle_id: BundleId, errors: Vec<ResolverError>) {
        if errors.is_empty() {
            self.errors.remove(&bundle_id);
        } else {
            self.errors.insert(bundle_id, errors);
        }
    }

    pub(crate) fn set_platform_properties(&mut self, properties: Vec<PlatformProperties>) {
        self.platform_properties = properties;
    }

    /// Finish a pending removal; returns whether anything was pending
    pub(crate) fn complete_removal(&mut self, bundle_id: BundleId) -> bool {
        match self.removal_pending.remove(&bundle_id) {
            Some(entries) => {
                self.removal_completed
                    .extend(entries.into_iter().map(|p| p.descriptor));
                self.timestamp += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn complete_all_removals(&mut self) {
        let pending: Vec<BundleId> = self.removal_pending.keys().copied().collect();
        for bundle_id in pending {
            self.complete_removal(bundle_id);
        }
    }
}
