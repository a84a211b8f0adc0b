//! Serializable diagnostics of a state after a resolve pass.

use crate::state::{ExportRef, State, SupplierRef, Wire};
use serde::{Deserialize, Serialize};
use trellis_core::types::{BundleId, ResolverError, Version};
use trellis_core::{TrellisError, TrellisResult};

/// One wire, flattened for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WireReport {
    /// Rendered constraint, e.g. "Import-Package: org.acme"
    pub constraint: String,
    pub declared_by: BundleId,
    pub supplier: BundleId,
    /// Package or capability name and version for export/capability wires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dynamic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BundleReport {
    pub bundle_id: BundleId,
    pub symbolic_name: String,
    pub version: Version,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<BundleId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub substituted: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wires: Vec<WireReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ResolverError>,
}

/// Report over every bundle in a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WiringReport {
    pub timestamp: u64,
    pub resolved: usize,
    pub unresolved: usize,
    pub bundles: Vec<BundleReport>,
    /// Bundles whose removal is waiting for a refresh
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removal_pending: Vec<BundleId>,
}

impl WiringReport {
    pub fn from_state(state: &State) -> Self {
        let bundles: Vec<BundleReport> = state
            .bundles()
            .map(|bundle| {
                let resolution = state.resolution(bundle.bundle_id);
                let mut wires = Vec::new();
                let mut report = BundleReport {
                    bundle_id: bundle.bundle_id,
                    symbolic_name: bundle.symbolic_name.clone(),
                    version: bundle.version.clone(),
                    resolved: state.is_resolved(bundle.bundle_id),
                    hosts: Vec::new(),
                    exports: Vec::new(),
                    substituted: Vec::new(),
                    wires: Vec::new(),
                    errors: state.resolver_errors(bundle.bundle_id).to_vec(),
                };
                if let Some(resolution) = resolution {
                    report.hosts = resolution.hosts.clone();
                    report.exports = resolution
                        .selected_exports
                        .iter()
                        .map(describe_export)
                        .collect();
                    report.substituted = resolution
                        .substituted_exports
                        .iter()
                        .map(describe_export)
                        .collect();
                    wires.extend(resolution.wires.iter().map(|w| wire_report(w, false)));
                    wires.extend(resolution.dynamic_wires.iter().map(|w| wire_report(w, true)));
                }
                report.wires = wires;
                report
            })
            .collect();
        let resolved = bundles.iter().filter(|b| b.resolved).count();
        Self {
            timestamp: state.timestamp(),
            resolved,
            unresolved: bundles.len() - resolved,
            bundles,
            removal_pending: state.removal_pending().keys().copied().collect(),
        }
    }

    pub fn to_json(&self) -> TrellisResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| TrellisError::Serialization {
            what: "wiring report".to_string(),
            message: e.to_string(),
        })
    }

    pub fn bundle(&self, bundle_id: BundleId) -> Option<&BundleReport> {
        self.bundles.iter().find(|b| b.bundle_id == bundle_id)
    }
}

fn describe_export(export: &ExportRef) -> String {
    format!("{}@{}", export.name, export.version)
}

fn wire_report(wire: &Wire, dynamic: bool) -> WireReport {
    let capability = match &wire.supplier {
        SupplierRef::Export(export) => Some(describe_export(export)),
        SupplierRef::Capability(capability) => Some(capability.name.clone()),
        SupplierRef::Bundle { .. } => None,
    };
    WireReport {
        constraint: format!("{}: {}", wire.constraint.kind, wire.constraint.name),
        declared_by: wire.constraint.declared_by,
        supplier: wire.supplier.bundle(),
        capability,
        dynamic,
    }
}
