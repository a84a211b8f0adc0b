//! Publishing engine wiring into the state.

use super::arena::{BundleIdx, CapIdx, CapabilityKind, ConsIdx, Supplier};
use super::Engine;
use crate::state::{BundleResolution, CapabilityRef, ExportRef, State, SupplierRef, Wire};
use std::collections::BTreeSet;
use trellis_core::types::BundleId;

impl Engine {
    /// Write every live bundle's resolution record and this pass's errors
    pub(crate) fn publish(&mut self, state: &mut State) {
        let bundles: Vec<BundleIdx> = self.live_bundles().collect();
        for b in bundles {
            self.publish_bundle(state, b);
        }
        let mut touched: BTreeSet<BundleId> = std::mem::take(&mut self.touched);
        touched.extend(self.errors.keys().copied());
        let mut errors = std::mem::take(&mut self.errors);
        for id in touched {
            if state.contains(id) {
                state.set_errors(id, errors.remove(&id).unwrap_or_default());
            }
        }
    }

    pub(super) fn publish_bundle(&self, state: &mut State, b: BundleIdx) {
        state.set_resolution(self.arena.bundles[b].id(), self.resolution_record(b));
    }

    fn resolution_record(&self, b: BundleIdx) -> Option<BundleResolution> {
        let bundle = &self.arena.bundles[b];
        if bundle.is_fragment() {
            return self.fragment_record(b);
        }
        let wires = self.wires_of(bundle.constraints.iter().copied());
        if !bundle.is_resolved() && !(self.dev_mode && !wires.is_empty()) {
            return None;
        }

        let mut selected_exports = Vec::new();
        let mut substituted_exports = Vec::new();
        for &cap in &bundle.exports {
            let c = &self.arena.caps[cap];
            if !c.live || c.root.is_some() {
                continue;
            }
            if c.dropped {
                substituted_exports.push(self.export_ref(cap));
            } else {
                selected_exports.push(self.export_ref(cap));
            }
        }
        selected_exports.sort();
        substituted_exports.sort();

        Some(BundleResolution {
            resolved: bundle.is_resolved(),
            selected_exports,
            substituted_exports,
            wires,
            dynamic_wires: self.wires_of(bundle.dynamic.iter().copied()),
            hosts: Vec::new(),
        })
    }

    /// A fragment's record lists its resolved hosts and the wires of its
    /// constraints as seen through the first of them
    fn fragment_record(&self, f: BundleIdx) -> Option<BundleResolution> {
        let fragment = &self.arena.bundles[f];
        let resolved_hosts: Vec<BundleIdx> = fragment
            .hosts
            .iter()
            .copied()
            .filter(|&h| self.arena.bundles[h].is_resolved())
            .collect();
        let shown = if resolved_hosts.is_empty() && self.dev_mode {
            fragment.hosts.first().copied()
        } else {
            resolved_hosts.first().copied()
        };
        let host = shown?;
        let wires = self.wires_of(
            self.arena.bundles[host]
                .constraints
                .iter()
                .copied()
                .filter(|&c| self.arena.cons[c].declared_by == f),
        );
        let mut hosts: Vec<BundleId> = resolved_hosts
            .iter()
            .map(|&h| self.arena.bundles[h].id())
            .collect();
        hosts.sort_unstable();
        Some(BundleResolution {
            resolved: !resolved_hosts.is_empty(),
            wires,
            hosts,
            ..Default::default()
        })
    }

    fn wires_of(&self, constraints: impl Iterator<Item = ConsIdx>) -> Vec<Wire> {
        let mut wires: Vec<Wire> = constraints
            .filter(|&c| self.arena.cons[c].live)
            .flat_map(|c| {
                self.arena.cons[c].wired().into_iter().map(move |s| Wire {
                    constraint: self.arena.constraint_ref(c),
                    supplier: self.supplier_ref(s),
                })
            })
            .collect();
        wires.sort();
        wires
    }

    pub(super) fn export_ref(&self, cap: CapIdx) -> ExportRef {
        let c = &self.arena.caps[cap];
        ExportRef {
            exporter: self.arena.bundles[c.owner].id(),
            declared_by: self.arena.bundles[c.declared_by].id(),
            index: c.index,
            name: c.name.clone(),
            version: c.version.clone(),
            reexport: c.root.is_some(),
        }
    }

    fn supplier_ref(&self, supplier: Supplier) -> SupplierRef {
        match supplier {
            Supplier::Capability(cap) => {
                let c = &self.arena.caps[cap];
                match c.kind {
                    CapabilityKind::Export => SupplierRef::Export(self.export_ref(cap)),
                    CapabilityKind::Generic => SupplierRef::Capability(CapabilityRef {
                        provider: self.arena.bundles[c.owner].id(),
                        declared_by: self.arena.bundles[c.declared_by].id(),
                        index: c.index,
                        name: c.name.clone(),
                    }),
                }
            }
            Supplier::Bundle(b) => SupplierRef::Bundle {
                bundle: self.arena.bundles[b].id(),
            },
        }
    }
}
