//! Engine construction, rewiring from published state, and bundle
//! add/remove/unresolve bookkeeping.

use super::arena::{
    BundleIdx, BundleState, CapIdx, Capability, CapabilityKind, Constraint, ResolverBundle,
    Supplier,
};
use super::Engine;
use crate::policy::SelectionPolicy;
use crate::resolver::ResolverOptions;
use crate::state::{BundleResolution, CapabilityRef, ExportRef, State, SupplierRef, Wire};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use trellis_core::types::{BundleDescriptor, BundleId, ConstraintKind, Version};

impl Engine {
    /// Build an engine mirroring `state`, including its published wiring
    pub(crate) fn build(
        state: &State,
        options: ResolverOptions,
        policy: Option<Arc<dyn SelectionPolicy>>,
    ) -> Self {
        let mut engine = Self::empty(options, policy);
        let mut records: Vec<(BundleIdx, BundleResolution)> = Vec::new();

        for desc in state.bundles() {
            let record = state.resolution(desc.bundle_id).filter(|r| r.resolved);
            let b = engine.insert_bundle(Arc::new(desc.clone()), record.is_some(), false);
            if let Some(record) = record {
                records.push((b, record.clone()));
            }
        }
        for (id, entries) in state.removal_pending() {
            for entry in entries {
                let resolved = entry.resolution.resolved;
                let b = engine.insert_bundle(Arc::new(entry.descriptor.clone()), resolved, true);
                engine.pending.entry(*id).or_default().push(b);
                if resolved {
                    records.push((b, entry.resolution.clone()));
                }
            }
        }

        for (fragment, record) in &records {
            if !engine.arena.bundles[*fragment].is_fragment() {
                continue;
            }
            for host_id in &record.hosts {
                let host = engine
                    .bundles_with_id(*host_id)
                    .into_iter()
                    .find(|&h| !engine.arena.bundles[h].is_fragment());
                if let Some(host) = host {
                    engine.attach(host, *fragment);
                }
            }
        }
        for (b, record) in &records {
            if engine.arena.bundles[*b].is_fragment() {
                continue;
            }
            for wire in &record.wires {
                engine.rewire(*b, wire, false);
            }
            for wire in &record.dynamic_wires {
                engine.rewire(*b, wire, true);
            }
        }
        for (_, record) in &records {
            for export in &record.substituted_exports {
                if let Some(cap) = engine.find_export(export) {
                    engine.index_remove(Supplier::Capability(cap));
                    engine.arena.caps[cap].dropped = true;
                }
            }
        }
        engine.reorder();
        debug!(
            target: "trellis::resolver",
            bundles = engine.arena.by_id.len(),
            resolved = records.len(),
            "Engine rebuilt from state"
        );
        engine
    }

    /// Add a resolver bundle with its capabilities and declared constraints
    pub(super) fn insert_bundle(
        &mut self,
        desc: Arc<BundleDescriptor>,
        resolved: bool,
        pending: bool,
    ) -> BundleIdx {
        let b = self
            .arena
            .push_bundle(ResolverBundle::new(Arc::clone(&desc), resolved, pending));
        if !pending {
            self.arena.by_id.insert(desc.bundle_id, b);
        }

        for (i, export) in desc.exports.iter().enumerate() {
            let cap = self.new_capability(
                CapabilityKind::Export,
                b,
                b,
                i,
                &export.name,
                &export.version,
            );
            self.arena.bundles[b].exports.push(cap);
        }
        for (i, capability) in desc.generic_capabilities.iter().enumerate() {
            let cap = self.new_capability(
                CapabilityKind::Generic,
                b,
                b,
                i,
                &capability.name,
                &capability.version,
            );
            self.arena.bundles[b].generics.push(cap);
        }
        self.add_declared_constraints(b, b);
        if let Some(host) = &desc.host {
            let c = self
                .arena
                .push_cons(Constraint::new(ConstraintKind::Host, b, b, 0, host.name.clone()));
            self.arena.bundles[b].host = Some(c);
        }

        if !pending || resolved {
            let caps: Vec<CapIdx> = self.arena.bundles[b]
                .exports
                .iter()
                .chain(self.arena.bundles[b].generics.iter())
                .copied()
                .collect();
            for cap in caps {
                self.index_put(Supplier::Capability(cap));
            }
            self.index_put(Supplier::Bundle(b));
        }
        b
    }

    pub(super) fn new_capability(
        &mut self,
        kind: CapabilityKind,
        owner: BundleIdx,
        declared_by: BundleIdx,
        index: usize,
        name: &str,
        version: &Version,
    ) -> CapIdx {
        self.arena.push_cap(Capability {
            kind,
            owner,
            declared_by,
            index,
            name: name.to_string(),
            version: version.clone(),
            root: None,
            dropped: false,
            live: true,
        })
    }

    /// Create constraints on `owner` for everything `declared_by` declares
    ///
    /// Dynamic imports are templates and only become constraints on demand.
    pub(super) fn add_declared_constraints(&mut self, owner: BundleIdx, declared_by: BundleIdx) {
        let desc = Arc::clone(&self.arena.bundles[declared_by].desc);
        let mut created = Vec::new();
        for (i, spec) in desc.generic_requires.iter().enumerate() {
            let mut cons = Constraint::new(
                ConstraintKind::GenericRequirement,
                owner,
                declared_by,
                i,
                spec.name.clone(),
            );
            cons.optional = spec.optional;
            cons.multiple = spec.multiple;
            created.push(self.arena.push_cons(cons));
        }
        for (i, spec) in desc.requires.iter().enumerate() {
            let mut cons = Constraint::new(
                ConstraintKind::RequireBundle,
                owner,
                declared_by,
                i,
                spec.name.clone(),
            );
            cons.optional = spec.optional;
            created.push(self.arena.push_cons(cons));
        }
        for (i, spec) in desc.static_imports() {
            let mut cons = Constraint::new(
                ConstraintKind::ImportPackage,
                owner,
                declared_by,
                i,
                spec.name.clone(),
            );
            cons.optional = spec.is_optional();
            created.push(self.arena.push_cons(cons));
        }
        self.arena.bundles[owner].constraints.extend(created);
    }

    /// Offer a copy of `root` from `owner`, which re-exports it
    pub(super) fn reexport_copy(&mut self, owner: BundleIdx, root: CapIdx) -> CapIdx {
        let root = self.arena.caps[root].root.unwrap_or(root);
        let existing = self.arena.bundles[owner]
            .exports
            .iter()
            .copied()
            .find(|&cap| self.arena.caps[cap].live && self.arena.caps[cap].root == Some(root));
        if let Some(cap) = existing {
            return cap;
        }
        let (declared_by, index, name, version) = {
            let r = &self.arena.caps[root];
            (r.declared_by, r.index, r.name.clone(), r.version.clone())
        };
        let cap = self.arena.push_cap(Capability {
            kind: CapabilityKind::Export,
            owner,
            declared_by,
            index,
            name,
            version,
            root: Some(root),
            dropped: false,
            live: true,
        });
        self.arena.bundles[owner].exports.push(cap);
        self.index_put(Supplier::Capability(cap));
        cap
    }

    /// Restore one published wire onto the engine's constraints
    fn rewire(&mut self, b: BundleIdx, wire: &Wire, dynamic: bool) {
        let supplier = match &wire.supplier {
            SupplierRef::Export(export) => self.find_export(export).map(Supplier::Capability),
            SupplierRef::Bundle { bundle } => self
                .bundles_with_id(*bundle)
                .into_iter()
                .find(|&x| !self.arena.bundles[x].is_fragment())
                .map(Supplier::Bundle),
            SupplierRef::Capability(capability) => {
                self.find_capability(capability).map(Supplier::Capability)
            }
        };
        let Some(supplier) = supplier else {
            warn!(
                target: "trellis::resolver::wiring",
                constraint = ?wire.constraint,
                "Wire supplier no longer present"
            );
            return;
        };

        let constraint = if dynamic {
            self.instantiate_dynamic(
                b,
                wire.constraint.declared_by,
                wire.constraint.index,
                &wire.constraint.name,
            )
        } else {
            let arena = &self.arena;
            arena.bundles[b].constraints.iter().copied().find(|&c| {
                let cons = &arena.cons[c];
                cons.live
                    && cons.kind == wire.constraint.kind
                    && cons.index == wire.constraint.index
                    && arena.bundles[cons.declared_by].id() == wire.constraint.declared_by
            })
        };
        match constraint {
            Some(c) => self.wire(c, supplier),
            None => {
                warn!(
                    target: "trellis::resolver::wiring",
                    constraint = ?wire.constraint,
                    "Published wire has no matching constraint"
                )
            }
        }
    }

    /// Locate a published export, recreating re-export copies as needed
    fn find_export(&mut self, export: &ExportRef) -> Option<CapIdx> {
        for owner in self.bundles_with_id(export.exporter) {
            let found = self.arena.bundles[owner].exports.iter().copied().find(|&cap| {
                let c = &self.arena.caps[cap];
                c.live
                    && c.kind == CapabilityKind::Export
                    && c.root.is_some() == export.reexport
                    && c.index == export.index
                    && self.arena.bundles[c.declared_by].id() == export.declared_by
            });
            if found.is_some() {
                return found;
            }
        }
        if !export.reexport {
            return None;
        }
        let root = self.arena.caps.iter().position(|c| {
            c.live
                && c.kind == CapabilityKind::Export
                && c.root.is_none()
                && c.index == export.index
                && self.arena.bundles[c.declared_by].id() == export.declared_by
        })?;
        let owner = self.bundles_with_id(export.exporter).into_iter().next()?;
        Some(self.reexport_copy(owner, root))
    }

    fn find_capability(&self, capability: &CapabilityRef) -> Option<CapIdx> {
        self.bundles_with_id(capability.provider)
            .into_iter()
            .flat_map(|owner| self.arena.bundles[owner].generics.iter().copied())
            .find(|&cap| {
                let c = &self.arena.caps[cap];
                c.live
                    && c.index == capability.index
                    && self.arena.bundles[c.declared_by].id() == capability.declared_by
            })
    }

    pub(crate) fn bundle_added(&mut self, desc: BundleDescriptor) {
        if self.arena.by_id.contains_key(&desc.bundle_id) {
            return;
        }
        debug!(target: "trellis::resolver", bundle = %desc, "Bundle added");
        self.insert_bundle(Arc::new(desc), false, false);
    }

    /// Forget a bundle; a resolved bundle removed with `pending` stays
    /// available to its dependents until the next refresh
    pub(crate) fn bundle_removed(&mut self, id: BundleId, pending: bool) {
        let Some(&b) = self.arena.by_id.get(&id) else {
            return;
        };
        if pending && self.arena.bundles[b].is_resolved() {
            debug!(target: "trellis::resolver", bundle = id, "Bundle removal pending");
            self.arena.by_id.remove(&id);
            self.arena.bundles[b].removal_pending = true;
            self.pending.entry(id).or_default().push(b);
        } else {
            debug!(target: "trellis::resolver", bundle = id, "Bundle removed");
            self.unresolve_cascade(b);
            self.discard(b);
        }
    }

    pub(crate) fn bundle_updated(&mut self, desc: BundleDescriptor, pending: bool) {
        self.bundle_removed(desc.bundle_id, pending);
        self.bundle_added(desc);
    }

    /// Retire a bundle from the engine entirely
    pub(super) fn discard(&mut self, b: BundleIdx) {
        if !self.arena.bundles[b].live {
            return;
        }
        for h in self.arena.bundles[b].hosts.clone() {
            self.detach_fragment(h, b);
        }
        for f in self.arena.bundles[b].fragments.clone() {
            self.detach_fragment(b, f);
        }
        self.unwire(b);

        let caps: Vec<CapIdx> = self.arena.bundles[b]
            .exports
            .iter()
            .chain(self.arena.bundles[b].generics.iter())
            .copied()
            .collect();
        for cap in caps {
            self.index_remove(Supplier::Capability(cap));
            self.arena.caps[cap].live = false;
        }
        self.index_remove(Supplier::Bundle(b));
        let constraints: Vec<usize> = self.arena.bundles[b]
            .constraints
            .iter()
            .copied()
            .chain(self.arena.bundles[b].host)
            .collect();
        for c in constraints {
            self.arena.cons[c].live = false;
        }

        let bundle = &mut self.arena.bundles[b];
        bundle.live = false;
        bundle.state = BundleState::Unresolved;
        let id = bundle.id();
        if self.arena.by_id.get(&id) == Some(&b) {
            self.arena.by_id.remove(&id);
        }
    }

    /// Unresolve a bundle and, transitively, everything depending on it
    pub(super) fn unresolve_cascade(&mut self, root: BundleIdx) -> Vec<BundleIdx> {
        let mut work = vec![root];
        let mut seen = BTreeSet::new();
        while let Some(b) = work.pop() {
            if !seen.insert(b) {
                continue;
            }
            work.extend(self.dependents_of(b));
            if self.arena.bundles[b].state != BundleState::Unresolved {
                debug!(
                    target: "trellis::resolver",
                    bundle = %self.arena.bundles[b].desc,
                    "Unresolving"
                );
            }
            self.set_unresolved(b);
        }
        seen.into_iter().collect()
    }

    /// Bundles whose wiring depends directly on `b`
    pub(super) fn dependents_of(&self, b: BundleIdx) -> Vec<BundleIdx> {
        let bundle = &self.arena.bundles[b];
        let mut dependents: Vec<BundleIdx> = bundle
            .refs
            .iter()
            .copied()
            .filter(|&x| self.arena.bundles[x].live && self.still_wired(x, b))
            .collect();
        dependents.extend(bundle.fragments.iter().copied());
        dependents.extend(bundle.hosts.iter().copied());
        dependents
    }

    /// Ids of resolved hosts that unresolved fragments could attach to
    pub(super) fn hosts_of_unresolved_fragments(&self) -> Vec<BundleId> {
        let mut hosts = Vec::new();
        for f in self.live_bundles() {
            let fragment = &self.arena.bundles[f];
            if fragment.state != BundleState::Unresolved {
                continue;
            }
            let Some(spec) = self.arena.host_spec(f) else {
                continue;
            };
            for supplier in self.bundles.get(&spec.name) {
                let h = self.arena.supplier_owner(*supplier);
                let host = &self.arena.bundles[h];
                if host.live && host.is_resolved() && spec.accepts(&host.desc) {
                    hosts.push(host.id());
                }
            }
        }
        hosts
    }
}
