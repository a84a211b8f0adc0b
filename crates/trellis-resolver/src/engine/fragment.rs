//! Fragment attachment.
//!
//! A fragment contributes its exports, generic capabilities and constraints
//! to every matching host. Attaching to a host that is already resolved is
//! only allowed when the host's existing wiring already satisfies what the
//! fragment adds.

use super::arena::{BundleIdx, BundleState, CapIdx, CapabilityKind, ConsIdx, Supplier};
use super::Engine;
use std::sync::Arc;
use tracing::debug;
use trellis_core::types::{ConstraintKind, ResolverErrorKind};

impl Engine {
    /// Attach an unresolved fragment to all of its candidate hosts
    pub(super) fn attach_fragment(&mut self, f: BundleIdx) {
        let fragment = &self.arena.bundles[f];
        if !fragment.is_fragment() || !fragment.resolvable || !fragment.live {
            return;
        }
        let Some(host_cons) = fragment.host else {
            return;
        };
        let Some(spec) = self.arena.host_spec(f).cloned() else {
            return;
        };

        let hosts: Vec<BundleIdx> = self
            .bundles
            .get(&spec.name)
            .iter()
            .map(|s| self.arena.supplier_owner(*s))
            .filter(|&h| {
                let host = &self.arena.bundles[h];
                host.live && !host.removal_pending && host.resolvable && spec.accepts(&host.desc)
            })
            .collect();

        if hosts.is_empty() {
            self.record_error(
                f,
                ResolverErrorKind::MissingFragmentHost,
                spec.to_string(),
                Some(host_cons),
            );
            return;
        }
        for h in hosts {
            if self.arena.bundles[h].is_resolved() {
                if let Some(detail) = self.fragment_conflict(h, f) {
                    self.record_error(f, ResolverErrorKind::FragmentConflict, detail, None);
                    continue;
                }
            }
            self.attach(h, f);
            self.arena.cons[host_cons].add_supplier(Supplier::Bundle(h));
        }
    }

    /// Merge a fragment into a host
    pub(super) fn attach(&mut self, h: BundleIdx, f: BundleIdx) {
        if self.arena.bundles[h].fragments.contains(&f) {
            return;
        }
        debug!(
            target: "trellis::resolver",
            host = %self.arena.bundles[h].desc,
            fragment = %self.arena.bundles[f].desc,
            "Attaching fragment"
        );
        self.arena.bundles[h].fragments.push(f);
        self.arena.bundles[f].hosts.push(h);

        let desc = Arc::clone(&self.arena.bundles[f].desc);
        for (i, export) in desc.exports.iter().enumerate() {
            let cap = self.new_capability(
                CapabilityKind::Export,
                h,
                f,
                i,
                &export.name,
                &export.version,
            );
            self.arena.bundles[h].exports.push(cap);
            self.index_put(Supplier::Capability(cap));
        }
        for (i, capability) in desc.generic_capabilities.iter().enumerate() {
            let cap = self.new_capability(
                CapabilityKind::Generic,
                h,
                f,
                i,
                &capability.name,
                &capability.version,
            );
            self.arena.bundles[h].generics.push(cap);
            self.index_put(Supplier::Capability(cap));
        }

        let before = self.arena.bundles[h].constraints.len();
        self.add_declared_constraints(h, f);
        if !self.arena.bundles[h].is_resolved() {
            return;
        }
        // a resolved host already satisfies the fragment's constraints;
        // share its wiring
        let added: Vec<ConsIdx> = self.arena.bundles[h].constraints[before..].to_vec();
        for c in added {
            let Some(existing) = self.host_constraint_like(h, c) else {
                continue;
            };
            for supplier in self.arena.cons[existing].wired() {
                self.wire(c, supplier);
            }
        }
    }

    /// Remove a fragment's contributions from a host
    pub(super) fn detach_fragment(&mut self, h: BundleIdx, f: BundleIdx) {
        if !self.arena.bundles[h].fragments.contains(&f) {
            return;
        }
        debug!(
            target: "trellis::resolver",
            host = %self.arena.bundles[h].desc,
            fragment = %self.arena.bundles[f].desc,
            "Detaching fragment"
        );
        self.arena.bundles[h].fragments.retain(|&x| x != f);
        self.arena.bundles[f].hosts.retain(|&x| x != h);
        if let Some(host_cons) = self.arena.bundles[f].host {
            let cons = &mut self.arena.cons[host_cons];
            if let Some(i) = cons.possible.iter().position(|s| *s == Supplier::Bundle(h)) {
                cons.possible.remove(i);
                cons.selected = if cons.possible.is_empty() { None } else { Some(0) };
            }
        }

        let caps: Vec<CapIdx> = self.arena.bundles[h]
            .exports
            .iter()
            .chain(self.arena.bundles[h].generics.iter())
            .copied()
            .filter(|&cap| self.arena.caps[cap].declared_by == f)
            .collect();
        for cap in caps {
            self.index_remove(Supplier::Capability(cap));
            self.arena.caps[cap].live = false;
        }
        let arena = &mut self.arena;
        let caps = &arena.caps;
        let host = &mut arena.bundles[h];
        host.exports.retain(|&cap| caps[cap].live);
        host.generics.retain(|&cap| caps[cap].live);

        let constraints: Vec<ConsIdx> = self.arena.bundles[h]
            .constraints
            .iter()
            .copied()
            .filter(|&c| self.arena.cons[c].declared_by == f)
            .collect();
        for &c in &constraints {
            self.clear_constraint(c);
            self.arena.cons[c].live = false;
        }
        self.arena.bundles[h].constraints.retain(|c| !constraints.contains(c));

        let still_hosted = self.arena.bundles[f]
            .hosts
            .iter()
            .any(|&x| self.arena.bundles[x].is_resolved());
        if !still_hosted {
            self.arena.bundles[f].state = BundleState::Unresolved;
        }
    }

    /// Why a fragment cannot join an already-resolved host, if it cannot
    fn fragment_conflict(&self, h: BundleIdx, f: BundleIdx) -> Option<String> {
        let arena = &self.arena;
        let desc = &arena.bundles[f].desc;
        let host_wired = |kind: ConstraintKind, name: &str| {
            arena.bundles[h]
                .constraints
                .iter()
                .map(|&c| &arena.cons[c])
                .find(|c| c.live && c.kind == kind && c.name == name && c.declared_by != f)
                .and_then(|c| c.selected_supplier())
        };

        for (_, spec) in desc.static_imports() {
            match host_wired(ConstraintKind::ImportPackage, &spec.name) {
                Some(Supplier::Capability(cap)) => {
                    let exporter = &arena.bundles[arena.caps[cap].owner].desc;
                    if !spec.accepts(&spec.name, arena.export_spec(cap), exporter) {
                        return Some(spec.to_string());
                    }
                }
                _ if !spec.is_optional() => return Some(spec.to_string()),
                _ => {}
            }
        }
        for spec in &desc.requires {
            match host_wired(ConstraintKind::RequireBundle, &spec.name) {
                Some(Supplier::Bundle(x)) => {
                    if !spec.accepts(&arena.bundles[x].desc) {
                        return Some(spec.to_string());
                    }
                }
                _ if !spec.optional => return Some(spec.to_string()),
                _ => {}
            }
        }
        for spec in &desc.generic_requires {
            match host_wired(ConstraintKind::GenericRequirement, &spec.name) {
                Some(Supplier::Capability(cap)) => {
                    if !spec.accepts(arena.capability_spec(cap)) {
                        return Some(spec.to_string());
                    }
                }
                _ if !spec.optional => return Some(spec.to_string()),
                _ => {}
            }
        }
        None
    }

    /// The host's own wired constraint matching a fragment-contributed one
    fn host_constraint_like(&self, h: BundleIdx, c: ConsIdx) -> Option<ConsIdx> {
        let target = &self.arena.cons[c];
        self.arena.bundles[h].constraints.iter().copied().find(|&x| {
            let cons = &self.arena.cons[x];
            x != c
                && cons.live
                && cons.kind == target.kind
                && cons.name == target.name
                && cons.declared_by != target.declared_by
                && cons.selected.is_some()
        })
    }

    /// A fragment is resolved when it is attached to at least one resolved host
    pub(super) fn resolve_fragments(&mut self, batch: &[BundleIdx]) {
        for &f in batch {
            if !self.arena.bundles[f].is_fragment() {
                continue;
            }
            let resolved = self.arena.bundles[f]
                .hosts
                .iter()
                .any(|&h| self.arena.bundles[h].is_resolved());
            self.arena.bundles[f].state = if resolved {
                BundleState::Resolved
            } else {
                BundleState::Unresolved
            };
        }
    }
}
