//! Arena of resolver bundles, capabilities and constraints.
//!
//! Everything the engine touches lives in three vectors addressed by index.
//! Entries are never moved; retired entries are flagged dead and only
//! reclaimed when the engine is rebuilt, or popped when nothing refers to
//! the tail entry yet.

use crate::policy::{default_compare, SelectionPolicy, SupplierInfo};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use trellis_core::types::{
    BundleDescriptor, BundleId, ConstraintKind, ConstraintRef, ExportSpec, GenericCapabilitySpec,
    GenericRequirementSpec, HostSpec, ImportSpec, RequireSpec, Version,
};

pub(crate) type BundleIdx = usize;
pub(crate) type CapIdx = usize;
pub(crate) type ConsIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BundleState {
    Unresolved,
    Resolving,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Supplier {
    Capability(CapIdx),
    Bundle(BundleIdx),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CapabilityKind {
    Export,
    Generic,
}

#[derive(Debug)]
pub(crate) struct ResolverBundle {
    pub desc: Arc<BundleDescriptor>,
    pub state: BundleState,
    pub resolvable: bool,
    pub live: bool,
    pub removal_pending: bool,
    /// Own constraints followed by those contributed by attached fragments
    pub constraints: Vec<ConsIdx>,
    /// Fragment-host constraint, fragments only
    pub host: Option<ConsIdx>,
    pub exports: Vec<CapIdx>,
    pub generics: Vec<CapIdx>,
    pub fragments: Vec<BundleIdx>,
    /// For fragments: hosts the fragment is attached to
    pub hosts: Vec<BundleIdx>,
    /// Bundles currently wired to something this bundle supplies
    pub refs: BTreeSet<BundleIdx>,
    /// Instantiated dynamic imports
    pub dynamic: Vec<ConsIdx>,
}

#[derive(Debug)]
pub(crate) struct Capability {
    pub kind: CapabilityKind,
    /// Bundle the capability is attributed to
    pub owner: BundleIdx,
    /// Bundle whose descriptor declares it
    pub declared_by: BundleIdx,
    pub index: usize,
    pub name: String,
    pub version: Version,
    /// Set on re-export copies: the export being re-offered
    pub root: Option<CapIdx>,
    /// Substituted by an import of the same package
    pub dropped: bool,
    pub live: bool,
}

#[derive(Debug)]
pub(crate) struct Constraint {
    pub kind: ConstraintKind,
    pub owner: BundleIdx,
    pub declared_by: BundleIdx,
    pub index: usize,
    /// Concrete name being matched
    pub name: String,
    pub optional: bool,
    pub multiple: bool,
    pub dynamic: bool,
    /// Viable suppliers found during resolution, in preference order
    pub possible: Vec<Supplier>,
    pub selected: Option<usize>,
    /// Exporters ruled out by cycle checking
    pub excluded: BTreeSet<BundleIdx>,
    pub live: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    pub bundles: Vec<ResolverBundle>,
    pub caps: Vec<Capability>,
    pub cons: Vec<Constraint>,
    /// Current (not removal pending) bundle for each id
    pub by_id: BTreeMap<BundleId, BundleIdx>,
}

/// Rank used to order a bundle's constraints: generic, require, import
pub(crate) fn kind_rank(kind: ConstraintKind) -> u8 {
    match kind {
        ConstraintKind::GenericRequirement => 0,
        ConstraintKind::RequireBundle => 1,
        ConstraintKind::ImportPackage => 2,
        ConstraintKind::Host => 3,
    }
}

impl ResolverBundle {
    pub fn new(desc: Arc<BundleDescriptor>, resolved: bool, removal_pending: bool) -> Self {
        Self {
            desc,
            state: if resolved {
                BundleState::Resolved
            } else {
                BundleState::Unresolved
            },
            resolvable: true,
            live: true,
            removal_pending,
            constraints: Vec::new(),
            host: None,
            exports: Vec::new(),
            generics: Vec::new(),
            fragments: Vec::new(),
            hosts: Vec::new(),
            refs: BTreeSet::new(),
            dynamic: Vec::new(),
        }
    }

    pub fn id(&self) -> BundleId {
        self.desc.bundle_id
    }

    pub fn is_fragment(&self) -> bool {
        self.desc.is_fragment()
    }

    pub fn is_resolved(&self) -> bool {
        self.state == BundleState::Resolved
    }
}

impl Constraint {
    pub fn new(
        kind: ConstraintKind,
        owner: BundleIdx,
        declared_by: BundleIdx,
        index: usize,
        name: String,
    ) -> Self {
        Self {
            kind,
            owner,
            declared_by,
            index,
            name,
            optional: false,
            multiple: false,
            dynamic: false,
            possible: Vec::new(),
            selected: None,
            excluded: BTreeSet::new(),
            live: true,
        }
    }

    pub fn selected_supplier(&self) -> Option<Supplier> {
        self.selected.and_then(|i| self.possible.get(i).copied())
    }

    /// Suppliers this constraint is currently wired to
    pub fn wired(&self) -> Vec<Supplier> {
        if self.multiple {
            if self.selected.is_some() {
                self.possible.clone()
            } else {
                Vec::new()
            }
        } else {
            self.selected_supplier().into_iter().collect()
        }
    }

    /// Wire to `supplier`, keeping earlier candidates as alternatives
    pub fn add_supplier(&mut self, supplier: Supplier) {
        if !self.possible.contains(&supplier) {
            self.possible.push(supplier);
        }
        if self.selected.is_none() {
            self.selected = self.possible.iter().position(|s| *s == supplier);
        }
    }

    pub fn clear(&mut self) {
        self.possible.clear();
        self.selected = None;
    }
}

impl Arena {
    pub fn push_bundle(&mut self, bundle: ResolverBundle) -> BundleIdx {
        self.bundles.push(bundle);
        self.bundles.len() - 1
    }

    pub fn push_cap(&mut self, cap: Capability) -> CapIdx {
        self.caps.push(cap);
        self.caps.len() - 1
    }

    pub fn push_cons(&mut self, cons: Constraint) -> ConsIdx {
        self.cons.push(cons);
        self.cons.len() - 1
    }

    /// Remove `c` if it is the most recently pushed constraint
    pub fn pop_cons(&mut self, c: ConsIdx) -> bool {
        if c + 1 != self.cons.len() {
            return false;
        }
        self.cons.pop();
        true
    }

    /// Retired bundles, capabilities and constraints still held
    pub fn dead_entries(&self) -> usize {
        self.bundles.iter().filter(|b| !b.live).count()
            + self.caps.iter().filter(|c| !c.live).count()
            + self.cons.iter().filter(|c| !c.live).count()
    }

    pub fn entries(&self) -> usize {
        self.bundles.len() + self.caps.len() + self.cons.len()
    }

    pub fn import_spec(&self, c: ConsIdx) -> &ImportSpec {
        let cons = &self.cons[c];
        &self.bundles[cons.declared_by].desc.imports[cons.index]
    }

    pub fn require_spec(&self, c: ConsIdx) -> &RequireSpec {
        let cons = &self.cons[c];
        &self.bundles[cons.declared_by].desc.requires[cons.index]
    }

    pub fn generic_spec(&self, c: ConsIdx) -> &GenericRequirementSpec {
        let cons = &self.cons[c];
        &self.bundles[cons.declared_by].desc.generic_requires[cons.index]
    }

    pub fn host_spec(&self, b: BundleIdx) -> Option<&HostSpec> {
        self.bundles[b].desc.host.as_ref()
    }

    pub fn export_spec(&self, cap: CapIdx) -> &ExportSpec {
        let c = &self.caps[cap];
        &self.bundles[c.declared_by].desc.exports[c.index]
    }

    pub fn capability_spec(&self, cap: CapIdx) -> &GenericCapabilitySpec {
        let c = &self.caps[cap];
        &self.bundles[c.declared_by].desc.generic_capabilities[c.index]
    }

    /// Human-readable form of a constraint's declaration
    pub fn describe(&self, c: ConsIdx) -> String {
        let cons = &self.cons[c];
        match cons.kind {
            ConstraintKind::ImportPackage => self.import_spec(c).to_string(),
            ConstraintKind::RequireBundle => self.require_spec(c).to_string(),
            ConstraintKind::GenericRequirement => self.generic_spec(c).to_string(),
            ConstraintKind::Host => self
                .host_spec(cons.declared_by)
                .map(|h| h.to_string())
                .unwrap_or_default(),
        }
    }

    pub fn constraint_ref(&self, c: ConsIdx) -> ConstraintRef {
        let cons = &self.cons[c];
        ConstraintRef::new(
            cons.kind,
            self.bundles[cons.declared_by].id(),
            cons.index,
            cons.name.clone(),
        )
    }

    pub fn supplier_owner(&self, supplier: Supplier) -> BundleIdx {
        match supplier {
            Supplier::Capability(cap) => self.caps[cap].owner,
            Supplier::Bundle(b) => b,
        }
    }

    /// Bundle that actually provides a package: the root exporter for
    /// re-export copies, the owner otherwise
    pub fn provider(&self, cap: CapIdx) -> BundleIdx {
        match self.caps[cap].root {
            Some(root) => self.caps[root].owner,
            None => self.caps[cap].owner,
        }
    }

    /// Live constraints of a bundle followed by its dynamic imports
    pub fn wired_constraints(&self, b: BundleIdx) -> impl Iterator<Item = ConsIdx> + '_ {
        let bundle = &self.bundles[b];
        bundle
            .constraints
            .iter()
            .chain(bundle.dynamic.iter())
            .copied()
            .filter(move |&c| self.cons[c].live)
    }

    /// Live, non-dropped, declared exports of a bundle
    pub fn offered_exports(&self, b: BundleIdx) -> impl Iterator<Item = CapIdx> + '_ {
        self.bundles[b].exports.iter().copied().filter(move |&cap| {
            let c = &self.caps[cap];
            c.live && !c.dropped && c.root.is_none()
        })
    }

    /// Does `b` import `name` from someone else
    pub fn imports_elsewhere(&self, b: BundleIdx, name: &str) -> bool {
        self.bundles[b].constraints.iter().any(|&c| {
            let cons = &self.cons[c];
            cons.live
                && cons.kind == ConstraintKind::ImportPackage
                && cons.name == name
                && cons
                    .selected_supplier()
                    .map_or(false, |s| self.supplier_owner(s) != b)
        })
    }

    pub fn supplier_info(&self, supplier: Supplier) -> SupplierInfo<'_> {
        match supplier {
            Supplier::Capability(cap) => {
                let c = &self.caps[cap];
                let owner = &self.bundles[c.owner];
                SupplierInfo {
                    name: &c.name,
                    version: &c.version,
                    bundle: &owner.desc,
                    resolved: owner.is_resolved(),
                }
            }
            Supplier::Bundle(b) => {
                let bundle = &self.bundles[b];
                SupplierInfo {
                    name: &bundle.desc.symbolic_name,
                    version: &bundle.desc.version,
                    bundle: &bundle.desc,
                    resolved: bundle.is_resolved(),
                }
            }
        }
    }

    /// Check if an import constraint accepts an export capability
    pub fn import_matches(&self, c: ConsIdx, cap: CapIdx) -> bool {
        let cons = &self.cons[c];
        let capability = &self.caps[cap];
        if !capability.live || capability.kind != CapabilityKind::Export || capability.dropped {
            return false;
        }
        let exporter = &self.bundles[capability.owner];
        if !exporter.live || (exporter.removal_pending && !exporter.is_resolved()) {
            return false;
        }
        if cons.excluded.contains(&capability.owner) {
            return false;
        }
        if capability.root.is_some() {
            // never wire to a copy of our own re-export, nor to a copy when
            // the re-exporter declares the package itself
            if capability.owner == cons.owner {
                return false;
            }
            let declares_own = self
                .offered_exports(capability.owner)
                .any(|e| self.caps[e].name == capability.name);
            if declares_own {
                return false;
            }
        }
        self.import_spec(c)
            .accepts(&cons.name, self.export_spec(cap), &exporter.desc)
    }

    pub fn require_matches(&self, c: ConsIdx, b: BundleIdx) -> bool {
        let bundle = &self.bundles[b];
        bundle.live
            && !(bundle.removal_pending && !bundle.is_resolved())
            && self.require_spec(c).accepts(&bundle.desc)
    }

    pub fn generic_matches(&self, c: ConsIdx, cap: CapIdx) -> bool {
        let capability = &self.caps[cap];
        if !capability.live || capability.kind != CapabilityKind::Generic {
            return false;
        }
        let provider = &self.bundles[capability.owner];
        provider.live
            && !(provider.removal_pending && !provider.is_resolved())
            && self.generic_spec(c).accepts(self.capability_spec(cap))
    }

    /// Check if a constraint accepts a supplier
    pub fn matches(&self, c: ConsIdx, supplier: Supplier) -> bool {
        match (self.cons[c].kind, supplier) {
            (ConstraintKind::ImportPackage, Supplier::Capability(cap)) => {
                self.import_matches(c, cap)
            }
            (ConstraintKind::RequireBundle, Supplier::Bundle(b)) => self.require_matches(c, b),
            (ConstraintKind::GenericRequirement, Supplier::Capability(cap)) => {
                self.generic_matches(c, cap)
            }
            _ => false,
        }
    }

    /// Is a wired supplier still usable
    pub fn supplier_alive(&self, supplier: Supplier) -> bool {
        match supplier {
            Supplier::Capability(cap) => {
                let c = &self.caps[cap];
                c.live && !c.dropped && self.bundles[c.owner].live
            }
            Supplier::Bundle(b) => self.bundles[b].live,
        }
    }
}

/// Candidate ordering over the arena
pub(crate) struct SupplierOrder<'a> {
    pub arena: &'a Arena,
    pub policy: Option<&'a dyn SelectionPolicy>,
    pub system_bundle: &'a str,
}

impl SupplierOrder<'_> {
    pub fn compare(&self, a: &Supplier, b: &Supplier) -> Ordering {
        let a = self.arena.supplier_info(*a);
        let b = self.arena.supplier_info(*b);
        match self.policy {
            Some(policy) => policy.compare(&a, &b),
            None => default_compare(&a, &b, self.system_bundle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_wiring() {
        let mut cons = Constraint::new(ConstraintKind::ImportPackage, 0, 0, 0, "pkg".to_string());
        assert!(cons.wired().is_empty());

        cons.add_supplier(Supplier::Capability(3));
        cons.add_supplier(Supplier::Capability(5));
        assert_eq!(cons.selected_supplier(), Some(Supplier::Capability(3)));
        assert_eq!(cons.wired(), vec![Supplier::Capability(3)]);

        cons.multiple = true;
        assert_eq!(cons.wired().len(), 2);

        cons.clear();
        assert_eq!(cons.selected_supplier(), None);
    }

    #[test]
    fn test_kind_rank_order() {
        assert!(
            kind_rank(ConstraintKind::GenericRequirement) < kind_rank(ConstraintKind::RequireBundle)
        );
        assert!(
            kind_rank(ConstraintKind::RequireBundle) < kind_rank(ConstraintKind::ImportPackage)
        );
    }
}
