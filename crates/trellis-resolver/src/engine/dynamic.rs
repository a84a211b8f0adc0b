//! On-demand wiring: dynamic imports and late optional constraints.

use super::arena::{BundleIdx, ConsIdx, Constraint, Supplier};
use super::Engine;
use crate::state::{ExportRef, State};
use tracing::debug;
use trellis_core::types::{BundleId, ConstraintKind};

impl Engine {
    /// Wire a dynamic import of `package` for a resolved bundle
    ///
    /// Returns `None` when the bundle is not resolved, exports the package
    /// itself, has no dynamic-import template covering it, or no resolved
    /// exporter fits without a uses conflict.
    pub(crate) fn resolve_dynamic_import(
        &mut self,
        state: &mut State,
        id: BundleId,
        package: &str,
    ) -> Option<ExportRef> {
        let b = *self.arena.by_id.get(&id)?;
        let bundle = &self.arena.bundles[b];
        if !bundle.is_resolved() || bundle.is_fragment() {
            return None;
        }
        let exports_itself = bundle.exports.iter().any(|&cap| {
            let c = &self.arena.caps[cap];
            c.live && c.root.is_none() && c.name == package
        });
        if exports_itself {
            return None;
        }

        let existing = bundle.dynamic.iter().find_map(|&c| {
            let cons = &self.arena.cons[c];
            match cons.selected_supplier() {
                Some(Supplier::Capability(cap)) if cons.live && cons.name == package => Some(cap),
                _ => None,
            }
        });
        if let Some(cap) = existing {
            return Some(self.export_ref(cap));
        }

        let mut templates: Vec<(BundleId, usize)> = Vec::new();
        for &declarer in std::iter::once(&b).chain(bundle.fragments.iter()) {
            let desc = &self.arena.bundles[declarer].desc;
            templates.extend(
                desc.dynamic_imports()
                    .filter(|(_, spec)| spec.covers(package))
                    .map(|(i, _)| (desc.bundle_id, i)),
            );
        }

        for (declared_by, index) in templates {
            let Some(c) = self.instantiate_dynamic(b, declared_by, index, package) else {
                continue;
            };
            let candidates: Vec<Supplier> = self
                .exports
                .get(package)
                .iter()
                .copied()
                .filter(|&s| {
                    let owner = self.arena.supplier_owner(s);
                    self.arena.matches(c, s) && self.arena.bundles[owner].is_resolved()
                })
                .collect();
            for supplier in candidates {
                self.arena.cons[c].add_supplier(supplier);
                if self.bundle_is_consistent(b) {
                    self.wire(c, supplier);
                    self.publish_bundle(state, b);
                    debug!(
                        target: "trellis::resolver::imports",
                        bundle = %self.arena.bundles[b].desc,
                        package,
                        "Dynamic import wired"
                    );
                    let Supplier::Capability(cap) = supplier else {
                        return None;
                    };
                    return Some(self.export_ref(cap));
                }
                self.arena.cons[c].clear();
            }
            self.release_dynamic(b, c);
        }
        debug!(
            target: "trellis::resolver::imports",
            bundle = id,
            package,
            "No supplier for dynamic import"
        );
        None
    }

    /// Create the constraint for one dynamic import of a concrete package
    pub(super) fn instantiate_dynamic(
        &mut self,
        b: BundleIdx,
        declared_by: BundleId,
        index: usize,
        package: &str,
    ) -> Option<ConsIdx> {
        let declarer = std::iter::once(b)
            .chain(self.arena.bundles[b].fragments.iter().copied())
            .find(|&x| self.arena.bundles[x].id() == declared_by)?;
        let spec = self.arena.bundles[declarer].desc.imports.get(index)?;
        if !spec.is_dynamic() {
            return None;
        }
        let mut cons = Constraint::new(
            ConstraintKind::ImportPackage,
            b,
            declarer,
            index,
            package.to_string(),
        );
        cons.dynamic = true;
        let c = self.arena.push_cons(cons);
        self.arena.bundles[b].dynamic.push(c);
        Some(c)
    }

    /// Drop a dynamic import constraint that found no supplier
    fn release_dynamic(&mut self, b: BundleIdx, c: ConsIdx) {
        self.arena.bundles[b].dynamic.retain(|&x| x != c);
        if !self.arena.pop_cons(c) {
            self.arena.cons[c].live = false;
        }
    }

    /// Wire optional constraints of already-resolved bundles when a
    /// consistent supplier has become available
    pub(super) fn resolve_optional_constraints(&mut self, bundles: &[BundleIdx]) {
        for &b in bundles {
            if !self.arena.bundles[b].live || !self.arena.bundles[b].is_resolved() {
                continue;
            }
            let unwired: Vec<ConsIdx> = self
                .arena
                .wired_constraints(b)
                .filter(|&c| {
                    let cons = &self.arena.cons[c];
                    cons.optional
                        && cons.selected.is_none()
                        && matches!(
                            cons.kind,
                            ConstraintKind::ImportPackage | ConstraintKind::RequireBundle
                        )
                })
                .collect();
            let mut changed = false;
            for c in unwired {
                let cons = &self.arena.cons[c];
                let index = match cons.kind {
                    ConstraintKind::ImportPackage => &self.exports,
                    _ => &self.bundles,
                };
                let candidates: Vec<Supplier> = index
                    .get(&cons.name)
                    .iter()
                    .copied()
                    .filter(|&s| {
                        let target = self.arena.supplier_owner(s);
                        target != b
                            && self.arena.matches(c, s)
                            && self.arena.bundles[target].is_resolved()
                    })
                    .collect();
                for supplier in candidates {
                    self.arena.cons[c].add_supplier(supplier);
                    if self.bundle_is_consistent(b) {
                        self.wire(c, supplier);
                        changed = true;
                        debug!(
                            target: "trellis::resolver",
                            bundle = %self.arena.bundles[b].desc,
                            constraint = %self.arena.describe(c),
                            "Optional constraint wired"
                        );
                        break;
                    }
                    self.arena.cons[c].clear();
                }
            }
            if changed {
                self.sync_all_substitutions(b);
            }
        }
    }
}
