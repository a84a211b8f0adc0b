//! Uses-constraint consistency.
//!
//! Every resolved bundle gets a package space: package name to the bundle
//! that really provides it. The space is seeded with the bundle's own
//! exports and grown with the transitive `uses` closure of everything it
//! imports or requires. Two providers for one name is a conflict.
//!
//! When conflicts exist the engine searches alternative supplier
//! selections, odometer style, for the combination with the fewest
//! mandatory conflicts, bounded by `max_combinations`.

use super::arena::{BundleIdx, CapIdx, ConsIdx, Supplier};
use super::Engine;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use trellis_core::types::{ConstraintKind, ResolverErrorKind};

/// A constraint whose wiring cannot be made consistent
#[derive(Debug, Clone)]
pub(super) struct UsesFailure {
    pub bundle: BundleIdx,
    pub constraint: ConsIdx,
    pub detail: String,
}

#[derive(Debug, Clone)]
struct Conflict {
    bundle: BundleIdx,
    constraint: ConsIdx,
    optional: bool,
    package: String,
    first: BundleIdx,
    second: BundleIdx,
}

type PackageSpace = BTreeMap<String, BundleIdx>;

impl Engine {
    /// Check the resolved bundles of a batch; returns mandatory conflicts
    ///
    /// Conflicting optional constraints are unwired instead.
    pub(super) fn check_uses(&mut self, batch: &[BundleIdx]) -> Vec<UsesFailure> {
        let bundles: Vec<BundleIdx> = batch
            .iter()
            .copied()
            .filter(|&b| {
                let bundle = &self.arena.bundles[b];
                !bundle.is_fragment() && bundle.is_resolved()
            })
            .collect();
        if bundles.is_empty() {
            return Vec::new();
        }

        if self.batch_conflicts(&bundles).iter().any(|c| !c.optional) {
            self.search_combinations(&bundles);
        }

        loop {
            let conflicts = self.batch_conflicts(&bundles);
            let optional: Vec<ConsIdx> = conflicts
                .iter()
                .filter(|c| c.optional)
                .map(|c| c.constraint)
                .collect();
            if optional.is_empty() {
                return conflicts
                    .into_iter()
                    .map(|conflict| UsesFailure {
                        bundle: conflict.bundle,
                        constraint: conflict.constraint,
                        detail: self.describe_conflict(&conflict),
                    })
                    .collect();
            }
            for c in optional {
                let (owner, name) = (self.arena.cons[c].owner, self.arena.cons[c].name.clone());
                debug!(
                    target: "trellis::resolver::uses",
                    package = %name,
                    "Unwiring conflicting optional constraint"
                );
                self.clear_constraint(c);
                self.sync_substitution(owner, &name);
            }
        }
    }

    /// Record uses errors and mark the bundles unresolvable
    pub(super) fn fail_uses(&mut self, failures: &[UsesFailure]) {
        for failure in failures {
            let kind = ResolverErrorKind::uses_conflict(self.arena.cons[failure.constraint].kind);
            self.record_error(
                failure.bundle,
                kind,
                failure.detail.clone(),
                Some(failure.constraint),
            );
            self.arena.bundles[failure.bundle].resolvable = false;
        }
    }

    fn describe_conflict(&self, conflict: &Conflict) -> String {
        format!(
            "{} is provided by both {} and {}",
            conflict.package,
            self.arena.bundles[conflict.first].desc,
            self.arena.bundles[conflict.second].desc
        )
    }

    /// Narrow check used when wiring a single constraint late
    pub(super) fn bundle_is_consistent(&self, b: BundleIdx) -> bool {
        self.bundle_conflicts(b).is_empty()
    }

    fn batch_conflicts(&self, bundles: &[BundleIdx]) -> Vec<Conflict> {
        bundles
            .iter()
            .flat_map(|&b| self.bundle_conflicts(b))
            .collect()
    }

    /// Conflicts in one bundle's package space, at most one per constraint
    fn bundle_conflicts(&self, b: BundleIdx) -> Vec<Conflict> {
        let arena = &self.arena;
        let mut space = PackageSpace::new();
        let mut own = BTreeSet::new();
        for &cap in &arena.bundles[b].exports {
            let c = &arena.caps[cap];
            if c.live && c.root.is_none() && !arena.imports_elsewhere(b, &c.name) {
                space.entry(c.name.clone()).or_insert(b);
                own.insert(c.name.clone());
            }
        }

        let mut visited = BTreeSet::new();
        let mut conflicts = Vec::new();
        for c in arena.wired_constraints(b) {
            let cons = &arena.cons[c];
            let roots = match (cons.kind, cons.selected_supplier()) {
                (ConstraintKind::ImportPackage, Some(Supplier::Capability(cap))) => vec![cap],
                (ConstraintKind::RequireBundle, Some(Supplier::Bundle(r))) => self
                    .required_exports(r)
                    .into_iter()
                    .filter(|&cap| !own.contains(&arena.caps[cap].name))
                    .collect(),
                _ => continue,
            };
            for cap in roots {
                let added = self.add_closure(&mut space, &mut visited, cap);
                if let Err((package, first, second)) = added {
                    conflicts.push(Conflict {
                        bundle: b,
                        constraint: c,
                        optional: cons.optional,
                        package,
                        first,
                        second,
                    });
                    break;
                }
            }
        }
        conflicts
    }

    /// Add an export and its transitive uses to a package space
    fn add_closure(
        &self,
        space: &mut PackageSpace,
        visited: &mut BTreeSet<CapIdx>,
        cap: CapIdx,
    ) -> Result<(), (String, BundleIdx, BundleIdx)> {
        let mut work = vec![cap];
        while let Some(cap) = work.pop() {
            if !visited.insert(cap) {
                continue;
            }
            let provider = self.arena.provider(cap);
            let name = &self.arena.caps[cap].name;
            match space.get(name) {
                Some(&existing) if existing != provider => {
                    return Err((name.clone(), existing, provider));
                }
                Some(_) => {}
                None => {
                    space.insert(name.clone(), provider);
                }
            }
            for used in &self.arena.export_spec(cap).uses {
                if let Some(next) = self.visible_source(provider, used) {
                    work.push(next);
                }
            }
        }
        Ok(())
    }

    /// Where `bundle` gets package `name` from: imports first, then its own
    /// exports, then required bundles
    fn visible_source(&self, bundle: BundleIdx, name: &str) -> Option<CapIdx> {
        let arena = &self.arena;
        let imported = arena.wired_constraints(bundle).find_map(|c| {
            let cons = &arena.cons[c];
            match cons.selected_supplier() {
                Some(Supplier::Capability(cap))
                    if cons.kind == ConstraintKind::ImportPackage && cons.name == name =>
                {
                    Some(cap)
                }
                _ => None,
            }
        });
        if imported.is_some() {
            return imported;
        }
        let own = arena.bundles[bundle].exports.iter().copied().find(|&cap| {
            let c = &arena.caps[cap];
            c.live && c.root.is_none() && c.name == name
        });
        if own.is_some() {
            return own;
        }
        arena
            .wired_constraints(bundle)
            .filter(|&c| arena.cons[c].kind == ConstraintKind::RequireBundle)
            .filter_map(|c| match arena.cons[c].selected_supplier() {
                Some(Supplier::Bundle(r)) => Some(r),
                _ => None,
            })
            .find_map(|r| {
                self.required_exports(r)
                    .into_iter()
                    .find(|&cap| arena.caps[cap].name == name)
            })
    }

    /// Exports a bundle offers to its requirers, including re-exported ones
    fn required_exports(&self, r: BundleIdx) -> Vec<CapIdx> {
        let arena = &self.arena;
        let mut exports = Vec::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![r];
        while let Some(x) = stack.pop() {
            if !visited.insert(x) {
                continue;
            }
            exports.extend(arena.offered_exports(x));
            for c in arena.wired_constraints(x) {
                let cons = &arena.cons[c];
                if cons.kind != ConstraintKind::RequireBundle || !arena.require_spec(c).reexport {
                    continue;
                }
                if let Some(Supplier::Bundle(y)) = cons.selected_supplier() {
                    stack.push(y);
                }
            }
        }
        exports
    }

    /// Try alternative selections for constraints with several suppliers
    fn search_combinations(&mut self, bundles: &[BundleIdx]) {
        let arena = &self.arena;
        let choices: Vec<ConsIdx> = bundles
            .iter()
            .flat_map(|&b| arena.wired_constraints(b))
            .filter(|&c| {
                let cons = &arena.cons[c];
                !cons.multiple
                    && cons.selected.is_some()
                    && cons.possible.len() > 1
                    && matches!(
                        cons.kind,
                        ConstraintKind::ImportPackage | ConstraintKind::RequireBundle
                    )
            })
            .collect();
        if choices.is_empty() {
            return;
        }
        let sizes: Vec<usize> = choices
            .iter()
            .map(|&c| self.arena.cons[c].possible.len())
            .collect();

        let mut best: Vec<usize> = choices
            .iter()
            .map(|&c| self.arena.cons[c].selected.unwrap_or(0))
            .collect();
        let mut best_count = self.mandatory_conflicts(bundles);
        let mut current = vec![0; choices.len()];
        let mut tried = 0usize;
        while best_count > 0 && tried < self.options.max_combinations {
            for (&c, &choice) in choices.iter().zip(&current) {
                self.arena.cons[c].selected = Some(choice);
            }
            let count = self.mandatory_conflicts(bundles);
            tried += 1;
            if count < best_count {
                best_count = count;
                best = current.clone();
            }
            if !next_combination(&mut current, &sizes) {
                break;
            }
        }

        for (&c, &choice) in choices.iter().zip(&best) {
            self.arena.cons[c].selected = Some(choice);
        }
        debug!(
            target: "trellis::resolver::uses",
            tried,
            remaining = best_count,
            "Combination search finished"
        );
        for &b in bundles {
            self.sync_all_substitutions(b);
        }
    }

    fn mandatory_conflicts(&self, bundles: &[BundleIdx]) -> usize {
        self.batch_conflicts(bundles)
            .iter()
            .filter(|c| !c.optional)
            .count()
    }
}

/// Odometer step; false once every combination has been produced
fn next_combination(current: &mut [usize], sizes: &[usize]) -> bool {
    for (digit, &size) in current.iter_mut().zip(sizes) {
        *digit += 1;
        if *digit < size {
            return true;
        }
        *digit = 0;
    }
    false
}
