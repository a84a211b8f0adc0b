//! Resolution engine.
//!
//! The engine mirrors the [`State`](crate::state::State) as an arena of
//! resolver bundles, capabilities and constraints, indexed by name in
//! preference order. A resolve pass runs in phases:
//!
//! 1. unresolve everything being refreshed, cascading to dependents
//! 2. attach fragments, then resolve each bundle with an explicit-stack
//!    depth-first search, treating dependency cycles atomically
//! 3. prune wires to suppliers that did not make it, then check uses
//!    consistency and search alternative selections for conflicts
//! 4. pick singleton winners and run one corrective batch
//! 5. publish the wiring back into the state
//!
//! Each phase lives in its own submodule; this file holds the shared
//! bookkeeping.

mod arena;
mod dfs;
mod dynamic;
mod fragment;
mod lifecycle;
mod publish;
mod singleton;
mod uses;

#[cfg(test)]
mod tests;

use crate::index::CandidateIndex;
use crate::policy::SelectionPolicy;
use crate::resolver::ResolverOptions;
use crate::state::State;
use arena::{
    Arena, BundleIdx, BundleState, CapIdx, CapabilityKind, ConsIdx, Supplier, SupplierOrder,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, trace};
use trellis_core::types::{
    BundleId, ConstraintKind, PlatformProperties, ResolverError, ResolverErrorKind,
};
use trellis_core::utils::split_list;

/// Platform property keys listing the available execution environments
const EXECUTION_ENVIRONMENT_KEYS: [&str; 2] = [
    "org.osgi.framework.executionenvironment",
    "framework.executionenvironment",
];

/// Platform property switching a pass into development mode
const MODE_KEY: &str = "resolver.mode";

/// Platform property enabling optional-constraint resolution
const RESOLVE_OPTIONAL_KEY: &str = "resolver.resolveOptional";

/// Retired arena entries tolerated before the engine is rebuilt from state
const COMPACT_MIN_DEAD: usize = 256;

pub(crate) struct Engine {
    arena: Arena,
    exports: CandidateIndex<Supplier>,
    generics: CandidateIndex<Supplier>,
    bundles: CandidateIndex<Supplier>,
    options: ResolverOptions,
    policy: Option<Arc<dyn SelectionPolicy>>,
    /// Removal-pending bundles by id
    pending: BTreeMap<BundleId, Vec<BundleIdx>>,
    dev_mode: bool,
    resolve_optional: bool,
    platform: Vec<PlatformProperties>,
    environments: Vec<String>,
    errors: BTreeMap<BundleId, Vec<ResolverError>>,
    /// Bundles whose published errors are replaced at the end of the pass
    touched: BTreeSet<BundleId>,
    rejected: BTreeSet<BundleIdx>,
}

impl Engine {
    fn empty(options: ResolverOptions, policy: Option<Arc<dyn SelectionPolicy>>) -> Self {
        let dev_mode = options.development_mode;
        let resolve_optional = options.resolve_optional;
        Self {
            arena: Arena::default(),
            exports: CandidateIndex::new(),
            generics: CandidateIndex::new(),
            bundles: CandidateIndex::new(),
            options,
            policy,
            pending: BTreeMap::new(),
            dev_mode,
            resolve_optional,
            platform: Vec::new(),
            environments: Vec::new(),
            errors: BTreeMap::new(),
            touched: BTreeSet::new(),
            rejected: BTreeSet::new(),
        }
    }

    /// Run a full resolve pass and publish the result into `state`
    pub(crate) fn resolve(
        &mut self,
        state: &mut State,
        refresh: &[BundleId],
        platform: &[PlatformProperties],
    ) {
        self.begin_pass(platform);
        state.set_platform_properties(platform.to_vec());
        info!(
            target: "trellis::resolver",
            bundles = self.arena.by_id.len(),
            refresh = refresh.len(),
            development = self.dev_mode,
            "Starting resolve pass"
        );

        let mut refresh_ids: BTreeSet<BundleId> = refresh.iter().copied().collect();
        refresh_ids.extend(self.pending.keys().copied());
        if self.dev_mode {
            refresh_ids.extend(self.hosts_of_unresolved_fragments());
        }
        for id in &refresh_ids {
            for b in self.bundles_with_id(*id) {
                self.unresolve_cascade(b);
            }
        }
        for (id, removed) in std::mem::take(&mut self.pending) {
            for b in removed {
                self.discard(b);
            }
            state.complete_removal(id);
            debug!(target: "trellis::resolver", bundle = id, "Completed pending removal");
        }
        self.reorder();

        let previously_resolved: Vec<BundleIdx> = if self.resolve_optional {
            self.live_bundles()
                .filter(|&b| self.arena.bundles[b].is_resolved())
                .collect()
        } else {
            Vec::new()
        };

        let batch = self.unresolved_batch();
        self.resolve_batch(&batch);
        if self.select_singletons(&batch) {
            let batch = self.unresolved_batch();
            self.resolve_batch(&batch);
            self.select_singletons(&batch);
        }
        self.record_rejected_singletons();

        if self.resolve_optional {
            self.resolve_optional_constraints(&previously_resolved);
        }

        self.publish(state);
        for id in state.resolved_bundles() {
            if let Some(resolution) = state.resolution(id) {
                for wire in resolution.wires.iter().chain(&resolution.dynamic_wires) {
                    trace!(
                        target: "trellis::resolver::wiring",
                        bundle = id,
                        constraint = %wire.constraint.name,
                        supplier = wire.supplier.bundle(),
                        "Wire"
                    );
                }
            }
        }
        let resolved = self
            .live_bundles()
            .filter(|&b| self.arena.bundles[b].is_resolved())
            .count();
        info!(
            target: "trellis::resolver",
            resolved,
            unresolved = self.arena.by_id.len().saturating_sub(resolved),
            "Resolve pass complete"
        );
        self.compact(state);
    }

    /// Rebuild from the published state once retired entries dominate the arena
    fn compact(&mut self, state: &State) {
        let dead = self.arena.dead_entries();
        if dead < COMPACT_MIN_DEAD || dead * 2 < self.arena.entries() {
            return;
        }
        let options = self.options.clone();
        let policy = self.policy.clone();
        *self = Engine::build(state, options, policy);
        debug!(target: "trellis::resolver", reclaimed = dead, "Engine arena compacted");
    }

    fn begin_pass(&mut self, platform: &[PlatformProperties]) {
        let first = platform.first();
        self.dev_mode = self.options.development_mode
            || first
                .and_then(|p| p.get(MODE_KEY))
                .map_or(false, |mode| mode == "development");
        self.resolve_optional = self.options.resolve_optional
            || first
                .and_then(|p| p.get(RESOLVE_OPTIONAL_KEY))
                .map_or(false, |v| v.eq_ignore_ascii_case("true"));
        self.platform = platform.to_vec();
        self.environments = platform
            .iter()
            .flat_map(|p| EXECUTION_ENVIRONMENT_KEYS.iter().filter_map(|k| p.get(*k)))
            .flat_map(|v| split_list(v))
            .collect();
        self.errors.clear();
        self.touched.clear();
        self.rejected.clear();
    }

    /// One batch: attach fragments, search, validate, check uses
    fn resolve_batch(&mut self, batch: &[BundleIdx]) {
        if batch.is_empty() {
            return;
        }
        debug!(target: "trellis::resolver", size = batch.len(), "Resolving batch");
        self.prepare(batch);
        for &b in batch {
            self.attach_fragment(b);
        }
        self.run_search(batch);

        let failures = self.check_uses(batch);
        if !failures.is_empty() {
            self.fail_uses(&failures);
            for &b in batch {
                let bundle = &self.arena.bundles[b];
                if !bundle.is_fragment() && bundle.state != BundleState::Unresolved {
                    self.reset_for_retry(b);
                }
            }
            self.run_search(batch);
            let failures = self.check_uses(batch);
            self.fail_uses(&failures);
            for failure in &failures {
                self.unresolve_cascade(failure.bundle);
            }
        }
        self.resolve_fragments(batch);
    }

    fn run_search(&mut self, batch: &[BundleIdx]) {
        for &b in batch {
            if self.arena.bundles[b].is_fragment() {
                continue;
            }
            let mut cycle = Vec::new();
            self.resolve_bundle(b, &mut cycle);
            self.check_cycle(cycle);
        }
        self.validate(batch);
    }

    fn prepare(&mut self, batch: &[BundleIdx]) {
        for &b in batch {
            let id = self.arena.bundles[b].id();
            self.errors.remove(&id);
            self.touched.insert(id);
            let constraints = self.arena.bundles[b].constraints.clone();
            for c in constraints {
                self.arena.cons[c].excluded.clear();
            }
            self.arena.bundles[b].refs.clear();
            let resolvable = self.is_resolvable(b);
            let rejected = self.rejected.contains(&b);
            self.arena.bundles[b].resolvable = resolvable || (self.dev_mode && !rejected);
        }
    }

    /// Eligibility: singleton precheck, execution environment, platform filter
    fn is_resolvable(&mut self, b: BundleIdx) -> bool {
        if self.rejected.contains(&b) {
            return false;
        }
        let desc = Arc::clone(&self.arena.bundles[b].desc);
        if desc.singleton {
            let winner = self.bundles.get(&desc.symbolic_name).iter().any(|s| {
                let other = self.arena.supplier_owner(*s);
                let bundle = &self.arena.bundles[other];
                other != b && bundle.live && bundle.desc.singleton && bundle.is_resolved()
            });
            if winner {
                self.rejected.insert(b);
                return false;
            }
        }

        let mut resolvable = true;
        if !desc.execution_environments.is_empty()
            && !desc
                .execution_environments
                .iter()
                .any(|ee| self.environments.contains(ee))
        {
            self.record_error(
                b,
                ResolverErrorKind::MissingExecutionEnvironment,
                desc.execution_environments.join(","),
                None,
            );
            resolvable = false;
        }
        if let Some(filter) = &desc.platform_filter {
            if !self.platform.iter().any(|p| filter.matches_properties(p)) {
                self.record_error(
                    b,
                    ResolverErrorKind::PlatformFilterMismatch,
                    filter.to_string(),
                    None,
                );
                resolvable = false;
            }
        }
        resolvable
    }

    fn record_error(
        &mut self,
        b: BundleIdx,
        kind: ResolverErrorKind,
        data: impl Into<String>,
        constraint: Option<ConsIdx>,
    ) {
        let id = self.arena.bundles[b].id();
        let mut error = ResolverError::new(id, kind, data);
        if let Some(c) = constraint {
            error = error.with_constraint(self.arena.constraint_ref(c));
        }
        debug!(target: "trellis::resolver", bundle = id, error = %error, "Recorded resolver error");
        let errors = self.errors.entry(id).or_default();
        if !errors.contains(&error) {
            errors.push(error);
        }
    }

    fn has_errors(&self, b: BundleIdx) -> bool {
        self.errors
            .get(&self.arena.bundles[b].id())
            .map_or(false, |e| !e.is_empty())
    }

    /// Live, current bundles in bundle id order
    fn live_bundles(&self) -> impl Iterator<Item = BundleIdx> + '_ {
        self.arena.by_id.values().copied()
    }

    fn unresolved_batch(&self) -> Vec<BundleIdx> {
        self.live_bundles()
            .filter(|&b| self.arena.bundles[b].state == BundleState::Unresolved)
            .collect()
    }

    fn bundles_with_id(&self, id: BundleId) -> Vec<BundleIdx> {
        self.arena
            .by_id
            .get(&id)
            .copied()
            .into_iter()
            .chain(self.pending.get(&id).into_iter().flatten().copied())
            .collect()
    }

    fn index_put(&mut self, supplier: Supplier) {
        let order = SupplierOrder {
            arena: &self.arena,
            policy: self.policy.as_deref(),
            system_bundle: &self.options.system_bundle,
        };
        let (name, index) = match supplier {
            Supplier::Capability(cap) => {
                let c = &self.arena.caps[cap];
                let index = match c.kind {
                    CapabilityKind::Export => &mut self.exports,
                    CapabilityKind::Generic => &mut self.generics,
                };
                (c.name.as_str(), index)
            }
            Supplier::Bundle(b) => {
                let name = self.arena.bundles[b].desc.symbolic_name.as_str();
                (name, &mut self.bundles)
            }
        };
        if !index.contains(name, &supplier) {
            index.put(name, supplier, |a, b| order.compare(a, b));
        }
    }

    fn index_remove(&mut self, supplier: Supplier) {
        let (name, index) = match supplier {
            Supplier::Capability(cap) => {
                let c = &self.arena.caps[cap];
                let index = match c.kind {
                    CapabilityKind::Export => &mut self.exports,
                    CapabilityKind::Generic => &mut self.generics,
                };
                (c.name.as_str(), index)
            }
            Supplier::Bundle(b) => {
                let name = self.arena.bundles[b].desc.symbolic_name.as_str();
                (name, &mut self.bundles)
            }
        };
        index.remove(name, &supplier);
    }

    /// Re-sort every index after resolution states changed
    fn reorder(&mut self) {
        let order = SupplierOrder {
            arena: &self.arena,
            policy: self.policy.as_deref(),
            system_bundle: &self.options.system_bundle,
        };
        self.exports.reorder(|a, b| order.compare(a, b));
        self.generics.reorder(|a, b| order.compare(a, b));
        self.bundles.reorder(|a, b| order.compare(a, b));
    }

    /// Drop or restore `b`'s own exports of `name` depending on whether it
    /// now imports the package from someone else
    fn sync_substitution(&mut self, b: BundleIdx, name: &str) {
        let substituted = self.arena.imports_elsewhere(b, name);
        let exports: Vec<CapIdx> = self.arena.bundles[b]
            .exports
            .iter()
            .copied()
            .filter(|&cap| {
                let c = &self.arena.caps[cap];
                c.live && c.root.is_none() && c.name == name
            })
            .collect();
        for cap in exports {
            let dropped = self.arena.caps[cap].dropped;
            if substituted && !dropped {
                self.index_remove(Supplier::Capability(cap));
                self.arena.caps[cap].dropped = true;
                debug!(
                    target: "trellis::resolver::imports",
                    package = name,
                    "Export substituted by import"
                );
            } else if !substituted && dropped {
                self.arena.caps[cap].dropped = false;
                self.index_put(Supplier::Capability(cap));
            }
        }
    }

    fn sync_all_substitutions(&mut self, b: BundleIdx) {
        let names: BTreeSet<String> = self.arena.bundles[b]
            .constraints
            .iter()
            .map(|&c| &self.arena.cons[c])
            .filter(|c| c.kind == ConstraintKind::ImportPackage)
            .map(|c| c.name.clone())
            .collect();
        for name in names {
            self.sync_substitution(b, &name);
        }
    }

    /// Is `from` still wired to anything `to` supplies
    fn still_wired(&self, from: BundleIdx, to: BundleIdx) -> bool {
        self.arena
            .wired_constraints(from)
            .flat_map(|c| self.arena.cons[c].wired())
            .any(|s| self.arena.supplier_owner(s) == to)
    }

    /// Wire a constraint to a supplier and track the reference
    fn wire(&mut self, c: ConsIdx, supplier: Supplier) {
        let owner = self.arena.cons[c].owner;
        self.arena.cons[c].add_supplier(supplier);
        let target = self.arena.supplier_owner(supplier);
        if target != owner {
            self.arena.bundles[target].refs.insert(owner);
        }
    }

    fn clear_constraint(&mut self, c: ConsIdx) {
        let owner = self.arena.cons[c].owner;
        let suppliers = std::mem::take(&mut self.arena.cons[c].possible);
        self.arena.cons[c].selected = None;
        for supplier in suppliers {
            let target = self.arena.supplier_owner(supplier);
            if target != owner && !self.still_wired(owner, target) {
                self.arena.bundles[target].refs.remove(&owner);
            }
        }
    }

    /// Drop all of a bundle's wiring and derived capabilities
    fn unwire(&mut self, b: BundleIdx) {
        let constraints = self.arena.bundles[b].constraints.clone();
        for c in constraints {
            self.clear_constraint(c);
        }
        for c in std::mem::take(&mut self.arena.bundles[b].dynamic) {
            self.clear_constraint(c);
            self.arena.cons[c].live = false;
        }
        let exports = self.arena.bundles[b].exports.clone();
        for cap in exports {
            if self.arena.caps[cap].root.is_some() {
                self.index_remove(Supplier::Capability(cap));
                self.arena.caps[cap].live = false;
            } else if self.arena.caps[cap].dropped {
                self.arena.caps[cap].dropped = false;
                if self.arena.caps[cap].live {
                    self.index_put(Supplier::Capability(cap));
                }
            }
        }
        let arena = &self.arena;
        let exports: Vec<CapIdx> = arena.bundles[b]
            .exports
            .iter()
            .copied()
            .filter(|&cap| arena.caps[cap].live)
            .collect();
        self.arena.bundles[b].exports = exports;
    }

    /// Back to UNRESOLVED, detaching fragments outside development mode
    fn set_unresolved(&mut self, b: BundleIdx) {
        self.unwire(b);
        self.arena.bundles[b].state = BundleState::Unresolved;
        if !self.dev_mode {
            for f in self.arena.bundles[b].fragments.clone() {
                self.detach_fragment(b, f);
            }
        }
    }

    /// Back to UNRESOLVED for another attempt within the same batch
    fn reset_for_retry(&mut self, b: BundleIdx) {
        self.unwire(b);
        self.arena.bundles[b].state = BundleState::Unresolved;
    }
}
