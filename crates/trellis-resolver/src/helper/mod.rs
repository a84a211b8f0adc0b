//! Wiring graph queries over a [`State`]
//!
//! Provides transitive dependent/prerequisite lookups, unsatisfied
//! constraint analysis and a dependency-ordered sort of bundles that groups
//! cycles, all computed from the published wiring.

use crate::state::{ExportRef, State, SupplierRef};
use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use trellis_core::types::{BundleDescriptor, BundleId, ConstraintKind, ConstraintRef};

/// Why one bundle depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireKind {
    Import,
    Require,
    Generic,
    /// Fragment to host
    Host,
}

impl From<ConstraintKind> for WireKind {
    fn from(kind: ConstraintKind) -> Self {
        match kind {
            ConstraintKind::ImportPackage => WireKind::Import,
            ConstraintKind::RequireBundle => WireKind::Require,
            ConstraintKind::GenericRequirement => WireKind::Generic,
            ConstraintKind::Host => WireKind::Host,
        }
    }
}

/// Bundles in dependency order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedBundles {
    /// Suppliers before the bundles wired to them
    pub order: Vec<BundleId>,
    /// Groups of bundles wired to each other in a cycle
    pub cycles: Vec<Vec<BundleId>>,
}

/// Directed graph of published wires, dependent to supplier
#[derive(Debug, Default)]
pub struct WiringGraph {
    graph: DiGraph<BundleId, WireKind>,
    /// Map from bundle id to node for fast lookups
    node_map: IndexMap<BundleId, NodeIndex>,
}

impl WiringGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from every resolution record in `state`
    pub fn from_state(state: &State) -> Self {
        let mut graph = Self::new();
        for bundle in state.bundles() {
            graph.add_bundle(bundle.bundle_id);
        }
        for bundle in state.bundles() {
            let Some(resolution) = state.resolution(bundle.bundle_id) else {
                continue;
            };
            for wire in resolution.wires.iter().chain(&resolution.dynamic_wires) {
                graph.add_wire(
                    bundle.bundle_id,
                    wire.supplier.bundle(),
                    wire.constraint.kind.into(),
                );
            }
            for &host in &resolution.hosts {
                graph.add_wire(bundle.bundle_id, host, WireKind::Host);
            }
        }
        graph
    }

    /// Add a bundle node, returning the existing one if present
    pub fn add_bundle(&mut self, bundle_id: BundleId) -> NodeIndex {
        if let Some(&index) = self.node_map.get(&bundle_id) {
            return index;
        }
        let index = self.graph.add_node(bundle_id);
        self.node_map.insert(bundle_id, index);
        index
    }

    /// Add a wire edge; self wires and duplicates are ignored
    pub fn add_wire(&mut self, from: BundleId, to: BundleId, kind: WireKind) {
        if from == to {
            return;
        }
        let from = self.add_bundle(from);
        let to = self.add_bundle(to);
        if self.graph.edges_connecting(from, to).any(|e| *e.weight() == kind) {
            return;
        }
        self.graph.add_edge(from, to, kind);
    }

    pub fn contains(&self, bundle_id: BundleId) -> bool {
        self.node_map.contains_key(&bundle_id)
    }

    pub fn bundle_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn wire_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Bundles `bundle_id` is directly wired to
    pub fn suppliers_of(&self, bundle_id: BundleId) -> Vec<BundleId> {
        self.neighbors(bundle_id, Direction::Outgoing)
    }

    /// Bundles directly wired to `bundle_id`
    pub fn dependents_of(&self, bundle_id: BundleId) -> Vec<BundleId> {
        self.neighbors(bundle_id, Direction::Incoming)
    }

    /// `roots` and every bundle transitively wired to them
    pub fn dependents(&self, roots: &[BundleId]) -> Vec<BundleId> {
        self.reachable(roots, Direction::Incoming)
    }

    /// `roots` and every bundle they are transitively wired to
    pub fn prerequisites(&self, roots: &[BundleId]) -> Vec<BundleId> {
        self.reachable(roots, Direction::Outgoing)
    }

    /// Order `bundles` so suppliers come before their dependents
    ///
    /// Only wires between members of `bundles` are considered. Members of a
    /// cycle are kept together in the order and also reported in `cycles`.
    pub fn sort(&self, bundles: &[BundleId]) -> SortedBundles {
        let members: BTreeSet<BundleId> = bundles.iter().copied().collect();
        let mut sub: DiGraph<BundleId, ()> = DiGraph::new();
        let mut nodes = IndexMap::new();
        for &id in &members {
            nodes.insert(id, sub.add_node(id));
        }
        for edge in self.graph.raw_edges() {
            let (from, to) = (self.graph[edge.source()], self.graph[edge.target()]);
            if let (Some(&a), Some(&b)) = (nodes.get(&from), nodes.get(&to)) {
                sub.update_edge(a, b, ());
            }
        }

        // tarjan_scc yields components in reverse topological order, which
        // for dependent-to-supplier edges puts suppliers first
        let mut sorted = SortedBundles::default();
        for component in tarjan_scc(&sub) {
            let mut ids: Vec<BundleId> = component.into_iter().map(|n| sub[n]).collect();
            ids.sort_unstable();
            sorted.order.extend(ids.iter().copied());
            if ids.len() > 1 {
                sorted.cycles.push(ids);
            }
        }
        sorted
    }

    /// Format a cycle as "a -> b -> a"
    pub fn format_cycle(cycle: &[BundleId]) -> String {
        let mut names: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
        if let Some(first) = names.first().cloned() {
            if names.len() > 1 {
                names.push(first);
            }
        }
        names.join(" -> ")
    }

    fn neighbors(&self, bundle_id: BundleId, direction: Direction) -> Vec<BundleId> {
        let Some(&node) = self.node_map.get(&bundle_id) else {
            return Vec::new();
        };
        let ids: BTreeSet<BundleId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n])
            .collect();
        ids.into_iter().collect()
    }

    fn reachable(&self, roots: &[BundleId], direction: Direction) -> Vec<BundleId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = roots
            .iter()
            .filter_map(|id| self.node_map.get(id).copied())
            .collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(self.graph[node]) {
                continue;
            }
            stack.extend(self.graph.neighbors_directed(node, direction));
        }
        seen.into_iter().collect()
    }
}

/// Queries answering why bundles are or are not resolved
pub struct StateHelper<'a> {
    state: &'a State,
    graph: WiringGraph,
}

impl<'a> StateHelper<'a> {
    pub fn new(state: &'a State) -> Self {
        Self {
            state,
            graph: WiringGraph::from_state(state),
        }
    }

    pub fn graph(&self) -> &WiringGraph {
        &self.graph
    }

    /// Resolved `bundles` and every bundle transitively wired to them
    pub fn dependents(&self, bundles: &[BundleId]) -> Vec<BundleId> {
        let roots: Vec<BundleId> = bundles
            .iter()
            .copied()
            .filter(|&id| self.state.is_resolved(id))
            .collect();
        self.graph.dependents(&roots)
    }

    /// `bundles` and every bundle they are transitively wired to
    pub fn prerequisites(&self, bundles: &[BundleId]) -> Vec<BundleId> {
        self.graph.prerequisites(bundles)
    }

    /// Constraints of a bundle that are neither wired nor satisfiable by a
    /// resolved supplier in the state
    pub fn unsatisfied_constraints(&self, bundle_id: BundleId) -> Vec<ConstraintRef> {
        let Some(bundle) = self.state.bundle(bundle_id) else {
            return Vec::new();
        };
        let wired = self.wired_constraints();
        declared_constraints(bundle)
            .into_iter()
            .filter(|c| !wired.contains(&(c.kind, c.declared_by, c.index)))
            .filter(|c| !self.satisfiable(bundle, c, true))
            .collect()
    }

    /// Unsatisfied constraints of `bundles` that no bundle in the state
    /// could supply at all, resolved or not
    pub fn unsatisfied_leaves(&self, bundles: &[BundleId]) -> Vec<ConstraintRef> {
        let mut leaves = BTreeSet::new();
        for &id in bundles {
            let Some(bundle) = self.state.bundle(id) else {
                continue;
            };
            for constraint in self.unsatisfied_constraints(id) {
                if !self.satisfiable(bundle, &constraint, false) {
                    leaves.insert(constraint);
                }
            }
        }
        leaves.into_iter().collect()
    }

    /// Packages a bundle can see: its imports, then the exports of required
    /// bundles and what they re-export, minus anything imported directly
    pub fn visible_packages(&self, bundle_id: BundleId) -> Vec<ExportRef> {
        let Some(resolution) = self.state.resolution(bundle_id) else {
            return Vec::new();
        };
        let mut packages: Vec<ExportRef> = Vec::new();
        let mut imported = HashSet::new();
        for wire in resolution.import_wires() {
            if let SupplierRef::Export(export) = &wire.supplier {
                imported.insert(export.name.clone());
                packages.push(export.clone());
            }
        }

        let mut visited = HashSet::new();
        let mut stack: Vec<BundleId> = resolution.required_bundles();
        stack.reverse();
        while let Some(required) = stack.pop() {
            if !visited.insert(required) {
                continue;
            }
            let Some(supplier) = self.state.resolution(required) else {
                continue;
            };
            packages.extend(
                supplier
                    .selected_exports
                    .iter()
                    .filter(|e| !imported.contains(&e.name))
                    .cloned(),
            );
            let reexported: Vec<BundleId> = supplier
                .require_wires()
                .filter(|w| {
                    self.state
                        .descriptor_any(w.constraint.declared_by)
                        .and_then(|d| d.requires.get(w.constraint.index))
                        .is_some_and(|spec| spec.reexport)
                })
                .map(|w| w.supplier.bundle())
                .collect();
            stack.extend(reexported.into_iter().rev());
        }
        packages
    }

    /// Providers reachable from a bundle's visible packages through the
    /// `uses` lists of the exports it is wired to, one entry per package
    /// and provider
    pub fn uses_closure(&self, bundle_id: BundleId) -> Vec<ExportRef> {
        let mut closure: Vec<ExportRef> = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = self.visible_packages(bundle_id);
        stack.reverse();
        while let Some(export) = stack.pop() {
            if !seen.insert((export.name.clone(), export.exporter)) {
                continue;
            }
            let uses = self
                .state
                .descriptor_any(export.declared_by)
                .and_then(|d| d.exports.get(export.index))
                .map(|spec| spec.uses.clone())
                .unwrap_or_default();
            for used in uses.iter().rev() {
                if let Some(provider) = self.provider_for(export.exporter, used) {
                    stack.push(provider);
                }
            }
            closure.push(export);
        }
        closure
    }

    /// Export of `package` as `bundle_id` sees it: wired, else its own
    fn provider_for(&self, bundle_id: BundleId, package: &str) -> Option<ExportRef> {
        self.visible_packages(bundle_id)
            .into_iter()
            .find(|e| e.name == package)
            .or_else(|| {
                self.state
                    .resolution(bundle_id)?
                    .selected_exports
                    .iter()
                    .find(|e| e.name == package)
                    .cloned()
            })
    }

    /// Dependency-ordered sort of resolved `bundles`
    pub fn sort_bundles(&self, bundles: &[BundleId]) -> SortedBundles {
        self.graph.sort(bundles)
    }

    fn wired_constraints(&self) -> HashSet<(ConstraintKind, BundleId, usize)> {
        let mut wired = HashSet::new();
        for id in self.state.resolved_bundles() {
            let Some(resolution) = self.state.resolution(id) else {
                continue;
            };
            for wire in resolution.wires.iter().chain(&resolution.dynamic_wires) {
                let constraint = &wire.constraint;
                wired.insert((constraint.kind, constraint.declared_by, constraint.index));
            }
            if !resolution.hosts.is_empty() {
                wired.insert((ConstraintKind::Host, id, 0));
            }
        }
        wired
    }

    /// Whether some bundle in the state could supply `constraint`
    fn satisfiable(
        &self,
        bundle: &BundleDescriptor,
        constraint: &ConstraintRef,
        resolved_only: bool,
    ) -> bool {
        let eligible = |d: &BundleDescriptor| !resolved_only || self.state.is_resolved(d.bundle_id);
        match constraint.kind {
            ConstraintKind::ImportPackage => {
                let Some(spec) = bundle.imports.get(constraint.index) else {
                    return false;
                };
                self.state.bundles().filter(|d| eligible(*d)).any(|exporter| {
                    exporter
                        .exports
                        .iter()
                        .any(|export| spec.accepts(&spec.name, export, exporter))
                })
            }
            ConstraintKind::RequireBundle => {
                let Some(spec) = bundle.requires.get(constraint.index) else {
                    return false;
                };
                self.state
                    .bundles_named(&spec.name)
                    .any(|d| eligible(d) && d.bundle_id != bundle.bundle_id && spec.accepts(d))
            }
            ConstraintKind::GenericRequirement => {
                let Some(spec) = bundle.generic_requires.get(constraint.index) else {
                    return false;
                };
                self.state
                    .bundles()
                    .filter(|d| eligible(*d))
                    .any(|d| d.generic_capabilities.iter().any(|cap| spec.accepts(cap)))
            }
            ConstraintKind::Host => {
                let Some(spec) = bundle.host.as_ref() else {
                    return false;
                };
                self.state
                    .bundles_named(&spec.name)
                    .any(|d| eligible(d) && !d.is_fragment() && spec.accepts(d))
            }
        }
    }
}

/// Every non-dynamic constraint a descriptor declares
fn declared_constraints(bundle: &BundleDescriptor) -> Vec<ConstraintRef> {
    let id = bundle.bundle_id;
    let mut constraints = Vec::new();
    if let Some(host) = &bundle.host {
        constraints.push(ConstraintRef::new(ConstraintKind::Host, id, 0, host.name.clone()));
    }
    for (index, spec) in bundle.requires.iter().enumerate() {
        let name = spec.name.clone();
        constraints.push(ConstraintRef::new(ConstraintKind::RequireBundle, id, index, name));
    }
    for (index, spec) in bundle.static_imports() {
        let name = spec.name.clone();
        constraints.push(ConstraintRef::new(ConstraintKind::ImportPackage, id, index, name));
    }
    for (index, spec) in bundle.generic_requires.iter().enumerate() {
        constraints.push(ConstraintRef::new(
            ConstraintKind::GenericRequirement,
            id,
            index,
            spec.name.clone(),
        ));
    }
    constraints
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn sort_respects_acyclic_wires(
            edges in prop::collection::vec((0u64..12, 0u64..12), 0..30)
        ) {
            // Only keep edges from higher to lower ids so the graph is acyclic
            let mut graph = WiringGraph::new();
            for id in 0..12 {
                graph.add_bundle(id);
            }
            for &(a, b) in &edges {
                if a > b {
                    graph.add_wire(a, b, WireKind::Import);
                }
            }
            let ids: Vec<BundleId> = (0..12).collect();
            let sorted = graph.sort(&ids);
            prop_assert!(sorted.cycles.is_empty());
            prop_assert_eq!(sorted.order.len(), 12);
            let position = |id: BundleId| sorted.order.iter().position(|&x| x == id);
            for &(a, b) in &edges {
                if a > b {
                    prop_assert!(position(b) < position(a));
                }
            }
        }

        #[test]
        fn dependents_include_roots(
            edges in prop::collection::vec((0u64..8, 0u64..8), 0..20),
            root in 0u64..8
        ) {
            let mut graph = WiringGraph::new();
            for id in 0..8 {
                graph.add_bundle(id);
            }
            for &(a, b) in &edges {
                graph.add_wire(a, b, WireKind::Require);
            }
            let dependents = graph.dependents(&[root]);
            prop_assert!(dependents.contains(&root));
            for &(a, b) in &edges {
                if a != b && dependents.contains(&b) {
                    prop_assert!(dependents.contains(&a));
                }
            }
        }
    }
}
