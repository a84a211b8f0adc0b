//! Depth-first constraint search.
//!
//! The search walks constraints with an explicit stack of frames, so deep
//! dependency chains never grow the call stack. A supplier whose owner is
//! still being resolved marks the dependent as part of a cycle; cycle
//! members stay RESOLVING until [`Engine::check_cycle`] promotes or
//! re-resolves them together.

use super::arena::{kind_rank, BundleIdx, BundleState, CapIdx, ConsIdx, Supplier};
use super::Engine;
use std::collections::BTreeSet;
use tracing::{debug, trace};
use trellis_core::types::{ConstraintKind, ResolverErrorKind};

#[derive(Debug, Clone, Copy)]
enum Candidate {
    Supplier(Supplier),
    /// Look for the package among what this bundle re-exports
    Reprovide(BundleIdx),
}

#[derive(Debug)]
struct Frame {
    bundle: BundleIdx,
    constraints: Vec<ConsIdx>,
    pos: usize,
    /// Untried candidates for the constraint at `pos`, last is next
    remaining: Option<Vec<Candidate>>,
    /// Candidate whose owner is being resolved by a child frame
    awaiting: Option<Candidate>,
    accepted: bool,
    failed: bool,
}

enum Entry {
    Done(bool),
    Descend(Frame),
}

enum Step {
    Descend(Candidate, BundleIdx),
    Finished,
}

impl Engine {
    /// Resolve a bundle and everything it needs
    ///
    /// Returns whether the bundle ended up RESOLVED or RESOLVING. Bundles
    /// depending on a RESOLVING bundle are appended to `cycle`.
    pub(super) fn resolve_bundle(&mut self, root: BundleIdx, cycle: &mut Vec<BundleIdx>) -> bool {
        let mut stack = Vec::new();
        match self.enter(root) {
            Entry::Done(result) => return result,
            Entry::Descend(frame) => stack.push(frame),
        }

        let mut outcome = false;
        while let Some(frame) = stack.last_mut() {
            if let Some(candidate) = frame.awaiting.take() {
                self.settle(frame, candidate, outcome, cycle);
                continue;
            }
            match self.advance(frame, cycle) {
                Step::Descend(candidate, target) => {
                    frame.awaiting = Some(candidate);
                    match self.enter(target) {
                        Entry::Done(result) => outcome = result,
                        Entry::Descend(child) => stack.push(child),
                    }
                }
                Step::Finished => {
                    let (bundle, failed) = (frame.bundle, frame.failed);
                    stack.pop();
                    outcome = self.leave(bundle, failed, cycle);
                }
            }
        }
        outcome
    }

    fn enter(&mut self, b: BundleIdx) -> Entry {
        let bundle = &self.arena.bundles[b];
        if !bundle.live || bundle.is_fragment() || !bundle.resolvable {
            return Entry::Done(false);
        }
        let state = bundle.state;
        match state {
            BundleState::Resolved | BundleState::Resolving => Entry::Done(true),
            BundleState::Unresolved => {
                trace!(
                    target: "trellis::resolver",
                    bundle = %self.arena.bundles[b].desc,
                    "Resolving"
                );
                self.unwire(b);
                self.arena.bundles[b].state = BundleState::Resolving;
                let mut constraints: Vec<ConsIdx> = self.arena.bundles[b]
                    .constraints
                    .iter()
                    .copied()
                    .filter(|&c| self.arena.cons[c].live)
                    .collect();
                constraints.sort_by_key(|&c| kind_rank(self.arena.cons[c].kind));
                Entry::Descend(Frame {
                    bundle: b,
                    constraints,
                    pos: 0,
                    remaining: None,
                    awaiting: None,
                    accepted: false,
                    failed: false,
                })
            }
        }
    }

    fn leave(&mut self, b: BundleIdx, failed: bool, cycle: &[BundleIdx]) -> bool {
        let failed = failed || (self.dev_mode && self.has_errors(b));
        if failed {
            debug!(
                target: "trellis::resolver",
                bundle = %self.arena.bundles[b].desc,
                "Bundle failed to resolve"
            );
            if self.dev_mode {
                self.arena.bundles[b].state = BundleState::Unresolved;
            } else {
                self.set_unresolved(b);
            }
            self.arena.bundles[b].resolvable = false;
            return false;
        }
        if !cycle.contains(&b) {
            self.arena.bundles[b].state = BundleState::Resolved;
            trace!(target: "trellis::resolver", bundle = %self.arena.bundles[b].desc, "Resolved");
        }
        true
    }

    /// Move the frame forward until it needs a child resolved or is done
    fn advance(&mut self, frame: &mut Frame, cycle: &mut Vec<BundleIdx>) -> Step {
        loop {
            let Some(&c) = frame.constraints.get(frame.pos) else {
                return Step::Finished;
            };
            if frame.remaining.is_none() {
                let cons = &self.arena.cons[c];
                if !cons.live {
                    frame.pos += 1;
                    continue;
                }
                if let Some(supplier) = cons.selected_supplier() {
                    // already wired, e.g. shared from a resolved host
                    self.note_cycle(frame.bundle, supplier, cycle);
                    frame.pos += 1;
                    continue;
                }
                frame.remaining = Some(self.candidates(c));
                frame.accepted = false;
            }

            let next = frame.remaining.as_mut().and_then(Vec::pop);
            let Some(candidate) = next else {
                self.finish_constraint(frame, c);
                continue;
            };
            match candidate {
                Candidate::Supplier(supplier) => {
                    if !self.arena.matches(c, supplier) {
                        continue;
                    }
                    let target = self.arena.supplier_owner(supplier);
                    if target == frame.bundle || self.arena.bundles[target].is_resolved() {
                        self.accept(frame, c, supplier, cycle);
                        continue;
                    }
                    return Step::Descend(candidate, target);
                }
                Candidate::Reprovide(reexporter) => {
                    if frame.accepted || reexporter == frame.bundle {
                        continue;
                    }
                    if self.arena.bundles[reexporter].is_resolved() {
                        self.reprovide(frame, c, reexporter, cycle);
                        continue;
                    }
                    return Step::Descend(candidate, reexporter);
                }
            }
        }
    }

    /// A child frame finished; decide on the candidate that needed it
    fn settle(
        &mut self,
        frame: &mut Frame,
        candidate: Candidate,
        ok: bool,
        cycle: &mut Vec<BundleIdx>,
    ) {
        let c = frame.constraints[frame.pos];
        match candidate {
            Candidate::Supplier(supplier) => {
                if (ok || self.dev_mode) && self.arena.matches(c, supplier) {
                    self.accept(frame, c, supplier, cycle);
                }
            }
            Candidate::Reprovide(reexporter) => {
                if ok && !frame.accepted {
                    self.reprovide(frame, c, reexporter, cycle);
                }
            }
        }
    }

    fn accept(
        &mut self,
        frame: &mut Frame,
        c: ConsIdx,
        supplier: Supplier,
        cycle: &mut Vec<BundleIdx>,
    ) {
        let first = self.arena.cons[c].selected.is_none();
        self.wire(c, supplier);
        frame.accepted = true;
        if first {
            self.note_cycle(frame.bundle, supplier, cycle);
        }
    }

    fn reprovide(
        &mut self,
        frame: &mut Frame,
        c: ConsIdx,
        reexporter: BundleIdx,
        cycle: &mut Vec<BundleIdx>,
    ) {
        if let Some(cap) = self.find_reprovided(c, reexporter) {
            debug!(
                target: "trellis::resolver::imports",
                package = %self.arena.cons[c].name,
                via = %self.arena.bundles[reexporter].desc,
                "Import satisfied through re-exported bundle"
            );
            self.accept(frame, c, Supplier::Capability(cap), cycle);
        }
    }

    fn note_cycle(&self, bundle: BundleIdx, supplier: Supplier, cycle: &mut Vec<BundleIdx>) {
        let target = self.arena.supplier_owner(supplier);
        if target != bundle
            && self.arena.bundles[target].state == BundleState::Resolving
            && !cycle.contains(&bundle)
        {
            cycle.push(bundle);
        }
    }

    /// Candidates for a constraint in preference order, reversed for popping
    fn candidates(&self, c: ConsIdx) -> Vec<Candidate> {
        let cons = &self.arena.cons[c];
        let index = match cons.kind {
            ConstraintKind::ImportPackage => &self.exports,
            ConstraintKind::RequireBundle => &self.bundles,
            ConstraintKind::GenericRequirement => &self.generics,
            ConstraintKind::Host => return Vec::new(),
        };
        let mut candidates: Vec<Candidate> = index
            .get(&cons.name)
            .iter()
            .copied()
            .filter(|&s| self.arena.matches(c, s))
            .map(Candidate::Supplier)
            .collect();
        if cons.kind == ConstraintKind::ImportPackage {
            if let Some(bsn) = &self.arena.import_spec(c).bundle_symbolic_name {
                candidates.extend(
                    self.bundles
                        .get(bsn)
                        .iter()
                        .map(|s| self.arena.supplier_owner(*s))
                        .filter(|&b| {
                            let bundle = &self.arena.bundles[b];
                            bundle.live && !bundle.is_fragment()
                        })
                        .map(Candidate::Reprovide),
                );
            }
        }
        candidates.reverse();
        candidates
    }

    /// Find `c`'s package among what `reexporter` re-exports through
    /// require-bundle, creating the re-export copy
    fn find_reprovided(&mut self, c: ConsIdx, reexporter: BundleIdx) -> Option<CapIdx> {
        let name = self.arena.cons[c].name.clone();
        if self.arena.cons[c].excluded.contains(&reexporter)
            || self
                .arena
                .offered_exports(reexporter)
                .any(|cap| self.arena.caps[cap].name == name)
        {
            return None;
        }
        let mut visited = BTreeSet::new();
        let mut stack = vec![reexporter];
        while let Some(x) = stack.pop() {
            if !visited.insert(x) {
                continue;
            }
            let required: Vec<BundleIdx> = self.arena.bundles[x]
                .constraints
                .iter()
                .copied()
                .filter(|&r| {
                    let cons = &self.arena.cons[r];
                    cons.live
                        && cons.kind == ConstraintKind::RequireBundle
                        && self.arena.require_spec(r).reexport
                })
                .filter_map(|r| match self.arena.cons[r].selected_supplier() {
                    Some(Supplier::Bundle(y)) => Some(y),
                    _ => None,
                })
                .collect();
            for y in required {
                let found = self.arena.offered_exports(y).find(|&cap| {
                    self.arena.caps[cap].name == name
                        && self.arena.import_spec(c).accepts(
                            &name,
                            self.arena.export_spec(cap),
                            &self.arena.bundles[reexporter].desc,
                        )
                });
                if let Some(cap) = found {
                    return Some(self.reexport_copy(reexporter, cap));
                }
                stack.push(y);
            }
        }
        None
    }

    fn finish_constraint(&mut self, frame: &mut Frame, c: ConsIdx) {
        frame.remaining = None;
        frame.pos += 1;
        let (owner, declared_by, kind, optional) = {
            let cons = &self.arena.cons[c];
            (cons.owner, cons.declared_by, cons.kind, cons.optional)
        };
        if kind == ConstraintKind::ImportPackage {
            let name = self.arena.cons[c].name.clone();
            self.sync_substitution(owner, &name);
        }
        if frame.accepted || optional {
            return;
        }

        let detail = self.arena.describe(c);
        match kind {
            ConstraintKind::ImportPackage => {
                debug!(
                    target: "trellis::resolver::imports",
                    bundle = %self.arena.bundles[declared_by].desc,
                    %detail,
                    "No supplier"
                )
            }
            ConstraintKind::RequireBundle => {
                debug!(
                    target: "trellis::resolver::requires",
                    bundle = %self.arena.bundles[declared_by].desc,
                    %detail,
                    "No supplier"
                )
            }
            _ => {
                debug!(
                    target: "trellis::resolver::generics",
                    bundle = %self.arena.bundles[declared_by].desc,
                    %detail,
                    "No supplier"
                )
            }
        }
        self.record_error(declared_by, ResolverErrorKind::missing(kind), detail, Some(c));

        if declared_by != owner {
            // a fragment's unmet constraint costs the fragment, not the host
            if !self.dev_mode {
                self.detach_fragment(owner, declared_by);
            }
            return;
        }
        frame.failed = true;
        if !self.dev_mode {
            frame.pos = frame.constraints.len();
        }
    }

    /// Settle a dependency cycle: promote every member together, or drop
    /// the members that cannot resolve and try the rest again
    pub(super) fn check_cycle(&mut self, cycle: Vec<BundleIdx>) {
        let mut cycle = cycle;
        while !cycle.is_empty() {
            let before = cycle.len();
            cycle.retain(|&b| {
                let bundle = &self.arena.bundles[b];
                bundle.resolvable && bundle.state != BundleState::Unresolved
            });
            let mut retry = cycle.len() != before;

            for &b in &cycle {
                let wired: Vec<(ConsIdx, Supplier)> = self
                    .arena
                    .wired_constraints(b)
                    .filter_map(|c| self.arena.cons[c].selected_supplier().map(|s| (c, s)))
                    .collect();
                for (c, supplier) in wired {
                    let target = self.arena.supplier_owner(supplier);
                    if target == b {
                        continue;
                    }
                    let gone = match supplier {
                        Supplier::Capability(cap) => {
                            self.arena.caps[cap].dropped || !self.arena.caps[cap].live
                        }
                        Supplier::Bundle(_) => false,
                    };
                    if gone {
                        self.arena.cons[c].excluded.insert(target);
                        retry = true;
                    } else if self.arena.bundles[target].state == BundleState::Unresolved
                        && !self.dev_mode
                    {
                        retry = true;
                    }
                }
            }

            if !retry {
                for &b in &cycle {
                    if self.arena.bundles[b].state == BundleState::Resolving {
                        self.arena.bundles[b].state = BundleState::Resolved;
                    }
                }
                debug!(
                    target: "trellis::resolver::cycles",
                    members = cycle.len(),
                    "Cycle resolved"
                );
                return;
            }

            debug!(
                target: "trellis::resolver::cycles",
                members = cycle.len(),
                "Re-resolving cycle"
            );
            for &b in &cycle {
                self.reset_for_retry(b);
            }
            let mut inner = Vec::new();
            for &b in &cycle {
                self.resolve_bundle(b, &mut inner);
            }
            cycle = inner;
        }
    }

    /// Prune wires to suppliers that did not end up resolved, switching to
    /// alternatives or failing the dependent, until nothing changes
    pub(super) fn validate(&mut self, batch: &[BundleIdx]) {
        loop {
            let mut changed = false;
            for &b in batch {
                let bundle = &self.arena.bundles[b];
                if bundle.is_fragment() || !bundle.is_resolved() {
                    continue;
                }
                let constraints: Vec<ConsIdx> = self.arena.wired_constraints(b).collect();
                let mut rewired = false;
                for c in constraints {
                    if !self.arena.cons[c].live || self.arena.cons[c].possible.is_empty() {
                        continue;
                    }
                    if !self.prune(c) {
                        continue;
                    }
                    rewired = true;
                    let cons = &self.arena.cons[c];
                    if cons.selected.is_some() || cons.optional {
                        continue;
                    }
                    let (owner, declared_by, kind) = (cons.owner, cons.declared_by, cons.kind);
                    let detail = self.arena.describe(c);
                    self.record_error(
                        declared_by,
                        ResolverErrorKind::missing(kind),
                        detail,
                        Some(c),
                    );
                    if declared_by != owner {
                        if !self.dev_mode {
                            self.detach_fragment(owner, declared_by);
                        }
                        continue;
                    }
                    self.arena.bundles[b].resolvable = false;
                    self.unresolve_cascade(b);
                    changed = true;
                    break;
                }
                if rewired && self.arena.bundles[b].is_resolved() {
                    self.sync_all_substitutions(b);
                }
                if changed {
                    break;
                }
            }
            if !changed {
                return;
            }
        }
    }

    /// Drop non-viable suppliers of a constraint; returns whether any went
    fn prune(&mut self, c: ConsIdx) -> bool {
        let owner = self.arena.cons[c].owner;
        let selected = self.arena.cons[c].selected_supplier();
        let (viable, gone): (Vec<Supplier>, Vec<Supplier>) = self.arena.cons[c]
            .possible
            .iter()
            .copied()
            .partition(|&s| self.viable(owner, s));
        if gone.is_empty() {
            return false;
        }
        let cons = &mut self.arena.cons[c];
        cons.selected = selected
            .and_then(|s| viable.iter().position(|v| *v == s))
            .or(if viable.is_empty() { None } else { Some(0) });
        cons.possible = viable;
        for supplier in gone {
            let target = self.arena.supplier_owner(supplier);
            if target != owner && !self.still_wired(owner, target) {
                self.arena.bundles[target].refs.remove(&owner);
            }
        }
        true
    }

    fn viable(&self, owner: BundleIdx, supplier: Supplier) -> bool {
        if !self.arena.supplier_alive(supplier) {
            return false;
        }
        let target = self.arena.supplier_owner(supplier);
        target == owner || self.dev_mode || self.arena.bundles[target].is_resolved()
    }
}
