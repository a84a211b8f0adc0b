//! Singleton selection.
//!
//! At most one singleton per symbolic name may be resolved. After a batch,
//! every pair of resolved singletons with the same name is settled: the
//! preferred one wins unless it is referenced by strictly fewer bundles.

use super::arena::{BundleIdx, Supplier};
use super::Engine;
use std::cmp::Ordering;
use tracing::debug;
use trellis_core::types::ResolverErrorKind;

impl Engine {
    /// Pick singleton winners among the batch and unresolve the losers
    ///
    /// Returns whether any same-name singletons were compared, which asks
    /// the caller for one corrective batch.
    pub(super) fn select_singletons(&mut self, batch: &[BundleIdx]) -> bool {
        if self.dev_mode {
            return false;
        }
        let mut compared = false;
        let mut losers = Vec::new();
        for &b in batch {
            let bundle = &self.arena.bundles[b];
            if !bundle.desc.singleton || !bundle.is_resolved() || self.rejected.contains(&b) {
                continue;
            }
            let siblings: Vec<BundleIdx> = self
                .bundles
                .get(&bundle.desc.symbolic_name)
                .iter()
                .map(|s| self.arena.supplier_owner(*s))
                .collect();
            for s in siblings {
                let sibling = &self.arena.bundles[s];
                if s == b
                    || !sibling.live
                    || !sibling.desc.singleton
                    || !sibling.is_resolved()
                    || self.rejected.contains(&s)
                {
                    continue;
                }
                compared = true;
                let (winner, loser) = (&self.arena.bundles[s], &self.arena.bundles[b]);
                if self.prefers(s, b) && winner.refs.len() >= loser.refs.len() {
                    self.rejected.insert(b);
                    losers.push(b);
                    break;
                }
                self.rejected.insert(s);
                losers.push(s);
            }
        }
        for loser in losers {
            debug!(
                target: "trellis::resolver",
                bundle = %self.arena.bundles[loser].desc,
                "Singleton selection lost"
            );
            self.unresolve_cascade(loser);
        }
        compared
    }

    /// Does the policy (or version order) prefer `a` over `b`
    fn prefers(&self, a: BundleIdx, b: BundleIdx) -> bool {
        match &self.policy {
            Some(policy) => {
                let a = self.arena.supplier_info(Supplier::Bundle(a));
                let b = self.arena.supplier_info(Supplier::Bundle(b));
                policy.compare(&a, &b) == Ordering::Less
            }
            None => self.arena.bundles[a].desc.version > self.arena.bundles[b].desc.version,
        }
    }

    /// Attach a SingletonSelectionLost error to every rejected singleton
    pub(super) fn record_rejected_singletons(&mut self) {
        let rejected: Vec<BundleIdx> = self.rejected.iter().copied().collect();
        for b in rejected {
            let name = self.arena.bundles[b].desc.symbolic_name.clone();
            let winner = self
                .bundles
                .get(&name)
                .iter()
                .map(|s| self.arena.supplier_owner(*s))
                .find(|&s| {
                    let bundle = &self.arena.bundles[s];
                    s != b && bundle.live && bundle.desc.singleton && bundle.is_resolved()
                })
                .map(|s| self.arena.bundles[s].desc.to_string())
                .unwrap_or_default();
            self.touched.insert(self.arena.bundles[b].id());
            self.record_error(b, ResolverErrorKind::SingletonSelectionLost, winner, None);
        }
    }
}
