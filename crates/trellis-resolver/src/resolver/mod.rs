//! Public resolver facade.
//!
//! A [`Resolver`] owns an attached [`State`] and a lazily built engine that
//! mirrors it. All entry points take a single lock, so one resolver can be
//! shared between threads while operations on it stay serialized.

use crate::engine::Engine;
use crate::policy::SelectionPolicy;
use crate::state::{ExportRef, State};
use crate::ResolverResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use trellis_core::types::{BundleDescriptor, BundleId, PlatformProperties};
use trellis_core::TrellisError;

/// Default symbolic name of the system bundle
pub const SYSTEM_BUNDLE: &str = "system.bundle";

/// Default bound on uses-conflict combination search
pub const DEFAULT_MAX_COMBINATIONS: usize = 10_000;

/// Resolver behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ResolverOptions {
    /// Keep partial wiring and fragments of bundles that fail, and accept
    /// unresolved suppliers
    pub development_mode: bool,
    /// Wire optional constraints of already-resolved bundles when suppliers
    /// appear
    pub resolve_optional: bool,
    /// Symbolic name of the bundle preferred over every other supplier
    pub system_bundle: String,
    pub max_combinations: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            development_mode: false,
            resolve_optional: false,
            system_bundle: SYSTEM_BUNDLE.to_string(),
            max_combinations: DEFAULT_MAX_COMBINATIONS,
        }
    }
}

struct Inner {
    state: Option<State>,
    options: ResolverOptions,
    policy: Option<Arc<dyn SelectionPolicy>>,
    engine: Option<Engine>,
}

/// Bundle dependency resolver
pub struct Resolver {
    inner: Mutex<Inner>,
}

impl Inner {
    /// Attached state and an engine in sync with it
    fn parts(&mut self) -> ResolverResult<(&mut State, &mut Engine)> {
        let state = self.state.as_mut().ok_or(TrellisError::NoState)?;
        if self.engine.is_none() {
            self.engine = Some(Engine::build(state, self.options.clone(), self.policy.clone()));
        }
        match self.engine.as_mut() {
            Some(engine) => Ok((state, engine)),
            None => Err(TrellisError::NoState),
        }
    }
}

impl Resolver {
    /// Create a resolver with no state attached
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: None,
                options,
                policy: None,
                engine: None,
            }),
        }
    }

    /// Create a resolver and attach a state
    pub fn with_state(options: ResolverOptions, state: State) -> Self {
        let resolver = Self::new(options);
        resolver.set_state(state);
        resolver
    }

    /// Create a resolver with a supplier selection policy
    pub fn with_policy(options: ResolverOptions, policy: Arc<dyn SelectionPolicy>) -> Self {
        let resolver = Self::new(options);
        resolver.set_selection_policy(Some(policy));
        resolver
    }

    pub fn options(&self) -> ResolverOptions {
        self.inner.lock().options.clone()
    }

    /// Attach a state, replacing and flushing any previous one
    pub fn set_state(&self, state: State) -> Option<State> {
        let mut inner = self.inner.lock();
        inner.engine = None;
        let mut previous = inner.state.replace(state);
        if let Some(previous) = previous.as_mut() {
            previous.complete_all_removals();
        }
        previous
    }

    /// Detach the state, completing pending removals
    pub fn take_state(&self) -> Option<State> {
        let mut inner = self.inner.lock();
        inner.engine = None;
        let mut state = inner.state.take();
        if let Some(state) = state.as_mut() {
            state.complete_all_removals();
        }
        state
    }

    /// Discard the engine's cached view and complete pending removals
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.engine = None;
        if let Some(state) = inner.state.as_mut() {
            state.complete_all_removals();
        }
    }

    /// Replace the supplier selection policy
    pub fn set_selection_policy(&self, policy: Option<Arc<dyn SelectionPolicy>>) {
        let mut inner = self.inner.lock();
        inner.policy = policy;
        inner.engine = None;
    }

    /// Read the attached state
    pub fn with_state_ref<R>(&self, f: impl FnOnce(&State) -> R) -> ResolverResult<R> {
        let inner = self.inner.lock();
        let state = inner.state.as_ref().ok_or(TrellisError::NoState)?;
        Ok(f(state))
    }

    /// Modify the attached state directly; the engine is rebuilt on next use
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut State) -> R) -> ResolverResult<R> {
        let mut inner = self.inner.lock();
        inner.engine = None;
        let state = inner.state.as_mut().ok_or(TrellisError::NoState)?;
        Ok(f(state))
    }

    /// Install a bundle
    pub fn add_bundle(&self, descriptor: BundleDescriptor) -> ResolverResult<()> {
        let mut inner = self.inner.lock();
        let state = inner.state.as_mut().ok_or(TrellisError::NoState)?;
        state.add_bundle(descriptor.clone())?;
        if let Some(engine) = inner.engine.as_mut() {
            engine.bundle_added(descriptor);
        }
        Ok(())
    }

    /// Remove a bundle
    ///
    /// Removing a resolved bundle without `pending` unresolves everything
    /// that depends on it right away. With `pending`, dependents keep their
    /// wiring until a resolve pass refreshes the removal.
    pub fn remove_bundle(
        &self,
        bundle_id: BundleId,
        pending: bool,
    ) -> ResolverResult<BundleDescriptor> {
        let mut inner = self.inner.lock();
        let (state, engine) = inner.parts()?;
        let removed = state.remove_bundle(bundle_id, pending)?;
        engine.bundle_removed(bundle_id, pending);
        engine.publish(state);
        debug!(target: "trellis::resolver", bundle = bundle_id, pending, "Removed bundle");
        Ok(removed)
    }

    /// Replace a bundle's descriptor, keeping its id
    pub fn update_bundle(
        &self,
        descriptor: BundleDescriptor,
        pending: bool,
    ) -> ResolverResult<BundleDescriptor> {
        let mut inner = self.inner.lock();
        let (state, engine) = inner.parts()?;
        let previous = state.update_bundle(descriptor.clone(), pending)?;
        engine.bundle_updated(descriptor, pending);
        engine.publish(state);
        Ok(previous)
    }

    /// Resolve every unresolved bundle, after unresolving `refresh` and
    /// everything depending on it
    pub fn resolve(
        &self,
        refresh: &[BundleId],
        platform: &[PlatformProperties],
    ) -> ResolverResult<()> {
        let mut inner = self.inner.lock();
        let (state, engine) = inner.parts()?;
        engine.resolve(state, refresh, platform);
        Ok(())
    }

    /// Wire a dynamic import for a resolved bundle
    pub fn resolve_dynamic_import(
        &self,
        bundle_id: BundleId,
        package: &str,
    ) -> ResolverResult<Option<ExportRef>> {
        let mut inner = self.inner.lock();
        let (state, engine) = inner.parts()?;
        if !state.contains(bundle_id) {
            return Err(TrellisError::UnknownBundle { bundle_id });
        }
        Ok(engine.resolve_dynamic_import(state, bundle_id, package))
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::types::Version;

    #[test]
    fn test_no_state() {
        let resolver = Resolver::default();
        assert!(matches!(resolver.resolve(&[], &[]), Err(TrellisError::NoState)));
        assert!(matches!(
            resolver.add_bundle(BundleDescriptor::new(1, "a", Version::new(1, 0, 0))),
            Err(TrellisError::NoState)
        ));
    }

    #[test]
    fn test_state_round_trip() {
        let resolver = Resolver::default();
        assert!(resolver.set_state(State::new()).is_none());
        resolver
            .add_bundle(BundleDescriptor::new(1, "a", Version::new(1, 0, 0)))
            .unwrap();
        resolver.resolve(&[], &[]).unwrap();
        let state = resolver.take_state().unwrap();
        assert!(state.is_resolved(1));
        assert!(resolver.take_state().is_none());
    }

    #[test]
    fn test_unknown_bundle_for_dynamic_import() {
        let resolver = Resolver::with_state(ResolverOptions::default(), State::new());
        assert!(matches!(
            resolver.resolve_dynamic_import(5, "pkg"),
            Err(TrellisError::UnknownBundle { bundle_id: 5 })
        ));
    }

    #[test]
    fn test_options_default() {
        let options = ResolverOptions::default();
        assert_eq!(options.system_bundle, "system.bundle");
        assert_eq!(options.max_combinations, DEFAULT_MAX_COMBINATIONS);
        assert!(!options.development_mode);
    }
}
