//! Shared fixtures for resolver scenario tests

#![allow(dead_code)]

use trellis_core::types::{
    BundleDescriptor, BundleId, PlatformProperties, ResolverErrorKind, Version, VersionRange,
};
use trellis_resolver::{BundleResolution, Resolver, ResolverOptions, State};

/// Route resolver logs to the test harness; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn v(version: &str) -> Version {
    Version::parse(version).unwrap()
}

pub fn range(range: &str) -> VersionRange {
    VersionRange::parse(range).unwrap()
}

pub fn bundle(id: BundleId, name: &str, version: &str) -> BundleDescriptor {
    BundleDescriptor::new(id, name, v(version))
}

pub fn resolver(bundles: Vec<BundleDescriptor>) -> Resolver {
    resolver_with(ResolverOptions::default(), bundles)
}

pub fn resolver_with(options: ResolverOptions, bundles: Vec<BundleDescriptor>) -> Resolver {
    init_tracing();
    let mut state = State::new();
    for bundle in bundles {
        state.add_bundle(bundle).unwrap();
    }
    Resolver::with_state(options, state)
}

pub fn resolve(resolver: &Resolver) {
    resolver.resolve(&[], &[]).unwrap();
}

pub fn platform(pairs: &[(&str, &str)]) -> PlatformProperties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn is_resolved(resolver: &Resolver, id: BundleId) -> bool {
    resolver.with_state_ref(|s| s.is_resolved(id)).unwrap()
}

pub fn resolution(resolver: &Resolver, id: BundleId) -> Option<BundleResolution> {
    resolver.with_state_ref(|s| s.resolution(id).cloned()).unwrap()
}

/// Bundle the import of `package` is wired to
pub fn exporter_of(resolver: &Resolver, id: BundleId, package: &str) -> Option<BundleId> {
    resolution(resolver, id).and_then(|r| r.imported(package).map(|e| e.exporter))
}

pub fn error_kinds(resolver: &Resolver, id: BundleId) -> Vec<ResolverErrorKind> {
    resolver
        .with_state_ref(|s| s.resolver_errors(id).iter().map(|e| e.kind).collect())
        .unwrap()
}

/// Every published resolution record, for before/after comparisons
pub fn snapshot(resolver: &Resolver) -> Vec<(BundleId, Option<BundleResolution>)> {
    resolver
        .with_state_ref(|s| {
            s.bundles()
                .map(|b| (b.bundle_id, s.resolution(b.bundle_id).cloned()))
                .collect()
        })
        .unwrap()
}
