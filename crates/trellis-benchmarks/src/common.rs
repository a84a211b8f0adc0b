//! Common utilities for benchmarks

use criterion::Criterion;
use pprof::criterion::{Output, PProfProfiler};
use trellis_core::types::{
    BundleDescriptor, ExportSpec, ImportSpec, RequireSpec, Version, VersionRange,
};
use trellis_resolver::{Resolver, ResolverOptions, State};

/// Configure criterion with flamegraph profiling support
pub fn criterion_config() -> Criterion {
    init_tracing();
    Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(3))
        .measurement_time(std::time::Duration::from_secs(10))
        .sample_size(100)
        .with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)))
}

/// Honour RUST_LOG while benchmarking; silent by default
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Bundles in `layers` layers of `width`; each bundle exports one package
/// and imports every package of the layer below
pub fn layered_bundles(layers: usize, width: usize) -> Vec<BundleDescriptor> {
    let mut bundles = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for slot in 0..width {
            let id = (layer * width + slot) as u64 + 1;
            let name = format!("bench.l{}.b{}", layer, slot);
            let mut desc = BundleDescriptor::new(id, name, Version::new(1, 0, 0))
                .with_export(ExportSpec::new(format!("bench.l{}.p{}", layer, slot)));
            if layer > 0 {
                for below in 0..width {
                    let package = format!("bench.l{}.p{}", layer - 1, below);
                    desc = desc.with_import(ImportSpec::new(package));
                }
            }
            bundles.push(desc);
        }
    }
    bundles
}

/// `versions` exporters of one package and `count` consumers; every consumer
/// also imports a package whose exporter pins the shared package to the
/// oldest version, forcing uses-conflict search
pub fn uses_conflict_bundles(versions: u32, count: usize) -> Vec<BundleDescriptor> {
    let mut bundles: Vec<BundleDescriptor> = (0..versions)
        .map(|v| {
            let name = format!("bench.shared.v{}", v);
            BundleDescriptor::new(v as u64 + 1, name, Version::new(1, 0, 0))
                .with_export(ExportSpec::new("bench.shared").with_version(Version::new(1, v, 0)))
        })
        .collect();
    let pinned = VersionRange::exactly(Version::new(1, 0, 0));
    let base = versions as u64 + 1;
    bundles.push(
        BundleDescriptor::new(base, "bench.pinned", Version::new(1, 0, 0))
            .with_import(ImportSpec::new("bench.shared").with_version(pinned))
            .with_export(ExportSpec::new("bench.api").uses("bench.shared")),
    );
    for i in 0..count {
        let name = format!("bench.consumer{}", i);
        bundles.push(
            BundleDescriptor::new(base + 1 + i as u64, name, Version::new(1, 0, 0))
                .with_import(ImportSpec::new("bench.shared"))
                .with_import(ImportSpec::new("bench.api")),
        );
    }
    bundles
}

/// A chain of bundles each requiring the next, closed into one cycle
pub fn require_cycle(length: usize) -> Vec<BundleDescriptor> {
    (0..length)
        .map(|i| {
            BundleDescriptor::new(i as u64 + 1, format!("bench.cycle{}", i), Version::new(1, 0, 0))
                .with_require(RequireSpec::new(format!("bench.cycle{}", (i + 1) % length)))
        })
        .collect()
}

/// A resolver with a fresh state holding `bundles`
pub fn resolver_for(bundles: &[BundleDescriptor]) -> Resolver {
    let mut state = State::new();
    for bundle in bundles {
        // generated ids are unique
        let _ = state.add_bundle(bundle.clone());
    }
    Resolver::with_state(ResolverOptions::default(), state)
}
