//! Property tests over randomly generated bundle graphs

mod common;

use common::*;
use proptest::prelude::*;
use trellis_core::types::{ExportSpec, ImportSpec};
use trellis_core::BundleDescriptor;

/// Bundle `i` exports `pkg{i}` and imports packages of lower-numbered
/// bundles; a `true` flag adds an import nobody exports
fn graph() -> impl Strategy<Value = Vec<(Vec<usize>, bool)>> {
    (1usize..8).prop_flat_map(|n| {
        (0..n)
            .map(|i| (proptest::collection::vec(0..i.max(1), 0..3), proptest::bool::weighted(0.2)))
            .collect::<Vec<_>>()
    })
}

fn build(graph: &[(Vec<usize>, bool)]) -> Vec<BundleDescriptor> {
    graph
        .iter()
        .enumerate()
        .map(|(i, (imports, broken))| {
            let mut desc = bundle(i as u64 + 1, &format!("b{}", i), "1.0.0")
                .with_export(ExportSpec::new(format!("pkg{}", i)));
            for &j in imports.iter().filter(|&&j| j < i) {
                desc = desc.with_import(ImportSpec::new(format!("pkg{}", j)));
            }
            if *broken {
                desc = desc.with_import(ImportSpec::new(format!("missing{}", i)));
            }
            desc
        })
        .collect()
}

proptest! {
    #[test]
    fn resolved_bundles_are_wired_to_resolved_exporters(graph in graph()) {
        let bundles = build(&graph);
        let resolver = resolver(bundles.clone());
        resolve(&resolver);

        for desc in &bundles {
            let id = desc.bundle_id;
            let resolved = is_resolved(&resolver, id);
            let all_wired = desc.imports.iter().all(|import| {
                exporter_of(&resolver, id, &import.name)
                    .map_or(false, |e| is_resolved(&resolver, e))
            });
            if resolved {
                prop_assert!(all_wired);
                prop_assert!(error_kinds(&resolver, id).is_empty());
            } else {
                prop_assert!(!error_kinds(&resolver, id).is_empty());
            }
        }
    }

    #[test]
    fn resolution_is_idempotent(graph in graph()) {
        let resolver = resolver(build(&graph));
        resolve(&resolver);
        let before = snapshot(&resolver);

        resolve(&resolver);
        prop_assert_eq!(snapshot(&resolver), before);
    }

    #[test]
    fn bundles_without_broken_ancestors_resolve(graph in graph()) {
        let bundles = build(&graph);
        let resolver = resolver(bundles);
        resolve(&resolver);

        let mut healthy = vec![true; graph.len()];
        for (i, (imports, broken)) in graph.iter().enumerate() {
            healthy[i] = !broken && imports.iter().filter(|&&j| j < i).all(|&j| healthy[j]);
            prop_assert_eq!(is_resolved(&resolver, i as u64 + 1), healthy[i]);
        }
    }
}
