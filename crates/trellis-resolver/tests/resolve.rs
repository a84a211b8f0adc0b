//! Resolve-pass scenarios: package wiring, uses constraints, singletons,
//! cycles, substitution, generic capabilities and eligibility checks

mod common;

use common::*;
use std::cmp::Ordering;
use std::sync::Arc;
use trellis_core::types::{
    ExportSpec, Filter, GenericCapabilitySpec, GenericRequirementSpec, ImportSpec, RequireSpec,
    ResolverErrorKind,
};
use trellis_resolver::{Resolver, ResolverOptions, SelectionPolicy, StateHelper, SupplierInfo};

#[test]
fn test_uses_chain_resolves() {
    let resolver = resolver(vec![
        bundle(1, "a", "1.0.0").with_export(ExportSpec::new("pkg.a")),
        bundle(2, "b", "1.0.0")
            .with_import(ImportSpec::new("pkg.a"))
            .with_export(ExportSpec::new("pkg.b").uses("pkg.a")),
        bundle(3, "c", "1.0.0").with_import(ImportSpec::new("pkg.b")),
    ]);
    resolve(&resolver);

    for id in 1..=3 {
        assert!(is_resolved(&resolver, id), "bundle {} should resolve", id);
    }
    assert_eq!(exporter_of(&resolver, 3, "pkg.b"), Some(2));
    assert_eq!(exporter_of(&resolver, 2, "pkg.a"), Some(1));

    let closure = resolver
        .with_state_ref(|s| StateHelper::new(s).uses_closure(3))
        .unwrap();
    let providers: Vec<(&str, u64)> = closure
        .iter()
        .map(|e| (e.name.as_str(), e.exporter))
        .collect();
    assert_eq!(providers, vec![("pkg.b", 2), ("pkg.a", 1)]);
    assert_eq!(closure.iter().filter(|e| e.exporter == 1).count(), 1);
}

fn uses_conflict_bundles(consumer_range: Option<&str>) -> Vec<trellis_core::BundleDescriptor> {
    let mut import = ImportSpec::new("p");
    if let Some(r) = consumer_range {
        import = import.with_version(range(r));
    }
    vec![
        bundle(1, "a1", "1.0.0").with_export(ExportSpec::new("p").with_version(v("1.0.0"))),
        bundle(2, "a2", "1.0.0").with_export(ExportSpec::new("p").with_version(v("2.0.0"))),
        bundle(3, "b", "1.0.0")
            .with_import(ImportSpec::new("p").with_version(range("[1.0,2.0)")))
            .with_export(ExportSpec::new("q").uses("p")),
        bundle(4, "c", "1.0.0")
            .with_import(import)
            .with_import(ImportSpec::new("q")),
    ]
}

#[test]
fn test_uses_conflict_resolved_by_alternative_supplier() {
    let resolver = resolver(uses_conflict_bundles(None));
    resolve(&resolver);

    assert!(is_resolved(&resolver, 4));
    assert_eq!(exporter_of(&resolver, 3, "p"), Some(1));
    assert_eq!(exporter_of(&resolver, 4, "p"), Some(1));
    assert_eq!(exporter_of(&resolver, 4, "q"), Some(3));
}

#[test]
fn test_unfixable_uses_conflict_fails_consumer() {
    let resolver = resolver(uses_conflict_bundles(Some("[2.0,3.0)")));
    resolve(&resolver);

    assert!(is_resolved(&resolver, 3));
    assert!(!is_resolved(&resolver, 4));
    assert!(error_kinds(&resolver, 4).contains(&ResolverErrorKind::ImportUsesConflict));
}

#[test]
fn test_conflicting_optional_import_is_left_unwired() {
    let resolver = resolver(vec![
        bundle(1, "a1", "1.0.0").with_export(ExportSpec::new("p").with_version(v("1.0.0"))),
        bundle(2, "a2", "1.0.0").with_export(ExportSpec::new("p").with_version(v("2.0.0"))),
        bundle(3, "b", "1.0.0")
            .with_import(ImportSpec::new("p").with_version(range("[1.0,2.0)")))
            .with_export(ExportSpec::new("q").uses("p")),
        bundle(4, "c", "1.0.0")
            .with_import(ImportSpec::new("p").with_version(range("[2.0,3.0)")))
            .with_import(ImportSpec::new("q").optional()),
    ]);
    resolve(&resolver);

    assert!(is_resolved(&resolver, 4));
    assert_eq!(exporter_of(&resolver, 4, "p"), Some(2));
    assert_eq!(exporter_of(&resolver, 4, "q"), None);
    assert!(error_kinds(&resolver, 4).is_empty());
}

#[test]
fn test_required_bundles_with_split_package_conflict() {
    let resolver = resolver(vec![
        bundle(1, "a1", "1.0.0").with_export(ExportSpec::new("p").with_version(v("1.0.0"))),
        bundle(2, "a2", "1.0.0").with_export(ExportSpec::new("p").with_version(v("2.0.0"))),
        bundle(3, "b1", "1.0.0")
            .with_import(ImportSpec::new("p").with_version(range("[1.0,2.0)")))
            .with_export(ExportSpec::new("q").uses("p")),
        bundle(4, "b2", "1.0.0")
            .with_import(ImportSpec::new("p").with_version(range("[2.0,3.0)")))
            .with_export(ExportSpec::new("r").uses("p")),
        bundle(5, "c", "1.0.0")
            .with_require(RequireSpec::new("b1"))
            .with_require(RequireSpec::new("b2")),
    ]);
    resolve(&resolver);

    assert!(is_resolved(&resolver, 3));
    assert!(is_resolved(&resolver, 4));
    assert!(!is_resolved(&resolver, 5));
    assert!(error_kinds(&resolver, 5).contains(&ResolverErrorKind::RequireBundleUsesConflict));
}

#[test]
fn test_missing_import_reports_error() {
    let resolver = resolver(vec![bundle(1, "a", "1.0.0").with_import(ImportSpec::new("nowhere"))]);
    resolve(&resolver);

    assert!(!is_resolved(&resolver, 1));
    assert_eq!(error_kinds(&resolver, 1), vec![ResolverErrorKind::MissingImportedPackage]);
}

#[test]
fn test_optional_import_without_supplier() {
    let resolver = resolver(vec![
        bundle(1, "a", "1.0.0").with_import(ImportSpec::new("nowhere").optional())
    ]);
    resolve(&resolver);

    assert!(is_resolved(&resolver, 1));
    assert!(error_kinds(&resolver, 1).is_empty());
    assert!(exporter_of(&resolver, 1, "nowhere").is_none());
}

#[test]
fn test_singleton_loses_to_resolved_sibling() {
    let resolver = resolver(vec![bundle(1, "S", "1.0.0").singleton()]);
    resolve(&resolver);
    assert!(is_resolved(&resolver, 1));

    resolver.add_bundle(bundle(2, "S", "1.1.0").singleton()).unwrap();
    resolve(&resolver);

    assert!(is_resolved(&resolver, 1));
    assert!(!is_resolved(&resolver, 2));
    let errors = resolver
        .with_state_ref(|s| s.resolver_errors(2).to_vec())
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ResolverErrorKind::SingletonSelectionLost);
    assert_eq!(errors[0].data, "S@1.0.0");
}

#[test]
fn test_singleton_highest_version_wins() {
    let resolver = resolver(vec![
        bundle(1, "S", "1.0.0").singleton(),
        bundle(2, "S", "1.1.0").singleton(),
    ]);
    resolve(&resolver);

    assert!(!is_resolved(&resolver, 1));
    assert!(is_resolved(&resolver, 2));
    assert_eq!(error_kinds(&resolver, 1), vec![ResolverErrorKind::SingletonSelectionLost]);
}

#[test]
fn test_singleton_with_more_dependents_wins() {
    let resolver = resolver(vec![
        bundle(1, "S", "1.0.0")
            .singleton()
            .with_export(ExportSpec::new("p").with_version(v("1.0.0"))),
        bundle(2, "S", "1.1.0")
            .singleton()
            .with_export(ExportSpec::new("p").with_version(v("1.1.0"))),
        bundle(3, "a", "1.0.0").with_import(ImportSpec::new("p").with_version(range("[1.0,1.1)"))),
    ]);
    resolve(&resolver);

    assert!(is_resolved(&resolver, 1));
    assert!(!is_resolved(&resolver, 2));
    assert!(is_resolved(&resolver, 3));
    assert_eq!(exporter_of(&resolver, 3, "p"), Some(1));
}

/// Prefers lower versions, then lower bundle ids
struct LowestVersion;

impl SelectionPolicy for LowestVersion {
    fn compare(&self, a: &SupplierInfo<'_>, b: &SupplierInfo<'_>) -> Ordering {
        a.version
            .cmp(b.version)
            .then_with(|| a.bundle.bundle_id.cmp(&b.bundle.bundle_id))
    }
}

#[test]
fn test_selection_policy_overrides_ranking() {
    let resolver = Resolver::with_policy(ResolverOptions::default(), Arc::new(LowestVersion));
    resolver.set_state(trellis_resolver::State::new());
    for (id, name, version) in [(1, "a1", "1.0.0"), (2, "a2", "2.0.0")] {
        let export = ExportSpec::new("p").with_version(v(version));
        resolver
            .add_bundle(bundle(id, name, "1.0.0").with_export(export))
            .unwrap();
    }
    resolver
        .add_bundle(bundle(3, "c", "1.0.0").with_import(ImportSpec::new("p")))
        .unwrap();
    resolve(&resolver);

    assert_eq!(exporter_of(&resolver, 3, "p"), Some(1));
}

#[test]
fn test_selection_policy_picks_singleton() {
    let resolver = Resolver::with_policy(ResolverOptions::default(), Arc::new(LowestVersion));
    resolver.set_state(trellis_resolver::State::new());
    resolver.add_bundle(bundle(1, "S", "1.0.0").singleton()).unwrap();
    resolver.add_bundle(bundle(2, "S", "1.1.0").singleton()).unwrap();
    resolve(&resolver);

    assert!(is_resolved(&resolver, 1));
    assert!(!is_resolved(&resolver, 2));
}

#[test]
fn test_require_cycle_resolves() {
    let resolver = resolver(vec![
        bundle(1, "a", "1.0.0").with_require(RequireSpec::new("b")),
        bundle(2, "b", "1.0.0").with_require(RequireSpec::new("a")),
    ]);
    resolve(&resolver);

    assert!(is_resolved(&resolver, 1));
    assert!(is_resolved(&resolver, 2));
    let required = resolution(&resolver, 1).unwrap().required_bundles();
    assert_eq!(required, vec![2]);
}

#[test]
fn test_require_cycle_fails_together() {
    let resolver = resolver(vec![
        bundle(1, "a", "1.0.0").with_require(RequireSpec::new("b")),
        bundle(2, "b", "1.0.0")
            .with_require(RequireSpec::new("a"))
            .with_import(ImportSpec::new("nowhere")),
    ]);
    resolve(&resolver);

    assert!(!is_resolved(&resolver, 1));
    assert!(!is_resolved(&resolver, 2));
    assert!(error_kinds(&resolver, 2).contains(&ResolverErrorKind::MissingImportedPackage));
    assert!(error_kinds(&resolver, 1).contains(&ResolverErrorKind::MissingRequiredBundle));
}

#[test]
fn test_export_substituted_by_import() {
    let resolver = resolver(vec![
        bundle(1, "a", "1.0.0")
            .with_export(ExportSpec::new("p").with_version(v("1.0.0")))
            .with_import(ImportSpec::new("p")),
        bundle(2, "b", "1.0.0").with_export(ExportSpec::new("p").with_version(v("2.0.0"))),
    ]);
    resolve(&resolver);

    assert_eq!(exporter_of(&resolver, 1, "p"), Some(2));
    let record = resolution(&resolver, 1).unwrap();
    assert!(record.substituted_exports.iter().any(|e| e.name == "p"));
    assert!(record.selected_exports.iter().all(|e| e.name != "p"));
}

#[test]
fn test_generic_requirement_filter() {
    let resolver = resolver(vec![
        bundle(1, "mysql", "1.0.0").with_generic_capability(
            GenericCapabilitySpec::new("service.db", v("1.0.0")).with_attribute("type", "sql"),
        ),
        bundle(2, "redis", "1.0.0").with_generic_capability(
            GenericCapabilitySpec::new("service.db", v("2.0.0")).with_attribute("type", "kv"),
        ),
        bundle(3, "app", "1.0.0").with_generic_requirement(
            GenericRequirementSpec::new("service.db")
                .with_filter(Filter::parse("(type=sql)").unwrap()),
        ),
    ]);
    resolve(&resolver);

    let record = resolution(&resolver, 3).unwrap();
    let suppliers: Vec<_> = record.generic_wires().map(|w| w.supplier.bundle()).collect();
    assert_eq!(suppliers, vec![1]);
}

#[test]
fn test_generic_requirement_multiple() {
    let resolver = resolver(vec![
        bundle(1, "log.file", "1.0.0")
            .with_generic_capability(GenericCapabilitySpec::new("service.log", v("1.0.0"))),
        bundle(2, "log.net", "1.0.0")
            .with_generic_capability(GenericCapabilitySpec::new("service.log", v("1.0.0"))),
        bundle(3, "app", "1.0.0")
            .with_generic_requirement(GenericRequirementSpec::new("service.log").multiple()),
    ]);
    resolve(&resolver);

    let record = resolution(&resolver, 3).unwrap();
    assert_eq!(record.generic_wires().count(), 2);
}

#[test]
fn test_generic_requirement_missing() {
    let resolver = resolver(vec![
        bundle(1, "app", "1.0.0")
            .with_generic_requirement(GenericRequirementSpec::new("service.log"))
    ]);
    resolve(&resolver);

    assert!(!is_resolved(&resolver, 1));
    assert_eq!(error_kinds(&resolver, 1), vec![ResolverErrorKind::MissingGenericCapability]);
}

#[test]
fn test_execution_environment() {
    let resolver = resolver(vec![bundle(1, "a", "1.0.0").with_execution_environment("JavaSE-17")]);

    resolver
        .resolve(&[], &[platform(&[("org.osgi.framework.executionenvironment", "JavaSE-11")])])
        .unwrap();
    assert!(!is_resolved(&resolver, 1));
    assert_eq!(error_kinds(&resolver, 1), vec![ResolverErrorKind::MissingExecutionEnvironment]);

    resolver
        .resolve(&[], &[platform(&[("framework.executionenvironment", "JavaSE-11, JavaSE-17")])])
        .unwrap();
    assert!(is_resolved(&resolver, 1));
    assert!(error_kinds(&resolver, 1).is_empty());
}

#[test]
fn test_platform_filter() {
    let filter = Filter::parse("(osgi.os=linux)").unwrap();
    let resolver = resolver(vec![bundle(1, "native", "1.0.0").with_platform_filter(filter)]);

    resolver.resolve(&[], &[platform(&[("osgi.os", "win32")])]).unwrap();
    assert!(!is_resolved(&resolver, 1));
    assert_eq!(error_kinds(&resolver, 1), vec![ResolverErrorKind::PlatformFilterMismatch]);

    resolver.resolve(&[], &[platform(&[("osgi.os", "linux")])]).unwrap();
    assert!(is_resolved(&resolver, 1));
}

#[test]
fn test_platform_filter_without_platform() {
    let filter = Filter::parse("(osgi.os=linux)").unwrap();
    let resolver = resolver(vec![bundle(1, "native", "1.0.0").with_platform_filter(filter)]);
    resolve(&resolver);

    assert!(!is_resolved(&resolver, 1));
}

#[test]
fn test_second_resolve_is_stable() {
    let resolver = resolver(uses_conflict_bundles(None));
    resolve(&resolver);
    let before = snapshot(&resolver);
    let timestamp = resolver.with_state_ref(|s| s.timestamp()).unwrap();

    resolve(&resolver);
    assert_eq!(snapshot(&resolver), before);
    assert_eq!(resolver.with_state_ref(|s| s.timestamp()).unwrap(), timestamp);
}
