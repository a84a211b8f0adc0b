//! Dynamic imports, re-exported packages, late optional wiring and
//! development mode

mod common;

use common::*;
use trellis_core::types::{ExportSpec, ImportSpec, RequireSpec, ResolverErrorKind};
use trellis_core::TrellisError;
use trellis_resolver::ResolverOptions;

fn dynamic_bundles() -> Vec<trellis_core::BundleDescriptor> {
    vec![
        bundle(1, "acme", "1.0.0").with_export(ExportSpec::new("com.acme.util")),
        bundle(2, "app", "1.0.0")
            .with_import(ImportSpec::new("com.acme.*").dynamic())
            .with_export(ExportSpec::new("com.app")),
        bundle(3, "plain", "1.0.0"),
    ]
}

#[test]
fn test_dynamic_import_wires_resolved_exporter() {
    let resolver = resolver(dynamic_bundles());
    resolve(&resolver);

    let export = resolver.resolve_dynamic_import(2, "com.acme.util").unwrap().unwrap();
    assert_eq!(export.exporter, 1);
    assert_eq!(export.name, "com.acme.util");

    let record = resolution(&resolver, 2).unwrap();
    assert_eq!(record.dynamic_wires.len(), 1);
    assert_eq!(record.imported("com.acme.util").map(|e| e.exporter), Some(1));

    let again = resolver.resolve_dynamic_import(2, "com.acme.util").unwrap();
    assert_eq!(again, Some(export));
    assert_eq!(resolution(&resolver, 2).unwrap().dynamic_wires.len(), 1);
}

#[test]
fn test_dynamic_import_requires_template() {
    let resolver = resolver(dynamic_bundles());
    resolve(&resolver);

    assert_eq!(resolver.resolve_dynamic_import(3, "com.acme.util").unwrap(), None);
    assert_eq!(resolver.resolve_dynamic_import(2, "org.other").unwrap(), None);
}

#[test]
fn test_dynamic_import_of_own_export() {
    let resolver = resolver(vec![bundle(1, "app", "1.0.0")
        .with_import(ImportSpec::new("*").dynamic())
        .with_export(ExportSpec::new("com.app"))]);
    resolve(&resolver);

    assert_eq!(resolver.resolve_dynamic_import(1, "com.app").unwrap(), None);
}

#[test]
fn test_dynamic_import_unknown_bundle() {
    let resolver = resolver(dynamic_bundles());
    resolve(&resolver);

    assert!(matches!(
        resolver.resolve_dynamic_import(99, "com.acme.util"),
        Err(TrellisError::UnknownBundle { bundle_id: 99 })
    ));
}

#[test]
fn test_reexported_package() {
    let resolver = resolver(vec![
        bundle(1, "x", "1.0.0").with_export(ExportSpec::new("p")),
        bundle(2, "r", "1.0.0").with_require(RequireSpec::new("x").reexport()),
        bundle(3, "c", "1.0.0").with_import(ImportSpec::new("p").from_bundle("r")),
    ]);
    resolve(&resolver);

    assert!(is_resolved(&resolver, 3));
    let record = resolution(&resolver, 3).unwrap();
    let export = record.imported("p").unwrap().clone();
    assert_eq!(export.exporter, 2);
    assert_eq!(export.declared_by, 1);
    assert!(export.reexport);

    // rebuild the engine from the published state
    resolver.with_state_mut(|_| ()).unwrap();
    resolve(&resolver);
    assert_eq!(resolution(&resolver, 3).unwrap(), record);
}

#[test]
fn test_optional_import_wired_late() {
    let options = ResolverOptions {
        resolve_optional: true,
        ..Default::default()
    };
    let resolver = resolver_with(
        options,
        vec![bundle(1, "a", "1.0.0").with_import(ImportSpec::new("opt").optional())],
    );
    resolve(&resolver);
    assert!(exporter_of(&resolver, 1, "opt").is_none());

    resolver
        .add_bundle(bundle(2, "provider", "1.0.0").with_export(ExportSpec::new("opt")))
        .unwrap();
    resolve(&resolver);
    assert!(is_resolved(&resolver, 2));
    assert_eq!(exporter_of(&resolver, 1, "opt"), Some(2));
}

#[test]
fn test_optional_import_left_alone_by_default() {
    let resolver = resolver(vec![
        bundle(1, "a", "1.0.0").with_import(ImportSpec::new("opt").optional())
    ]);
    resolve(&resolver);

    resolver
        .add_bundle(bundle(2, "provider", "1.0.0").with_export(ExportSpec::new("opt")))
        .unwrap();
    resolve(&resolver);
    assert!(exporter_of(&resolver, 1, "opt").is_none());
}

#[test]
fn test_optional_wiring_from_platform_property() {
    let resolver = resolver(vec![
        bundle(1, "a", "1.0.0").with_import(ImportSpec::new("opt").optional())
    ]);
    resolve(&resolver);

    resolver
        .add_bundle(bundle(2, "provider", "1.0.0").with_export(ExportSpec::new("opt")))
        .unwrap();
    resolver
        .resolve(&[], &[platform(&[("resolver.resolveOptional", "true")])])
        .unwrap();
    assert_eq!(exporter_of(&resolver, 1, "opt"), Some(2));
}

fn broken_supplier() -> Vec<trellis_core::BundleDescriptor> {
    vec![
        bundle(1, "a", "1.0.0")
            .with_export(ExportSpec::new("p"))
            .with_import(ImportSpec::new("nowhere")),
        bundle(2, "b", "1.0.0").with_import(ImportSpec::new("p")),
    ]
}

#[test]
fn test_development_mode_wires_to_failing_supplier() {
    let options = ResolverOptions {
        development_mode: true,
        ..Default::default()
    };
    let resolver = resolver_with(options, broken_supplier());
    resolve(&resolver);

    assert!(!is_resolved(&resolver, 1));
    assert!(error_kinds(&resolver, 1).contains(&ResolverErrorKind::MissingImportedPackage));
    assert!(is_resolved(&resolver, 2));
    assert_eq!(exporter_of(&resolver, 2, "p"), Some(1));
}

#[test]
fn test_development_mode_from_platform_property() {
    let resolver = resolver(broken_supplier());
    resolver
        .resolve(&[], &[platform(&[("resolver.mode", "development")])])
        .unwrap();

    assert!(is_resolved(&resolver, 2));
}

#[test]
fn test_strict_mode_fails_dependents() {
    let resolver = resolver(broken_supplier());
    resolve(&resolver);

    assert!(!is_resolved(&resolver, 1));
    assert!(!is_resolved(&resolver, 2));
    assert!(error_kinds(&resolver, 2).contains(&ResolverErrorKind::MissingImportedPackage));
}
