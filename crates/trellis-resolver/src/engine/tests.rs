//! Unit tests for the resolution engine internals

use super::*;
use trellis_core::types::{BundleDescriptor, ExportSpec, ImportSpec, RequireSpec, Version};

fn bundle(id: BundleId, name: &str) -> BundleDescriptor {
    BundleDescriptor::new(id, name, Version::new(1, 0, 0))
}

fn state_of(bundles: Vec<BundleDescriptor>) -> State {
    let mut state = State::new();
    for bundle in bundles {
        state.add_bundle(bundle).unwrap();
    }
    state
}

fn two_exporters() -> State {
    state_of(vec![
        bundle(1, "low").with_export(ExportSpec::new("p").with_version(Version::new(1, 0, 0))),
        bundle(2, "high").with_export(ExportSpec::new("p").with_version(Version::new(2, 0, 0))),
        bundle(3, "importer").with_import(ImportSpec::new("p")),
    ])
}

fn import_constraint(engine: &Engine, id: BundleId) -> ConsIdx {
    let b = engine.arena.by_id[&id];
    engine.arena.bundles[b].constraints[0]
}

#[test]
fn test_alternatives_are_kept() {
    let mut state = two_exporters();
    let mut engine = Engine::build(&state, ResolverOptions::default(), None);
    engine.resolve(&mut state, &[], &[]);

    let c = import_constraint(&engine, 3);
    let cons = &engine.arena.cons[c];
    assert_eq!(cons.possible.len(), 2);
    let selected = cons.selected_supplier().unwrap();
    assert_eq!(engine.arena.bundles[engine.arena.supplier_owner(selected)].id(), 2);
}

#[test]
fn test_build_restores_recorded_wiring() {
    let mut state = two_exporters();
    let mut engine = Engine::build(&state, ResolverOptions::default(), None);
    engine.resolve(&mut state, &[], &[]);

    let rebuilt = Engine::build(&state, ResolverOptions::default(), None);
    let b = rebuilt.arena.by_id[&3];
    assert_eq!(rebuilt.arena.bundles[b].state, BundleState::Resolved);
    let selected = rebuilt.arena.cons[import_constraint(&rebuilt, 3)]
        .selected_supplier()
        .unwrap();
    assert_eq!(rebuilt.arena.bundles[rebuilt.arena.supplier_owner(selected)].id(), 2);
}

#[test]
fn test_unresolve_cascade_follows_wires() {
    let mut state = state_of(vec![
        bundle(1, "a").with_export(ExportSpec::new("p")),
        bundle(2, "b").with_import(ImportSpec::new("p")),
        bundle(3, "c").with_require(RequireSpec::new("b")),
        bundle(4, "d"),
    ]);
    let mut engine = Engine::build(&state, ResolverOptions::default(), None);
    engine.resolve(&mut state, &[], &[]);

    let root = engine.arena.by_id[&1];
    let mut ids: Vec<BundleId> = engine
        .unresolve_cascade(root)
        .into_iter()
        .map(|b| engine.arena.bundles[b].id())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(engine.arena.bundles[engine.arena.by_id[&4]].is_resolved());
}

#[test]
fn test_pending_removal_leaves_index() {
    let mut state = two_exporters();
    let mut engine = Engine::build(&state, ResolverOptions::default(), None);
    engine.resolve(&mut state, &[], &[]);

    state.remove_bundle(2, true).unwrap();
    engine.bundle_removed(2, true);
    assert!(!engine.arena.by_id.contains_key(&2));
    assert_eq!(engine.pending.get(&2).map(Vec::len), Some(1));

    engine.resolve(&mut state, &[], &[]);
    assert!(engine.pending.is_empty());
    let selected = engine.arena.cons[import_constraint(&engine, 3)]
        .selected_supplier()
        .unwrap();
    assert_eq!(engine.arena.bundles[engine.arena.supplier_owner(selected)].id(), 1);
}

#[test]
fn test_development_mode_from_platform() {
    let mut engine = Engine::empty(ResolverOptions::default(), None);
    let mut platform = PlatformProperties::new();
    platform.insert(MODE_KEY.to_string(), "development".to_string());
    platform.insert(
        EXECUTION_ENVIRONMENT_KEYS[1].to_string(),
        "JavaSE-11, JavaSE-17".to_string(),
    );
    engine.begin_pass(&[platform]);

    assert!(engine.dev_mode);
    assert!(!engine.resolve_optional);
    assert_eq!(engine.environments, vec!["JavaSE-11".to_string(), "JavaSE-17".to_string()]);
}

#[test]
fn test_failed_dynamic_import_releases_constraint() {
    let mut state = state_of(vec![bundle(1, "app").with_import(ImportSpec::new("*").dynamic())]);
    let mut engine = Engine::build(&state, ResolverOptions::default(), None);
    engine.resolve(&mut state, &[], &[]);
    let before = engine.arena.cons.len();

    for i in 0..1000 {
        let package = format!("com.missing.p{i}");
        assert!(engine.resolve_dynamic_import(&mut state, 1, &package).is_none());
    }
    assert_eq!(engine.arena.cons.len(), before);
    assert!(engine.arena.bundles[engine.arena.by_id[&1]].dynamic.is_empty());
}

#[test]
fn test_repeated_updates_are_compacted() {
    let mut state = two_exporters();
    let mut engine = Engine::build(&state, ResolverOptions::default(), None);
    engine.resolve(&mut state, &[], &[]);

    for _ in 0..500 {
        let desc = bundle(3, "importer").with_import(ImportSpec::new("p"));
        state.update_bundle(desc.clone(), false).unwrap();
        engine.bundle_updated(desc, false);
        engine.resolve(&mut state, &[], &[]);
    }

    assert!(engine.arena.dead_entries() < COMPACT_MIN_DEAD);
    assert!(engine.arena.entries() < 2 * COMPACT_MIN_DEAD);
    let selected = engine.arena.cons[import_constraint(&engine, 3)]
        .selected_supplier()
        .unwrap();
    assert_eq!(engine.arena.bundles[engine.arena.supplier_owner(selected)].id(), 2);
    assert!(state.resolution(3).map_or(false, |r| r.resolved));
}
