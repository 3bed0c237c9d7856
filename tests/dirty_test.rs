//! Watcher-driven invalidation: sweeps, pruning, and reindexing.

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ccdb::parsing::{CursorSpec, ScriptedAst, UnitScript};
use ccdb::{CursorKind, Location};
use tempfile::TempDir;

use common::*;

fn function_unit(a_c: &PathBuf) -> UnitScript {
    let mut unit = UnitScript::new();
    unit.include(a_c, vec![]);
    unit.add(
        unit.root(),
        CursorSpec::new(CursorKind::FunctionDecl, "f")
            .display("f(int)")
            .at(a_c, 4)
            .definition(),
    );
    unit
}

/// Push a file's mtime forward so the watcher sees it as changed.
fn bump_mtime(path: &PathBuf) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(30))
        .unwrap();
}

#[test]
fn deleted_file_is_swept_and_not_reindexed() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    fs::write(&a_c, "int f(int x) { return x; }").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();

    let provider = Arc::new(ScriptedAst::new());
    provider.script(&a_c, function_unit(&a_c));

    let (indexer, _) = indexer_with(Arc::clone(&provider), project.path());
    indexer.index(&a_c, args(&["-Wall"])).unwrap();
    settle(&indexer);

    let kv = indexer.store();
    let f_loc = Location::new(&a_c, 4);
    assert!(read_symbol(&kv, &f_loc).is_some());
    assert!(read_symbol_name(&kv, "f").contains(&f_loc));

    fs::remove_file(&a_c).unwrap();
    indexer.directory_changed(a_c.parent().unwrap());
    settle(&indexer);

    // Every Symbol key in a.c is gone.
    assert!(read_symbol(&kv, &f_loc).is_none());
    let leftover = dump(&kv, ccdb::DatabaseId::Symbol);
    assert!(
        leftover.iter().all(|(key, _)| {
            Location::path_of_key(&String::from_utf8_lossy(key)) != Some(a_c.clone())
        }),
        "no Symbol key may still name the deleted file"
    );
    // SymbolName values lost their a.c locations; emptied keys vanished.
    assert!(read_symbol_name(&kv, "f").is_empty());
    assert!(read_symbol_name(&kv, "f(int)").is_empty());
    assert!(read_symbol_name(&kv, "a.c").is_empty());

    // The file no longer exists, so it was not reindexed.
    assert_eq!(provider.calls().len(), 1);
}

#[test]
fn unknown_directory_event_is_ignored() {
    let project = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedAst::new());
    let (indexer, _) = indexer_with(provider, project.path());
    indexer.directory_changed("/nowhere/watched");
    settle(&indexer);
}

#[test]
fn touched_file_is_reindexed_with_its_last_arguments() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    fs::write(&a_c, "int f(int x) { return x; }").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();

    let provider = Arc::new(ScriptedAst::new());
    provider.script(&a_c, function_unit(&a_c));

    let (indexer, _) = indexer_with(Arc::clone(&provider), project.path());
    indexer.index(&a_c, args(&["-DX=1"])).unwrap();
    settle(&indexer);

    bump_mtime(&a_c);
    indexer.directory_changed(a_c.parent().unwrap());
    settle(&indexer);

    let calls = provider.calls();
    assert_eq!(calls.len(), 2, "the touched file should reindex once");
    assert_eq!(calls[1].input, a_c);
    assert_eq!(calls[1].args, args(&["-DX=1"]));
}

#[test]
fn dirty_then_reindex_restores_the_same_state() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    let b_c = sources.path().join("b.c");
    fs::write(&a_c, "int f(int x) { return x; }").unwrap();
    fs::write(&b_c, "int g() { return f(1); }").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();
    let b_c = fs::canonicalize(&b_c).unwrap();

    let provider = Arc::new(ScriptedAst::new());
    provider.script(&a_c, function_unit(&a_c));
    let mut caller = UnitScript::new();
    caller.include(&b_c, vec![]);
    caller.include(&a_c, vec![b_c.clone()]);
    let f_def = caller.add(
        caller.root(),
        CursorSpec::new(CursorKind::FunctionDecl, "f")
            .display("f(int)")
            .at(&a_c, 4)
            .definition(),
    );
    caller.add(
        caller.root(),
        CursorSpec::new(CursorKind::CallExpr, "f")
            .at(&b_c, 20)
            .refers_to(f_def),
    );
    provider.script(&b_c, caller);

    let (indexer, _) = indexer_with(Arc::clone(&provider), project.path());
    indexer.index(&a_c, vec![]).unwrap();
    indexer.index(&b_c, vec![]).unwrap();
    settle(&indexer);

    let kv = indexer.store();
    let before: Vec<_> = ccdb::DatabaseId::ALL
        .iter()
        .map(|id| dump(&kv, *id))
        .collect();

    // a.c changes on disk without changing content; both its unit and the
    // dependent b.c get swept and reindexed.
    bump_mtime(&a_c);
    indexer.directory_changed(a_c.parent().unwrap());
    settle(&indexer);

    let after: Vec<_> = ccdb::DatabaseId::ALL
        .iter()
        .map(|id| dump(&kv, *id))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn references_into_dirty_paths_are_pruned_from_survivors() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    let b_c = sources.path().join("b.c");
    fs::write(&a_c, "int f(int x) { return x; }").unwrap();
    fs::write(&b_c, "int g() { return f(1); }").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();
    let b_c = fs::canonicalize(&b_c).unwrap();

    let provider = Arc::new(ScriptedAst::new());
    provider.script(&a_c, function_unit(&a_c));
    let mut caller = UnitScript::new();
    // b.c stands alone: no edge from a.c, so dirtying b.c leaves a.c
    // indexed but must scrub b.c's locations out of a.c's records.
    caller.include(&b_c, vec![]);
    let f_def = caller.add(
        caller.root(),
        CursorSpec::new(CursorKind::FunctionDecl, "f")
            .display("f(int)")
            .at(&a_c, 4)
            .definition(),
    );
    caller.add(
        caller.root(),
        CursorSpec::new(CursorKind::CallExpr, "f")
            .at(&b_c, 20)
            .refers_to(f_def),
    );
    provider.script(&b_c, caller);

    let (indexer, _) = indexer_with(Arc::clone(&provider), project.path());
    indexer.index(&a_c, vec![]).unwrap();
    indexer.index(&b_c, vec![]).unwrap();
    settle(&indexer);

    let kv = indexer.store();
    let f_loc = Location::new(&a_c, 4);
    assert!(read_symbol(&kv, &f_loc)
        .expect("definition record")
        .references
        .contains(&Location::new(&b_c, 20)));

    fs::remove_file(&b_c).unwrap();
    indexer.directory_changed(b_c.parent().unwrap());
    settle(&indexer);

    // Losing its only reference empties the record, and empty records are
    // dropped by the sweep; the name index still resolves the definition.
    assert!(read_symbol(&kv, &f_loc).is_none());
    assert!(read_symbol(&kv, &Location::new(&b_c, 20)).is_none());
    assert!(read_symbol_name(&kv, "f").contains(&f_loc));
}
