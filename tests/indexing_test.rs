//! End-to-end indexing: symbols, names, references, merge laws.

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ccdb::parsing::{CursorSpec, ScriptedAst, UnitScript};
use ccdb::{CursorKind, Location};
use tempfile::TempDir;

use common::*;

/// `a.c` with `int f(int x) { return x; }` as the scripted parser sees it.
fn function_unit(a_c: &PathBuf) -> UnitScript {
    let mut unit = UnitScript::new();
    unit.include(a_c, vec![]);
    let f = unit.add(
        unit.root(),
        CursorSpec::new(CursorKind::FunctionDecl, "f")
            .display("f(int)")
            .at(a_c, 4)
            .definition(),
    );
    unit.add(f, CursorSpec::new(CursorKind::ParmDecl, "x").at(a_c, 10));
    unit
}

#[test]
fn single_definition_populates_all_databases() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    fs::write(&a_c, "int f(int x) { return x; }").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();

    let provider = Arc::new(ScriptedAst::new());
    provider.script(&a_c, function_unit(&a_c));

    let (indexer, watched) = indexer_with(provider, project.path());
    indexer
        .index(&a_c, args(&["-I/include"]))
        .expect("fresh input should get a job id");
    settle(&indexer);

    let kv = indexer.store();
    let f_loc = Location::new(&a_c, 4);

    assert!(read_symbol_name(&kv, "f").contains(&f_loc));
    assert!(read_symbol_name(&kv, "f(int)").contains(&f_loc));

    let info = read_symbol(&kv, &f_loc).expect("definition record");
    assert_eq!(info.kind, Some(CursorKind::FunctionDecl));
    assert_eq!(info.symbol_length, 1);
    assert!(info.target.is_none());
    assert!(info.references.is_empty());

    // The parameter produced neither target nor references.
    assert!(read_symbol(&kv, &Location::new(&a_c, 10)).is_none());

    let deps = read_dependencies(&kv, &a_c);
    assert_eq!(deps, [a_c.clone()].into_iter().collect());

    assert_eq!(read_file_information(&kv, &a_c), Some(args(&["-I/include"])));

    // The self-edge registered a watch on the source directory.
    let parent = a_c.parent().unwrap().to_path_buf();
    assert!(watched.lock().unwrap().contains(&parent));

    // File sentinels: findable by full path and by file name.
    let sentinel = Location::new(&a_c, 1);
    assert!(read_symbol_name(&kv, &a_c.display().to_string()).contains(&sentinel));
    assert!(read_symbol_name(&kv, "a.c").contains(&sentinel));
}

#[test]
fn duplicate_input_is_refused_while_live() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    fs::write(&a_c, "int f;").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();

    let provider = Arc::new(ScriptedAst::new());
    provider.script(&a_c, function_unit(&a_c));

    let (indexer, _) = indexer_with(provider, project.path());
    let first = indexer.index(&a_c, vec![]).expect("fresh input accepted");
    // Refused while the first job is live; a distinct id if it already
    // finished. After settling the input is always free again.
    if let Some(second) = indexer.index(&a_c, vec![]) {
        assert_ne!(first, second);
    }
    settle(&indexer);
    assert!(indexer.index(&a_c, vec![]).is_some());
    settle(&indexer);
}

/// Units for the caller/callee pair: `a.c` defines `f`, `b.c` calls it.
fn caller_callee(a_c: &PathBuf, b_c: &PathBuf) -> Arc<ScriptedAst> {
    let provider = Arc::new(ScriptedAst::new());
    provider.script(a_c, function_unit(a_c));

    let mut unit = UnitScript::new();
    unit.include(b_c, vec![]);
    unit.include(a_c, vec![b_c.clone()]);
    let f_def = unit.add(
        unit.root(),
        CursorSpec::new(CursorKind::FunctionDecl, "f")
            .display("f(int)")
            .at(a_c, 4)
            .definition(),
    );
    unit.add(
        unit.root(),
        CursorSpec::new(CursorKind::CallExpr, "f")
            .at(b_c, 20)
            .refers_to(f_def),
    );
    provider.script(b_c, unit);
    provider
}

#[test]
fn caller_gets_target_and_callee_gets_reference() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    let b_c = sources.path().join("b.c");
    fs::write(&a_c, "int f(int x) { return x; }").unwrap();
    fs::write(&b_c, "int g() { return f(1); }").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();
    let b_c = fs::canonicalize(&b_c).unwrap();

    let provider = caller_callee(&a_c, &b_c);
    let (indexer, _) = indexer_with(provider, project.path());
    indexer.index(&a_c, vec![]).unwrap();
    indexer.index(&b_c, vec![]).unwrap();
    settle(&indexer);

    let kv = indexer.store();
    let f_loc = Location::new(&a_c, 4);
    let call_loc = Location::new(&b_c, 20);

    let f_info = read_symbol(&kv, &f_loc).expect("definition record");
    assert!(f_info.references.contains(&call_loc));

    let call_info = read_symbol(&kv, &call_loc).expect("call record");
    assert_eq!(call_info.target, Some(f_loc.clone()));

    // b.c includes a.c, so editing a.c must requeue b.c.
    let deps = read_dependencies(&kv, &a_c);
    assert!(deps.contains(&a_c));
    assert!(deps.contains(&b_c));
}

#[test]
fn indexing_is_idempotent() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    fs::write(&a_c, "int f(int x) { return x; }").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();

    let provider = Arc::new(ScriptedAst::new());
    provider.script(&a_c, function_unit(&a_c));

    let (indexer, _) = indexer_with(provider, project.path());
    indexer.index(&a_c, args(&["-Wall"])).unwrap();
    settle(&indexer);

    let kv = indexer.store();
    let before: Vec<_> = ccdb::DatabaseId::ALL
        .iter()
        .map(|id| dump(&kv, *id))
        .collect();

    indexer.index(&a_c, args(&["-Wall"])).unwrap();
    settle(&indexer);

    let after: Vec<_> = ccdb::DatabaseId::ALL
        .iter()
        .map(|id| dump(&kv, *id))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn persisted_state_is_independent_of_job_order() {
    let sources = TempDir::new().unwrap();
    let a_c = sources.path().join("a.c");
    let b_c = sources.path().join("b.c");
    fs::write(&a_c, "int f(int x) { return x; }").unwrap();
    fs::write(&b_c, "int g() { return f(1); }").unwrap();
    let a_c = fs::canonicalize(&a_c).unwrap();
    let b_c = fs::canonicalize(&b_c).unwrap();

    let mut dumps = Vec::new();
    for order in [[&a_c, &b_c], [&b_c, &a_c]] {
        let project = TempDir::new().unwrap();
        let provider = caller_callee(&a_c, &b_c);
        let (indexer, _) = indexer_with(provider, project.path());
        for input in order {
            indexer.index(input, vec![]).unwrap();
        }
        settle(&indexer);
        let kv = indexer.store();
        dumps.push(
            ccdb::DatabaseId::ALL
                .iter()
                .map(|id| dump(&kv, *id))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(dumps[0], dumps[1]);
}

#[test]
fn method_declaration_and_definition_share_referrers() {
    let sources = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let foo_h = sources.path().join("foo.h");
    let foo_cpp = sources.path().join("foo.cpp");
    let main_cpp = sources.path().join("main.cpp");
    fs::write(&foo_h, "struct Foo { void bar(); };").unwrap();
    fs::write(&foo_cpp, "#include \"foo.h\"\nvoid Foo::bar() {}").unwrap();
    fs::write(&main_cpp, "#include \"foo.h\"\nint main() { Foo().bar(); }").unwrap();
    let foo_h = fs::canonicalize(&foo_h).unwrap();
    let foo_cpp = fs::canonicalize(&foo_cpp).unwrap();
    let main_cpp = fs::canonicalize(&main_cpp).unwrap();

    let decl_loc = Location::new(&foo_h, 20);
    let def_loc = Location::new(&foo_cpp, 30);
    let call_loc = Location::new(&main_cpp, 40);

    let provider = Arc::new(ScriptedAst::new());

    // foo.h alone: class definition plus the method declaration.
    let mut header = UnitScript::new();
    header.include(&foo_h, vec![]);
    let class = header.add(
        header.root(),
        CursorSpec::new(CursorKind::StructDecl, "Foo")
            .at(&foo_h, 10)
            .definition(),
    );
    header.add(
        class,
        CursorSpec::new(CursorKind::CxxMethod, "bar")
            .display("bar()")
            .at(&foo_h, 20),
    );
    provider.script(&foo_h, header);

    // foo.cpp: the declaration resolves to the definition in this unit.
    let mut source = UnitScript::new();
    source.include(&foo_cpp, vec![]);
    source.include(&foo_h, vec![foo_cpp.clone()]);
    let class = source.add(
        source.root(),
        CursorSpec::new(CursorKind::StructDecl, "Foo")
            .at(&foo_h, 10)
            .definition(),
    );
    let def = source.add(
        source.root(),
        CursorSpec::new(CursorKind::CxxMethod, "bar")
            .display("bar()")
            .at(&foo_cpp, 30)
            .definition()
            .scope(class),
    );
    source.add(
        class,
        CursorSpec::new(CursorKind::CxxMethod, "bar")
            .display("bar()")
            .at(&foo_h, 20)
            .refers_to(def),
    );
    provider.script(&foo_cpp, source);

    // main.cpp: the call only sees the declaration.
    let mut main_unit = UnitScript::new();
    main_unit.include(&main_cpp, vec![]);
    main_unit.include(&foo_h, vec![main_cpp.clone()]);
    let class = main_unit.add(
        main_unit.root(),
        CursorSpec::new(CursorKind::StructDecl, "Foo")
            .at(&foo_h, 10)
            .definition(),
    );
    let decl = main_unit.add(
        class,
        CursorSpec::new(CursorKind::CxxMethod, "bar")
            .display("bar()")
            .at(&foo_h, 20),
    );
    let call = main_unit.add(
        main_unit.root(),
        CursorSpec::new(CursorKind::CallExpr, "bar")
            .at(&main_cpp, 38)
            .refers_to(decl),
    );
    main_unit.add(
        call,
        CursorSpec::new(CursorKind::MemberRefExpr, "bar")
            .at(&main_cpp, 40)
            .refers_to(decl),
    );
    provider.script(&main_cpp, main_unit);

    let (indexer, _) = indexer_with(provider, project.path());
    indexer.index(&foo_h, vec![]).unwrap();
    indexer.index(&foo_cpp, vec![]).unwrap();
    indexer.index(&main_cpp, vec![]).unwrap();
    settle(&indexer);

    let kv = indexer.store();
    let decl_info = read_symbol(&kv, &decl_loc).expect("declaration record");
    let def_info = read_symbol(&kv, &def_loc).expect("definition record");

    assert!(decl_info.references.contains(&call_loc));
    assert!(def_info.references.contains(&call_loc));
    assert!(
        decl_info.target == Some(def_loc.clone()) || def_info.target == Some(decl_loc.clone()),
        "declaration and definition should point at each other"
    );

    // Qualified-name permutations land on the definition.
    for name in ["Foo::bar()", "Foo::bar", "bar()", "bar"] {
        assert!(
            read_symbol_name(&kv, name).contains(&def_loc),
            "{name} should resolve to the definition"
        );
    }
}
