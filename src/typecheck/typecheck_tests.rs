use super::*;
use crate::ast::{Decl, ExpKind, File, Stmt};
use crate::files::FileEntry;
use crate::parser::parse_file;

use std::path::PathBuf;

/// Parses and checks a list of (filename, source) pairs in order, the way
/// the driver would feed them through.
fn check_sources(sources: &[(&str, &str)]) -> (Vec<File>, Report, bool, SymbolArena) {
    let mut arena = SymbolArena::new();
    let mut modules = ModuleMap::new();
    let mut report = Report::new();
    let mut files = Vec::new();
    let mut errored = false;

    for (name, source) in sources {
        let is_code = name.ends_with(".vc");
        let mut entry = FileEntry::new(PathBuf::from(name), is_code);
        let parsed = parse_file(source, &mut entry, &modules, &arena, &mut report);
        if let Some(mut file) = parsed {
            typecheck(&mut file, &mut entry, &mut modules, &mut arena, &mut report);
            files.push(file);
        }
        errored |= entry.errored;
    }
    (files, report, errored, arena)
}

fn check_ok(source: &str) -> (File, SymbolArena) {
    let (mut files, report, errored, arena) = check_sources(&[("test.vc", source)]);
    assert!(!errored, "unexpected diagnostics:\n{report}");
    (files.remove(0), arena)
}

fn first_function(file: &File) -> &crate::ast::Function {
    file.bodies
        .iter()
        .find_map(|b| match b {
            Decl::Function(f) => Some(f),
            _ => None,
        })
        .expect("a function definition")
}

#[test]
fn test_overload_resolution_picks_exact_match() {
    let source = "module m;\n\
                  int f(int a);\n\
                  int f(long a);\n\
                  int g() { return f(cast[long](1)); }\n\
                  int h() { return f(1); }";
    let (file, _) = check_ok(source);

    let pick = |fun: &crate::ast::Function| {
        let Stmt::Return {
            value: Some(value), ..
        } = &fun.body.items[0]
        else {
            panic!("expected a return");
        };
        let ExpKind::FnCall { function, .. } = &value.kind else {
            panic!("expected a call");
        };
        let ExpKind::Id(id) = &function.kind else {
            panic!("expected a named callee");
        };
        id.overload.expect("overload selected")
    };

    let funs: Vec<_> = file
        .bodies
        .iter()
        .filter_map(|b| match b {
            Decl::Function(f) => Some(f),
            _ => None,
        })
        .collect();
    // f(cast[long](1)) takes the long overload, f(1) the int one
    assert_eq!(1, pick(funs[0]));
    assert_eq!(0, pick(funs[1]));
}

#[test]
fn test_no_viable_overload() {
    let source = "module m;\n\
                  int f(int a);\n\
                  int f(long a);\n\
                  int g() { return f(1.0); }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    let rendered = report.to_string();
    assert!(
        rendered.contains("no viable overload for 'f'"),
        "got: {rendered}"
    );
}

#[test]
fn test_undefined_identifier_diagnostic_format() {
    let source = "module m;\nvoid f() {\n    zzz = 1;\n}";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    let first = report.iter().next().expect("one diagnostic").to_string();
    assert_eq!("test.vc:3:5: error: undefined identifier 'zzz'", first);
}

#[test]
fn test_ambiguous_import_lists_candidates() {
    let sources = [
        ("a.vd", "module a; int x;"),
        ("b.vd", "module b; int x;"),
        ("c.vc", "module c; using a; using b; int f() { return x; }"),
    ];
    let (_, report, errored, _) = check_sources(&sources);
    assert!(errored);
    let rendered = report.to_string();
    assert!(
        rendered.contains("identifier 'x' is ambiguous"),
        "got: {rendered}"
    );
    assert!(rendered.contains("\tcandidate module: a"), "got: {rendered}");
    assert!(rendered.contains("\tcandidate module: b"), "got: {rendered}");
}

#[test]
fn test_scoped_lookup_across_modules() {
    let sources = [
        ("a.vd", "module a; int x;"),
        ("c.vc", "module c; using a; int f() { return a::x + x; }"),
    ];
    let (_, report, errored, _) = check_sources(&sources);
    assert!(!errored, "unexpected diagnostics:\n{report}");
}

#[test]
fn test_const_assignment_rejected() {
    let source = "module m; void f() { int const x = 1; x = 2; }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    assert!(
        report.to_string().contains("cannot assign to"),
        "got: {report}"
    );
}

#[test]
fn test_for_header_shadowing() {
    let source = "module m; void f(int n) { for (int i = 0; i < n; ++i) { int i = 42; } }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(!errored, "unexpected diagnostics:\n{report}");
}

#[test]
fn test_every_expression_gets_a_result_type() {
    let (file, _) = check_ok("module m; int f(int a) { return a + 2 * a; }");
    let fun = first_function(&file);
    let Stmt::Return {
        value: Some(value), ..
    } = &fun.body.items[0]
    else {
        panic!("expected a return");
    };
    assert!(value.result_type.is_some());
    let ExpKind::BinOp { lhs, rhs, .. } = &value.kind else {
        panic!("expected an addition");
    };
    assert!(lhs.result_type.is_some());
    assert!(rhs.result_type.is_some());
}

#[test]
fn test_enum_constant_folds_to_its_value() {
    let source = "module m; enum Color { RED, GREEN = 5, BLUE, }; int f() { return Color::GREEN; }";
    let (file, arena) = check_ok(source);
    let fun = first_function(&file);
    let Stmt::Return {
        value: Some(value), ..
    } = &fun.body.items[0]
    else {
        panic!("expected a return");
    };
    let ExpKind::Const(crate::ast::Constant::Int(v)) = &value.kind else {
        panic!("enum constant should fold to an int constant");
    };
    assert_eq!(5, *v);
    // the use site carries the enum's own type
    let ty = value.result_type.as_ref().expect("typed");
    assert!(ty.is_enum(&arena));
}

#[test]
fn test_break_outside_loop() {
    let source = "module m; void f() { break; }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    assert!(
        report.to_string().contains("'break' is only allowed"),
        "got: {report}"
    );
}

#[test]
fn test_missing_return() {
    let source = "module m; int f(bool c) { if (c) { return 1; } }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    assert!(
        report.to_string().contains("can reach its end"),
        "got: {report}"
    );
}

#[test]
fn test_return_paths_through_if_else() {
    let source = "module m; int f(bool c) { if (c) { return 1; } else { return 2; } }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(!errored, "unexpected diagnostics:\n{report}");
}

#[test]
fn test_duplicate_case_values() {
    let source =
        "module m; void f(int x) { switch (x) { case 1: break; case 1: break; } }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    assert!(
        report.to_string().contains("duplicate case value 1"),
        "got: {report}"
    );
}

#[test]
fn test_struct_field_access() {
    let source = "module m; struct S { int v; S* next; }; int f(S* p) { return p->next->v; }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(!errored, "unexpected diagnostics:\n{report}");
}

#[test]
fn test_incomplete_type_sizeof() {
    let source = "module m; struct S; ulong f() { return sizeof(S); }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    assert!(
        report.to_string().contains("'S' is an incomplete type"),
        "got: {report}"
    );
}

#[test]
fn test_string_initializes_byte_array() {
    let source = "module m; ubyte[6] const greeting = \"hello\";";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(!errored, "unexpected diagnostics:\n{report}");
}

#[test]
fn test_global_initializer_must_be_constant() {
    let source = "module m; int g(); int x = g();";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    assert!(
        report.to_string().contains("not a compile-time constant"),
        "got: {report}"
    );
}

#[test]
fn test_condition_must_be_bool() {
    let source = "module m; void f(int x) { if (x) { return; } }";
    let (_, report, errored, _) = check_sources(&[("test.vc", source)]);
    assert!(errored);
    assert!(
        report.to_string().contains("not convertible to bool"),
        "got: {report}"
    );
}

#[test]
fn test_escape_marking_on_address_of() {
    let source = "module m; void f() { int x = 1; int* p = &x; }";
    let (file, arena) = check_ok(source);
    let fun = first_function(&file);
    let Stmt::VarDefn(defn) = &fun.body.items[0] else {
        panic!("expected the declaration of x");
    };
    let symbol = defn.names[0].symbol.expect("x is registered");
    assert!(arena.var(symbol).escapes);
}
