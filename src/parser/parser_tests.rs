use super::*;
use crate::ast::{BinOp, Constant, Decl, ExpKind, ForInit, Stmt, TypeExpKind, UnOp};
use crate::files::FileEntry;

use std::path::PathBuf;

fn parse_source(source: &str, is_code: bool) -> (Option<File>, Report, bool) {
    let name = if is_code { "test.vc" } else { "test.vd" };
    let mut entry = FileEntry::new(PathBuf::from(name), is_code);
    let modules = ModuleMap::new();
    let arena = SymbolArena::new();
    let mut report = Report::new();
    let file = parse_file(source, &mut entry, &modules, &arena, &mut report);
    (file, report, entry.errored)
}

fn parse_ok(source: &str, is_code: bool) -> File {
    let (file, report, errored) = parse_source(source, is_code);
    assert!(!errored, "unexpected diagnostics:\n{report}");
    file.expect("parse should produce a file")
}

#[test]
fn test_minimal_declaration_module() {
    let file = parse_ok("module a; int x;", false);
    assert_eq!("a", file.module.to_string());
    assert!(file.imports.is_empty());
    assert_eq!(1, file.bodies.len());
    let Decl::Var(var) = &file.bodies[0] else {
        panic!("expected a variable declaration");
    };
    assert_eq!("x", var.names[0].name);
    assert!(var.names[0].init.is_none());
}

#[test]
fn test_multi_name_declaration() {
    let file = parse_ok("module a; int x, y, z;", false);
    let Decl::Var(var) = &file.bodies[0] else {
        panic!("expected a variable declaration");
    };
    let names: Vec<&str> = var.names.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(vec!["x", "y", "z"], names);
}

#[test]
fn test_function_prototype_and_definition() {
    let decl = parse_ok("module m; int f(int a, long b);", false);
    let Decl::Fun(fun) = &decl.bodies[0] else {
        panic!("expected a function declaration");
    };
    assert_eq!("f", fun.name);
    assert_eq!(2, fun.params.len());

    let code = parse_ok("module m; int f(int a) { return a; }", true);
    let Decl::Function(fun) = &code.bodies[0] else {
        panic!("expected a function definition");
    };
    assert_eq!(1, fun.body.items.len());
}

#[test]
fn test_definition_rejected_in_declaration_module() {
    let (_, report, errored) = parse_source("module m; int f(int a) { return a; }", false);
    assert!(errored);
    let rendered = report.to_string();
    assert!(
        rendered.contains("a definition is not allowed in a declaration module"),
        "got: {rendered}"
    );
}

#[test]
fn test_type_name_classification_mid_file() {
    // `S` only parses as a type because the struct declaration upstream
    // already registered it with the classifier
    let file = parse_ok("module m; struct S { int x; }; S* p;", false);
    assert_eq!(2, file.bodies.len());
    let Decl::Var(var) = &file.bodies[1] else {
        panic!("expected a variable declaration");
    };
    let TypeExpKind::Pointer(base) = &var.ty.kind else {
        panic!("expected a pointer type");
    };
    let TypeExpKind::Named(name) = &base.kind else {
        panic!("expected a named base type");
    };
    assert_eq!("S", name.to_string());
}

#[test]
fn test_expression_precedence() {
    let file = parse_ok("module m; int f() { return 1 + 2 * 3; }", true);
    let Decl::Function(fun) = &file.bodies[0] else {
        panic!("expected a function");
    };
    let Stmt::Return {
        value: Some(value), ..
    } = &fun.body.items[0]
    else {
        panic!("expected a return statement");
    };
    // 1 + (2 * 3)
    let ExpKind::BinOp {
        op: BinOp::Add,
        rhs,
        ..
    } = &value.kind
    else {
        panic!("expected an addition at the top");
    };
    assert!(matches!(
        rhs.kind,
        ExpKind::BinOp {
            op: BinOp::Mul,
            ..
        }
    ));
}

#[test]
fn test_assignment_of_ternary() {
    let file = parse_ok("module m; void f(bool c) { x = c ? 1 : 2; }", true);
    let Decl::Function(fun) = &file.bodies[0] else {
        panic!("expected a function");
    };
    let Stmt::Expression(exp) = &fun.body.items[0] else {
        panic!("expected an expression statement");
    };
    let ExpKind::BinOp {
        op: BinOp::Assign,
        rhs,
        ..
    } = &exp.kind
    else {
        panic!("expected an assignment at the top");
    };
    assert!(matches!(rhs.kind, ExpKind::Ternary { .. }));
}

#[test]
fn test_compound_assignment_not_desugared() {
    let file = parse_ok("module m; void f(int x) { x >>>= 2; }", true);
    let Decl::Function(fun) = &file.bodies[0] else {
        panic!("expected a function");
    };
    let Stmt::Expression(exp) = &fun.body.items[0] else {
        panic!("expected an expression statement");
    };
    assert!(matches!(
        exp.kind,
        ExpKind::BinOp {
            op: BinOp::ARShiftAssign,
            ..
        }
    ));
}

#[test]
fn test_postfix_chain() {
    let file = parse_ok(
        "module m; struct S { int value; }; void f(S* p) { p->next.value[3]++; }",
        true,
    );
    let Decl::Function(fun) = &file.bodies[1] else {
        panic!("expected a function");
    };
    let Stmt::Expression(exp) = &fun.body.items[0] else {
        panic!("expected an expression statement");
    };
    let ExpKind::UnOp {
        op: UnOp::PostInc,
        target,
    } = &exp.kind
    else {
        panic!("expected a postfix increment at the top");
    };
    assert!(matches!(
        target.kind,
        ExpKind::BinOp {
            op: BinOp::ArrayAccess,
            ..
        }
    ));
}

#[test]
fn test_cast_and_sizeof() {
    let file = parse_ok(
        "module m; void f() { x = cast[long](1); y = sizeof(int); z = sizeof(x); }",
        true,
    );
    let Decl::Function(fun) = &file.bodies[0] else {
        panic!("expected a function");
    };
    assert_eq!(3, fun.body.items.len());
    let kinds: Vec<bool> = fun
        .body
        .items
        .iter()
        .map(|s| matches!(s, Stmt::Expression(_)))
        .collect();
    assert_eq!(vec![true, true, true], kinds);
}

#[test]
fn test_aggregate_initializer() {
    let file = parse_ok("module m; int[3] xs = <1, 2, 3>;", true);
    let Decl::Var(var) = &file.bodies[0] else {
        panic!("expected a variable definition");
    };
    let Some(init) = &var.names[0].init else {
        panic!("expected an initializer");
    };
    let ExpKind::AggregateInit(elements) = &init.kind else {
        panic!("expected an aggregate initializer");
    };
    assert_eq!(3, elements.len());
    assert!(matches!(
        elements[0].kind,
        ExpKind::Const(Constant::Int(1))
    ));
}

#[test]
fn test_for_loop_with_declaration_init() {
    let file = parse_ok(
        "module m; void f(int n) { for (int i = 0; i < n; ++i) { int i = 42; } }",
        true,
    );
    let Decl::Function(fun) = &file.bodies[0] else {
        panic!("expected a function");
    };
    let Stmt::For { init, cond, update, .. } = &fun.body.items[0] else {
        panic!("expected a for loop");
    };
    assert!(matches!(init.as_deref(), Some(ForInit::Decl(_))));
    assert!(cond.is_some());
    assert!(update.is_some());
}

#[test]
fn test_switch_cases() {
    let file = parse_ok(
        "module m; void f(int x) { switch (x) { case 1: case 2: return; default: break; } }",
        true,
    );
    let Decl::Function(fun) = &file.bodies[0] else {
        panic!("expected a function");
    };
    let Stmt::Switch { cases, .. } = &fun.body.items[0] else {
        panic!("expected a switch");
    };
    assert_eq!(2, cases.len());
    assert_eq!(2, cases[0].values.len());
    assert!(!cases[0].is_default);
    assert!(cases[1].is_default);
}

#[test]
fn test_asm_statement() {
    let file = parse_ok(r#"module m; void f() { asm "cpuid"; }"#, true);
    let Decl::Function(fun) = &file.bodies[0] else {
        panic!("expected a function");
    };
    let Stmt::Asm { assembly, .. } = &fun.body.items[0] else {
        panic!("expected an asm statement");
    };
    assert_eq!("cpuid", assembly);
}

#[test]
fn test_error_recovery_continues_parsing() {
    let (file, report, errored) = parse_source("module m; int 5; long y;", false);
    assert!(errored);
    assert_eq!(1, report.len());
    let file = file.expect("recovery should still produce a file");
    assert_eq!(1, file.bodies.len());
    let Decl::Var(var) = &file.bodies[0] else {
        panic!("expected the recovered declaration");
    };
    assert_eq!("y", var.names[0].name);
}

#[test]
fn test_diagnostic_format() {
    let (_, report, errored) = parse_source("module m;\nint ;", false);
    assert!(errored);
    let rendered = report.to_string();
    assert_eq!(
        "test.vd:2:5: error: expected an identifier, but found a semicolon\n",
        rendered
    );
}

#[test]
fn test_funptr_type_postfix() {
    let file = parse_ok("module m; int(int, char)* handler;", false);
    let Decl::Var(var) = &file.bodies[0] else {
        panic!("expected a variable declaration");
    };
    let TypeExpKind::Pointer(inner) = &var.ty.kind else {
        panic!("expected a pointer");
    };
    let TypeExpKind::FunPtr { arg_types, .. } = &inner.kind else {
        panic!("expected a function pointer");
    };
    assert_eq!(2, arg_types.len());
}
