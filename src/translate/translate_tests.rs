use super::*;
use crate::files::{FileEntry, Report};
use crate::frame::x86_64;
use crate::parser::parse_file;
use crate::symtab::ModuleMap;
use crate::typecheck::typecheck;

use pretty_assertions::assert_eq;
use std::path::PathBuf;

/// Runs (filename, source) pairs through the whole pipeline, returning the
/// per-file fragment vectors.
fn build(sources: &[(&str, &str)]) -> (Vec<FragmentVector>, SymbolArena) {
    let mut arena = SymbolArena::new();
    let mut modules = ModuleMap::new();
    let mut report = Report::new();
    let mut files = Vec::new();

    for (name, source) in sources {
        let is_code = name.ends_with(".vc");
        let mut entry = FileEntry::new(PathBuf::from(name), is_code);
        let file = parse_file(source, &mut entry, &modules, &arena, &mut report)
            .expect("test sources parse");
        let mut file = file;
        typecheck(&mut file, &mut entry, &mut modules, &mut arena, &mut report);
        assert!(!entry.errored, "unexpected diagnostics:\n{report}");
        files.push(file);
    }

    let mut accesses = Accesses::new();
    for file in &files {
        add_global_accesses(file, &arena, &mut accesses);
    }
    let fragments = files
        .iter()
        .map(|file| translate_file(file, &arena, &mut accesses, x86_64::frame_ctor))
        .collect();
    (fragments, arena)
}

fn only_text(fragments: &[Fragment]) -> &IrVector {
    let mut texts = fragments.iter().filter_map(|f| match f {
        Fragment::Text { ir, .. } => Some(ir),
        _ => None,
    });
    let ir = texts.next().expect("a text fragment");
    assert!(texts.next().is_none(), "expected exactly one text fragment");
    ir
}

#[test]
fn test_minimal_module_bss() {
    let (fragments, _) = build(&[("a.vd", "module a; int x;")]);
    assert_eq!(
        vec![Fragment::Bss {
            label: String::from("__Z1a1x"),
            size: INT_WIDTH,
            align: INT_WIDTH,
        }],
        fragments.into_iter().next().unwrap()
    );
}

#[test]
fn test_const_string_global_rodata() {
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; ubyte[6] const greeting = \"hello\";",
    )]);
    let expected = Fragment::Rodata {
        label: String::from("__Z1m8greeting"),
        align: 1,
        ir: vec![IrEntry::constant(
            CHAR_WIDTH,
            Operand::String(b"hello\0".to_vec()),
        )],
    };
    assert_eq!(vec![expected], fragments.into_iter().next().unwrap());
}

#[test]
fn test_module_name_mangling() {
    assert_eq!("__Z1a1b", mangle_module("a::b"));
    assert_eq!("__Z1a1x", mangle_var("a", "x"));
    assert_eq!("__Z3net6Server4port", mangle_var("net::Server", "port"));
}

#[test]
fn test_function_mangling_distinguishes_overloads() {
    let arena = SymbolArena::new();
    let int = Type::keyword(TypeKeyword::Int);
    let long = Type::keyword(TypeKeyword::Long);
    let f_int = mangle_function("m", "f", std::slice::from_ref(&int), &arena);
    let f_long = mangle_function("m", "f", std::slice::from_ref(&long), &arena);
    assert_eq!("__Z1m1fsi", f_int);
    assert_eq!("__Z1m1fsl", f_long);
    assert_ne!(f_int, f_long);
}

#[test]
fn test_type_mangling_structure() {
    let arena = SymbolArena::new();
    let ty = Type::pointer(Type::qualified(Type::keyword(TypeKeyword::Ubyte), true, false));
    assert_eq!("PCub", mangle_type(&ty, &arena));
    let arr = Type::array(3, Type::keyword(TypeKeyword::Double));
    assert_eq!("A3d", mangle_type(&arr, &arena));
    let fp = Type::fun_ptr(
        Type::keyword(TypeKeyword::Void),
        vec![Type::keyword(TypeKeyword::Int), Type::keyword(TypeKeyword::Bool)],
    );
    assert_eq!("FvsiB", mangle_type(&fp, &arena));
}

#[test]
fn test_global_zero_initializer_goes_to_bss() {
    let (fragments, _) = build(&[("m.vc", "module m; long zeroed = 0;")]);
    assert_eq!(
        vec![Fragment::Bss {
            label: String::from("__Z1m6zeroed"),
            size: LONG_WIDTH,
            align: LONG_WIDTH,
        }],
        fragments.into_iter().next().unwrap()
    );
}

#[test]
fn test_string_through_pointer_interns_a_fragment() {
    let (fragments, _) = build(&[("m.vc", "module m; char* s = \"hi\";")]);
    let fragments = fragments.into_iter().next().unwrap();
    assert_eq!(2, fragments.len());
    let Fragment::Rodata { label, ir, .. } = &fragments[0] else {
        panic!("expected the interned string first");
    };
    assert_eq!(
        &vec![IrEntry::constant(
            CHAR_WIDTH,
            Operand::String(b"hi\0".to_vec())
        )],
        ir
    );
    let Fragment::Data { ir, .. } = &fragments[1] else {
        panic!("expected the pointer data fragment");
    };
    assert_eq!(
        &vec![IrEntry::constant(POINTER_WIDTH, Operand::name(label.clone()))],
        ir
    );
}

#[test]
fn test_ternary_lowering_shape() {
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; int f(bool c, int a, int b) { return c ? a : b; }",
    )]);
    let ir = only_text(&fragments[0]);

    // fresh temp, jumpIfNot -> else, MOVE, JUMP end, else:, MOVE, end:
    let je = ir
        .iter()
        .position(|e| e.op == IrOp::Je)
        .expect("a conditional jump on the condition");
    let seq: Vec<IrOp> = ir[je..je + 6].iter().map(|e| e.op).collect();
    assert_eq!(
        vec![
            IrOp::Je,
            IrOp::Move,
            IrOp::Jump,
            IrOp::Label,
            IrOp::Move,
            IrOp::Label,
        ],
        seq
    );

    // both MOVEs fill the same 4-byte result temp
    let move_dest = |entry: &IrEntry| match &entry.dest {
        Some(Operand::Temp { id, size, .. }) => (*id, *size),
        other => panic!("expected a temp destination, got {other:?}"),
    };
    assert_eq!(move_dest(&ir[je + 1]), move_dest(&ir[je + 4]));
    assert_eq!(4, move_dest(&ir[je + 1]).1);

    // the jump skips to the join label
    let Some(Operand::Name(end)) = &ir[je + 2].dest else {
        panic!("jump has a label target");
    };
    let Some(Operand::Name(join)) = &ir[je + 5].arg1 else {
        panic!("label has a name");
    };
    assert_eq!(end, join);
}

#[test]
fn test_text_fragment_has_single_exit_label() {
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; int f(bool c) { if (c) { return 1; } return 2; }",
    )]);
    let ir = only_text(&fragments[0]);

    // the exit label is allocated first; every return jumps to it
    let exit = ".L0";
    let labels = ir
        .iter()
        .filter(|e| e.op == IrOp::Label && e.arg1 == Some(Operand::name(exit)))
        .count();
    assert_eq!(1, labels);
    let jumps_to_exit = ir
        .iter()
        .filter(|e| e.op == IrOp::Jump && e.dest == Some(Operand::name(exit)))
        .count();
    assert_eq!(2, jumps_to_exit);
    // the function ends in the frame's RETURN
    assert_eq!(IrOp::Return, ir.last().expect("nonempty body").op);
}

#[test]
fn test_switch_lowering_no_fallthrough() {
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; int f(int x) { switch (x) { case 1: return 10; case 2: return 20; default: return 0; } }",
    )]);
    let ir = only_text(&fragments[0]);

    // one JE per case value, then the jump to default
    let jes: Vec<usize> = ir
        .iter()
        .enumerate()
        .filter(|(_, e)| e.op == IrOp::Je)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(2, jes.len());
    assert_eq!(IrOp::Jump, ir[jes[1] + 1].op);

    let case_values: Vec<u64> = jes
        .iter()
        .map(|&i| match &ir[i].arg2 {
            Some(Operand::Constant { bits, .. }) => *bits,
            other => panic!("expected a constant case value, got {other:?}"),
        })
        .collect();
    assert_eq!(vec![1, 2], case_values);
}

#[test]
fn test_logical_and_branches() {
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; int f(bool a, bool b) { if (a && b) { return 1; } return 0; }",
    )]);
    let ir = only_text(&fragments[0]);

    // `a && b` in jump-if-not position chains two jump-if-nots to the same
    // target without materializing a boolean
    let jes: Vec<&IrEntry> = ir.iter().filter(|e| e.op == IrOp::Je).collect();
    assert_eq!(2, jes.len());
    assert_eq!(jes[0].dest, jes[1].dest);
}

#[test]
fn test_temp_ids_are_consistent() {
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; int f(int a, int b) { int c = a * b + 1; return c <=> a; }",
    )]);
    let ir = only_text(&fragments[0]);

    let mut seen: std::collections::HashMap<usize, (u64, AllocKind)> =
        std::collections::HashMap::new();
    for entry in ir {
        for operand in [&entry.dest, &entry.arg1, &entry.arg2].into_iter().flatten() {
            if let Operand::Temp { id, size, kind, .. } = operand {
                let previous = seen.insert(*id, (*size, *kind));
                if let Some(previous) = previous {
                    assert_eq!(previous, (*size, *kind), "temp {id} changed shape");
                }
            }
        }
    }
}

#[test]
fn test_escaping_local_reserves_frame_space() {
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; void f() { int x = 1; int* p = &x; }",
    )]);
    let sizes: Vec<u64> = fragments[0]
        .iter()
        .filter_map(|f| match f {
            Fragment::Text { frame_size, .. } => Some(*frame_size),
            _ => None,
        })
        .collect();
    // x's address is taken, so it gets a 4-byte stack slot; p stays in a
    // temp and costs nothing
    assert_eq!(vec![4], sizes);
}

#[test]
fn test_asm_passthrough() {
    let (fragments, _) = build(&[(
        "m.vc",
        r#"module m; void f() { asm "cpuid"; }"#,
    )]);
    let ir = only_text(&fragments[0]);
    assert!(ir
        .iter()
        .any(|e| e.op == IrOp::Asm && e.arg1 == Some(Operand::Asm(String::from("cpuid")))));
}

#[test]
fn test_call_moves_arguments_into_registers() {
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; int g(int a, int b); int f() { return g(1, 2); }",
    )]);
    let ir = only_text(&fragments[0]);

    let call = ir
        .iter()
        .position(|e| e.op == IrOp::Call)
        .expect("a call entry");
    assert_eq!(
        Some(Operand::name("__Z1m1gsisi")),
        ir[call].arg1,
        "calls target the mangled overload"
    );
    // the two argument moves precede the call, into RDI then RSI
    let arg_regs: Vec<usize> = ir[..call]
        .iter()
        .filter_map(|e| match (&e.op, &e.dest) {
            (IrOp::Move, Some(Operand::Reg(r))) => Some(*r),
            _ => None,
        })
        .collect();
    assert_eq!(vec![x86_64::RDI, x86_64::RSI], arg_regs);
}

#[test]
fn test_for_loop_scoping_two_accesses() {
    // the inner i shadows the header's i: two distinct locals, and the
    // continue path still runs the update
    let (fragments, _) = build(&[(
        "m.vc",
        "module m; void f(int n) { for (int i = 0; i < n; ++i) { int i = 42; } }",
    )]);
    let ir = only_text(&fragments[0]);

    let moves_of_42 = ir
        .iter()
        .filter(|e| {
            e.op == IrOp::Move
                && matches!(e.arg1, Some(Operand::Constant { bits: 42, .. }))
        })
        .count();
    assert_eq!(1, moves_of_42);
    let moves_of_0 = ir
        .iter()
        .filter(|e| {
            e.op == IrOp::Move && matches!(e.arg1, Some(Operand::Constant { bits: 0, size: 4 }))
        })
        .count();
    assert_eq!(1, moves_of_0);

    // header i and body i land in different temps
    let dest_of = |bits: u64| {
        ir.iter()
            .find_map(|e| match (&e.op, &e.arg1, &e.dest) {
                (
                    IrOp::Move,
                    Some(Operand::Constant { bits: b, .. }),
                    Some(Operand::Temp { id, .. }),
                ) if *b == bits => Some(*id),
                _ => None,
            })
            .expect("an initializing move")
    };
    assert_ne!(dest_of(0), dest_of(42));
}
