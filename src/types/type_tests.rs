use super::*;
use crate::files::Loc;
use crate::symtab::{SymbolArena, SymbolInfo, TypeDef};

fn int() -> Type {
    Type::keyword(TypeKeyword::Int)
}

fn uint() -> Type {
    Type::keyword(TypeKeyword::Uint)
}

fn long() -> Type {
    Type::keyword(TypeKeyword::Long)
}

#[test]
fn test_equality_is_structural() {
    let arena = SymbolArena::new();
    let a = Type::pointer(Type::array(3, int()));
    let b = Type::pointer(Type::array(3, int()));
    assert_eq!(a, b);
    assert!(a.implicitly_convertible(&b, &arena));
}

#[test]
fn test_qualifiers_participate_in_equality() {
    let a = Type::qualified(int(), true, false);
    assert_ne!(a, int());
    assert_eq!(a, Type::qualified(int(), true, false));
}

#[test]
fn test_reference_equality_is_nominal() {
    let mut arena = SymbolArena::new();
    let s1 = arena.alloc(
        "m",
        "S",
        Loc::default(),
        SymbolInfo::Type(TypeDef::Struct {
            fields: vec![],
            complete: true,
        }),
    );
    let s2 = arena.alloc(
        "m",
        "S2",
        Loc::default(),
        SymbolInfo::Type(TypeDef::Struct {
            fields: vec![],
            complete: true,
        }),
    );
    assert_eq!(Type::reference(s1, "S"), Type::reference(s1, "S"));
    assert_ne!(Type::reference(s1, "S"), Type::reference(s2, "S2"));
}

#[test]
fn test_convertibility_is_reflexive() {
    let arena = SymbolArena::new();
    for t in [
        int(),
        long(),
        Type::keyword(TypeKeyword::Double),
        Type::pointer(int()),
        Type::array(4, uint()),
        Type::fun_ptr(int(), vec![long()]),
    ] {
        assert!(t.implicitly_convertible(&t, &arena), "{t} -> {t}");
    }
}

#[test]
fn test_integer_widening_rules() {
    let arena = SymbolArena::new();
    // same signedness widens
    assert!(Type::keyword(TypeKeyword::Short).implicitly_convertible(&int(), &arena));
    assert!(uint().implicitly_convertible(&Type::keyword(TypeKeyword::Ulong), &arena));
    // unsigned fits into strictly wider signed
    assert!(uint().implicitly_convertible(&long(), &arena));
    assert!(!uint().implicitly_convertible(&int(), &arena));
    // narrowing and sign loss are not implicit
    assert!(!long().implicitly_convertible(&int(), &arena));
    assert!(!int().implicitly_convertible(&uint(), &arena));
}

#[test]
fn test_int_to_float_and_float_to_double() {
    let arena = SymbolArena::new();
    let float = Type::keyword(TypeKeyword::Float);
    let double = Type::keyword(TypeKeyword::Double);
    assert!(int().implicitly_convertible(&float, &arena));
    assert!(long().implicitly_convertible(&double, &arena));
    assert!(float.implicitly_convertible(&double, &arena));
    assert!(!double.implicitly_convertible(&float, &arena));
}

#[test]
fn test_array_decay() {
    let arena = SymbolArena::new();
    let arr = Type::array(8, int());
    assert!(arr.implicitly_convertible(&Type::pointer(int()), &arena));
    // const propagates to the pointee
    let const_arr = Type::array(8, Type::qualified(int(), true, false));
    assert!(const_arr
        .implicitly_convertible(&Type::pointer(Type::qualified(int(), true, false)), &arena));
    assert!(!const_arr.implicitly_convertible(&Type::pointer(int()), &arena));
}

#[test]
fn test_void_pointer_rules() {
    let arena = SymbolArena::new();
    let void_ptr = Type::pointer(Type::keyword(TypeKeyword::Void));
    let int_ptr = Type::pointer(int());
    assert!(int_ptr.implicitly_convertible(&void_ptr, &arena));
    assert!(void_ptr.implicitly_convertible(&int_ptr, &arena));
    // adding const to the pointee is fine, dropping it is not
    let const_int_ptr = Type::pointer(Type::qualified(int(), true, false));
    assert!(int_ptr.implicitly_convertible(&const_int_ptr, &arena));
    assert!(!const_int_ptr.implicitly_convertible(&int_ptr, &arena));
}

#[test]
fn test_enum_int_interchange() {
    let mut arena = SymbolArena::new();
    let e = arena.alloc(
        "m",
        "Color",
        Loc::default(),
        SymbolInfo::Type(TypeDef::Enum {
            constants: vec![(String::from("RED"), 0), (String::from("GREEN"), 1)],
            complete: true,
        }),
    );
    let color = Type::reference(e, "Color");
    assert!(color.implicitly_convertible(&int(), &arena));
    assert!(int().implicitly_convertible(&color, &arena));
    assert!(!color.implicitly_convertible(&long(), &arena));
    assert_eq!(crate::constants::INT_WIDTH, color.size_of(&arena));
    assert_eq!(AllocKind::Gp, color.kind_of(&arena));
}

#[test]
fn test_array_size_and_align_law() {
    let arena = SymbolArena::new();
    let t = Type::array(7, long());
    assert_eq!(7 * long().size_of(&arena), t.size_of(&arena));
    assert_eq!(long().align_of(&arena), t.align_of(&arena));
}

#[test]
fn test_struct_layout_has_padding() {
    let mut arena = SymbolArena::new();
    let s = arena.alloc(
        "m",
        "Mixed",
        Loc::default(),
        SymbolInfo::Type(TypeDef::Struct {
            fields: vec![
                (String::from("tag"), Type::keyword(TypeKeyword::Byte)),
                (String::from("value"), long()),
            ],
            complete: true,
        }),
    );
    let t = Type::reference(s, "Mixed");
    assert_eq!(16, t.size_of(&arena));
    assert_eq!(8, t.align_of(&arena));
    assert_eq!(AllocKind::Mem, t.kind_of(&arena));
}

#[test]
fn test_typedef_resolves_through() {
    let mut arena = SymbolArena::new();
    let td = arena.alloc(
        "m",
        "word",
        Loc::default(),
        SymbolInfo::Type(TypeDef::Typedef {
            target: Some(long()),
        }),
    );
    let t = Type::reference(td, "word");
    assert_eq!(8, t.size_of(&arena));
    assert!(t.implicitly_convertible(&long(), &arena));
    assert!(long().implicitly_convertible(&t, &arena));
    assert_eq!(AllocKind::Gp, t.kind_of(&arena));
}

#[test]
fn test_kindof_partition() {
    let arena = SymbolArena::new();
    assert_eq!(AllocKind::Gp, int().kind_of(&arena));
    assert_eq!(AllocKind::Gp, Type::pointer(int()).kind_of(&arena));
    assert_eq!(AllocKind::Gp, Type::keyword(TypeKeyword::Bool).kind_of(&arena));
    assert_eq!(
        AllocKind::Sse,
        Type::keyword(TypeKeyword::Double).kind_of(&arena)
    );
    assert_eq!(AllocKind::Mem, Type::array(2, int()).kind_of(&arena));
}
