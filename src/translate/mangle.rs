//! Stable, decodable label mangling.
//!
//! A module `a::b` becomes `__Z1a1b` (length-prefixed parts). Variables
//! append their length-prefixed name; functions additionally append the
//! encoding of every parameter type, which keeps overloads distinct.

use crate::symtab::SymbolArena;
use crate::types::{Type, TypeKeyword};

pub fn mangle_module(module: &str) -> String {
    let mut out = String::from("__Z");
    for part in module.split("::") {
        out.push_str(&part.len().to_string());
        out.push_str(part);
    }
    out
}

pub fn mangle_var(module: &str, name: &str) -> String {
    format!("{}{}{}", mangle_module(module), name.len(), name)
}

pub fn mangle_function(module: &str, name: &str, arg_types: &[Type], arena: &SymbolArena) -> String {
    let mut out = mangle_var(module, name);
    for ty in arg_types {
        out.push_str(&mangle_type(ty, arena));
    }
    out
}

/// Single-letter tags for primitives, `C`/`A`/`P`/`F` structure prefixes,
/// and `T<len><mangled name>` for named types.
pub fn mangle_type(ty: &Type, arena: &SymbolArena) -> String {
    match ty {
        Type::Keyword(k) => keyword_tag(*k).to_owned(),
        Type::Qualified { base, .. } => format!("C{}", mangle_type(base, arena)),
        Type::Pointer(base) => format!("P{}", mangle_type(base, arena)),
        Type::Array { length, elem } => format!("A{}{}", length, mangle_type(elem, arena)),
        Type::FunPtr {
            return_type,
            arg_types,
        } => {
            let mut out = format!("F{}", mangle_type(return_type, arena));
            for arg in arg_types {
                out.push_str(&mangle_type(arg, arena));
            }
            out
        }
        Type::Reference { entry, .. } => {
            let symbol = arena.get(*entry);
            let name = mangle_var(&symbol.module, &symbol.name);
            format!("T{}{}", name.len(), name)
        }
        Type::Aggregate(_) => {
            crate::internal_error!("attempted to mangle an aggregate initializer type")
        }
    }
}

fn keyword_tag(k: TypeKeyword) -> &'static str {
    match k {
        TypeKeyword::Void => "v",
        TypeKeyword::Ubyte => "ub",
        TypeKeyword::Byte => "sb",
        TypeKeyword::Char => "c",
        TypeKeyword::Ushort => "us",
        TypeKeyword::Short => "ss",
        TypeKeyword::Uint => "ui",
        TypeKeyword::Int => "si",
        TypeKeyword::Wchar => "w",
        TypeKeyword::Ulong => "ul",
        TypeKeyword::Long => "sl",
        TypeKeyword::Float => "f",
        TypeKeyword::Double => "d",
        TypeKeyword::Bool => "B",
    }
}
