//! Translation of the typed AST into IR fragments.
//!
//! Global variables lower to BSS/RODATA/DATA fragments via
//! [`constant_to_data`]; functions lower to TEXT fragments through a
//! pluggable [`Frame`]. Short-circuit operators and comparisons go through
//! the branch translator ([`FnCx::jump_if`]/[`FnCx::jump_if_not`]), which
//! emits conditional jumps directly instead of materializing booleans.

pub mod mangle;
#[cfg(test)]
mod translate_tests;

use crate::ast::*;
use crate::constants::*;
use crate::frame::{Access, Frame, FrameCtor, FunctionAccess, GlobalAccess};
use crate::internal_error;
use crate::ir::{
    operand_size, Fragment, FragmentVector, IrEntry, IrOp, IrVector, LabelGenerator, Operand,
    TempAllocator,
};
use crate::symtab::{SymbolArena, SymbolId, TypeDef};
use crate::types::{field_offset, usual_arithmetic, AllocKind, Type, TypeKeyword};
pub use mangle::{mangle_function, mangle_module, mangle_type, mangle_var};

use log::debug;
use std::collections::HashMap;
use std::rc::Rc;

/// Side table mapping resolved symbols to their storage.
///
/// Every global variable and overload-set element gets its access here
/// before any IR is emitted; locals and parameters are added as their
/// frames allocate them.
#[derive(Default)]
pub struct Accesses {
    vars: HashMap<SymbolId, Rc<dyn Access>>,
    funs: HashMap<(SymbolId, usize), Rc<dyn Access>>,
}

impl Accesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(&self, symbol: SymbolId) -> &Rc<dyn Access> {
        self.vars
            .get(&symbol)
            .unwrap_or_else(|| internal_error!("no access allocated for a variable"))
    }

    pub fn fun(&self, symbol: SymbolId, overload: usize) -> &Rc<dyn Access> {
        self.funs
            .get(&(symbol, overload))
            .unwrap_or_else(|| internal_error!("no access allocated for a function"))
    }

    pub fn insert_var(&mut self, symbol: SymbolId, access: Rc<dyn Access>) {
        self.vars.insert(symbol, access);
    }
}

/// Assigns global and function accesses for one file's top level, in
/// declaration order. Runs over every declaration module before any code
/// module, before translation starts.
pub fn add_global_accesses(file: &File, arena: &SymbolArena, accesses: &mut Accesses) {
    let module = file.module.to_string();
    for body in &file.bodies {
        match body {
            Decl::Var(var) => {
                for name in &var.names {
                    let Some(symbol) = name.symbol else { continue };
                    let ty = &arena.var(symbol).ty;
                    accesses.insert_var(
                        symbol,
                        GlobalAccess::new(
                            mangle_var(&module, &name.name),
                            ty.size_of(arena),
                            ty.align_of(arena),
                            ty.kind_of(arena),
                        ),
                    );
                }
            }
            Decl::Fun(FunDecl {
                name,
                symbol: Some(symbol),
                overload: Some(overload),
                ..
            })
            | Decl::Function(Function {
                name,
                symbol: Some(symbol),
                overload: Some(overload),
                ..
            }) => {
                let info = &arena.function(*symbol).overloads[*overload];
                let label = mangle_function(&module, name, &info.arg_types, arena);
                accesses
                    .funs
                    .insert((*symbol, *overload), FunctionAccess::new(label));
            }
            _ => {}
        }
    }
}

/// Translates one file into its bag of fragments.
pub fn translate_file(
    file: &File,
    arena: &SymbolArena,
    accesses: &mut Accesses,
    frame_ctor: FrameCtor,
) -> FragmentVector {
    debug!("translating module {}", file.module);
    let mut fragments = FragmentVector::new();
    let mut labels = LabelGenerator::new();
    for body in &file.bodies {
        match body {
            Decl::Var(var) => {
                translate_global_var(var, arena, accesses, &mut fragments, &mut labels);
            }
            Decl::Function(fun) => {
                translate_function(fun, arena, accesses, frame_ctor, &mut fragments, &mut labels);
            }
            _ => {}
        }
    }
    fragments
}

// ---- globals ----

fn translate_global_var(
    var: &VarDecl,
    arena: &SymbolArena,
    accesses: &Accesses,
    fragments: &mut FragmentVector,
    labels: &mut LabelGenerator,
) {
    for name in &var.names {
        let Some(symbol) = name.symbol else { continue };
        let ty = arena.var(symbol).ty.clone();
        let label = accesses
            .var(symbol)
            .label()
            .unwrap_or_else(|| internal_error!("global without a label"))
            .to_owned();
        let size = ty.size_of(arena);
        let align = ty.align_of(arena);

        let fragment = match &name.init {
            None => Fragment::Bss { label, size, align },
            Some(init) if is_zero_init(init) => Fragment::Bss { label, size, align },
            Some(init) => {
                let mut ir = IrVector::new();
                constant_to_data(init, &ty, &mut ir, fragments, labels, arena);
                if ty.is_const() {
                    Fragment::Rodata { label, align, ir }
                } else {
                    Fragment::Data { label, align, ir }
                }
            }
        };
        fragments.push(fragment);
    }
}

fn is_zero_init(exp: &Exp) -> bool {
    match &exp.kind {
        ExpKind::Const(c) => c.is_zero(),
        ExpKind::AggregateInit(elements) => elements.iter().all(is_zero_init),
        _ => false,
    }
}

/// Lays a constant initializer out as a run of `CONST` entries, one per
/// primitive leaf, with explicit zero padding where the layout needs it.
/// String leaves under a pointer target intern a private RODATA fragment.
pub fn constant_to_data(
    init: &Exp,
    declared: &Type,
    out: &mut IrVector,
    fragments: &mut FragmentVector,
    labels: &mut LabelGenerator,
    arena: &SymbolArena,
) {
    match &init.kind {
        ExpKind::Const(Constant::String(bytes)) => {
            let mut data = bytes.clone();
            data.push(0);
            if let Type::Array { length, .. } = declared.stripped(arena) {
                let pad = length.saturating_sub(data.len() as u64);
                out.push(IrEntry::constant(CHAR_WIDTH, Operand::String(data)));
                emit_zero_padding(out, pad * CHAR_WIDTH);
            } else {
                let label = intern_string(Operand::String(data), CHAR_WIDTH, fragments, labels);
                out.push(IrEntry::constant(POINTER_WIDTH, Operand::name(label)));
            }
        }
        ExpKind::Const(Constant::WString(points)) => {
            let mut data = points.clone();
            data.push(0);
            if let Type::Array { length, .. } = declared.stripped(arena) {
                let pad = length.saturating_sub(data.len() as u64);
                out.push(IrEntry::constant(WCHAR_WIDTH, Operand::WString(data)));
                emit_zero_padding(out, pad * WCHAR_WIDTH);
            } else {
                let label = intern_string(Operand::WString(data), WCHAR_WIDTH, fragments, labels);
                out.push(IrEntry::constant(POINTER_WIDTH, Operand::name(label)));
            }
        }
        ExpKind::Const(c) => {
            let (size, operand) = const_leaf(c, declared, arena);
            out.push(IrEntry::constant(size, operand));
        }
        ExpKind::AggregateInit(elements) => match declared.stripped(arena).clone() {
            Type::Array { length, elem } => {
                for element in elements {
                    constant_to_data(element, &elem, out, fragments, labels, arena);
                }
                let missing = length.saturating_sub(elements.len() as u64);
                emit_zero_padding(out, missing * elem.size_of(arena));
            }
            Type::Reference { entry, .. } => {
                let fields: Vec<Type> = match arena.type_def(entry) {
                    TypeDef::Struct { fields, .. } => {
                        fields.iter().map(|(_, t)| t.clone()).collect()
                    }
                    _ => internal_error!("aggregate initializer for a non-struct reference"),
                };
                let mut offset = 0;
                for (element, field) in elements.iter().zip(fields.iter()) {
                    let aligned = crate::types::round_up(offset, field.align_of(arena));
                    emit_zero_padding(out, aligned - offset);
                    constant_to_data(element, field, out, fragments, labels, arena);
                    offset = aligned + field.size_of(arena);
                }
                let total = declared.size_of(arena);
                emit_zero_padding(out, total - offset);
            }
            Type::Aggregate(types) => {
                for (element, ty) in elements.iter().zip(types.iter()) {
                    constant_to_data(element, ty, out, fragments, labels, arena);
                }
            }
            other => internal_error!("aggregate initializer for {other}"),
        },
        _ => internal_error!("expected a constant initializer"),
    }
}

fn emit_zero_padding(out: &mut IrVector, bytes: u64) {
    for _ in 0..bytes {
        out.push(IrEntry::constant(BYTE_WIDTH, Operand::ubyte(0)));
    }
}

/// A primitive constant rendered at the width of its declared type.
fn const_leaf(c: &Constant, declared: &Type, arena: &SymbolArena) -> (u64, Operand) {
    let target = declared.stripped(arena);
    match target {
        Type::Keyword(TypeKeyword::Float) => {
            let value = match c {
                Constant::Float(f) => *f,
                Constant::Double(d) => *d as f32,
                other => other.int_value().map_or(0.0, |v| v as f32),
            };
            (FLOAT_WIDTH, Operand::float(value))
        }
        Type::Keyword(TypeKeyword::Double) => {
            let value = match c {
                Constant::Float(f) => f64::from(*f),
                Constant::Double(d) => *d,
                other => other.int_value().map_or(0.0, |v| v as f64),
            };
            (DOUBLE_WIDTH, Operand::double(value))
        }
        Type::Pointer(_) | Type::FunPtr { .. } => (POINTER_WIDTH, Operand::ulong(0)),
        _ => {
            let size = target.size_of(arena);
            let bits = match c {
                Constant::Bool(b) => u64::from(*b),
                other => other.int_value().unwrap_or(0) as u64,
            };
            (size, Operand::sized(bits, size))
        }
    }
}

/// Interns string bytes as a fresh RODATA fragment, returning its label.
fn intern_string(
    data: Operand,
    align: u64,
    fragments: &mut FragmentVector,
    labels: &mut LabelGenerator,
) -> String {
    let label = labels.new_data_label();
    let width = if align == WCHAR_WIDTH {
        WCHAR_WIDTH
    } else {
        CHAR_WIDTH
    };
    fragments.push(Fragment::Rodata {
        label: label.clone(),
        align,
        ir: vec![IrEntry::constant(width, data)],
    });
    label
}

// ---- functions ----

fn translate_function(
    fun: &Function,
    arena: &SymbolArena,
    accesses: &mut Accesses,
    frame_ctor: FrameCtor,
    fragments: &mut FragmentVector,
    labels: &mut LabelGenerator,
) {
    let symbol = fun
        .symbol
        .unwrap_or_else(|| internal_error!("untypechecked function reached translation"));
    let overload = fun.overload.expect("decorated together with symbol");
    let info = &arena.function(symbol).overloads[overload];
    let return_type = info.return_type.clone();
    let label = accesses
        .fun(symbol, overload)
        .label()
        .expect("functions always have labels")
        .to_owned();

    let mut frame = frame_ctor(label.clone());
    let mut temps = TempAllocator::new();

    for param in &fun.params {
        let Some(param_symbol) = param.symbol else {
            continue;
        };
        let var = arena.var(param_symbol);
        let access = frame.alloc_arg(
            var.ty.size_of(arena),
            var.ty.align_of(arena),
            var.ty.kind_of(arena),
            var.escapes,
            &mut temps,
        );
        accesses.insert_var(param_symbol, access);
    }

    let ret_access = if return_type.is_void() {
        None
    } else {
        Some(frame.alloc_ret_val(
            return_type.size_of(arena),
            return_type.kind_of(arena),
            &mut temps,
        ))
    };

    let exit_label = labels.new_label();
    let mut ir = IrVector::new();
    {
        let mut cx = FnCx {
            arena,
            accesses,
            frame: frame.as_mut(),
            temps: &mut temps,
            labels,
            fragments,
            exit_label: exit_label.clone(),
            ret_access,
            return_type,
            break_label: None,
            continue_label: None,
        };
        for item in &fun.body.items {
            cx.translate_stmt(item, &mut ir);
        }
    }
    ir.push(IrEntry::label(exit_label));
    let ir = frame.generate_entry_exit(ir, &mut temps);
    let frame_size = frame.frame_size();

    fragments.push(Fragment::Text {
        label,
        frame_size,
        ir,
    });
}

/// An assignable location.
enum Lvalue {
    Access(Rc<dyn Access>),
    /// memory at a computed address
    Mem(Operand),
}

struct FnCx<'a> {
    arena: &'a SymbolArena,
    accesses: &'a mut Accesses,
    frame: &'a mut dyn Frame,
    temps: &'a mut TempAllocator,
    labels: &'a mut LabelGenerator,
    fragments: &'a mut FragmentVector,
    exit_label: String,
    ret_access: Option<Rc<dyn Access>>,
    return_type: Type,
    break_label: Option<String>,
    continue_label: Option<String>,
}

impl FnCx<'_> {
    fn new_temp(&mut self, ty: &Type) -> Operand {
        Operand::temp(
            self.temps.allocate(),
            ty.size_of(self.arena),
            ty.align_of(self.arena),
            ty.kind_of(self.arena),
        )
    }

    // ---- statements ----

    fn translate_stmt(&mut self, stmt: &Stmt, out: &mut IrVector) {
        match stmt {
            Stmt::Compound(block) => {
                self.frame.scope_start();
                let mut body = IrVector::new();
                for item in &block.items {
                    self.translate_stmt(item, &mut body);
                }
                let mut body = self.frame.scope_end(body, self.temps);
                out.append(&mut body);
            }
            Stmt::If {
                cond, then, els, ..
            } => match els {
                None => {
                    let skip = self.labels.new_label();
                    self.jump_if_not(cond, &skip, out);
                    self.translate_stmt(then, out);
                    out.push(IrEntry::label(skip));
                }
                Some(els) => {
                    let else_case = self.labels.new_label();
                    let end = self.labels.new_label();
                    self.jump_if_not(cond, &else_case, out);
                    self.translate_stmt(then, out);
                    out.push(IrEntry::jump(end.clone()));
                    out.push(IrEntry::label(else_case));
                    self.translate_stmt(els, out);
                    out.push(IrEntry::label(end));
                }
            },
            Stmt::While { cond, body, .. } => {
                let start = self.labels.new_label();
                let end = self.labels.new_label();
                out.push(IrEntry::label(start.clone()));
                self.jump_if_not(cond, &end, out);
                self.loop_body(body, &end, &start, out);
                out.push(IrEntry::jump(start));
                out.push(IrEntry::label(end));
            }
            Stmt::DoWhile { body, cond, .. } => {
                let start = self.labels.new_label();
                let loop_continue = self.labels.new_label();
                let end = self.labels.new_label();
                out.push(IrEntry::label(start.clone()));
                self.loop_body(body, &end, &loop_continue, out);
                out.push(IrEntry::label(loop_continue));
                self.jump_if(cond, &start, out);
                out.push(IrEntry::label(end));
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
                ..
            } => {
                self.frame.scope_start();
                let mut scope = IrVector::new();

                match init.as_deref() {
                    Some(ForInit::Decl(defn)) => self.translate_var_defn(defn, &mut scope),
                    Some(ForInit::Exp(exp)) => {
                        self.translate_exp(exp, &mut scope);
                    }
                    None => {}
                }

                let start = self.labels.new_label();
                let update_label = self.labels.new_label();
                let end = self.labels.new_label();

                scope.push(IrEntry::label(start.clone()));
                if let Some(cond) = cond {
                    self.jump_if_not(cond, &end, &mut scope);
                }
                self.loop_body(body, &end, &update_label, &mut scope);
                scope.push(IrEntry::label(update_label));
                if let Some(update) = update {
                    self.translate_exp(update, &mut scope);
                }
                scope.push(IrEntry::jump(start));
                scope.push(IrEntry::label(end));

                let mut scope = self.frame.scope_end(scope, self.temps);
                out.append(&mut scope);
            }
            Stmt::Switch { cond, cases, .. } => self.translate_switch(cond, cases, out),
            Stmt::Break(_) => {
                let target = self
                    .break_label
                    .clone()
                    .unwrap_or_else(|| internal_error!("break outside a loop survived checking"));
                out.push(IrEntry::jump(target));
            }
            Stmt::Continue(_) => {
                let target = self.continue_label.clone().unwrap_or_else(|| {
                    internal_error!("continue outside a loop survived checking")
                });
                out.push(IrEntry::jump(target));
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    let operand = self.translate_exp(value, out);
                    let converted = self.translate_cast(
                        operand,
                        value.result_type(),
                        &self.return_type.clone(),
                        out,
                    );
                    let ret = self
                        .ret_access
                        .clone()
                        .unwrap_or_else(|| internal_error!("value return in a void function"));
                    ret.store(out, converted, self.temps);
                }
                out.push(IrEntry::jump(self.exit_label.clone()));
            }
            Stmt::Asm { assembly, .. } => out.push(IrEntry::asm(assembly.clone())),
            Stmt::VarDefn(defn) => self.translate_var_defn(defn, out),
            Stmt::TypeDecl(_) | Stmt::Null(_) => {}
            Stmt::Expression(exp) => {
                self.translate_exp(exp, out);
            }
        }
    }

    fn loop_body(&mut self, body: &Stmt, break_to: &str, continue_to: &str, out: &mut IrVector) {
        let saved_break = self.break_label.replace(break_to.to_owned());
        let saved_continue = self.continue_label.replace(continue_to.to_owned());
        self.translate_stmt(body, out);
        self.break_label = saved_break;
        self.continue_label = saved_continue;
    }

    /// A chained comparison sequence: one `JE` per case value, default (or
    /// end) as the final target, and no implicit fallthrough.
    fn translate_switch(&mut self, cond: &Exp, cases: &[SwitchCase], out: &mut IrVector) {
        let cond_ty = cond.result_type().clone();
        let size = cond_ty.size_of(self.arena);
        let value = self.translate_exp(cond, out);

        let end = self.labels.new_label();
        let mut case_labels: Vec<Vec<String>> = Vec::with_capacity(cases.len());
        let mut default_label = None;

        for case in cases {
            let mut labels = Vec::new();
            for case_value in &case.values {
                let constant = match &case_value.kind {
                    ExpKind::Const(c) => c.int_value().unwrap_or(0),
                    _ => internal_error!("non-constant case survived checking"),
                };
                let label = self.labels.new_label();
                out.push(IrEntry::cjump(
                    size,
                    IrOp::Je,
                    label.clone(),
                    value.clone(),
                    Operand::sized(constant as u64, size),
                ));
                labels.push(label);
            }
            if case.is_default {
                let label = self.labels.new_label();
                default_label = Some(label.clone());
                labels.push(label);
            }
            case_labels.push(labels);
        }
        out.push(IrEntry::jump(default_label.unwrap_or_else(|| end.clone())));

        for (case, labels) in cases.iter().zip(case_labels) {
            for label in labels {
                out.push(IrEntry::label(label));
            }
            let saved_break = self.break_label.replace(end.clone());
            for item in &case.body {
                self.translate_stmt(item, out);
            }
            self.break_label = saved_break;
            out.push(IrEntry::jump(end.clone()));
        }
        out.push(IrEntry::label(end));
    }

    fn translate_var_defn(&mut self, defn: &VarDefnStmt, out: &mut IrVector) {
        for name in &defn.names {
            let Some(symbol) = name.symbol else { continue };
            let var = self.arena.var(symbol);
            let ty = var.ty.clone();
            let access = self.frame.alloc_local(
                ty.size_of(self.arena),
                ty.align_of(self.arena),
                ty.kind_of(self.arena),
                var.escapes,
                self.temps,
            );
            self.accesses.insert_var(symbol, access.clone());

            if let Some(init) = &name.init {
                self.store_initializer(&Lvalue::Access(access), init, &ty, out);
            }
        }
    }

    /// Initializes a location from an expression, element-wise for
    /// aggregate and string initializers.
    fn store_initializer(&mut self, lv: &Lvalue, init: &Exp, declared: &Type, out: &mut IrVector) {
        match (&init.kind, declared.stripped(self.arena).clone()) {
            (ExpKind::AggregateInit(elements), Type::Array { length, elem }) => {
                for (index, element) in elements.iter().enumerate() {
                    let slot = self.element_lvalue(lv, index as u64 * elem.size_of(self.arena), out);
                    self.store_initializer(&slot, element, &elem, out);
                }
                for index in elements.len() as u64..length {
                    let slot = self.element_lvalue(lv, index * elem.size_of(self.arena), out);
                    self.zero_fill(&slot, elem.size_of(self.arena), out);
                }
            }
            (ExpKind::AggregateInit(elements), Type::Reference { entry, .. }) => {
                let fields: Vec<Type> = match self.arena.type_def(entry) {
                    TypeDef::Struct { fields, .. } => {
                        fields.iter().map(|(_, t)| t.clone()).collect()
                    }
                    _ => internal_error!("aggregate initializer for a non-struct"),
                };
                for (index, (element, field)) in elements.iter().zip(fields.iter()).enumerate() {
                    let offset = field_offset(&fields, index, self.arena);
                    let slot = self.element_lvalue(lv, offset, out);
                    self.store_initializer(&slot, element, field, out);
                }
            }
            (ExpKind::Const(Constant::String(bytes)), Type::Array { length, .. }) => {
                let mut data: Vec<u8> = bytes.clone();
                data.push(0);
                data.resize(length as usize, 0);
                for (index, byte) in data.iter().enumerate() {
                    let slot = self.element_lvalue(lv, index as u64 * CHAR_WIDTH, out);
                    self.lvalue_store(
                        &slot,
                        Operand::ubyte(*byte),
                        &Type::keyword(TypeKeyword::Char),
                        out,
                    );
                }
            }
            (ExpKind::Const(Constant::WString(points)), Type::Array { length, .. }) => {
                let mut data: Vec<u32> = points.clone();
                data.push(0);
                data.resize(length as usize, 0);
                for (index, point) in data.iter().enumerate() {
                    let slot = self.element_lvalue(lv, index as u64 * WCHAR_WIDTH, out);
                    self.lvalue_store(
                        &slot,
                        Operand::uint(*point),
                        &Type::keyword(TypeKeyword::Wchar),
                        out,
                    );
                }
            }
            _ => {
                let operand = self.translate_exp(init, out);
                let converted = self.translate_cast(operand, init.result_type(), declared, out);
                self.lvalue_store(lv, converted, declared, out);
            }
        }
    }

    // ---- lvalues ----

    fn translate_lvalue(&mut self, exp: &Exp, out: &mut IrVector) -> Lvalue {
        match &exp.kind {
            ExpKind::Id(id) => {
                let symbol = id
                    .symbol
                    .unwrap_or_else(|| internal_error!("unresolved identifier in translation"));
                Lvalue::Access(self.accesses.var(symbol).clone())
            }
            ExpKind::UnOp {
                op: UnOp::Deref,
                target,
            } => {
                let addr = self.translate_exp(target, out);
                Lvalue::Mem(addr)
            }
            ExpKind::BinOp {
                op: BinOp::ArrayAccess,
                lhs,
                rhs,
            } => {
                let elem_ty = exp.result_type();
                let elem_size = elem_ty.size_of(self.arena);
                let base_ty = lhs.result_type().clone();
                let base = if base_ty.is_pointer(self.arena) {
                    self.translate_exp(lhs, out)
                } else {
                    let base_lv = self.translate_lvalue(lhs, out);
                    self.lvalue_address(&base_lv, out)
                };
                let addr = self.index_address(base, rhs, elem_size, out);
                Lvalue::Mem(addr)
            }
            ExpKind::StructAccess { base, field } => {
                let offset = self.member_offset(base.result_type(), field);
                let base_lv = self.translate_lvalue(base, out);
                let addr = self.lvalue_address(&base_lv, out);
                Lvalue::Mem(self.offset_address(addr, offset, out))
            }
            ExpKind::StructPtrAccess { base, field } => {
                let pointee = match base.result_type().stripped(self.arena) {
                    Type::Pointer(p) => p.as_ref().clone(),
                    _ => internal_error!("-> through a non-pointer survived checking"),
                };
                let offset = self.member_offset(&pointee, field);
                let addr = self.translate_exp(base, out);
                Lvalue::Mem(self.offset_address(addr, offset, out))
            }
            _ => internal_error!("non-lvalue in an lvalue position survived checking"),
        }
    }

    fn member_offset(&self, base_ty: &Type, field: &str) -> u64 {
        let entry = match base_ty.unqualified().canonical(self.arena) {
            Type::Reference { entry, .. } => *entry,
            other => internal_error!("member access on {other}"),
        };
        match self.arena.type_def(entry) {
            TypeDef::Struct { fields, .. } => {
                let index = fields
                    .iter()
                    .position(|(n, _)| n == field)
                    .unwrap_or_else(|| internal_error!("unknown field survived checking"));
                let types: Vec<Type> = fields.iter().map(|(_, t)| t.clone()).collect();
                field_offset(&types, index, self.arena)
            }
            TypeDef::Union { .. } => 0,
            _ => internal_error!("member access on a non-aggregate"),
        }
    }

    /// base + index*size, folding constant indices.
    fn index_address(
        &mut self,
        base: Operand,
        index: &Exp,
        elem_size: u64,
        out: &mut IrVector,
    ) -> Operand {
        if let ExpKind::Const(c) = &index.kind {
            if let Some(value) = c.int_value() {
                return self.offset_address(base, value as u64 * elem_size, out);
            }
        }
        let idx = self.translate_exp(index, out);
        let widened = self.translate_cast(
            idx,
            index.result_type(),
            &Type::keyword(TypeKeyword::Long),
            out,
        );
        let scaled = Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
        out.push(IrEntry::binop(
            POINTER_WIDTH,
            IrOp::Smul,
            scaled.clone(),
            widened,
            Operand::long(elem_size as i64),
        ));
        let addr = Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
        out.push(IrEntry::binop(
            POINTER_WIDTH,
            IrOp::Add,
            addr.clone(),
            base,
            scaled,
        ));
        addr
    }

    fn offset_address(&mut self, base: Operand, offset: u64, out: &mut IrVector) -> Operand {
        if offset == 0 {
            return base;
        }
        if let Operand::StackOffset(o) = base {
            return Operand::StackOffset(o + offset as i64);
        }
        let addr = Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
        out.push(IrEntry::binop(
            POINTER_WIDTH,
            IrOp::Add,
            addr.clone(),
            base,
            Operand::ulong(offset),
        ));
        addr
    }

    fn lvalue_address(&mut self, lv: &Lvalue, _out: &mut IrVector) -> Operand {
        match lv {
            Lvalue::Access(access) => access
                .address()
                .unwrap_or_else(|| internal_error!("took the address of a register value")),
            Lvalue::Mem(addr) => addr.clone(),
        }
    }

    fn lvalue_load(&mut self, lv: &Lvalue, ty: &Type, out: &mut IrVector) -> Operand {
        let size = ty.size_of(self.arena);
        let kind = ty.kind_of(self.arena);
        match lv {
            Lvalue::Access(access) => access.load(out, self.temps),
            Lvalue::Mem(addr) => {
                if kind == AllocKind::Mem {
                    // aggregates are values by address
                    return addr.clone();
                }
                let dest = self.new_temp(ty);
                match addr {
                    Operand::StackOffset(offset) => {
                        out.push(IrEntry::stk_load(size, dest.clone(), *offset));
                    }
                    _ => out.push(IrEntry::mem_load(size, dest.clone(), addr.clone())),
                }
                dest
            }
        }
    }

    fn lvalue_store(&mut self, lv: &Lvalue, source: Operand, ty: &Type, out: &mut IrVector) {
        let size = ty.size_of(self.arena);
        if ty.kind_of(self.arena) == AllocKind::Mem {
            let dest = self.lvalue_address(lv, out);
            self.copy_memory(dest, source, size, out);
            return;
        }
        match lv {
            Lvalue::Access(access) => access.store(out, source, self.temps),
            Lvalue::Mem(addr) => match addr {
                Operand::StackOffset(offset) => out.push(IrEntry::stk_store(size, *offset, source)),
                _ => out.push(IrEntry::mem_store(size, addr.clone(), source)),
            },
        }
    }

    fn element_lvalue(&mut self, lv: &Lvalue, offset: u64, out: &mut IrVector) -> Lvalue {
        let base = self.lvalue_address(lv, out);
        Lvalue::Mem(self.offset_address(base, offset, out))
    }

    /// Zeroes a location chunk by chunk.
    fn zero_fill(&mut self, lv: &Lvalue, size: u64, out: &mut IrVector) {
        let base = self.lvalue_address(lv, out);
        let mut offset = 0;
        while offset < size {
            let chunk = [8u64, 4, 2, 1]
                .into_iter()
                .find(|c| offset + c <= size && offset % c == 0)
                .unwrap_or(1);
            let to = self.offset_address(base.clone(), offset, out);
            match to {
                Operand::StackOffset(o) => {
                    out.push(IrEntry::stk_store(chunk, o, Operand::sized(0, chunk)));
                }
                _ => out.push(IrEntry::mem_store(chunk, to, Operand::sized(0, chunk))),
            }
            offset += chunk;
        }
    }

    /// Unrolled aggregate copy in register-width chunks.
    fn copy_memory(&mut self, dest: Operand, source: Operand, size: u64, out: &mut IrVector) {
        let mut offset = 0;
        while offset < size {
            let chunk = [8u64, 4, 2, 1]
                .into_iter()
                .find(|c| offset + c <= size && offset % c == 0)
                .unwrap_or(1);
            let from = self.offset_address(source.clone(), offset, out);
            let to = self.offset_address(dest.clone(), offset, out);
            let temp = Operand::temp(self.temps.allocate(), chunk, chunk, AllocKind::Gp);
            match from {
                Operand::StackOffset(o) => out.push(IrEntry::stk_load(chunk, temp.clone(), o)),
                _ => out.push(IrEntry::mem_load(chunk, temp.clone(), from)),
            }
            match to {
                Operand::StackOffset(o) => out.push(IrEntry::stk_store(chunk, o, temp)),
                _ => out.push(IrEntry::mem_store(chunk, to, temp)),
            }
            offset += chunk;
        }
    }

    // ---- expressions ----

    fn translate_exp(&mut self, exp: &Exp, out: &mut IrVector) -> Operand {
        match &exp.kind {
            ExpKind::Const(c) => self.translate_constant(c),
            ExpKind::Id(id) => {
                let symbol = id
                    .symbol
                    .unwrap_or_else(|| internal_error!("unresolved identifier in translation"));
                match &self.arena.get(symbol).info {
                    crate::symtab::SymbolInfo::Var(_) => {
                        self.accesses.var(symbol).clone().load(out, self.temps)
                    }
                    crate::symtab::SymbolInfo::Function(_) => {
                        let overload = id
                            .overload
                            .unwrap_or_else(|| internal_error!("unselected overload reference"));
                        self.accesses.fun(symbol, overload).clone().load(out, self.temps)
                    }
                    crate::symtab::SymbolInfo::Type(_) => {
                        internal_error!("type name in an expression survived checking")
                    }
                }
            }
            ExpKind::Seq(first, last) => {
                self.translate_exp(first, out);
                self.translate_exp(last, out)
            }
            ExpKind::BinOp { op, lhs, rhs } => self.translate_binop(exp, *op, lhs, rhs, out),
            ExpKind::UnOp { op, target } => self.translate_unop(exp, *op, target, out),
            ExpKind::CompOp { op, lhs, rhs } => {
                let (ir_op, size, l, r) = self.compare_operands(*op, lhs, rhs, false, out);
                let dest = Operand::temp(self.temps.allocate(), BYTE_WIDTH, BYTE_WIDTH, AllocKind::Gp);
                out.push(IrEntry::binop(size, ir_op, dest.clone(), l, r));
                dest
            }
            ExpKind::LAnd(_, _) | ExpKind::LOr(_, _) => {
                // materialize through the branch translator
                let result = Operand::temp(self.temps.allocate(), BYTE_WIDTH, BYTE_WIDTH, AllocKind::Gp);
                let false_label = self.labels.new_label();
                let end = self.labels.new_label();
                self.jump_if_not(exp, &false_label, out);
                out.push(IrEntry::mov(BYTE_WIDTH, result.clone(), Operand::ubyte(1)));
                out.push(IrEntry::jump(end.clone()));
                out.push(IrEntry::label(false_label));
                out.push(IrEntry::mov(BYTE_WIDTH, result.clone(), Operand::ubyte(0)));
                out.push(IrEntry::label(end));
                result
            }
            ExpKind::LAndAssign { target, value } => {
                self.translate_logical_assign(target, value, true, out)
            }
            ExpKind::LOrAssign { target, value } => {
                self.translate_logical_assign(target, value, false, out)
            }
            ExpKind::Ternary { cond, then, els } => {
                let result_type = exp.result_type().clone();
                let size = result_type.size_of(self.arena);
                let result = self.new_temp(&result_type);
                let else_case = self.labels.new_label();
                let end = self.labels.new_label();

                self.jump_if_not(cond, &else_case, out);
                let then_value = self.translate_exp(then, out);
                let then_value =
                    self.translate_cast(then_value, then.result_type(), &result_type, out);
                out.push(IrEntry::mov(size, result.clone(), then_value));
                out.push(IrEntry::jump(end.clone()));
                out.push(IrEntry::label(else_case));
                let else_value = self.translate_exp(els, out);
                let else_value =
                    self.translate_cast(else_value, els.result_type(), &result_type, out);
                out.push(IrEntry::mov(size, result.clone(), else_value));
                out.push(IrEntry::label(end));
                result
            }
            ExpKind::StructAccess { .. } | ExpKind::StructPtrAccess { .. } => {
                let ty = exp.result_type().clone();
                let lv = self.translate_lvalue(exp, out);
                self.lvalue_load(&lv, &ty, out)
            }
            ExpKind::FnCall { function, args } => self.translate_call(function, args, out),
            ExpKind::AggregateInit(elements) => self.translate_aggregate(exp, elements, out),
            ExpKind::Cast { target, .. } => {
                let operand = self.translate_exp(target, out);
                self.translate_cast(operand, target.result_type(), exp.result_type(), out)
            }
            ExpKind::SizeofType(_) | ExpKind::SizeofExp(_) => {
                internal_error!("sizeof folds to a constant during checking")
            }
        }
    }

    fn translate_constant(&mut self, c: &Constant) -> Operand {
        match c {
            Constant::Ubyte(v) => Operand::ubyte(*v),
            Constant::Byte(v) => Operand::byte(*v),
            Constant::Char(v) => Operand::ubyte(*v),
            Constant::Ushort(v) => Operand::ushort(*v),
            Constant::Short(v) => Operand::short(*v),
            Constant::Uint(v) => Operand::uint(*v),
            Constant::Int(v) => Operand::int(*v),
            Constant::Wchar(v) => Operand::uint(*v),
            Constant::Ulong(v) => Operand::ulong(*v),
            Constant::Long(v) => Operand::long(*v),
            Constant::Float(v) => Operand::float(*v),
            Constant::Double(v) => Operand::double(*v),
            Constant::Bool(v) => Operand::ubyte(u8::from(*v)),
            Constant::Null => Operand::ulong(0),
            Constant::String(bytes) => {
                let mut data = bytes.clone();
                data.push(0);
                let label =
                    intern_string(Operand::String(data), CHAR_WIDTH, self.fragments, self.labels);
                Operand::name(label)
            }
            Constant::WString(points) => {
                let mut data = points.clone();
                data.push(0);
                let label =
                    intern_string(Operand::WString(data), WCHAR_WIDTH, self.fragments, self.labels);
                Operand::name(label)
            }
        }
    }

    fn translate_binop(
        &mut self,
        exp: &Exp,
        op: BinOp,
        lhs: &Exp,
        rhs: &Exp,
        out: &mut IrVector,
    ) -> Operand {
        if op == BinOp::Assign {
            let lv = self.translate_lvalue(lhs, out);
            let value = self.translate_exp(rhs, out);
            let target_ty = lhs.result_type().clone();
            let converted = self.translate_cast(value, rhs.result_type(), &target_ty, out);
            self.lvalue_store(&lv, converted.clone(), &target_ty, out);
            return converted;
        }
        if let Some(base) = op.compound_base() {
            // the location is computed once; the operation runs in the
            // target's type
            let lv = self.translate_lvalue(lhs, out);
            let target_ty = lhs.result_type().clone();
            let current = self.lvalue_load(&lv, &target_ty, out);
            let value = self.translate_exp(rhs, out);
            let converted = self.translate_cast(value, rhs.result_type(), &target_ty, out);
            let result = self.emit_arith(base, &target_ty, current, converted, out);
            self.lvalue_store(&lv, result.clone(), &target_ty, out);
            return result;
        }
        if op == BinOp::ArrayAccess {
            let ty = exp.result_type().clone();
            let lv = self.translate_lvalue(exp, out);
            return self.lvalue_load(&lv, &ty, out);
        }

        let result_ty = exp.result_type().clone();
        let lhs_ty = lhs.result_type().clone();
        let rhs_ty = rhs.result_type().clone();

        // pointer arithmetic scales by the pointee size
        if (op == BinOp::Add || op == BinOp::Sub) && lhs_ty.is_pointer(self.arena) {
            if rhs_ty.is_pointer(self.arena) {
                let l = self.translate_exp(lhs, out);
                let r = self.translate_exp(rhs, out);
                let pointee = self.pointee_size(&lhs_ty);
                let diff = Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
                out.push(IrEntry::binop(POINTER_WIDTH, IrOp::Sub, diff.clone(), l, r));
                let dest = Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
                out.push(IrEntry::binop(
                    POINTER_WIDTH,
                    IrOp::Sdiv,
                    dest.clone(),
                    diff,
                    Operand::long(pointee as i64),
                ));
                return dest;
            }
            let base = self.translate_exp(lhs, out);
            let pointee = self.pointee_size(&lhs_ty);
            if op == BinOp::Add {
                return self.index_address(base, rhs, pointee, out);
            }
            let idx = self.translate_exp(rhs, out);
            let widened =
                self.translate_cast(idx, &rhs_ty, &Type::keyword(TypeKeyword::Long), out);
            let scaled =
                Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
            out.push(IrEntry::binop(
                POINTER_WIDTH,
                IrOp::Smul,
                scaled.clone(),
                widened,
                Operand::long(pointee as i64),
            ));
            let dest =
                Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
            out.push(IrEntry::binop(POINTER_WIDTH, IrOp::Sub, dest.clone(), base, scaled));
            return dest;
        }

        if op.is_shift() {
            let l = self.translate_exp(lhs, out);
            let r = self.translate_exp(rhs, out);
            let count = self.translate_cast(r, &rhs_ty, &Type::keyword(TypeKeyword::Ubyte), out);
            let size = result_ty.size_of(self.arena);
            let ir_op = match op {
                BinOp::LShift => IrOp::Sll,
                BinOp::LRShift => IrOp::Slr,
                BinOp::ARShift => IrOp::Sar,
                _ => unreachable!(),
            };
            let dest = self.new_temp(&result_ty);
            out.push(IrEntry::binop(size, ir_op, dest.clone(), l, count));
            return dest;
        }

        if op == BinOp::Spaceship {
            return self.translate_spaceship(lhs, rhs, out);
        }

        // plain arithmetic and bitwise: both operands convert to the
        // common type the checker computed
        let l = self.translate_exp(lhs, out);
        let l = self.translate_cast(l, &lhs_ty, &result_ty, out);
        let r = self.translate_exp(rhs, out);
        let r = self.translate_cast(r, &rhs_ty, &result_ty, out);
        self.emit_arith(op, &result_ty, l, r, out)
    }

    fn pointee_size(&self, ty: &Type) -> u64 {
        match ty.stripped(self.arena) {
            Type::Pointer(pointee) => pointee.size_of(self.arena),
            other => internal_error!("pointee of {other}"),
        }
    }

    fn emit_arith(
        &mut self,
        op: BinOp,
        ty: &Type,
        l: Operand,
        r: Operand,
        out: &mut IrVector,
    ) -> Operand {
        // pointer compound += / -= come through here too
        if ty.is_pointer(self.arena) && matches!(op, BinOp::Add | BinOp::Sub) {
            let pointee = self.pointee_size(ty);
            let scaled = Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
            out.push(IrEntry::binop(
                POINTER_WIDTH,
                IrOp::Umul,
                scaled.clone(),
                r,
                Operand::ulong(pointee),
            ));
            let dest = Operand::temp(self.temps.allocate(), POINTER_WIDTH, POINTER_WIDTH, AllocKind::Gp);
            let ir_op = if op == BinOp::Add { IrOp::Add } else { IrOp::Sub };
            out.push(IrEntry::binop(POINTER_WIDTH, ir_op, dest.clone(), l, scaled));
            return dest;
        }

        let size = ty.size_of(self.arena);
        let ir_op = arith_op(op, ty, self.arena);
        let dest = self.new_temp(ty);
        out.push(IrEntry::binop(size, ir_op, dest.clone(), l, r));
        dest
    }

    /// `a <=> b` yields -1, 0 or 1 as an int.
    fn translate_spaceship(&mut self, lhs: &Exp, rhs: &Exp, out: &mut IrVector) -> Operand {
        let result = Operand::temp(self.temps.allocate(), INT_WIDTH, INT_WIDTH, AllocKind::Gp);
        let greater = self.labels.new_label();
        let equal = self.labels.new_label();
        let end = self.labels.new_label();

        let (_, signed, floating) = self.comparison_type(lhs, rhs);
        let (gt_op, size, l, r) = self.compare_jump_operands(CompOp::Gt, lhs, rhs, out);
        out.push(IrEntry::cjump(size, gt_op, greater.clone(), l.clone(), r.clone()));
        let eq_op = jump_op(CompOp::Eq, false, signed, floating);
        out.push(IrEntry::cjump(size, eq_op, equal.clone(), l, r));
        out.push(IrEntry::mov(INT_WIDTH, result.clone(), Operand::int(-1)));
        out.push(IrEntry::jump(end.clone()));
        out.push(IrEntry::label(greater));
        out.push(IrEntry::mov(INT_WIDTH, result.clone(), Operand::int(1)));
        out.push(IrEntry::jump(end.clone()));
        out.push(IrEntry::label(equal));
        out.push(IrEntry::mov(INT_WIDTH, result.clone(), Operand::int(0)));
        out.push(IrEntry::label(end));
        result
    }

    fn translate_unop(
        &mut self,
        exp: &Exp,
        op: UnOp,
        target: &Exp,
        out: &mut IrVector,
    ) -> Operand {
        match op {
            UnOp::Deref => {
                let result_ty = exp.result_type().clone();
                let size = result_ty.size_of(self.arena);
                let addr = self.translate_exp(target, out);
                if result_ty.kind_of(self.arena) == AllocKind::Mem {
                    return addr;
                }
                let dest = self.new_temp(&result_ty);
                out.push(IrEntry::mem_load(size, dest.clone(), addr));
                dest
            }
            UnOp::AddrOf => {
                let lv = self.translate_lvalue(target, out);
                self.lvalue_address(&lv, out)
            }
            UnOp::Plus => self.translate_exp(target, out),
            UnOp::Neg => {
                let ty = exp.result_type().clone();
                let size = ty.size_of(self.arena);
                let value = self.translate_exp(target, out);
                let dest = self.new_temp(&ty);
                if ty.is_floating(self.arena) {
                    let zero = if size == FLOAT_WIDTH {
                        Operand::float(0.0)
                    } else {
                        Operand::double(0.0)
                    };
                    out.push(IrEntry::binop(size, IrOp::FpSub, dest.clone(), zero, value));
                } else {
                    out.push(IrEntry::binop(
                        size,
                        IrOp::Sub,
                        dest.clone(),
                        Operand::sized(0, size),
                        value,
                    ));
                }
                dest
            }
            UnOp::LNot => {
                let value = self.translate_exp(target, out);
                let dest = Operand::temp(self.temps.allocate(), BYTE_WIDTH, BYTE_WIDTH, AllocKind::Gp);
                out.push(IrEntry::unop(BYTE_WIDTH, IrOp::LNot, dest.clone(), value));
                dest
            }
            UnOp::BitNot => {
                let ty = exp.result_type().clone();
                let size = ty.size_of(self.arena);
                let value = self.translate_exp(target, out);
                let dest = self.new_temp(&ty);
                out.push(IrEntry::unop(size, IrOp::Not, dest.clone(), value));
                dest
            }
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                self.translate_incdec(exp, op, target, out)
            }
        }
    }

    /// The operand's location is computed once; prefix forms yield the
    /// updated value, postfix forms the original.
    fn translate_incdec(
        &mut self,
        exp: &Exp,
        op: UnOp,
        target: &Exp,
        out: &mut IrVector,
    ) -> Operand {
        let ty = exp.result_type().clone();
        let size = ty.size_of(self.arena);
        let lv = self.translate_lvalue(target, out);
        let current = self.lvalue_load(&lv, &ty, out);

        let is_inc = matches!(op, UnOp::PreInc | UnOp::PostInc);
        let is_postfix = matches!(op, UnOp::PostInc | UnOp::PostDec);

        let original = if is_postfix {
            let keep = self.new_temp(&ty);
            out.push(IrEntry::mov(size, keep.clone(), current.clone()));
            Some(keep)
        } else {
            None
        };

        let updated = if ty.is_pointer(self.arena) {
            let step = self.pointee_size(&ty);
            let dest = self.new_temp(&ty);
            let ir_op = if is_inc { IrOp::Add } else { IrOp::Sub };
            out.push(IrEntry::binop(
                size,
                ir_op,
                dest.clone(),
                current,
                Operand::ulong(step),
            ));
            dest
        } else {
            let one = if ty.is_floating(self.arena) {
                if size == FLOAT_WIDTH {
                    Operand::float(1.0)
                } else {
                    Operand::double(1.0)
                }
            } else {
                Operand::sized(1, size)
            };
            let base = if is_inc { BinOp::Add } else { BinOp::Sub };
            self.emit_arith(base, &ty, current, one, out)
        };
        self.lvalue_store(&lv, updated.clone(), &ty, out);

        original.unwrap_or(updated)
    }

    /// `x &&= e` / `x ||= e`: the right side only runs when the stored
    /// value does not already decide the result.
    fn translate_logical_assign(
        &mut self,
        target: &Exp,
        value: &Exp,
        is_and: bool,
        out: &mut IrVector,
    ) -> Operand {
        let lv = self.translate_lvalue(target, out);
        let bool_ty = Type::keyword(TypeKeyword::Bool);
        let current = self.lvalue_load(&lv, &bool_ty, out);
        let end = self.labels.new_label();
        if is_and {
            out.push(IrEntry::cjump(
                BYTE_WIDTH,
                IrOp::Je,
                end.clone(),
                current,
                Operand::ubyte(0),
            ));
        } else {
            out.push(IrEntry::cjump(
                BYTE_WIDTH,
                IrOp::Jne,
                end.clone(),
                current,
                Operand::ubyte(0),
            ));
        }
        let rhs = self.translate_exp(value, out);
        self.lvalue_store(&lv, rhs, &bool_ty, out);
        out.push(IrEntry::label(end));
        self.lvalue_load(&lv, &bool_ty, out)
    }

    fn translate_call(&mut self, function: &Exp, args: &[Exp], out: &mut IrVector) -> Operand {
        // parameter types come from the selected overload, or from the
        // callee's function-pointer type
        let fn_type = function.result_type().clone();
        let Type::FunPtr {
            return_type,
            arg_types,
        } = fn_type.stripped(self.arena).clone()
        else {
            internal_error!("call through {fn_type} survived checking");
        };

        let mut prepared = Vec::with_capacity(args.len());
        for (arg, want) in args.iter().zip(arg_types.iter()) {
            let operand = self.translate_exp(arg, out);
            let converted = self.translate_cast(operand, arg.result_type(), want, out);
            prepared.push((
                converted,
                want.size_of(self.arena),
                want.kind_of(self.arena),
            ));
        }

        // the callee is evaluated before the convention moves so nothing
        // can clobber an argument register in between
        let target = match &function.kind {
            ExpKind::Id(id) => {
                let symbol = id
                    .symbol
                    .unwrap_or_else(|| internal_error!("unresolved callee in translation"));
                match &self.arena.get(symbol).info {
                    crate::symtab::SymbolInfo::Function(_) => {
                        let overload = id.overload.expect("selected during checking");
                        let label = self
                            .accesses
                            .fun(symbol, overload)
                            .label()
                            .expect("functions always have labels");
                        Operand::name(label.to_owned())
                    }
                    _ => self.accesses.var(symbol).clone().load(out, self.temps),
                }
            }
            _ => self.translate_exp(function, out),
        };
        self.frame.pass_arguments(out, &prepared, self.temps);
        out.push(IrEntry::call(target));

        if return_type.is_void() {
            Operand::sized(0, 0)
        } else {
            self.frame.fetch_return(
                out,
                return_type.size_of(self.arena),
                return_type.align_of(self.arena),
                return_type.kind_of(self.arena),
                self.temps,
            )
        }
    }

    /// Aggregate literals in expression position: constant ones intern a
    /// RODATA fragment, the rest build up in a stack slot.
    fn translate_aggregate(
        &mut self,
        exp: &Exp,
        elements: &[Exp],
        out: &mut IrVector,
    ) -> Operand {
        let ty = exp.result_type().clone();
        if elements.iter().all(is_constant_leaf) {
            let label = self.labels.new_data_label();
            let mut ir = IrVector::new();
            for element in elements {
                let declared = element.result_type().clone();
                constant_to_data(element, &declared, &mut ir, self.fragments, self.labels, self.arena);
            }
            self.fragments.push(Fragment::Rodata {
                label: label.clone(),
                align: ty.align_of(self.arena),
                ir,
            });
            return Operand::name(label);
        }

        let access = self.frame.alloc_local(
            ty.size_of(self.arena),
            ty.align_of(self.arena),
            AllocKind::Mem,
            true,
            self.temps,
        );
        let lv = Lvalue::Access(access);
        let Type::Aggregate(types) = &ty else {
            internal_error!("aggregate literal without an aggregate type");
        };
        let mut offset = 0;
        for (element, elem_ty) in elements.iter().zip(types.iter()) {
            let aligned = crate::types::round_up(offset, elem_ty.align_of(self.arena));
            let slot = self.element_lvalue(&lv, aligned, out);
            self.store_initializer(&slot, element, elem_ty, out);
            offset = aligned + elem_ty.size_of(self.arena);
        }
        self.lvalue_address(&lv, out)
    }

    // ---- casts ----

    /// Emits the conversion of `operand` from `from` to `to`. Explicit and
    /// implicit conversions share this path; it never diagnoses.
    fn translate_cast(
        &mut self,
        operand: Operand,
        from: &Type,
        to: &Type,
        out: &mut IrVector,
    ) -> Operand {
        let from_s = from.stripped(self.arena).clone();
        let to_s = to.stripped(self.arena).clone();
        if from_s == to_s {
            return operand;
        }

        let from_kw = scalar_keyword(&from_s, self.arena);
        let to_kw = scalar_keyword(&to_s, self.arena);

        match (from_kw, to_kw) {
            (Some(f), Some(t)) => self.scalar_cast(operand, f, t, out),
            _ => operand, // pointers, arrays decaying, references: bit-identical
        }
    }

    fn scalar_cast(
        &mut self,
        operand: Operand,
        from: TypeKeyword,
        to: TypeKeyword,
        out: &mut IrVector,
    ) -> Operand {
        use TypeKeyword as K;
        if from == to {
            return operand;
        }
        let (fw, tw) = (from.width(), to.width());
        let dest_kind = if to.is_floating() { AllocKind::Sse } else { AllocKind::Gp };
        let dest = Operand::temp(self.temps.allocate(), tw, tw, dest_kind);

        let op = match (from.is_floating(), to.is_floating()) {
            (true, true) => {
                if to == K::Float {
                    IrOp::FToFloat
                } else {
                    IrOp::FToDouble
                }
            }
            (true, false) => match tw {
                1 => IrOp::FToByte,
                2 => IrOp::FToShort,
                4 => IrOp::FToInt,
                _ => IrOp::FToLong,
            },
            (false, true) => match (from.is_signed(), to) {
                (true, K::Float) => IrOp::SToFloat,
                (true, _) => IrOp::SToDouble,
                (false, K::Float) => IrOp::UToFloat,
                (false, _) => IrOp::UToDouble,
            },
            (false, false) => {
                if to == K::Bool {
                    // integer to bool is a != 0 comparison
                    out.push(IrEntry::binop(
                        fw,
                        IrOp::Ne,
                        dest.clone(),
                        operand,
                        Operand::sized(0, fw),
                    ));
                    return dest;
                }
                if tw == fw {
                    return operand;
                }
                if tw < fw {
                    match tw {
                        1 => IrOp::TruncByte,
                        2 => IrOp::TruncShort,
                        _ => IrOp::TruncInt,
                    }
                } else if from.is_signed() {
                    match tw {
                        2 => IrOp::SxShort,
                        4 => IrOp::SxInt,
                        _ => IrOp::SxLong,
                    }
                } else {
                    match tw {
                        2 => IrOp::ZxShort,
                        4 => IrOp::ZxInt,
                        _ => IrOp::ZxLong,
                    }
                }
            }
        };
        out.push(IrEntry::unop(tw, op, dest.clone(), operand));
        dest
    }

    // ---- branches ----

    /// Lowers `condition` into a jump to `target` when it is true.
    fn jump_if(&mut self, condition: &Exp, target: &str, out: &mut IrVector) {
        match &condition.kind {
            ExpKind::Const(Constant::Bool(true)) => out.push(IrEntry::jump(target)),
            ExpKind::Const(Constant::Bool(false)) => {}
            ExpKind::UnOp {
                op: UnOp::LNot,
                target: inner,
            } => self.jump_if_not(inner, target, out),
            ExpKind::CompOp { op, lhs, rhs } => {
                let (ir_op, size, l, r) = self.compare_operands_jump(*op, lhs, rhs, false, out);
                out.push(IrEntry::cjump(size, ir_op, target, l, r));
            }
            ExpKind::LAnd(lhs, rhs) => {
                let fallout = self.labels.new_label();
                self.jump_if_not(lhs, &fallout, out);
                self.jump_if(rhs, target, out);
                out.push(IrEntry::label(fallout));
            }
            ExpKind::LOr(lhs, rhs) => {
                self.jump_if(lhs, target, out);
                self.jump_if(rhs, target, out);
            }
            _ => {
                let value = self.translate_exp(condition, out);
                let size = operand_size(&value).max(1);
                out.push(IrEntry::cjump(
                    size,
                    IrOp::Jne,
                    target,
                    value,
                    Operand::sized(0, size),
                ));
            }
        }
    }

    /// Lowers `condition` into a jump to `target` when it is false.
    fn jump_if_not(&mut self, condition: &Exp, target: &str, out: &mut IrVector) {
        match &condition.kind {
            ExpKind::Const(Constant::Bool(false)) => out.push(IrEntry::jump(target)),
            ExpKind::Const(Constant::Bool(true)) => {}
            ExpKind::UnOp {
                op: UnOp::LNot,
                target: inner,
            } => self.jump_if(inner, target, out),
            ExpKind::CompOp { op, lhs, rhs } => {
                let (ir_op, size, l, r) = self.compare_operands_jump(*op, lhs, rhs, true, out);
                out.push(IrEntry::cjump(size, ir_op, target, l, r));
            }
            ExpKind::LAnd(lhs, rhs) => {
                self.jump_if_not(lhs, target, out);
                self.jump_if_not(rhs, target, out);
            }
            ExpKind::LOr(lhs, rhs) => {
                let fallout = self.labels.new_label();
                self.jump_if(lhs, &fallout, out);
                self.jump_if_not(rhs, target, out);
                out.push(IrEntry::label(fallout));
            }
            _ => {
                let value = self.translate_exp(condition, out);
                let size = operand_size(&value).max(1);
                out.push(IrEntry::cjump(
                    size,
                    IrOp::Je,
                    target,
                    value,
                    Operand::sized(0, size),
                ));
            }
        }
    }

    /// Evaluates both comparison operands in their common type, returning
    /// the value-producing compare operator.
    fn compare_operands(
        &mut self,
        op: CompOp,
        lhs: &Exp,
        rhs: &Exp,
        negate: bool,
        out: &mut IrVector,
    ) -> (IrOp, u64, Operand, Operand) {
        let (common, signed, floating) = self.comparison_type(lhs, rhs);
        let size = common.size_of(self.arena);
        let l = self.translate_exp(lhs, out);
        let l = self.translate_cast(l, lhs.result_type(), &common, out);
        let r = self.translate_exp(rhs, out);
        let r = self.translate_cast(r, rhs.result_type(), &common, out);
        (compare_op(op, negate, signed, floating), size, l, r)
    }

    /// Same evaluation, returning the conditional-jump operator.
    fn compare_operands_jump(
        &mut self,
        op: CompOp,
        lhs: &Exp,
        rhs: &Exp,
        negate: bool,
        out: &mut IrVector,
    ) -> (IrOp, u64, Operand, Operand) {
        let (common, signed, floating) = self.comparison_type(lhs, rhs);
        let size = common.size_of(self.arena);
        let l = self.translate_exp(lhs, out);
        let l = self.translate_cast(l, lhs.result_type(), &common, out);
        let r = self.translate_exp(rhs, out);
        let r = self.translate_cast(r, rhs.result_type(), &common, out);
        (jump_op(op, negate, signed, floating), size, l, r)
    }

    fn compare_jump_operands(
        &mut self,
        op: CompOp,
        lhs: &Exp,
        rhs: &Exp,
        out: &mut IrVector,
    ) -> (IrOp, u64, Operand, Operand) {
        self.compare_operands_jump(op, lhs, rhs, false, out)
    }

    fn comparison_type(&self, lhs: &Exp, rhs: &Exp) -> (Type, bool, bool) {
        let l = lhs.result_type();
        let r = rhs.result_type();
        if l.is_pointer(self.arena) || r.is_pointer(self.arena) {
            return (Type::keyword(TypeKeyword::Ulong), false, false);
        }
        if l.is_bool(self.arena) && r.is_bool(self.arena) {
            return (Type::keyword(TypeKeyword::Ubyte), false, false);
        }
        let common = usual_arithmetic(l, r, self.arena)
            .unwrap_or_else(|| internal_error!("incomparable operands survived checking"));
        let signed = common.is_signed(self.arena);
        let floating = common.is_floating(self.arena);
        (common, signed, floating)
    }
}

/// The keyword a stripped scalar type computes as for cast emission:
/// pointers and function pointers cast as ulong, enums as int.
fn scalar_keyword(ty: &Type, arena: &SymbolArena) -> Option<TypeKeyword> {
    match ty {
        Type::Keyword(TypeKeyword::Void) => None,
        Type::Keyword(k) => Some(*k),
        Type::Pointer(_) | Type::FunPtr { .. } => Some(TypeKeyword::Ulong),
        Type::Reference { entry, .. } => match arena.type_def(*entry) {
            TypeDef::Enum { .. } => Some(TypeKeyword::Int),
            _ => None,
        },
        _ => None,
    }
}

fn is_constant_leaf(exp: &Exp) -> bool {
    match &exp.kind {
        ExpKind::Const(_) => true,
        ExpKind::AggregateInit(elements) => elements.iter().all(is_constant_leaf),
        _ => false,
    }
}

/// Integer/float arithmetic operator selection by the computed type.
fn arith_op(op: BinOp, ty: &Type, arena: &SymbolArena) -> IrOp {
    let floating = ty.is_floating(arena);
    let signed = ty.is_signed(arena);
    match op {
        BinOp::Add => {
            if floating {
                IrOp::FpAdd
            } else {
                IrOp::Add
            }
        }
        BinOp::Sub => {
            if floating {
                IrOp::FpSub
            } else {
                IrOp::Sub
            }
        }
        BinOp::Mul => {
            if floating {
                IrOp::FpMul
            } else if signed {
                IrOp::Smul
            } else {
                IrOp::Umul
            }
        }
        BinOp::Div => {
            if floating {
                IrOp::FpDiv
            } else if signed {
                IrOp::Sdiv
            } else {
                IrOp::Udiv
            }
        }
        BinOp::Mod => {
            if signed {
                IrOp::Smod
            } else {
                IrOp::Umod
            }
        }
        BinOp::BitAnd => IrOp::And,
        BinOp::BitOr => IrOp::Or,
        BinOp::BitXor => IrOp::Xor,
        other => internal_error!("{other:?} is not a plain arithmetic operator"),
    }
}

/// Value-producing compare operator, by signedness and floatness.
fn compare_op(op: CompOp, negate: bool, signed: bool, floating: bool) -> IrOp {
    let op = if negate { invert(op) } else { op };
    match (op, signed, floating) {
        (CompOp::Eq, _, false) => IrOp::E,
        (CompOp::Ne, _, false) => IrOp::Ne,
        (CompOp::Eq, _, true) => IrOp::FpE,
        (CompOp::Ne, _, true) => IrOp::FpNe,
        (CompOp::Lt, _, true) => IrOp::FpL,
        (CompOp::Le, _, true) => IrOp::FpLe,
        (CompOp::Gt, _, true) => IrOp::FpG,
        (CompOp::Ge, _, true) => IrOp::FpGe,
        (CompOp::Lt, true, _) => IrOp::L,
        (CompOp::Le, true, _) => IrOp::Le,
        (CompOp::Gt, true, _) => IrOp::G,
        (CompOp::Ge, true, _) => IrOp::Ge,
        (CompOp::Lt, false, _) => IrOp::B,
        (CompOp::Le, false, _) => IrOp::Be,
        (CompOp::Gt, false, _) => IrOp::A,
        (CompOp::Ge, false, _) => IrOp::Ae,
    }
}

/// Conditional-jump operator, by signedness and floatness.
fn jump_op(op: CompOp, negate: bool, signed: bool, floating: bool) -> IrOp {
    let op = if negate { invert(op) } else { op };
    match (op, signed, floating) {
        (CompOp::Eq, _, false) => IrOp::Je,
        (CompOp::Ne, _, false) => IrOp::Jne,
        (CompOp::Eq, _, true) => IrOp::FpJe,
        (CompOp::Ne, _, true) => IrOp::FpJne,
        (CompOp::Lt, _, true) => IrOp::FpJl,
        (CompOp::Le, _, true) => IrOp::FpJle,
        (CompOp::Gt, _, true) => IrOp::FpJg,
        (CompOp::Ge, _, true) => IrOp::FpJge,
        (CompOp::Lt, true, _) => IrOp::Jl,
        (CompOp::Le, true, _) => IrOp::Jle,
        (CompOp::Gt, true, _) => IrOp::Jg,
        (CompOp::Ge, true, _) => IrOp::Jge,
        (CompOp::Lt, false, _) => IrOp::Jb,
        (CompOp::Le, false, _) => IrOp::Jbe,
        (CompOp::Gt, false, _) => IrOp::Ja,
        (CompOp::Ge, false, _) => IrOp::Jae,
    }
}

fn invert(op: CompOp) -> CompOp {
    match op {
        CompOp::Eq => CompOp::Ne,
        CompOp::Ne => CompOp::Eq,
        CompOp::Lt => CompOp::Ge,
        CompOp::Le => CompOp::Gt,
        CompOp::Gt => CompOp::Le,
        CompOp::Ge => CompOp::Lt,
    }
}
