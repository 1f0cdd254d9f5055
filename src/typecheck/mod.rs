//! The type checker.
//!
//! Resolves names and overloads across modules, computes a result type for
//! every expression, and enforces the implicit-conversion rules. Errors are
//! collected per construct and checking continues on a best-effort basis,
//! so a single run reports as many independent mistakes as possible.

mod typecheck_error;
#[cfg(test)]
mod typecheck_tests;

use crate::ast::*;
use crate::files::{FileEntry, Loc, Report};
use crate::symtab::{
    Environment, FunctionInfo, Lookup, ModuleMap, Overload, SymbolArena, SymbolId, SymbolInfo,
    TypeDef, VarInfo,
};
use crate::types::{Type, TypeKeyword};
pub use typecheck_error::TypeError;

use log::debug;

/// Checks one parsed file, decorating its AST in place and publishing the
/// module's symbol table for files processed later.
pub fn typecheck(
    file: &mut File,
    entry: &mut FileEntry,
    modules: &mut ModuleMap,
    arena: &mut SymbolArena,
    report: &mut Report,
) {
    debug!("typechecking {}", entry.display_name());
    let module_name = file.module.to_string();
    let mut env = Environment::new(module_name.clone());
    // a code module continues the interface its declaration module opened
    if let Some(interface) = modules.get(&module_name) {
        env.table = interface.clone();
    }
    for import in &file.imports {
        let name = import.module.to_string();
        if modules.contains(&name) {
            env.imports.push(name);
        }
    }

    let mut checker = Checker {
        filename: entry.display_name(),
        entry,
        modules,
        arena,
        report,
        env,
        return_type: None,
        loop_depth: 0,
        switch_depth: 0,
    };

    // first pass: top-level symbols, in declaration order
    for body in &mut file.bodies {
        checker.register_body(body);
    }
    // second pass: function bodies and global initializers
    for body in &mut file.bodies {
        checker.check_body(body);
    }

    let table = std::mem::take(&mut checker.env.table);
    modules.insert(module_name, table);
}

struct Checker<'a> {
    filename: String,
    entry: &'a mut FileEntry,
    modules: &'a ModuleMap,
    arena: &'a mut SymbolArena,
    report: &'a mut Report,
    env: Environment,
    return_type: Option<Type>,
    loop_depth: u32,
    switch_depth: u32,
}

impl Checker<'_> {
    fn error(&mut self, loc: Loc, err: &TypeError) {
        self.report.error(&self.filename, loc, err);
        self.entry.errored = true;
    }

    // ---- registration (pass 1) ----

    fn register_body(&mut self, body: &mut Decl) {
        match body {
            Decl::Var(var) => self.register_var_decl(var),
            Decl::Fun(fun) => {
                let name = fun.name.clone();
                if let Some((symbol, overload)) = self.register_function(
                    &mut fun.return_type,
                    &mut fun.params,
                    &name,
                    fun.loc,
                    false,
                ) {
                    fun.symbol = Some(symbol);
                    fun.overload = Some(overload);
                }
            }
            Decl::Function(fun) => {
                let name = fun.name.clone();
                if let Some((symbol, overload)) = self.register_function(
                    &mut fun.return_type,
                    &mut fun.params,
                    &name,
                    fun.loc,
                    true,
                ) {
                    fun.symbol = Some(symbol);
                    fun.overload = Some(overload);
                }
            }
            other => self.register_type_decl(other),
        }
    }

    fn register_var_decl(&mut self, var: &mut VarDecl) {
        let Some(ty) = self.resolve_type(&mut var.ty) else {
            return;
        };
        self.require_complete(&ty, var.loc);
        for name in &mut var.names {
            if let Some(&existing) = self.env.table.get(&name.name) {
                // defining a variable the interface declared is fine as
                // long as the types agree
                match &self.arena.get(existing).info {
                    SymbolInfo::Var(var_info) if var_info.ty == ty => {
                        name.symbol = Some(existing);
                    }
                    _ => self.error(name.loc, &TypeError::Redeclaration(name.name.clone())),
                }
                continue;
            }
            let id = self.arena.alloc(
                self.env.current_module.clone(),
                name.name.clone(),
                name.loc,
                SymbolInfo::Var(VarInfo {
                    ty: ty.clone(),
                    escapes: false,
                }),
            );
            self.env.table.insert(name.name.clone(), id);
            name.symbol = Some(id);
        }
    }

    fn register_function(
        &mut self,
        return_type: &mut TypeExp,
        params: &mut [Param],
        name: &str,
        loc: Loc,
        defining: bool,
    ) -> Option<(SymbolId, usize)> {
        let ret = self.resolve_type(return_type)?;
        let mut arg_types = Vec::with_capacity(params.len());
        for param in params.iter_mut() {
            let ty = self.resolve_type(&mut param.ty)?;
            self.require_complete(&ty, param.loc);
            if let Some(default) = &mut param.default {
                if let Some(found) = self.check_exp(default) {
                    self.require_convertible(&found, &ty, default.loc);
                }
            }
            arg_types.push(ty);
        }

        let existing = self.env.table.get(name).copied();
        let symbol = match existing {
            Some(id) => match &self.arena.get(id).info {
                SymbolInfo::Function(_) => id,
                _ => {
                    self.error(loc, &TypeError::Conflicting(name.to_owned()));
                    return None;
                }
            },
            None => {
                let id = self.arena.alloc(
                    self.env.current_module.clone(),
                    name.to_owned(),
                    loc,
                    SymbolInfo::Function(FunctionInfo::default()),
                );
                self.env.table.insert(name.to_owned(), id);
                id
            }
        };

        let overloads = &self.arena.function(symbol).overloads;
        if let Some(index) = overloads.iter().position(|o| o.arg_types == arg_types) {
            let overload = &self.arena.function(symbol).overloads[index];
            if overload.return_type != ret {
                self.error(loc, &TypeError::OverloadReturnType(name.to_owned()));
                return None;
            }
            if defining {
                if overload.defined {
                    self.error(loc, &TypeError::Redefinition(name.to_owned()));
                    return None;
                }
                self.arena.function_mut(symbol).overloads[index].defined = true;
            }
            Some((symbol, index))
        } else {
            self.arena.function_mut(symbol).overloads.push(Overload {
                arg_types,
                return_type: ret,
                defined: defining,
            });
            let index = self.arena.function(symbol).overloads.len() - 1;
            Some((symbol, index))
        }
    }

    fn register_type_decl(&mut self, decl: &mut Decl) {
        match decl {
            Decl::Opaque(opaque) => {
                if let Some(&id) = self.env.table.get(&opaque.name) {
                    match &self.arena.get(id).info {
                        SymbolInfo::Type(_) => opaque.symbol = Some(id),
                        _ => self.error(opaque.loc, &TypeError::Conflicting(opaque.name.clone())),
                    }
                    return;
                }
                let id = self.alloc_type(&opaque.name, opaque.loc, TypeDef::Opaque);
                opaque.symbol = Some(id);
            }
            Decl::Struct(decl) => {
                let fields = if decl.forward {
                    None
                } else {
                    Some(self.resolve_fields(&mut decl.fields))
                };
                decl.symbol = self.define_aggregate(&decl.name, decl.loc, fields, false);
            }
            Decl::Union(decl) => {
                let options = if decl.forward {
                    None
                } else {
                    Some(self.resolve_fields(&mut decl.options))
                };
                decl.symbol = self.define_aggregate(&decl.name, decl.loc, options, true);
            }
            Decl::Enum(decl) => {
                decl.symbol = self.define_enum(decl.forward, &decl.name, decl.loc, &mut decl.constants);
            }
            Decl::Typedef(decl) => {
                if self.env.table.contains_key(&decl.name) {
                    self.error(decl.loc, &TypeError::Redeclaration(decl.name.clone()));
                    return;
                }
                let target = self.resolve_type(&mut decl.target);
                let id = self.alloc_type(&decl.name, decl.loc, TypeDef::Typedef { target });
                decl.symbol = Some(id);
            }
            Decl::Var(_) | Decl::Fun(_) | Decl::Function(_) => {
                crate::internal_error!("not a type declaration")
            }
        }
    }

    fn alloc_type(&mut self, name: &str, loc: Loc, def: TypeDef) -> SymbolId {
        let id = self.arena.alloc(
            self.env.current_module.clone(),
            name.to_owned(),
            loc,
            SymbolInfo::Type(def),
        );
        self.env.table.insert(name.to_owned(), id);
        id
    }

    fn resolve_fields(&mut self, fields: &mut [FieldDecl]) -> Vec<(String, Type)> {
        let mut resolved = Vec::new();
        for field in fields.iter_mut() {
            let Some(ty) = self.resolve_type(&mut field.ty) else {
                continue;
            };
            for (name, loc) in &field.names {
                self.require_complete(&ty, *loc);
                if resolved.iter().any(|(n, _)| n == name) {
                    self.error(*loc, &TypeError::Redeclaration(name.clone()));
                    continue;
                }
                resolved.push((name.clone(), ty.clone()));
            }
        }
        resolved
    }

    /// Creates or completes a struct/union entry; completing twice is a
    /// redefinition.
    fn define_aggregate(
        &mut self,
        name: &str,
        loc: Loc,
        fields: Option<Vec<(String, Type)>>,
        is_union: bool,
    ) -> Option<SymbolId> {
        let make = |fields: Vec<(String, Type)>, complete| {
            if is_union {
                TypeDef::Union {
                    options: fields,
                    complete,
                }
            } else {
                TypeDef::Struct {
                    fields,
                    complete,
                }
            }
        };

        if let Some(&id) = self.env.table.get(name) {
            let SymbolInfo::Type(def) = &self.arena.get(id).info else {
                self.error(loc, &TypeError::Conflicting(name.to_owned()));
                return None;
            };
            match fields {
                None => Some(id), // repeated forward declaration
                Some(resolved) => {
                    if def.is_complete() {
                        self.error(loc, &TypeError::Redefinition(name.to_owned()));
                        return None;
                    }
                    *self.arena.type_def_mut(id) = make(resolved, true);
                    Some(id)
                }
            }
        } else {
            let def = match fields {
                Some(resolved) => make(resolved, true),
                None => make(Vec::new(), false),
            };
            Some(self.alloc_type(name, loc, def))
        }
    }

    fn define_enum(
        &mut self,
        forward: bool,
        name: &str,
        loc: Loc,
        constants: &mut [EnumConstant],
    ) -> Option<SymbolId> {
        let mut resolved = Vec::new();
        if !forward {
            let mut next = 0i64;
            for constant in constants.iter_mut() {
                let value = match &mut constant.value {
                    None => next,
                    Some(exp) => {
                        self.check_exp(exp);
                        match constant_int(exp) {
                            Some(v) => v,
                            None => {
                                self.error(exp.loc, &TypeError::EnumValueNotConstant);
                                next
                            }
                        }
                    }
                };
                resolved.push((constant.name.clone(), value));
                next = value + 1;
            }
        }

        if let Some(&id) = self.env.table.get(name) {
            let SymbolInfo::Type(def) = &self.arena.get(id).info else {
                self.error(loc, &TypeError::Conflicting(name.to_owned()));
                return None;
            };
            if forward {
                return Some(id);
            }
            if def.is_complete() {
                self.error(loc, &TypeError::Redefinition(name.to_owned()));
                return None;
            }
            *self.arena.type_def_mut(id) = TypeDef::Enum {
                constants: resolved,
                complete: true,
            };
            Some(id)
        } else {
            Some(self.alloc_type(
                name,
                loc,
                TypeDef::Enum {
                    constants: resolved,
                    complete: !forward,
                },
            ))
        }
    }

    // ---- type resolution ----

    fn resolve_type(&mut self, te: &mut TypeExp) -> Option<Type> {
        let loc = te.loc;
        match &mut te.kind {
            TypeExpKind::Keyword(k) => Some(Type::keyword(*k)),
            TypeExpKind::Qualified {
                constant,
                volatile,
                base,
            } => {
                let (c, v) = (*constant, *volatile);
                let base = self.resolve_type(base)?;
                Some(Type::qualified(base, c, v))
            }
            TypeExpKind::Pointer(base) => Some(Type::pointer(self.resolve_type(base)?)),
            TypeExpKind::Array { base, length } => {
                let elem = self.resolve_type(base)?;
                self.check_exp(length);
                let Some(value) = constant_int(length) else {
                    self.error(loc, &TypeError::ArraySizeNotConstant);
                    return None;
                };
                if value < 0 {
                    self.error(loc, &TypeError::NegativeArraySize);
                    return None;
                }
                Some(Type::array(value as u64, elem))
            }
            TypeExpKind::FunPtr {
                return_type,
                arg_types,
            } => {
                let ret = self.resolve_type(return_type)?;
                let mut args = Vec::with_capacity(arg_types.len());
                for arg in arg_types {
                    args.push(self.resolve_type(arg)?);
                }
                Some(Type::fun_ptr(ret, args))
            }
            TypeExpKind::Named(name) => {
                let spelled = name.to_string();
                let parts = name.parts.clone();
                match self.env.lookup(&parts, self.modules, self.arena) {
                    Lookup::Found(id) => match &self.arena.get(id).info {
                        SymbolInfo::Type(_) => Some(Type::reference(id, spelled)),
                        _ => {
                            self.error(loc, &TypeError::NotAType(spelled));
                            None
                        }
                    },
                    Lookup::Ambiguous(candidates) => {
                        self.ambiguous(loc, &spelled, &candidates);
                        None
                    }
                    Lookup::UnknownModule(module) => {
                        self.error(loc, &TypeError::UnknownModule(module));
                        None
                    }
                    _ => {
                        self.error(loc, &TypeError::Undefined(spelled));
                        None
                    }
                }
            }
        }
    }

    fn ambiguous(&mut self, loc: Loc, name: &str, candidates: &[String]) {
        self.error(loc, &TypeError::Ambiguous(name.to_owned()));
        for candidate in candidates {
            self.report.note(format!("candidate module: {candidate}"));
        }
        self.entry.errored = true;
    }

    fn require_complete(&mut self, ty: &Type, loc: Loc) {
        if let Type::Reference { entry, id } = ty.unqualified().canonical(self.arena) {
            let (entry, id) = (*entry, id.clone());
            if !self.arena.type_def(entry).is_complete() {
                self.error(loc, &TypeError::IncompleteType(id));
            }
        }
    }

    fn require_convertible(&mut self, from: &Type, to: &Type, loc: Loc) -> bool {
        if from.implicitly_convertible(to, self.arena) {
            true
        } else {
            self.error(
                loc,
                &TypeError::NotConvertible {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            );
            false
        }
    }

    // ---- bodies (pass 2) ----

    fn check_body(&mut self, body: &mut Decl) {
        match body {
            Decl::Var(var) => self.check_global_var(var),
            Decl::Function(fun) => self.check_function(fun),
            _ => {}
        }
    }

    fn check_global_var(&mut self, var: &mut VarDecl) {
        for name in &mut var.names {
            let Some(symbol) = name.symbol else { continue };
            let declared = self.arena.var(symbol).ty.clone();
            if let Some(init) = &mut name.init {
                let Some(found) = self.check_exp(init) else {
                    continue;
                };
                self.require_convertible(&found, &declared, init.loc);
                if !is_constant_init(init) {
                    self.error(init.loc, &TypeError::NonConstantGlobalInit);
                }
            }
        }
    }

    fn check_function(&mut self, fun: &mut Function) {
        let Some(symbol) = fun.symbol else { return };
        let overload = fun.overload.expect("decorated together with symbol");
        let info = &self.arena.function(symbol).overloads[overload];
        let return_type = info.return_type.clone();
        let arg_types = info.arg_types.clone();

        self.return_type = Some(return_type.clone());
        self.env.push_scope();
        for (index, param) in fun.params.iter_mut().enumerate() {
            let Some(name) = param.name.clone() else {
                self.error(param.loc, &TypeError::UnnamedParam(index + 1));
                continue;
            };
            let id = self.arena.alloc(
                self.env.current_module.clone(),
                name.clone(),
                param.loc,
                SymbolInfo::Var(VarInfo {
                    ty: arg_types[index].clone(),
                    escapes: false,
                }),
            );
            if self.env.declare_local(&name, id).is_some() {
                self.error(param.loc, &TypeError::Redeclaration(name.clone()));
            }
            param.symbol = Some(id);
        }
        for item in &mut fun.body.items {
            self.check_stmt(item);
        }
        self.env.pop_scope();
        self.return_type = None;

        if !return_type.is_void() && !stmts_return(&fun.body.items) {
            self.error(fun.loc, &TypeError::MissingReturn(fun.name.clone()));
        }
    }

    // ---- statements ----

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Compound(block) => {
                self.env.push_scope();
                for item in &mut block.items {
                    self.check_stmt(item);
                }
                self.env.pop_scope();
            }
            Stmt::If {
                cond, then, els, ..
            } => {
                self.check_condition(cond);
                self.check_stmt(then);
                if let Some(els) = els {
                    self.check_stmt(els);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.check_condition(cond);
                self.loop_depth += 1;
                self.check_stmt(body);
                self.loop_depth -= 1;
            }
            Stmt::DoWhile { body, cond, .. } => {
                self.loop_depth += 1;
                self.check_stmt(body);
                self.loop_depth -= 1;
                self.check_condition(cond);
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
                ..
            } => {
                self.env.push_scope();
                match init.as_deref_mut() {
                    Some(ForInit::Decl(defn)) => self.check_var_defn(defn),
                    Some(ForInit::Exp(exp)) => {
                        self.check_exp(exp);
                    }
                    None => {}
                }
                if let Some(cond) = cond {
                    self.check_condition(cond);
                }
                if let Some(update) = update {
                    self.check_exp(update);
                }
                self.loop_depth += 1;
                self.check_stmt(body);
                self.loop_depth -= 1;
                self.env.pop_scope();
            }
            Stmt::Switch { cond, cases, loc } => {
                if let Some(found) = self.check_exp(cond) {
                    if !found.is_integral(self.arena) && !found.is_enum(self.arena) {
                        self.error(
                            *loc,
                            &TypeError::BadOperand {
                                op: "switch",
                                ty: found.to_string(),
                            },
                        );
                    }
                }
                let mut seen = Vec::new();
                self.switch_depth += 1;
                for case in cases.iter_mut() {
                    for value in &mut case.values {
                        self.check_exp(value);
                        match constant_int(value) {
                            Some(v) => {
                                if seen.contains(&v) {
                                    self.error(value.loc, &TypeError::DuplicateCase(v));
                                } else {
                                    seen.push(v);
                                }
                            }
                            None => self.error(value.loc, &TypeError::CaseNotConstant),
                        }
                    }
                    self.env.push_scope();
                    for item in &mut case.body {
                        self.check_stmt(item);
                    }
                    self.env.pop_scope();
                }
                self.switch_depth -= 1;
            }
            Stmt::Break(loc) => {
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    let loc = *loc;
                    self.error(loc, &TypeError::BreakOutside);
                }
            }
            Stmt::Continue(loc) => {
                if self.loop_depth == 0 {
                    let loc = *loc;
                    self.error(loc, &TypeError::ContinueOutside);
                }
            }
            Stmt::Return { value, loc } => {
                let expected = self
                    .return_type
                    .clone()
                    .unwrap_or_else(|| crate::internal_error!("return outside a function"));
                match value {
                    Some(exp) => {
                        if expected.is_void() {
                            let loc = *loc;
                            self.error(loc, &TypeError::ReturnValueInVoid);
                        } else if let Some(found) = self.check_exp(exp) {
                            self.require_convertible(&found, &expected, exp.loc);
                        }
                    }
                    None => {
                        if !expected.is_void() {
                            let loc = *loc;
                            self.error(loc, &TypeError::ReturnMissingValue);
                        }
                    }
                }
            }
            Stmt::Asm { .. } | Stmt::Null(_) => {}
            Stmt::VarDefn(defn) => self.check_var_defn(defn),
            Stmt::TypeDecl(decl) => self.register_type_decl(decl),
            Stmt::Expression(exp) => {
                self.check_exp(exp);
            }
        }
    }

    fn check_var_defn(&mut self, defn: &mut VarDefnStmt) {
        let Some(ty) = self.resolve_type(&mut defn.ty) else {
            return;
        };
        self.require_complete(&ty, defn.loc);
        for name in &mut defn.names {
            if let Some(init) = &mut name.init {
                if let Some(found) = self.check_exp(init) {
                    self.require_convertible(&found, &ty, init.loc);
                }
            }
            let id = self.arena.alloc(
                self.env.current_module.clone(),
                name.name.clone(),
                name.loc,
                SymbolInfo::Var(VarInfo {
                    ty: ty.clone(),
                    escapes: false,
                }),
            );
            if self.env.declare_local(&name.name, id).is_some() {
                self.error(name.loc, &TypeError::Redeclaration(name.name.clone()));
            }
            name.symbol = Some(id);
        }
    }

    fn check_condition(&mut self, cond: &mut Exp) {
        let Some(found) = self.check_exp(cond) else {
            return;
        };
        let bool_ty = Type::keyword(TypeKeyword::Bool);
        if !found.implicitly_convertible(&bool_ty, self.arena) {
            self.error(cond.loc, &TypeError::NotBool(found.to_string()));
        }
    }

    // ---- expressions ----

    /// Computes and stores the expression's result type. `None` means an
    /// error was already reported somewhere inside.
    fn check_exp(&mut self, exp: &mut Exp) -> Option<Type> {
        let loc = exp.loc;
        let mut fold = None;
        let ty = match &mut exp.kind {
            ExpKind::Const(c) => Some(c.get_type()),
            ExpKind::Id(id) => match self.check_id(id, loc) {
                Some((ty, rewrite)) => {
                    fold = rewrite;
                    Some(ty)
                }
                None => None,
            },
            ExpKind::Seq(first, last) => {
                self.check_exp(first);
                self.check_exp(last)
            }
            ExpKind::BinOp { op, lhs, rhs } => {
                let op = *op;
                self.check_binop(op, lhs, rhs, loc)
            }
            ExpKind::UnOp { op, target } => {
                let op = *op;
                self.check_unop(op, target, loc)
            }
            ExpKind::CompOp { lhs, rhs, .. } => {
                let l = self.check_exp(lhs);
                let r = self.check_exp(rhs);
                let (l, r) = (l?, r?);
                if self.comparable(&l, &r) {
                    Some(Type::keyword(TypeKeyword::Bool))
                } else {
                    self.error(
                        loc,
                        &TypeError::BadOperands {
                            op: "a comparison",
                            lhs: l.to_string(),
                            rhs: r.to_string(),
                        },
                    );
                    None
                }
            }
            ExpKind::LAnd(lhs, rhs) | ExpKind::LOr(lhs, rhs) => {
                self.check_condition(lhs);
                self.check_condition(rhs);
                Some(Type::keyword(TypeKeyword::Bool))
            }
            ExpKind::LAndAssign { target, value } | ExpKind::LOrAssign { target, value } => {
                let t = self.check_exp(target)?;
                self.check_assignable(target, loc);
                if !t.is_bool(self.arena) {
                    self.error(
                        loc,
                        &TypeError::BadOperand {
                            op: "a logical assignment",
                            ty: t.to_string(),
                        },
                    );
                }
                self.check_condition(value);
                Some(Type::keyword(TypeKeyword::Bool))
            }
            ExpKind::Ternary { cond, then, els } => {
                self.check_condition(cond);
                let t = self.check_exp(then);
                let e = self.check_exp(els);
                let (t, e) = (t?, e?);
                self.conditional_common(&t, &e, loc)
            }
            ExpKind::StructAccess { base, field } => {
                let field = field.clone();
                let base_ty = self.check_exp(base)?;
                self.field_type(&base_ty, &field, loc, false)
            }
            ExpKind::StructPtrAccess { base, field } => {
                let field = field.clone();
                let base_ty = self.check_exp(base)?;
                self.field_type(&base_ty, &field, loc, true)
            }
            ExpKind::FnCall { function, args } => self.check_call(function, args, loc),
            ExpKind::AggregateInit(elements) => {
                let mut types = Vec::with_capacity(elements.len());
                for element in elements.iter_mut() {
                    types.push(self.check_exp(element)?);
                }
                Some(Type::Aggregate(types))
            }
            ExpKind::Cast { to, target } => {
                let to = self.resolve_type(to)?;
                let from = self.check_exp(target)?;
                if self.castable(&from, &to) {
                    Some(to)
                } else {
                    self.error(
                        loc,
                        &TypeError::BadCast {
                            from: from.to_string(),
                            to: to.to_string(),
                        },
                    );
                    None
                }
            }
            ExpKind::SizeofType(te) => {
                if let Some(ty) = self.resolve_type(te) {
                    self.require_complete(&ty, loc);
                    if is_complete(&ty, self.arena) {
                        fold = Some(Constant::Ulong(ty.size_of(self.arena)));
                    }
                }
                Some(Type::keyword(TypeKeyword::Ulong))
            }
            ExpKind::SizeofExp(target) => {
                // type-checked but never evaluated
                if let Some(ty) = self.check_exp(target) {
                    self.require_complete(&ty, loc);
                    if is_complete(&ty, self.arena) {
                        fold = Some(Constant::Ulong(ty.size_of(self.arena)));
                    }
                }
                Some(Type::keyword(TypeKeyword::Ulong))
            }
        };
        if let Some(constant) = fold {
            exp.kind = ExpKind::Const(constant);
        }
        if let Some(t) = &ty {
            exp.result_type = Some(t.clone());
        }
        ty
    }

    /// Resolves an identifier use. The second component asks the caller to
    /// rewrite the node into a constant (enum constants fold in place).
    fn check_id(&mut self, id: &mut IdExp, loc: Loc) -> Option<(Type, Option<Constant>)> {
        let spelled = id.name.to_string();
        match self.env.lookup(&id.name.parts, self.modules, self.arena) {
            Lookup::Found(symbol) => match &self.arena.get(symbol).info {
                SymbolInfo::Var(var) => {
                    id.symbol = Some(symbol);
                    Some((var.ty.clone(), None))
                }
                SymbolInfo::Function(info) => {
                    if info.overloads.len() != 1 {
                        self.error(loc, &TypeError::OverloadedReference(spelled));
                        return None;
                    }
                    id.symbol = Some(symbol);
                    id.overload = Some(0);
                    let overload = &self.arena.function(symbol).overloads[0];
                    Some((
                        Type::fun_ptr(overload.return_type.clone(), overload.arg_types.clone()),
                        None,
                    ))
                }
                SymbolInfo::Type(_) => {
                    self.error(loc, &TypeError::TypeAsValue(spelled));
                    None
                }
            },
            Lookup::EnumConstant { entry, index } => {
                id.symbol = Some(entry);
                let TypeDef::Enum { constants, .. } = self.arena.type_def(entry) else {
                    crate::internal_error!("enum constant lookup outside an enum");
                };
                let value = constants[index].1;
                let name = self.arena.get(entry).name.clone();
                Some((
                    Type::reference(entry, name),
                    Some(Constant::Int(value as i32)),
                ))
            }
            Lookup::Ambiguous(candidates) => {
                self.ambiguous(loc, &spelled, &candidates);
                None
            }
            Lookup::UnknownModule(module) => {
                self.error(loc, &TypeError::UnknownModule(module));
                None
            }
            Lookup::NotFound => {
                self.error(loc, &TypeError::Undefined(spelled));
                None
            }
        }
    }

    fn check_binop(&mut self, op: BinOp, lhs: &mut Exp, rhs: &mut Exp, loc: Loc) -> Option<Type> {
        if op == BinOp::Assign {
            let target = self.check_exp(lhs)?;
            let value = self.check_exp(rhs)?;
            self.check_assignable(lhs, loc);
            self.require_convertible(&value, &target, loc);
            return Some(target);
        }
        if let Some(base) = op.compound_base() {
            let target = self.check_exp(lhs)?;
            let value = self.check_exp(rhs)?;
            self.check_assignable(lhs, loc);
            self.binop_result(base, &target, &value, loc)?;
            return Some(target);
        }
        if op == BinOp::ArrayAccess {
            let base = self.check_exp(lhs)?;
            let index = self.check_exp(rhs)?;
            if !index.is_integral(self.arena) {
                self.error(
                    loc,
                    &TypeError::BadOperand {
                        op: "an array subscript",
                        ty: index.to_string(),
                    },
                );
            }
            return match base.stripped(self.arena).clone() {
                Type::Array { elem, .. } => Some(propagate_const(&base, *elem)),
                Type::Pointer(pointee) => Some(*pointee),
                other => {
                    self.error(
                        loc,
                        &TypeError::BadOperand {
                            op: "an array subscript",
                            ty: other.to_string(),
                        },
                    );
                    None
                }
            };
        }

        let l = self.check_exp(lhs);
        let r = self.check_exp(rhs);
        self.binop_result(op, &l?, &r?, loc)
    }

    /// Result type of a non-assigning binary operator.
    fn binop_result(&mut self, op: BinOp, l: &Type, r: &Type, loc: Loc) -> Option<Type> {
        let bad = |checker: &mut Self| {
            checker.error(
                loc,
                &TypeError::BadOperands {
                    op: binop_name(op),
                    lhs: l.to_string(),
                    rhs: r.to_string(),
                },
            );
            None
        };

        match op {
            BinOp::Add | BinOp::Sub => {
                // pointer arithmetic steps by the pointee size
                if l.is_pointer(self.arena) && r.is_integral(self.arena) {
                    return Some(l.unqualified().clone());
                }
                if op == BinOp::Sub && l.is_pointer(self.arena) && r.is_pointer(self.arena) {
                    return Some(Type::keyword(TypeKeyword::Long));
                }
                if self.is_arithmetic(l) && self.is_arithmetic(r) {
                    return self.common_arithmetic(l, r).or_else(|| bad(self));
                }
                bad(self)
            }
            BinOp::Mul | BinOp::Div => {
                if self.is_arithmetic(l) && self.is_arithmetic(r) {
                    return self.common_arithmetic(l, r).or_else(|| bad(self));
                }
                bad(self)
            }
            BinOp::Mod | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                if l.is_integral(self.arena) && r.is_integral(self.arena) {
                    return self.common_arithmetic(l, r).or_else(|| bad(self));
                }
                bad(self)
            }
            BinOp::LShift | BinOp::LRShift | BinOp::ARShift => {
                // the result keeps the left operand's (promoted) type
                if l.is_integral(self.arena) && r.is_integral(self.arena) {
                    return Some(l.unqualified().clone());
                }
                bad(self)
            }
            BinOp::Spaceship => {
                if self.comparable(l, r) {
                    return Some(Type::keyword(TypeKeyword::Int));
                }
                bad(self)
            }
            _ => crate::internal_error!("{op:?} handled elsewhere"),
        }
    }

    fn check_unop(&mut self, op: UnOp, target: &mut Exp, loc: Loc) -> Option<Type> {
        let ty = self.check_exp(target)?;
        match op {
            UnOp::Deref => match ty.stripped(self.arena).clone() {
                Type::Pointer(pointee) => Some(*pointee),
                other => {
                    self.error(
                        loc,
                        &TypeError::BadOperand {
                            op: "a dereference",
                            ty: other.to_string(),
                        },
                    );
                    None
                }
            },
            UnOp::AddrOf => {
                if !target.is_lvalue() {
                    self.error(loc, &TypeError::NotLvalue);
                    return None;
                }
                self.mark_escaping(target);
                Some(Type::pointer(ty))
            }
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                self.check_assignable(target, loc);
                if self.is_arithmetic(&ty) || ty.is_pointer(self.arena) {
                    Some(ty.unqualified().clone())
                } else {
                    self.error(
                        loc,
                        &TypeError::BadOperand {
                            op: "an increment",
                            ty: ty.to_string(),
                        },
                    );
                    None
                }
            }
            UnOp::Plus | UnOp::Neg => {
                if self.is_arithmetic(&ty) {
                    Some(ty.unqualified().clone())
                } else {
                    self.error(
                        loc,
                        &TypeError::BadOperand {
                            op: "a sign",
                            ty: ty.to_string(),
                        },
                    );
                    None
                }
            }
            UnOp::LNot => {
                if ty.is_bool(self.arena) {
                    Some(Type::keyword(TypeKeyword::Bool))
                } else {
                    self.error(loc, &TypeError::NotBool(ty.to_string()));
                    None
                }
            }
            UnOp::BitNot => {
                if ty.is_integral(self.arena) {
                    Some(ty.unqualified().clone())
                } else {
                    self.error(
                        loc,
                        &TypeError::BadOperand {
                            op: "a bitwise complement",
                            ty: ty.to_string(),
                        },
                    );
                    None
                }
            }
        }
    }

    fn check_call(&mut self, function: &mut Exp, args: &mut [Exp], loc: Loc) -> Option<Type> {
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            arg_types.push(self.check_exp(arg)?);
        }

        // a named function goes through overload resolution
        if let ExpKind::Id(id) = &mut function.kind {
            let spelled = id.name.to_string();
            let lookup = self.env.lookup(&id.name.parts, self.modules, self.arena);
            if let Lookup::Found(symbol) = lookup {
                if let SymbolInfo::Function(info) = &self.arena.get(symbol).info {
                    let info = info.clone();
                    let index = self.resolve_overload(&info, &arg_types, &spelled, loc)?;
                    id.symbol = Some(symbol);
                    id.overload = Some(index);
                    let overload = &self.arena.function(symbol).overloads[index];
                    let fn_type =
                        Type::fun_ptr(overload.return_type.clone(), overload.arg_types.clone());
                    let return_type = overload.return_type.clone();
                    function.result_type = Some(fn_type);
                    return Some(return_type);
                }
            }
        }

        // otherwise an arbitrary callee of function-pointer type
        let fn_type = self.check_exp(function)?;
        match fn_type.stripped(self.arena).clone() {
            Type::FunPtr {
                return_type,
                arg_types: expected,
            } => {
                if expected.len() != arg_types.len() {
                    self.error(
                        loc,
                        &TypeError::ArgCount {
                            expected: expected.len(),
                            got: arg_types.len(),
                        },
                    );
                    return None;
                }
                for (found, want) in arg_types.iter().zip(expected.iter()) {
                    self.require_convertible(found, want, loc);
                }
                Some(*return_type)
            }
            other => {
                self.error(loc, &TypeError::NotCallable(other.to_string()));
                None
            }
        }
    }

    /// Overload selection: viable candidates match in arity and implicit
    /// convertibility; the candidate with the most exact matches wins, a
    /// tie is ambiguous.
    fn resolve_overload(
        &mut self,
        info: &FunctionInfo,
        arg_types: &[Type],
        name: &str,
        loc: Loc,
    ) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        let mut tied = false;
        for (index, overload) in info.overloads.iter().enumerate() {
            if overload.arg_types.len() != arg_types.len() {
                continue;
            }
            let viable = overload
                .arg_types
                .iter()
                .zip(arg_types.iter())
                .all(|(want, found)| found.implicitly_convertible(want, self.arena));
            if !viable {
                continue;
            }
            let exact = overload
                .arg_types
                .iter()
                .zip(arg_types.iter())
                .filter(|(want, found)| want == found)
                .count();
            match best {
                Some((_, best_exact)) if exact < best_exact => {}
                Some((_, best_exact)) if exact == best_exact => tied = true,
                _ => {
                    best = Some((index, exact));
                    tied = false;
                }
            }
        }

        match best {
            None => {
                let args = arg_types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                self.error(
                    loc,
                    &TypeError::NoViableOverload {
                        name: name.to_owned(),
                        args,
                    },
                );
                None
            }
            Some(_) if tied => {
                self.error(loc, &TypeError::AmbiguousCall(name.to_owned()));
                None
            }
            Some((index, _)) => Some(index),
        }
    }

    // ---- helpers ----

    fn check_assignable(&mut self, target: &Exp, loc: Loc) {
        if !target.is_lvalue() {
            self.error(loc, &TypeError::NotLvalue);
            return;
        }
        if let Some(ty) = &target.result_type {
            if ty.is_const() {
                let rendered = ty.to_string();
                self.error(loc, &TypeError::ConstViolation(rendered));
            }
        }
    }

    /// Taking the address of a local forces it onto the stack.
    fn mark_escaping(&mut self, target: &Exp) {
        if let ExpKind::Id(id) = &target.kind {
            if let Some(symbol) = id.symbol {
                if matches!(self.arena.get(symbol).info, SymbolInfo::Var(_)) {
                    self.arena.var_mut(symbol).escapes = true;
                }
            }
        }
    }

    fn is_arithmetic(&self, ty: &Type) -> bool {
        ty.is_integral(self.arena) || ty.is_floating(self.arena) || ty.is_enum(self.arena)
    }

    fn comparable(&self, l: &Type, r: &Type) -> bool {
        if self.is_arithmetic(l) && self.is_arithmetic(r) {
            return true;
        }
        if l.is_pointer(self.arena) && r.is_pointer(self.arena) {
            return l.implicitly_convertible(r, self.arena)
                || r.implicitly_convertible(l, self.arena);
        }
        l.is_bool(self.arena) && r.is_bool(self.arena)
    }

    fn common_arithmetic(&self, l: &Type, r: &Type) -> Option<Type> {
        crate::types::usual_arithmetic(l, r, self.arena)
    }

    fn conditional_common(&mut self, t: &Type, e: &Type, loc: Loc) -> Option<Type> {
        if t == e {
            return Some(t.clone());
        }
        if self.is_arithmetic(t) && self.is_arithmetic(e) {
            return self.common_arithmetic(t, e);
        }
        if t.implicitly_convertible(e, self.arena) {
            return Some(e.clone());
        }
        if e.implicitly_convertible(t, self.arena) {
            return Some(t.clone());
        }
        self.error(
            loc,
            &TypeError::BadOperands {
                op: "a conditional expression",
                lhs: t.to_string(),
                rhs: e.to_string(),
            },
        );
        None
    }

    fn field_type(
        &mut self,
        base: &Type,
        field: &str,
        loc: Loc,
        through_pointer: bool,
    ) -> Option<Type> {
        let mut target = base.clone();
        if through_pointer {
            match target.stripped(self.arena).clone() {
                Type::Pointer(pointee) => target = *pointee,
                other => {
                    self.error(loc, &TypeError::NotAStruct(other.to_string()));
                    return None;
                }
            }
        }
        let entry = match target.unqualified().canonical(self.arena) {
            Type::Reference { entry, .. } => *entry,
            other => {
                self.error(loc, &TypeError::NotAStruct(other.to_string()));
                return None;
            }
        };
        let fields = match self.arena.type_def(entry) {
            TypeDef::Struct { fields, complete } if *complete => fields,
            TypeDef::Union { options, complete } if *complete => options,
            TypeDef::Struct { .. } | TypeDef::Union { .. } | TypeDef::Opaque => {
                let name = self.arena.get(entry).name.clone();
                self.error(loc, &TypeError::IncompleteType(name));
                return None;
            }
            _ => {
                self.error(loc, &TypeError::NotAStruct(target.to_string()));
                return None;
            }
        };
        match fields.iter().find(|(n, _)| n == field) {
            Some((_, ty)) => Some(propagate_const(&target, ty.clone())),
            None => {
                let ty_name = self.arena.get(entry).name.clone();
                self.error(
                    loc,
                    &TypeError::NoSuchField {
                        field: field.to_owned(),
                        ty: ty_name,
                    },
                );
                None
            }
        }
    }

    /// Explicit `cast[T]` legality: scalars cast among each other freely;
    /// memory-shaped values only decay or keep their type.
    fn castable(&self, from: &Type, to: &Type) -> bool {
        if from.implicitly_convertible(to, self.arena) {
            return true;
        }
        let scalar = |t: &Type| {
            t.is_integral(self.arena)
                || t.is_floating(self.arena)
                || t.is_pointer(self.arena)
                || t.is_enum(self.arena)
                || t.is_bool(self.arena)
                || matches!(t.stripped(self.arena), Type::FunPtr { .. })
        };
        scalar(from) && scalar(to)
    }
}

/// Keeps outer constness visible on member and element accesses.
fn propagate_const(base: &Type, field: Type) -> Type {
    if base.is_const() && !field.is_const() {
        Type::qualified(field, true, false)
    } else {
        field
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "'+'",
        BinOp::Sub => "'-'",
        BinOp::Mul => "'*'",
        BinOp::Div => "'/'",
        BinOp::Mod => "'%'",
        BinOp::BitAnd => "'&'",
        BinOp::BitOr => "'|'",
        BinOp::BitXor => "'^'",
        BinOp::LShift => "'<<'",
        BinOp::LRShift => "'>>'",
        BinOp::ARShift => "'>>>'",
        BinOp::Spaceship => "'<=>'",
        _ => "an operator",
    }
}

fn is_complete(ty: &Type, arena: &SymbolArena) -> bool {
    match ty.unqualified().canonical(arena) {
        Type::Reference { entry, .. } => arena.type_def(*entry).is_complete(),
        _ => true,
    }
}

/// A checked expression that folded to an integer constant.
fn constant_int(exp: &Exp) -> Option<i64> {
    match &exp.kind {
        ExpKind::Const(c) => c.int_value(),
        _ => None,
    }
}

/// Global initializers must be data: literals or aggregates of them.
fn is_constant_init(exp: &Exp) -> bool {
    match &exp.kind {
        ExpKind::Const(_) => true,
        ExpKind::AggregateInit(elements) => elements.iter().all(is_constant_init),
        _ => false,
    }
}

/// Conservative does-this-always-return analysis for the missing-return
/// diagnostic.
fn stmts_return(items: &[Stmt]) -> bool {
    items.last().is_some_and(stmt_returns)
}

fn stmt_returns(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return { .. } => true,
        Stmt::Compound(block) => stmts_return(&block.items),
        Stmt::If {
            then,
            els: Some(els),
            ..
        } => stmt_returns(then) && stmt_returns(els),
        Stmt::Switch { cases, .. } => {
            cases.iter().any(|c| c.is_default) && cases.iter().all(|c| stmts_return(&c.body))
        }
        _ => false,
    }
}
