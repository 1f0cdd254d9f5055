//! Symbol tables, the symbol arena and the lookup environment.
//!
//! Symbols live in a compilation-wide arena and are referred to by stable
//! [`SymbolId`] indices; a [`Type::Reference`](crate::types::Type) stores the
//! arena index of its entry, which breaks the ownership cycle between
//! mutually recursive types and gives nominal identity for free.
//!
//! Name lookup goes inner scope to outer scope, then the current module,
//! then imports - where a name found in two imported modules at once is an
//! ambiguity, reported with the candidate modules.

use crate::types::Type;
use crate::{internal_error, files::Loc};

use std::collections::{HashMap, HashSet};

/// Stable index of a symbol in the [`SymbolArena`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SymbolId(u32);

/// A named entity: where it was declared and what it is.
#[derive(Debug)]
pub struct Symbol {
    pub module: String,
    pub name: String,
    pub loc: Loc,
    pub info: SymbolInfo,
}

#[derive(Debug)]
pub enum SymbolInfo {
    Var(VarInfo),
    Function(FunctionInfo),
    Type(TypeDef),
}

#[derive(Debug)]
pub struct VarInfo {
    pub ty: Type,
    /// true once the variable's address has been taken; escaping locals are
    /// given stack storage instead of a register temp
    pub escapes: bool,
}

#[derive(Debug, Default, Clone)]
pub struct FunctionInfo {
    pub overloads: Vec<Overload>,
}

/// One element of an overload set, distinguished by argument types.
#[derive(Debug, Clone)]
pub struct Overload {
    pub arg_types: Vec<Type>,
    pub return_type: Type,
    pub defined: bool,
}

#[derive(Debug)]
pub enum TypeDef {
    Struct {
        fields: Vec<(String, Type)>,
        complete: bool,
    },
    Union {
        options: Vec<(String, Type)>,
        complete: bool,
    },
    Enum {
        constants: Vec<(String, i64)>,
        complete: bool,
    },
    Typedef {
        target: Option<Type>,
    },
    /// `opaque T;` - a name whose definition lives in another module
    Opaque,
}

impl TypeDef {
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Struct { complete, .. }
            | Self::Union { complete, .. }
            | Self::Enum { complete, .. } => *complete,
            Self::Typedef { target } => target.is_some(),
            Self::Opaque => false,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Struct { .. } => "a struct",
            Self::Union { .. } => "a union",
            Self::Enum { .. } => "an enumeration",
            Self::Typedef { .. } => "a type alias",
            Self::Opaque => "an opaque type",
        }
    }
}

/// Owner of every symbol in the compilation.
#[derive(Debug, Default)]
pub struct SymbolArena {
    symbols: Vec<Symbol>,
}

impl SymbolArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        loc: Loc,
        info: SymbolInfo,
    ) -> SymbolId {
        let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol arena overflow"));
        self.symbols.push(Symbol {
            module: module.into(),
            name: name.into(),
            loc,
            info,
        });
        id
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn type_def(&self, id: SymbolId) -> &TypeDef {
        match &self.get(id).info {
            SymbolInfo::Type(td) => td,
            _ => internal_error!("symbol '{}' is not a type", self.get(id).name),
        }
    }

    pub fn type_def_mut(&mut self, id: SymbolId) -> &mut TypeDef {
        match &mut self.symbols[id.0 as usize].info {
            SymbolInfo::Type(td) => td,
            other => internal_error!("symbol is not a type: {other:?}"),
        }
    }

    pub fn var(&self, id: SymbolId) -> &VarInfo {
        match &self.get(id).info {
            SymbolInfo::Var(v) => v,
            _ => internal_error!("symbol '{}' is not a variable", self.get(id).name),
        }
    }

    pub fn var_mut(&mut self, id: SymbolId) -> &mut VarInfo {
        match &mut self.symbols[id.0 as usize].info {
            SymbolInfo::Var(v) => v,
            other => internal_error!("symbol is not a variable: {other:?}"),
        }
    }

    pub fn function(&self, id: SymbolId) -> &FunctionInfo {
        match &self.get(id).info {
            SymbolInfo::Function(f) => f,
            _ => internal_error!("symbol '{}' is not a function", self.get(id).name),
        }
    }

    pub fn function_mut(&mut self, id: SymbolId) -> &mut FunctionInfo {
        match &mut self.symbols[id.0 as usize].info {
            SymbolInfo::Function(f) => f,
            other => internal_error!("symbol is not a function: {other:?}"),
        }
    }
}

/// Name to symbol mapping of one module's top level.
pub type ModuleTable = HashMap<String, SymbolId>;

/// Every module's table, keyed by module name.
#[derive(Debug, Default)]
pub struct ModuleMap {
    tables: HashMap<String, ModuleTable>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: &str) -> Option<&ModuleTable> {
        self.tables.get(module)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.tables.contains_key(module)
    }

    pub fn insert(&mut self, module: String, table: ModuleTable) {
        self.tables.insert(module, table);
    }
}

/// What a lookup produced.
#[derive(Debug)]
pub enum Lookup {
    Found(SymbolId),
    /// constant `index` of the enumeration `entry`
    EnumConstant { entry: SymbolId, index: usize },
    /// the unqualified name exists in more than one import
    Ambiguous(Vec<String>),
    UnknownModule(String),
    NotFound,
}

/// Lookup context for one file: its module, its imports and the stack of
/// open scopes.
#[derive(Debug)]
pub struct Environment {
    pub current_module: String,
    pub imports: Vec<String>,
    pub table: ModuleTable,
    scopes: Vec<HashMap<String, SymbolId>>,
}

impl Environment {
    pub fn new(current_module: impl Into<String>) -> Self {
        Self {
            current_module: current_module.into(),
            imports: Vec::new(),
            table: ModuleTable::new(),
            scopes: Vec::new(),
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop().expect("scope stack underflow");
    }

    /// Binds a name in the innermost scope, shadowing anything outside it.
    /// Returns the previously bound symbol if the name is already taken in
    /// this same scope.
    pub fn declare_local(&mut self, name: &str, id: SymbolId) -> Option<SymbolId> {
        let scope = self.scopes.last_mut().expect("no open scope");
        scope.insert(name.to_owned(), id)
    }

    /// Resolves a possibly scoped name (`x`, `M::x`, or `M::E::x`).
    pub fn lookup(&self, parts: &[String], modules: &ModuleMap, arena: &SymbolArena) -> Lookup {
        match parts {
            [name] => self.lookup_unscoped(name, modules),
            [module, name] => self.lookup_scoped(module, name, modules, arena),
            [module, enum_name, constant] => {
                let table = if *module == self.current_module {
                    Some(&self.table)
                } else if self.imports.iter().any(|i| i == module) {
                    modules.get(module)
                } else {
                    None
                };
                let Some(table) = table else {
                    return Lookup::UnknownModule(module.clone());
                };
                match table.get(enum_name) {
                    Some(&id) => enum_constant_lookup(id, constant, arena),
                    None => Lookup::NotFound,
                }
            }
            _ => Lookup::NotFound,
        }
    }

    fn lookup_unscoped(&self, name: &str, modules: &ModuleMap) -> Lookup {
        for scope in self.scopes.iter().rev() {
            if let Some(&id) = scope.get(name) {
                return Lookup::Found(id);
            }
        }
        if let Some(&id) = self.table.get(name) {
            return Lookup::Found(id);
        }

        let mut found = None;
        let mut candidates = Vec::new();
        for import in &self.imports {
            let Some(table) = modules.get(import) else {
                continue;
            };
            if let Some(&id) = table.get(name) {
                candidates.push(import.clone());
                found = Some(id);
            }
        }
        match (found, candidates.len()) {
            (Some(id), 1) => Lookup::Found(id),
            (Some(_), _) => Lookup::Ambiguous(candidates),
            (None, _) => Lookup::NotFound,
        }
    }

    fn lookup_scoped(
        &self,
        module: &str,
        name: &str,
        modules: &ModuleMap,
        arena: &SymbolArena,
    ) -> Lookup {
        if module == self.current_module {
            return match self.table.get(name) {
                Some(&id) => Lookup::Found(id),
                None => Lookup::NotFound,
            };
        }
        if self.imports.iter().any(|i| i == module) {
            if let Some(table) = modules.get(module) {
                return match table.get(name) {
                    Some(&id) => Lookup::Found(id),
                    None => Lookup::NotFound,
                };
            }
        }

        // not a module name - maybe an in-scope enum type, `E::CONSTANT`
        match self.lookup_unscoped(module, modules) {
            Lookup::Found(id) if matches!(arena.get(id).info, SymbolInfo::Type(_)) => {
                enum_constant_lookup(id, name, arena)
            }
            Lookup::Ambiguous(candidates) => Lookup::Ambiguous(candidates),
            _ => Lookup::UnknownModule(module.to_owned()),
        }
    }
}

fn enum_constant_lookup(id: SymbolId, constant: &str, arena: &SymbolArena) -> Lookup {
    match &arena.get(id).info {
        SymbolInfo::Type(TypeDef::Enum { constants, .. }) => constants
            .iter()
            .position(|(n, _)| n == constant)
            .map_or(Lookup::NotFound, |index| Lookup::EnumConstant {
                entry: id,
                index,
            }),
        _ => Lookup::NotFound,
    }
}

/// The classifier the lexer consults to tell `ID` from `TYPE_ID`.
///
/// Monotone over a single file's lexing: names are only ever added.
pub trait TypeNameOracle {
    fn is_type_name(&self, name: &str) -> bool;
}

/// The set of identifiers (plain and scoped spellings) currently naming
/// types, maintained by the parser as declarations and imports go by.
#[derive(Debug, Default)]
pub struct TypeNames {
    names: HashSet<String>,
}

impl TypeNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    /// Registers every type of an imported module under both its scoped and
    /// unqualified spelling.
    pub fn import_module(&mut self, module: &str, table: &ModuleTable, arena: &SymbolArena) {
        for (name, &id) in table {
            if matches!(arena.get(id).info, SymbolInfo::Type(_)) {
                self.names.insert(format!("{module}::{name}"));
                self.names.insert(name.clone());
            }
        }
    }
}

impl TypeNameOracle for TypeNames {
    fn is_type_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}
