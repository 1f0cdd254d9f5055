//! The parser.
//!
//! Hand-written recursive descent at declaration and statement level with
//! precedence climbing for expressions. Errors never abort a file: the
//! parser reports, unlexes the offending token, and panics to the next
//! top-level boundary (or, inside braces, to the end of the statement), so
//! one run surfaces as many independent mistakes as possible and still
//! returns a best-effort AST.

mod parse_error;
#[cfg(test)]
mod parser_tests;

use crate::ast::*;
use crate::files::{FileEntry, Loc, Report};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::symtab::{ModuleMap, SymbolArena, TypeNames};
use crate::types::TypeKeyword;
pub use parse_error::ParseError;

use log::debug;

/// Parses one source file. `None` means the module line itself was broken
/// and there is nothing to typecheck; any other error still yields a file.
pub fn parse_file(
    source: &str,
    entry: &mut FileEntry,
    modules: &ModuleMap,
    arena: &SymbolArena,
    report: &mut Report,
) -> Option<File> {
    debug!("parsing {}", entry.display_name());
    let mut parser = Parser {
        lexer: Lexer::new(source),
        filename: entry.display_name(),
        is_code: entry.is_code,
        entry,
        modules,
        arena,
        report,
        types: TypeNames::new(),
    };
    parser.parse_file()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    filename: String,
    is_code: bool,
    entry: &'a mut FileEntry,
    modules: &'a ModuleMap,
    arena: &'a SymbolArena,
    report: &'a mut Report,
    /// grows monotonically while the file is lexed
    types: TypeNames,
}

impl Parser<'_> {
    // ---- token plumbing ----

    fn next(&mut self) -> Token {
        loop {
            match self.lexer.lex(&self.types) {
                Ok(token) => return token,
                Err(err) => {
                    self.report.error(&self.filename, err.loc, &err);
                    self.entry.errored = true;
                }
            }
        }
    }

    fn unlex(&mut self, token: Token) {
        self.lexer.unlex(token);
    }

    fn peek_kind(&mut self) -> TokenKind {
        let token = self.next();
        let kind = token.kind.clone();
        self.unlex(token);
        kind
    }

    fn bump_if(&mut self, kind: &TokenKind) -> bool {
        let token = self.next();
        if token.kind == *kind {
            true
        } else {
            self.unlex(token);
            false
        }
    }

    /// Consumes the expected token or reports, unlexes, and returns None.
    fn expect(&mut self, kind: &TokenKind) -> Option<Token> {
        let token = self.next();
        if token.kind == *kind {
            Some(token)
        } else {
            self.error_expected(kind.describe(), &token);
            self.unlex(token);
            None
        }
    }

    fn error_expected(&mut self, expected: impl Into<String>, found: &Token) {
        let err = ParseError::expected(expected, found.kind.describe());
        self.error(found.loc, &err);
    }

    fn error(&mut self, loc: Loc, err: &ParseError) {
        self.report.error(&self.filename, loc, err);
        self.entry.errored = true;
    }

    // ---- panics ----

    /// Reads tokens until a top-level form boundary: a semicolon is
    /// consumed; EOF and anything that can start a top-level form are left.
    fn panic_top_level(&mut self) {
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::Semicolon => return,
                ref k if k.starts_top_level() => {
                    self.unlex(token);
                    return;
                }
                _ => {}
            }
        }
    }

    /// Localized recovery inside a function body: consumes to the end of
    /// the broken statement, tracking brace balance, and leaves the
    /// enclosing right brace for the block parser.
    fn panic_statement(&mut self) {
        let mut depth = 0u32;
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::Eof => {
                    self.unlex(token);
                    return;
                }
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    if depth == 0 {
                        self.unlex(token);
                        return;
                    }
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                TokenKind::Semicolon if depth == 0 => return,
                _ => {}
            }
        }
    }

    // ---- names ----

    fn parse_identifier(&mut self) -> Option<(Identifier, Loc)> {
        let token = self.next();
        match token.kind {
            TokenKind::Id(name) | TokenKind::TypeId(name) => Some((name, token.loc)),
            _ => {
                self.error_expected("an identifier", &token);
                self.unlex(token);
                None
            }
        }
    }

    /// An ID or scoped ID, in any classification.
    fn parse_any_name(&mut self) -> Option<ScopedName> {
        let token = self.next();
        match token.kind {
            TokenKind::Id(s)
            | TokenKind::TypeId(s)
            | TokenKind::ScopedId(s)
            | TokenKind::ScopedTypeId(s) => Some(split_name(&s, token.loc)),
            _ => {
                self.error_expected("an identifier", &token);
                self.unlex(token);
                None
            }
        }
    }

    // ---- top level ----

    fn parse_file(&mut self) -> Option<File> {
        let module = self.parse_module_line()?;
        // a code module sees the type names its declaration module exposed
        let module_name = module.to_string();
        if let Some(table) = self.modules.get(&module_name) {
            self.types.import_module(&module_name, table, self.arena);
        }
        let imports = self.parse_imports();
        let mut bodies = Vec::new();
        loop {
            let token = self.next();
            if token.kind == TokenKind::Eof {
                break;
            }
            self.unlex(token);
            if let Some(body) = self.parse_body() {
                bodies.push(body);
            }
        }
        Some(File {
            module,
            imports,
            bodies,
        })
    }

    fn parse_module_line(&mut self) -> Option<ScopedName> {
        if self.expect(&TokenKind::Module).is_none() {
            self.panic_top_level();
            return None;
        }
        let Some(name) = self.parse_any_name() else {
            self.panic_top_level();
            return None;
        };
        if self.expect(&TokenKind::Semicolon).is_none() {
            self.panic_top_level();
        }
        Some(name)
    }

    fn parse_imports(&mut self) -> Vec<Import> {
        let mut imports = Vec::new();
        loop {
            let token = self.next();
            if token.kind != TokenKind::Using {
                self.unlex(token);
                return imports;
            }
            let loc = token.loc;
            let Some(name) = self.parse_any_name() else {
                self.panic_top_level();
                continue;
            };
            if self.expect(&TokenKind::Semicolon).is_none() {
                self.panic_top_level();
            }
            let module = name.to_string();
            match self.modules.get(&module) {
                Some(table) => self.types.import_module(&module, table, self.arena),
                None => self.error(loc, &ParseError::UnknownModule(module)),
            }
            imports.push(Import { module: name, loc });
        }
    }

    fn parse_body(&mut self) -> Option<Decl> {
        let decl = match self.peek_kind() {
            TokenKind::Opaque => self.parse_opaque(),
            TokenKind::Struct => self.parse_struct(),
            TokenKind::Union => self.parse_union(),
            TokenKind::Enum => self.parse_enum(),
            TokenKind::Typedef => self.parse_typedef(),
            k if k.starts_type() => self.parse_fun_or_var(),
            _ => {
                // consume the offender so recovery always makes progress
                let token = self.next();
                self.error_expected("a declaration", &token);
                None
            }
        };
        if decl.is_none() {
            self.panic_top_level();
        }
        decl
    }

    fn parse_opaque(&mut self) -> Option<Decl> {
        let keyword = self.expect(&TokenKind::Opaque)?;
        let (name, _) = self.parse_identifier()?;
        self.expect(&TokenKind::Semicolon)?;
        self.types.insert(name.clone());
        Some(Decl::Opaque(OpaqueDecl {
            name,
            loc: keyword.loc,
            symbol: None,
        }))
    }

    /// `type name (, name)* ;` - one field or option declaration.
    fn parse_field(&mut self) -> Option<FieldDecl> {
        let ty = self.parse_type()?;
        let loc = ty.loc;
        let mut names = Vec::new();
        loop {
            let (name, name_loc) = self.parse_identifier()?;
            names.push((name, name_loc));
            let token = self.next();
            match token.kind {
                TokenKind::Comma => {}
                TokenKind::Semicolon => return Some(FieldDecl { ty, names, loc }),
                _ => {
                    self.error_expected("a comma or a semicolon", &token);
                    self.unlex(token);
                    return None;
                }
            }
        }
    }

    fn parse_fields(&mut self) -> Option<Vec<FieldDecl>> {
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.bump_if(&TokenKind::RBrace) {
            fields.push(self.parse_field()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        Some(fields)
    }

    fn parse_struct(&mut self) -> Option<Decl> {
        let keyword = self.expect(&TokenKind::Struct)?;
        let (name, _) = self.parse_identifier()?;
        self.types.insert(name.clone());
        if self.bump_if(&TokenKind::Semicolon) {
            return Some(Decl::Struct(StructDecl {
                name,
                fields: Vec::new(),
                forward: true,
                loc: keyword.loc,
                symbol: None,
            }));
        }
        let fields = self.parse_fields()?;
        Some(Decl::Struct(StructDecl {
            name,
            fields,
            forward: false,
            loc: keyword.loc,
            symbol: None,
        }))
    }

    fn parse_union(&mut self) -> Option<Decl> {
        let keyword = self.expect(&TokenKind::Union)?;
        let (name, _) = self.parse_identifier()?;
        self.types.insert(name.clone());
        if self.bump_if(&TokenKind::Semicolon) {
            return Some(Decl::Union(UnionDecl {
                name,
                options: Vec::new(),
                forward: true,
                loc: keyword.loc,
                symbol: None,
            }));
        }
        let options = self.parse_fields()?;
        Some(Decl::Union(UnionDecl {
            name,
            options,
            forward: false,
            loc: keyword.loc,
            symbol: None,
        }))
    }

    fn parse_enum(&mut self) -> Option<Decl> {
        let keyword = self.expect(&TokenKind::Enum)?;
        let (name, _) = self.parse_identifier()?;
        self.types.insert(name.clone());
        if self.bump_if(&TokenKind::Semicolon) {
            return Some(Decl::Enum(EnumDecl {
                name,
                constants: Vec::new(),
                forward: true,
                loc: keyword.loc,
                symbol: None,
            }));
        }
        self.expect(&TokenKind::LBrace)?;
        let mut constants = Vec::new();
        loop {
            let (cname, cloc) = self.parse_identifier()?;
            let value = if self.bump_if(&TokenKind::Assign) {
                Some(self.parse_exp(ASSIGN_PREC + 1)?)
            } else {
                None
            };
            constants.push(EnumConstant {
                name: cname,
                value,
                loc: cloc,
            });
            let token = self.next();
            match token.kind {
                TokenKind::Comma => {
                    if self.bump_if(&TokenKind::RBrace) {
                        break;
                    }
                }
                TokenKind::RBrace => break,
                _ => {
                    self.error_expected("a comma or a right brace", &token);
                    self.unlex(token);
                    return None;
                }
            }
        }
        self.expect(&TokenKind::Semicolon)?;
        Some(Decl::Enum(EnumDecl {
            name,
            constants,
            forward: false,
            loc: keyword.loc,
            symbol: None,
        }))
    }

    fn parse_typedef(&mut self) -> Option<Decl> {
        let keyword = self.expect(&TokenKind::Typedef)?;
        let target = self.parse_type()?;
        let (name, _) = self.parse_identifier()?;
        self.expect(&TokenKind::Semicolon)?;
        self.types.insert(name.clone());
        Some(Decl::Typedef(TypedefDecl {
            target,
            name,
            loc: keyword.loc,
            symbol: None,
        }))
    }

    /// Declaration or definition of a function or variable; the form is
    /// decided by the token after the first declared name.
    fn parse_fun_or_var(&mut self) -> Option<Decl> {
        let ty = self.parse_type()?;
        let (name, name_loc) = self.parse_identifier()?;
        let token = self.next();
        match token.kind {
            TokenKind::Semicolon => Some(Decl::Var(VarDecl {
                loc: ty.loc,
                ty,
                names: vec![VarName {
                    name,
                    init: None,
                    loc: name_loc,
                    symbol: None,
                }],
            })),
            TokenKind::Comma => self.finish_var_decl(ty, name, name_loc, None),
            TokenKind::Assign => {
                if !self.is_code {
                    self.error(token.loc, &ParseError::DefinitionInDeclModule);
                    return None;
                }
                let init = self.parse_exp(ASSIGN_PREC + 1)?;
                if self.bump_if(&TokenKind::Comma) {
                    self.finish_var_decl(ty, name, name_loc, Some(init))
                } else {
                    self.expect(&TokenKind::Semicolon)?;
                    Some(Decl::Var(VarDecl {
                        loc: ty.loc,
                        ty,
                        names: vec![VarName {
                            name,
                            init: Some(init),
                            loc: name_loc,
                            symbol: None,
                        }],
                    }))
                }
            }
            TokenKind::LParen => self.finish_function(ty, name, name_loc),
            _ => {
                self.error_expected("a semicolon, a comma, an equals sign, or a left parenthesis", &token);
                self.unlex(token);
                None
            }
        }
    }

    fn finish_var_decl(
        &mut self,
        ty: TypeExp,
        first: Identifier,
        first_loc: Loc,
        first_init: Option<Exp>,
    ) -> Option<Decl> {
        let mut names = vec![VarName {
            name: first,
            init: first_init,
            loc: first_loc,
            symbol: None,
        }];
        loop {
            let (name, name_loc) = self.parse_identifier()?;
            let init = if self.bump_if(&TokenKind::Assign) {
                if !self.is_code {
                    let loc = self.peek_loc();
                    self.error(loc, &ParseError::DefinitionInDeclModule);
                    return None;
                }
                Some(self.parse_exp(ASSIGN_PREC + 1)?)
            } else {
                None
            };
            names.push(VarName {
                name,
                init,
                loc: name_loc,
                symbol: None,
            });
            let token = self.next();
            match token.kind {
                TokenKind::Comma => {}
                TokenKind::Semicolon => {
                    return Some(Decl::Var(VarDecl {
                        loc: ty.loc,
                        ty,
                        names,
                    }))
                }
                _ => {
                    self.error_expected("a comma or a semicolon", &token);
                    self.unlex(token);
                    return None;
                }
            }
        }
    }

    fn peek_loc(&mut self) -> Loc {
        let token = self.next();
        let loc = token.loc;
        self.unlex(token);
        loc
    }

    fn finish_function(
        &mut self,
        return_type: TypeExp,
        name: Identifier,
        name_loc: Loc,
    ) -> Option<Decl> {
        let params = self.parse_params()?;
        let token = self.next();
        match token.kind {
            TokenKind::Semicolon => Some(Decl::Fun(FunDecl {
                return_type,
                name,
                params,
                loc: name_loc,
                symbol: None,
                overload: None,
            })),
            TokenKind::LBrace => {
                if !self.is_code {
                    self.error(token.loc, &ParseError::DefinitionInDeclModule);
                    self.unlex(token);
                    return None;
                }
                self.unlex(token);
                let body = self.parse_block()?;
                Some(Decl::Function(Function {
                    return_type,
                    name,
                    params,
                    body,
                    loc: name_loc,
                    symbol: None,
                    overload: None,
                }))
            }
            _ => {
                self.error_expected("a semicolon or a left brace", &token);
                self.unlex(token);
                None
            }
        }
    }

    /// Parses the parenthesized parameter list, consuming the closing
    /// parenthesis. `()` and `(void)` both mean no parameters.
    fn parse_params(&mut self) -> Option<Vec<Param>> {
        let mut params = Vec::new();
        if self.bump_if(&TokenKind::RParen) {
            return Some(params);
        }
        loop {
            let ty = self.parse_type()?;
            if params.is_empty()
                && matches!(ty.kind, TypeExpKind::Keyword(TypeKeyword::Void))
                && self.bump_if(&TokenKind::RParen)
            {
                return Some(params);
            }
            let loc = ty.loc;
            let name = match self.peek_kind() {
                TokenKind::Id(_) | TokenKind::TypeId(_) => Some(self.parse_identifier()?.0),
                _ => None,
            };
            let default = if name.is_some() && self.bump_if(&TokenKind::Assign) {
                Some(self.parse_exp(ASSIGN_PREC + 1)?)
            } else {
                None
            };
            params.push(Param {
                ty,
                name,
                default,
                loc,
                symbol: None,
            });
            let token = self.next();
            match token.kind {
                TokenKind::Comma => {}
                TokenKind::RParen => return Some(params),
                _ => {
                    self.error_expected("a comma or a right parenthesis", &token);
                    self.unlex(token);
                    return None;
                }
            }
        }
    }

    // ---- types ----

    /// A base type with left-recursive postfix modifiers: `const`,
    /// `volatile`, `[n]`, `*`, and `(argTypes)` for function pointers.
    fn parse_type(&mut self) -> Option<TypeExp> {
        let token = self.next();
        let loc = token.loc;
        let mut ty = match token.kind {
            TokenKind::TypeId(ref s) | TokenKind::ScopedTypeId(ref s) => {
                TypeExp::new(TypeExpKind::Named(split_name(s, loc)), loc)
            }
            ref k if k.is_type_keyword() => {
                TypeExp::new(TypeExpKind::Keyword(type_keyword(k)), loc)
            }
            _ => {
                self.error_expected("a type", &token);
                self.unlex(token);
                return None;
            }
        };

        loop {
            let token = self.next();
            match token.kind {
                TokenKind::Const => ty = add_qualifier(ty, true, false),
                TokenKind::Volatile => ty = add_qualifier(ty, false, true),
                TokenKind::Star => {
                    ty = TypeExp::new(TypeExpKind::Pointer(Box::new(ty)), loc);
                }
                TokenKind::LSquare => {
                    let length = self.parse_exp(ASSIGN_PREC + 1)?;
                    self.expect(&TokenKind::RSquare)?;
                    ty = TypeExp::new(
                        TypeExpKind::Array {
                            base: Box::new(ty),
                            length: Box::new(length),
                        },
                        loc,
                    );
                }
                TokenKind::LParen => {
                    let mut arg_types = Vec::new();
                    if !self.bump_if(&TokenKind::RParen) {
                        loop {
                            let arg = self.parse_type()?;
                            if arg_types.is_empty()
                                && matches!(arg.kind, TypeExpKind::Keyword(TypeKeyword::Void))
                                && self.bump_if(&TokenKind::RParen)
                            {
                                break;
                            }
                            arg_types.push(arg);
                            let next = self.next();
                            match next.kind {
                                TokenKind::Comma => {}
                                TokenKind::RParen => break,
                                _ => {
                                    self.error_expected("a comma or a right parenthesis", &next);
                                    self.unlex(next);
                                    return None;
                                }
                            }
                        }
                    }
                    ty = TypeExp::new(
                        TypeExpKind::FunPtr {
                            return_type: Box::new(ty),
                            arg_types,
                        },
                        loc,
                    );
                }
                _ => {
                    self.unlex(token);
                    return Some(ty);
                }
            }
        }
    }

    // ---- statements ----

    fn parse_block(&mut self) -> Option<Block> {
        let lbrace = self.expect(&TokenKind::LBrace)?;
        let mut items = Vec::new();
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::RBrace => break,
                TokenKind::Eof => {
                    self.error_expected("a right brace", &token);
                    self.unlex(token);
                    return None;
                }
                _ => {
                    self.unlex(token);
                    match self.parse_statement() {
                        Some(stmt) => items.push(stmt),
                        None => self.panic_statement(),
                    }
                }
            }
        }
        Some(Block {
            items,
            loc: lbrace.loc,
        })
    }

    fn parse_statement(&mut self) -> Option<Stmt> {
        match self.peek_kind() {
            TokenKind::LBrace => self.parse_block().map(Stmt::Compound),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Break => {
                let token = self.next();
                self.expect(&TokenKind::Semicolon)?;
                Some(Stmt::Break(token.loc))
            }
            TokenKind::Continue => {
                let token = self.next();
                self.expect(&TokenKind::Semicolon)?;
                Some(Stmt::Continue(token.loc))
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::Asm => self.parse_asm(),
            TokenKind::Semicolon => {
                let token = self.next();
                Some(Stmt::Null(token.loc))
            }
            TokenKind::Case => {
                let token = self.next();
                self.error(token.loc, &ParseError::CaseOutsideSwitch);
                None
            }
            TokenKind::Default => {
                let token = self.next();
                self.error(token.loc, &ParseError::DefaultOutsideSwitch);
                None
            }
            TokenKind::Struct => self.parse_struct().map(|d| Stmt::TypeDecl(Box::new(d))),
            TokenKind::Union => self.parse_union().map(|d| Stmt::TypeDecl(Box::new(d))),
            TokenKind::Enum => self.parse_enum().map(|d| Stmt::TypeDecl(Box::new(d))),
            TokenKind::Typedef => self.parse_typedef().map(|d| Stmt::TypeDecl(Box::new(d))),
            TokenKind::Opaque => self.parse_opaque().map(|d| Stmt::TypeDecl(Box::new(d))),
            k if k.starts_type() => self.parse_var_defn_stmt().map(Stmt::VarDefn),
            _ => {
                let exp = self.parse_expression()?;
                self.expect(&TokenKind::Semicolon)?;
                Some(Stmt::Expression(exp))
            }
        }
    }

    /// `type name (= init)? (, name (= init)?)* ;`
    fn parse_var_defn_stmt(&mut self) -> Option<VarDefnStmt> {
        let ty = self.parse_type()?;
        let loc = ty.loc;
        let mut names = Vec::new();
        loop {
            let (name, name_loc) = self.parse_identifier()?;
            let init = if self.bump_if(&TokenKind::Assign) {
                Some(self.parse_exp(ASSIGN_PREC + 1)?)
            } else {
                None
            };
            names.push(VarName {
                name,
                init,
                loc: name_loc,
                symbol: None,
            });
            let token = self.next();
            match token.kind {
                TokenKind::Comma => {}
                TokenKind::Semicolon => return Some(VarDefnStmt { ty, names, loc }),
                _ => {
                    self.error_expected("a comma or a semicolon", &token);
                    self.unlex(token);
                    return None;
                }
            }
        }
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let keyword = self.expect(&TokenKind::If)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let then = self.parse_statement().map(Box::new)?;
        let els = if self.bump_if(&TokenKind::Else) {
            Some(self.parse_statement().map(Box::new)?)
        } else {
            None
        };
        Some(Stmt::If {
            cond,
            then,
            els,
            loc: keyword.loc,
        })
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let keyword = self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_statement().map(Box::new)?;
        Some(Stmt::While {
            cond,
            body,
            loc: keyword.loc,
        })
    }

    fn parse_do_while(&mut self) -> Option<Stmt> {
        let keyword = self.expect(&TokenKind::Do)?;
        let body = self.parse_statement().map(Box::new)?;
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Semicolon)?;
        Some(Stmt::DoWhile {
            body,
            cond,
            loc: keyword.loc,
        })
    }

    fn parse_for(&mut self) -> Option<Stmt> {
        let keyword = self.expect(&TokenKind::For)?;
        self.expect(&TokenKind::LParen)?;

        let init = match self.peek_kind() {
            TokenKind::Semicolon => {
                self.next();
                None
            }
            k if k.starts_type() => Some(Box::new(ForInit::Decl(self.parse_var_defn_stmt()?))),
            _ => {
                let exp = self.parse_expression()?;
                self.expect(&TokenKind::Semicolon)?;
                Some(Box::new(ForInit::Exp(exp)))
            }
        };

        let cond = if self.bump_if(&TokenKind::Semicolon) {
            None
        } else {
            let exp = self.parse_expression()?;
            self.expect(&TokenKind::Semicolon)?;
            Some(exp)
        };

        let update = if self.bump_if(&TokenKind::RParen) {
            None
        } else {
            let exp = self.parse_expression()?;
            self.expect(&TokenKind::RParen)?;
            Some(exp)
        };

        let body = self.parse_statement().map(Box::new)?;
        Some(Stmt::For {
            init,
            cond,
            update,
            body,
            loc: keyword.loc,
        })
    }

    fn parse_switch(&mut self) -> Option<Stmt> {
        let keyword = self.expect(&TokenKind::Switch)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;

        let mut cases = Vec::new();
        let mut seen_default = false;
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::RBrace => break,
                TokenKind::Case | TokenKind::Default => {
                    self.unlex(token);
                    let case = self.parse_switch_case(&mut seen_default)?;
                    cases.push(case);
                }
                _ => {
                    self.error_expected("'case', 'default', or a right brace", &token);
                    self.unlex(token);
                    return None;
                }
            }
        }
        Some(Stmt::Switch {
            cond,
            cases,
            loc: keyword.loc,
        })
    }

    /// One case group: consecutive `case value:`/`default:` labels followed
    /// by the statements up to the next label or the closing brace.
    fn parse_switch_case(&mut self, seen_default: &mut bool) -> Option<SwitchCase> {
        let mut values = Vec::new();
        let mut is_default = false;
        let loc = self.peek_loc();
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::Case => {
                    let value = self.parse_exp(ASSIGN_PREC + 1)?;
                    self.expect(&TokenKind::Colon)?;
                    values.push(value);
                }
                TokenKind::Default => {
                    if *seen_default {
                        self.error(token.loc, &ParseError::DuplicateDefault);
                    }
                    *seen_default = true;
                    is_default = true;
                    self.expect(&TokenKind::Colon)?;
                }
                _ => {
                    self.unlex(token);
                    break;
                }
            }
        }

        let mut body = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace | TokenKind::Eof => break,
                _ => match self.parse_statement() {
                    Some(stmt) => body.push(stmt),
                    None => self.panic_statement(),
                },
            }
        }
        Some(SwitchCase {
            values,
            is_default,
            body,
            loc,
        })
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let keyword = self.expect(&TokenKind::Return)?;
        if self.bump_if(&TokenKind::Semicolon) {
            return Some(Stmt::Return {
                value: None,
                loc: keyword.loc,
            });
        }
        let value = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        Some(Stmt::Return {
            value: Some(value),
            loc: keyword.loc,
        })
    }

    fn parse_asm(&mut self) -> Option<Stmt> {
        let keyword = self.expect(&TokenKind::Asm)?;
        let token = self.next();
        let TokenKind::StringLit(bytes) = token.kind else {
            self.error_expected("a string literal", &token);
            self.unlex(token);
            return None;
        };
        self.expect(&TokenKind::Semicolon)?;
        Some(Stmt::Asm {
            assembly: String::from_utf8_lossy(&bytes).into_owned(),
            loc: keyword.loc,
        })
    }

    // ---- expressions ----

    /// Full expression including the comma/sequence operator.
    fn parse_expression(&mut self) -> Option<Exp> {
        let mut left = self.parse_exp(ASSIGN_PREC)?;
        loop {
            let token = self.next();
            if token.kind != TokenKind::Comma {
                self.unlex(token);
                return Some(left);
            }
            let right = self.parse_exp(ASSIGN_PREC)?;
            let loc = left.loc;
            left = Exp::seq(left, right, loc);
        }
    }

    /// Precedence climbing over binary-ish operators.
    fn parse_exp(&mut self, min_prec: u8) -> Option<Exp> {
        let mut left = self.parse_factor()?;
        loop {
            let token = self.next();
            let prec = get_prec(&token.kind);
            if prec == 0 || prec < min_prec {
                self.unlex(token);
                return Some(left);
            }
            left = match token.kind {
                TokenKind::Question => {
                    let then = self.parse_expression()?;
                    self.expect(&TokenKind::Colon)?;
                    let els = self.parse_exp(prec)?;
                    Exp::ternary(left, then, els)
                }
                TokenKind::AmpAmp => {
                    let rhs = self.parse_exp(prec + 1)?;
                    let loc = left.loc;
                    Exp::new(ExpKind::LAnd(Box::new(left), Box::new(rhs)), loc)
                }
                TokenKind::PipePipe => {
                    let rhs = self.parse_exp(prec + 1)?;
                    let loc = left.loc;
                    Exp::new(ExpKind::LOr(Box::new(left), Box::new(rhs)), loc)
                }
                TokenKind::LAndAssign => {
                    let rhs = self.parse_exp(prec)?;
                    let loc = left.loc;
                    Exp::new(
                        ExpKind::LAndAssign {
                            target: Box::new(left),
                            value: Box::new(rhs),
                        },
                        loc,
                    )
                }
                TokenKind::LOrAssign => {
                    let rhs = self.parse_exp(prec)?;
                    let loc = left.loc;
                    Exp::new(
                        ExpKind::LOrAssign {
                            target: Box::new(left),
                            value: Box::new(rhs),
                        },
                        loc,
                    )
                }
                ref k if comp_op(k).is_some() => {
                    let op = comp_op(k).expect("matched above");
                    let rhs = self.parse_exp(prec + 1)?;
                    Exp::compare(op, left, rhs)
                }
                ref k => {
                    let op = bin_op(k)
                        .unwrap_or_else(|| crate::internal_error!("{k:?} has a precedence"));
                    let rhs = if op.is_assignment() {
                        self.parse_exp(prec)?
                    } else {
                        self.parse_exp(prec + 1)?
                    };
                    Exp::binary(op, left, rhs)
                }
            };
        }
    }

    /// Prefix operators, then a primary, then postfix operators.
    fn parse_factor(&mut self) -> Option<Exp> {
        let token = self.next();
        let loc = token.loc;
        let op = match token.kind {
            TokenKind::Star => Some(UnOp::Deref),
            TokenKind::Amp => Some(UnOp::AddrOf),
            TokenKind::Increment => Some(UnOp::PreInc),
            TokenKind::Decrement => Some(UnOp::PreDec),
            TokenKind::Plus => Some(UnOp::Plus),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Bang => Some(UnOp::LNot),
            TokenKind::Tilde => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let target = self.parse_factor()?;
            return Some(Exp::unary(op, target, loc));
        }

        let exp = match token.kind {
            TokenKind::Cast => {
                self.expect(&TokenKind::LSquare)?;
                let to = self.parse_type()?;
                self.expect(&TokenKind::RSquare)?;
                self.expect(&TokenKind::LParen)?;
                let target = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Exp::new(
                    ExpKind::Cast {
                        to,
                        target: Box::new(target),
                    },
                    loc,
                )
            }
            TokenKind::Sizeof => {
                self.expect(&TokenKind::LParen)?;
                let exp = if self.peek_kind().starts_type() {
                    let ty = self.parse_type()?;
                    Exp::new(ExpKind::SizeofType(ty), loc)
                } else {
                    let target = self.parse_expression()?;
                    Exp::new(ExpKind::SizeofExp(Box::new(target)), loc)
                };
                self.expect(&TokenKind::RParen)?;
                exp
            }
            TokenKind::Id(ref s) | TokenKind::ScopedId(ref s) => Exp::id(split_name(s, loc)),
            TokenKind::IntLit(v) => Exp::constant(int_constant(v), loc),
            TokenKind::UintLit(v) => Exp::constant(Constant::Ulong(v), loc),
            TokenKind::FloatLit(v) => Exp::constant(Constant::Double(v), loc),
            TokenKind::True => Exp::constant(Constant::Bool(true), loc),
            TokenKind::False => Exp::constant(Constant::Bool(false), loc),
            TokenKind::Null => Exp::constant(Constant::Null, loc),
            TokenKind::CharLit(c) => Exp::constant(Constant::Char(c), loc),
            TokenKind::WCharLit(c) => Exp::constant(Constant::Wchar(c), loc),
            TokenKind::StringLit(ref bytes) => Exp::constant(Constant::String(bytes.clone()), loc),
            TokenKind::WStringLit(ref points) => {
                Exp::constant(Constant::WString(points.clone()), loc)
            }
            TokenKind::LParen => {
                let exp = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                exp
            }
            TokenKind::LAngle => {
                let mut elements = Vec::new();
                if !self.bump_if(&TokenKind::RAngle) {
                    loop {
                        elements.push(self.parse_exp(ASSIGN_PREC)?);
                        let next = self.next();
                        match next.kind {
                            TokenKind::Comma => {}
                            TokenKind::RAngle => break,
                            _ => {
                                self.error_expected("a comma or a right angle bracket", &next);
                                self.unlex(next);
                                return None;
                            }
                        }
                    }
                }
                Exp::new(ExpKind::AggregateInit(elements), loc)
            }
            _ => {
                self.error_expected("an expression", &token);
                self.unlex(token);
                return None;
            }
        };
        self.parse_postfix(exp)
    }

    fn parse_member_name(&mut self) -> Option<Identifier> {
        let token = self.next();
        match token.kind {
            TokenKind::Id(name) | TokenKind::TypeId(name) => Some(name),
            _ => {
                self.error_expected("an identifier", &token);
                self.unlex(token);
                None
            }
        }
    }

    fn parse_postfix(&mut self, mut exp: Exp) -> Option<Exp> {
        loop {
            let token = self.next();
            let loc = exp.loc;
            exp = match token.kind {
                TokenKind::Dot => {
                    let field = self.parse_member_name()?;
                    Exp::new(
                        ExpKind::StructAccess {
                            base: Box::new(exp),
                            field,
                        },
                        loc,
                    )
                }
                TokenKind::Arrow => {
                    let field = self.parse_member_name()?;
                    Exp::new(
                        ExpKind::StructPtrAccess {
                            base: Box::new(exp),
                            field,
                        },
                        loc,
                    )
                }
                TokenKind::LParen => {
                    let args = self.parse_arguments()?;
                    Exp::call(exp, args)
                }
                TokenKind::LSquare => {
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RSquare)?;
                    Exp::binary(BinOp::ArrayAccess, exp, index)
                }
                TokenKind::Increment => Exp::unary(UnOp::PostInc, exp, loc),
                TokenKind::Decrement => Exp::unary(UnOp::PostDec, exp, loc),
                _ => {
                    self.unlex(token);
                    return Some(exp);
                }
            };
        }
    }

    /// Call arguments, consuming the closing parenthesis.
    fn parse_arguments(&mut self) -> Option<Vec<Exp>> {
        let mut args = Vec::new();
        if self.bump_if(&TokenKind::RParen) {
            return Some(args);
        }
        loop {
            args.push(self.parse_exp(ASSIGN_PREC)?);
            let token = self.next();
            match token.kind {
                TokenKind::Comma => {}
                TokenKind::RParen => return Some(args),
                _ => {
                    self.error_expected("a comma or a right parenthesis", &token);
                    self.unlex(token);
                    return None;
                }
            }
        }
    }
}

// ---- tables ----

const ASSIGN_PREC: u8 = 1;

/// Operator precedence; 0 marks everything that is not a binary operator.
/// Assignments sit at the bottom (right-associative), the conditional just
/// above them.
#[allow(clippy::match_same_arms)]
fn get_prec(kind: &TokenKind) -> u8 {
    use TokenKind as T;
    match kind {
        T::Assign
        | T::MulAssign
        | T::DivAssign
        | T::ModAssign
        | T::AddAssign
        | T::SubAssign
        | T::LShiftAssign
        | T::LRShiftAssign
        | T::ARShiftAssign
        | T::AmpAssign
        | T::CaretAssign
        | T::PipeAssign
        | T::LAndAssign
        | T::LOrAssign => ASSIGN_PREC,
        T::Question => 2,
        T::PipePipe => 3,
        T::AmpAmp => 4,
        T::Pipe => 5,
        T::Caret => 6,
        T::Amp => 7,
        T::EqEq | T::NotEq => 8,
        T::LAngle | T::RAngle | T::LessEq | T::GreaterEq => 9,
        T::Spaceship => 10,
        T::LShift | T::LRShift | T::ARShift => 11,
        T::Plus | T::Minus => 12,
        T::Star | T::Slash | T::Percent => 13,
        _ => 0,
    }
}

fn bin_op(kind: &TokenKind) -> Option<BinOp> {
    use TokenKind as T;
    let op = match kind {
        T::Assign => BinOp::Assign,
        T::MulAssign => BinOp::MulAssign,
        T::DivAssign => BinOp::DivAssign,
        T::ModAssign => BinOp::ModAssign,
        T::AddAssign => BinOp::AddAssign,
        T::SubAssign => BinOp::SubAssign,
        T::LShiftAssign => BinOp::LShiftAssign,
        T::LRShiftAssign => BinOp::LRShiftAssign,
        T::ARShiftAssign => BinOp::ARShiftAssign,
        T::AmpAssign => BinOp::BitAndAssign,
        T::CaretAssign => BinOp::BitXorAssign,
        T::PipeAssign => BinOp::BitOrAssign,
        T::Pipe => BinOp::BitOr,
        T::Caret => BinOp::BitXor,
        T::Amp => BinOp::BitAnd,
        T::Spaceship => BinOp::Spaceship,
        T::LShift => BinOp::LShift,
        T::LRShift => BinOp::LRShift,
        T::ARShift => BinOp::ARShift,
        T::Plus => BinOp::Add,
        T::Minus => BinOp::Sub,
        T::Star => BinOp::Mul,
        T::Slash => BinOp::Div,
        T::Percent => BinOp::Mod,
        _ => return None,
    };
    Some(op)
}

fn comp_op(kind: &TokenKind) -> Option<CompOp> {
    use TokenKind as T;
    let op = match kind {
        T::EqEq => CompOp::Eq,
        T::NotEq => CompOp::Ne,
        T::LAngle => CompOp::Lt,
        T::LessEq => CompOp::Le,
        T::RAngle => CompOp::Gt,
        T::GreaterEq => CompOp::Ge,
        _ => return None,
    };
    Some(op)
}

fn type_keyword(kind: &TokenKind) -> TypeKeyword {
    use TokenKind as T;
    match kind {
        T::Void => TypeKeyword::Void,
        T::Ubyte => TypeKeyword::Ubyte,
        T::Byte => TypeKeyword::Byte,
        T::Char => TypeKeyword::Char,
        T::Ushort => TypeKeyword::Ushort,
        T::Short => TypeKeyword::Short,
        T::Uint => TypeKeyword::Uint,
        T::Int => TypeKeyword::Int,
        T::Wchar => TypeKeyword::Wchar,
        T::Ulong => TypeKeyword::Ulong,
        T::Long => TypeKeyword::Long,
        T::Float => TypeKeyword::Float,
        T::Double => TypeKeyword::Double,
        T::Bool => TypeKeyword::Bool,
        other => crate::internal_error!("{other:?} is not a type keyword"),
    }
}

fn add_qualifier(ty: TypeExp, constant: bool, volatile: bool) -> TypeExp {
    let loc = ty.loc;
    match ty.kind {
        TypeExpKind::Qualified {
            constant: c,
            volatile: v,
            base,
        } => TypeExp::new(
            TypeExpKind::Qualified {
                constant: c || constant,
                volatile: v || volatile,
                base,
            },
            loc,
        ),
        other => TypeExp::new(
            TypeExpKind::Qualified {
                constant,
                volatile,
                base: Box::new(TypeExp::new(other, loc)),
            },
            loc,
        ),
    }
}

fn split_name(s: &str, loc: Loc) -> ScopedName {
    ScopedName::new(s.split("::").map(str::to_owned).collect(), loc)
}

/// Integer literals take the narrowest of int/long that fits.
fn int_constant(v: i64) -> Constant {
    if let Ok(i) = i32::try_from(v) {
        Constant::Int(i)
    } else {
        Constant::Long(v)
    }
}
