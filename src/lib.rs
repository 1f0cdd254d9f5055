/*!
This crate is a compiler for the Vel language: a statically-typed, C-family
systems language with modules, function overloading and inline assembly.
The compiler lowers each code module to a bag of linkable fragments of
target-independent three-address IR and prints them as one assembly file per
input. Register allocation and instruction selection are left to an external
backend; the calling convention lives behind the [Frame](frame::Frame)
abstraction so other targets can be added without touching the translator.

## Source files

  * `*.vd` - declaration modules: importable interfaces, declarations only.
  * `*.vc` - code modules: may define functions and variables; each produces
    one `*.s` output file.

## Compilation stages

1. **Lexing** - [lex](lexer::Lexer::lex) produces [Tokens](lexer::Token) one
   at a time with single-token pushback. Identifier tokens are classified as
   plain or type identifiers through a callback into the symbol-table layer,
   so the parser itself never has to consult scope information.
2. **Parsing** - [parse_file](parser::parse_file) builds an [ast] by
   recursive descent, with precedence climbing for expressions. Errors are
   recovered by panicking to the next top-level boundary; a file that errored
   still yields a best-effort AST so later phases can report independent
   mistakes.
3. **Type checking** - [typecheck](typecheck::typecheck) resolves names and
   overloads across modules and attaches a result type to every expression.
4. **Translation** - [translate](translate::translate) lowers the typed AST
   into BSS/RODATA/DATA/TEXT [fragments](ir::Fragment), parameterized by a
   [FrameCtor](frame::FrameCtor) for the target calling convention.
5. **Emission** - [emission] renders fragments as GNU-as compatible text.

All user-facing errors are accumulated in a [Report](files::Report) with
`file:line:col: error:` positions; compilation continues on a best-effort
basis so one run surfaces as many independent errors as possible. Invariant
violations inside the compiler abort through [internal_error!].
*/

#![deny(unused_must_use)]
#![warn(clippy::pedantic)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod ast;
pub mod constants;
#[cfg(feature = "emission")]
pub mod emission;
pub mod files;
#[cfg(feature = "frame")]
pub mod frame;
#[cfg(feature = "ir")]
pub mod ir;
#[cfg(feature = "lexer")]
pub mod lexer;
#[cfg(feature = "parser")]
pub mod parser;
pub mod symtab;
#[cfg(feature = "translate")]
pub mod translate;
#[cfg(feature = "typecheck")]
pub mod typecheck;
pub mod types;

/// Aborts on a broken compiler invariant.
///
/// User errors never go through here; anything that does is a bug in the
/// compiler itself, so the process dies immediately with the offending
/// compiler source position.
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        panic!("{}:{}: internal compiler error: {}", file!(), line!(), format!($($arg)*))
    };
}
