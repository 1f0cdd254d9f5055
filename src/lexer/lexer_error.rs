use crate::files::Loc;

use thiserror::Error;

/// A lexical error and where it happened. Rendered into the report by the
/// parser, which owns error recovery.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{kind}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub loc: Loc,
}

impl LexErrorKind {
    pub fn at(self, loc: Loc) -> LexError {
        LexError { kind: self, loc }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexErrorKind {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated character literal")]
    UnterminatedChar,
    #[error("unterminated comment")]
    UnterminatedComment,
    #[error("bad escape sequence '\\{0}'")]
    BadEscape(char),
    #[error("bad hexadecimal digit in escape sequence")]
    BadEscapeDigit,
    #[error("integer literal out of range")]
    IntOutOfRange,
    #[error("bad integer literal")]
    BadInt,
    #[error("bad constant suffix '{0}'")]
    BadConstantSuffix(char),
    #[error("bad floating-point literal")]
    BadFloat,
    #[error("empty character literal")]
    EmptyChar,
    #[error("character literal holds more than one character")]
    LongChar,
    #[error("expected an identifier after '::'")]
    BadScopedName,
    #[error("character does not fit in a narrow literal")]
    WideCharInNarrow,
}
