use thiserror::Error;

/// Syntactic errors. Rendered into the report at the position of the
/// offending token; never fatal - the parser recovers and keeps going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {expected}, but found {found}")]
    Expected { expected: String, found: String },
    #[error("a definition is not allowed in a declaration module")]
    DefinitionInDeclModule,
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    #[error("'case' is only allowed inside a switch statement")]
    CaseOutsideSwitch,
    #[error("'default' is only allowed inside a switch statement")]
    DefaultOutsideSwitch,
    #[error("duplicate 'default' in a switch statement")]
    DuplicateDefault,
}

impl ParseError {
    pub fn expected(expected: impl Into<String>, found: &'static str) -> Self {
        Self::Expected {
            expected: expected.into(),
            found: found.to_owned(),
        }
    }
}
