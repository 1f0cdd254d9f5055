use thiserror::Error;

/// Resolution, overload, type and semantic errors. Each is rendered into
/// the report at the offending construct's position; observed and expected
/// types are spelled out where they matter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("undefined identifier '{0}'")]
    Undefined(String),
    #[error("identifier '{0}' is ambiguous")]
    Ambiguous(String),
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    #[error("'{0}' names a type and cannot be used as a value")]
    TypeAsValue(String),
    #[error("'{0}' is not a type")]
    NotAType(String),
    #[error("redefinition of '{0}'")]
    Redefinition(String),
    #[error("redeclaration of '{0}'")]
    Redeclaration(String),
    #[error("declaration of '{0}' conflicts with an earlier declaration")]
    Conflicting(String),
    #[error("overload of '{0}' differs only in its return type")]
    OverloadReturnType(String),
    #[error("no viable overload for '{name}' with argument types ({args})")]
    NoViableOverload { name: String, args: String },
    #[error("call to '{0}' is ambiguous")]
    AmbiguousCall(String),
    #[error("reference to overloaded function '{0}' is ambiguous outside a call")]
    OverloadedReference(String),
    #[error("cannot convert {from} to {to}")]
    NotConvertible { from: String, to: String },
    #[error("left operand of an assignment is not an lvalue")]
    NotLvalue,
    #[error("cannot assign to a value of type {0}")]
    ConstViolation(String),
    #[error("array size must be a compile-time integer constant")]
    ArraySizeNotConstant,
    #[error("array size cannot be negative")]
    NegativeArraySize,
    #[error("'{0}' is an incomplete type")]
    IncompleteType(String),
    #[error("no field '{field}' in '{ty}'")]
    NoSuchField { field: String, ty: String },
    #[error("{0} is not a struct or union")]
    NotAStruct(String),
    #[error("called value of type {0} is not a function")]
    NotCallable(String),
    #[error("expected {expected} arguments, but got {got}")]
    ArgCount { expected: usize, got: usize },
    #[error("'break' is only allowed inside a loop or switch")]
    BreakOutside,
    #[error("'continue' is only allowed inside a loop")]
    ContinueOutside,
    #[error("case value is not a compile-time integer constant")]
    CaseNotConstant,
    #[error("enumeration value is not a compile-time integer constant")]
    EnumValueNotConstant,
    #[error("duplicate case value {0}")]
    DuplicateCase(i64),
    #[error("function '{0}' can reach its end without returning a value")]
    MissingReturn(String),
    #[error("global initializer is not a compile-time constant")]
    NonConstantGlobalInit,
    #[error("parameter {0} of a function definition needs a name")]
    UnnamedParam(usize),
    #[error("a void function cannot return a value")]
    ReturnValueInVoid,
    #[error("a non-void function must return a value")]
    ReturnMissingValue,
    #[error("invalid operands to {op}: {lhs} and {rhs}")]
    BadOperands {
        op: &'static str,
        lhs: String,
        rhs: String,
    },
    #[error("invalid operand to {op}: {ty}")]
    BadOperand { op: &'static str, ty: String },
    #[error("condition of type {0} is not convertible to bool")]
    NotBool(String),
    #[error("cannot cast {from} to {to}")]
    BadCast { from: String, to: String },
    #[error("aggregate initializer does not fit {0}")]
    BadAggregate(String),
}
