use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Span;

/// Discriminated error record: a kind plus the byte range it points at.
/// Nothing in the engine surfaces errors as panics; every failure is
/// one of these, carried through `Result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ErrorKind {
    // ----- compile time -----
    MalformedToken,
    SyntaxError(String),
    MalformedClassHeader(String),
    UndefinedType(String),
    UndefinedVariable(String),
    UndefinedCall(String),
    AmbiguousCall(String),
    TooFewArguments(String),
    TooManyArguments(String),
    WrongArgumentType(String),
    Redefinition(String),
    AccessViolation(String),
    MissingReturn(String),
    DefaultOrdering(String),
    TypeMismatch(String),
    NotAssignable,
    ConditionNotBool,

    // ----- run time -----
    DivideByZero,
    NullDereference,
    IndexOutOfBounds { index: i64, len: usize },
    UseOfUninitialized,
    ArrayTooLarge(usize),
    NativeFailure(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MalformedToken => write!(f, "unrecognized token"),
            ErrorKind::SyntaxError(m) => write!(f, "syntax error: {}", m),
            ErrorKind::MalformedClassHeader(m) => write!(f, "malformed class header: {}", m),
            ErrorKind::UndefinedType(n) => write!(f, "unknown type `{}`", n),
            ErrorKind::UndefinedVariable(n) => write!(f, "unknown variable `{}`", n),
            ErrorKind::UndefinedCall(n) => write!(f, "no function or method named `{}`", n),
            ErrorKind::AmbiguousCall(n) => {
                write!(f, "call to `{}` is ambiguous between equal-cost overloads", n)
            }
            ErrorKind::TooFewArguments(n) => write!(f, "too few arguments to `{}`", n),
            ErrorKind::TooManyArguments(n) => write!(f, "too many arguments to `{}`", n),
            ErrorKind::WrongArgumentType(m) => write!(f, "wrong argument type: {}", m),
            ErrorKind::Redefinition(n) => write!(f, "`{}` is already defined", n),
            ErrorKind::AccessViolation(m) => write!(f, "access violation: {}", m),
            ErrorKind::MissingReturn(n) => {
                write!(f, "`{}` does not return a value on every path", n)
            }
            ErrorKind::DefaultOrdering(n) => write!(
                f,
                "parameter `{}` needs a default because an earlier parameter has one",
                n
            ),
            ErrorKind::TypeMismatch(m) => write!(f, "type mismatch: {}", m),
            ErrorKind::NotAssignable => write!(f, "expression cannot be assigned to"),
            ErrorKind::ConditionNotBool => write!(f, "condition must be a bool"),
            ErrorKind::DivideByZero => write!(f, "division by zero"),
            ErrorKind::NullDereference => write!(f, "null reference dereferenced"),
            ErrorKind::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
            ErrorKind::UseOfUninitialized => write!(f, "use of an uninitialized value"),
            ErrorKind::ArrayTooLarge(n) => write!(f, "array size {} exceeds the maximum", n),
            ErrorKind::NativeFailure(m) => write!(f, "native method failed: {}", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub span: Span,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, span: Span) -> Self {
        ScriptError { kind, span }
    }

    /// Re-position the error, used when a cross-unit call fails and the
    /// caller should see its own call site.
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}..{}", self.kind, self.span.start, self.span.end)
    }
}

impl std::error::Error for ScriptError {}

pub type ExecResult<T> = Result<T, ScriptError>;
