///
/// Type Checker Error Types
///
/// This module defines error types for the semantic analysis phase. Errors
/// carry source location information for precise error reporting.
///
/// Type errors are collected, never thrown: after recording one the checker
/// continues with the `unknowable` placeholder type so cascading errors stay
/// minimal. Internal compiler errors (invariant violations) panic instead.
///

use crate::source::Span;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TypeError {
    #[error("unexpected redeclaration of identifier '{name}'")]
    Redeclaration { name: String, span: Span },

    #[error("no variable '{name}' within the current scope")]
    UndefinedIdentifier { name: String, span: Span },

    #[error("variable '{name}' may not have been initialized")]
    UninitializedReference { name: String, span: Span },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("operator '{op}' is not supported for operand type {ty}")]
    UnsupportedOperandType { op: String, ty: String, span: Span },

    #[error("operands of '{op}' must be of one type; found {left} and {right}")]
    OperandTypeMismatch {
        op: String,
        left: String,
        right: String,
        span: Span,
    },

    #[error("static value '{name}' must have a deeply immutable type; found {found}")]
    MutableStaticValue {
        name: String,
        found: String,
        span: Span,
    },

    #[error("oneof declares duplicated variant '{variant}'")]
    DuplicatedOneofVariant { variant: String, span: Span },

    #[error("future-typed values cannot be hashed; '{ty}' is not usable as {position}")]
    FutureNotHashable {
        ty: String,
        position: String,
        span: Span,
    },

    #[error("field '{field}' of immutable struct '{name}' has mutable type {found}")]
    MutableFieldInImmutableStruct {
        name: String,
        field: String,
        found: String,
        suggestion: Option<String>,
        span: Span,
    },

    #[error("procedure '{name}' is declared non-blocking but is effectively blocking (via {via})")]
    BlockingMismatch {
        name: String,
        via: String,
        span: Span,
    },

    #[error("no implementation of contract {contract}<{args}> in scope")]
    MissingContractImpl {
        contract: String,
        args: String,
        span: Span,
    },

    #[error("wrong number of arguments: expected {expected}, found {found}")]
    ArityMismatch {
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("could not infer a concrete type for generic param '{param}'")]
    GenericInferenceFailure { param: String, span: Span },

    #[error("conflicting bindings for generic param '{param}': {first} and {second}")]
    GenericBindingConflict {
        param: String,
        first: String,
        second: String,
        span: Span,
    },

    #[error("type '{ty}' is not callable")]
    NotCallable { ty: String, span: Span },

    #[error("unknown dependency module '{name}'")]
    UnknownModule { name: String, span: Span },

    #[error("module '{module}' exports no binding named '{name}'")]
    UnknownModuleSymbol {
        module: String,
        name: String,
        span: Span,
    },

    #[error("unknown type name '{name}'")]
    UnknownTypeName { name: String, span: Span },

    #[error("return outside of a procedure body")]
    ReturnOutsideProcedure { span: Span },

    #[error("consumer procedures cannot return a value")]
    ConsumerReturn { span: Span },

    #[error("missing return value; expected {expected}")]
    MissingReturnValue { expected: String, span: Span },
}

impl TypeError {
    pub fn span(&self) -> Span {
        match self {
            TypeError::Redeclaration { span, .. } => *span,
            TypeError::UndefinedIdentifier { span, .. } => *span,
            TypeError::UninitializedReference { span, .. } => *span,
            TypeError::TypeMismatch { span, .. } => *span,
            TypeError::UnsupportedOperandType { span, .. } => *span,
            TypeError::OperandTypeMismatch { span, .. } => *span,
            TypeError::MutableStaticValue { span, .. } => *span,
            TypeError::DuplicatedOneofVariant { span, .. } => *span,
            TypeError::FutureNotHashable { span, .. } => *span,
            TypeError::MutableFieldInImmutableStruct { span, .. } => *span,
            TypeError::BlockingMismatch { span, .. } => *span,
            TypeError::MissingContractImpl { span, .. } => *span,
            TypeError::ArityMismatch { span, .. } => *span,
            TypeError::GenericInferenceFailure { span, .. } => *span,
            TypeError::GenericBindingConflict { span, .. } => *span,
            TypeError::NotCallable { span, .. } => *span,
            TypeError::UnknownModule { span, .. } => *span,
            TypeError::UnknownModuleSymbol { span, .. } => *span,
            TypeError::UnknownTypeName { span, .. } => *span,
            TypeError::ReturnOutsideProcedure { span } => *span,
            TypeError::ConsumerReturn { span } => *span,
            TypeError::MissingReturnValue { span, .. } => *span,
        }
    }

    /// A concrete replacement the user could apply, when the checker can
    /// synthesize one.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            TypeError::MutableFieldInImmutableStruct { suggestion, .. } => suggestion
                .as_ref()
                .map(|s| format!("declare the field as {}", s)),
            TypeError::TypeMismatch { expected, .. } => {
                Some(format!("change this to type {}", expected))
            }
            _ => None,
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>, span: Span) -> Self {
        TypeError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn undefined(name: impl Into<String>, span: Span) -> Self {
        TypeError::UndefinedIdentifier {
            name: name.into(),
            span,
        }
    }
}

pub type TypeResult<T> = Result<T, TypeError>;
