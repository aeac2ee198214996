//!
//! Type Annotations Side-Table
//!
//! Resolved type information recorded during checking, keyed by source
//! span. Emitters look up expression types here instead of the AST being
//! mutated; the interpreter reads lambda capture sets from here to build
//! closure snapshots, and a target-code emitter would materialize the same
//! sets as implicit closure fields.
//!

use std::collections::HashMap;

use crate::source::Span;
use super::types::Type;

#[derive(Debug, Default)]
pub struct Annotations {
    expr_types: HashMap<Span, Type>,
    lambda_captures: HashMap<Span, Vec<String>>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotate_type(&mut self, span: Span, ty: Type) {
        self.expr_types.insert(span, ty);
    }

    pub fn expr_type(&self, span: Span) -> Option<&Type> {
        self.expr_types.get(&span)
    }

    /// Records the names a lambda captured from enclosing scopes, sorted
    /// for deterministic output.
    pub fn record_lambda_captures(&mut self, span: Span, mut names: Vec<String>) {
        names.sort();
        self.lambda_captures.insert(span, names);
    }

    pub fn lambda_captures(&self, span: Span) -> Option<&[String]> {
        self.lambda_captures.get(&span).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.expr_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expr_types.is_empty()
    }
}
