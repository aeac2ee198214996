///
/// Identifiers and Type Annotations
///
/// This module defines Ident (an interned name plus its span) and TypeExpr,
/// the surface syntax of type annotations. TypeExpr is deliberately separate
/// from the checker's internal Type: the checker resolves annotations against
/// the symbol table and the user-defined-type registries, reporting errors
/// for names it cannot resolve.
///

use lasso::Spur;

use crate::source::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ident {
    pub symbol: Spur,
    pub span: Span,
}

impl Ident {
    pub fn new(symbol: Spur, span: Span) -> Self {
        Self { symbol, span }
    }
}

/// Surface blocking annotation on procedure type syntax and definitions.
///
/// `Maybe` is the `blocking?` form usable only inside generic procedure
/// signatures; `GenericOverArgs` is `blocking:i|j`, making the procedure's
/// blocking-ness depend on the procedure values passed at those argument
/// positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockingSpec {
    NonBlocking,
    Blocking,
    Maybe,
    GenericOverArgs(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Int,
    Float,
    String,
    Bool,
    Nothing,
    List {
        elem: Box<TypeExpr>,
        mutable: bool,
    },
    Set {
        elem: Box<TypeExpr>,
        mutable: bool,
    },
    Map {
        key: Box<TypeExpr>,
        value: Box<TypeExpr>,
        mutable: bool,
    },
    Tuple {
        elems: Vec<TypeExpr>,
        mutable: bool,
    },
    Struct {
        fields: Vec<(Ident, TypeExpr)>,
        mutable: bool,
    },
    Oneof {
        variants: Vec<TypeExpr>,
    },
    Future {
        value: Box<TypeExpr>,
    },
    /// A named type: a user-defined type (optionally module-qualified and
    /// parameterized), a locally defined struct/oneof alias, or a generic
    /// type param of the enclosing procedure.
    Named {
        module: Option<Ident>,
        name: Ident,
        params: Vec<TypeExpr>,
    },
    Function {
        args: Vec<TypeExpr>,
        ret: Box<TypeExpr>,
        blocking: BlockingSpec,
    },
    Provider {
        ret: Box<TypeExpr>,
        blocking: BlockingSpec,
    },
    Consumer {
        args: Vec<TypeExpr>,
        blocking: BlockingSpec,
    },
}

impl TypeExpr {
    pub fn list(elem: TypeExpr) -> Self {
        TypeExpr::List { elem: Box::new(elem), mutable: false }
    }

    pub fn mut_list(elem: TypeExpr) -> Self {
        TypeExpr::List { elem: Box::new(elem), mutable: true }
    }

    pub fn named(name: Ident) -> Self {
        TypeExpr::Named { module: None, name, params: Vec::new() }
    }
}
