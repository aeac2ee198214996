///
/// Expression AST Nodes
///
/// This module defines all expression types in the Opal language.
///
/// Key design decisions:
/// - Wrapper enum with separate structs for each expression type
/// - Each struct carries its own Span for precise error reporting
/// - Box-allocated children (the tree is owned, the parser is external)
/// - All types implement Spanned for uniform span access
///
/// Expression categories:
/// - Atoms: literals, identifier references, module-qualified references
/// - Operators: binary, unary operations
/// - Calls: procedure calls with local or module-qualified callees
/// - Constructors: list, tuple, and struct literals, lambdas
///

use crate::source::{Span, Spanned};
use super::operators::{BinaryOp, UnaryOp};
use super::statements::Block;
use super::types::{Ident, TypeExpr};

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(LiteralExpr),
    Identifier(IdentExpr),
    ModuleRef(ModuleRefExpr),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Call(CallExpr),
    Lambda(LambdaExpr),
    List(ListExpr),
    Tuple(TupleExpr),
    StructLiteral(StructLiteralExpr),
}

impl Spanned for Expression {
    fn span(&self) -> Span {
        match self {
            Expression::Literal(e) => e.span,
            Expression::Identifier(e) => e.span,
            Expression::ModuleRef(e) => e.span,
            Expression::Binary(e) => e.span,
            Expression::Unary(e) => e.span,
            Expression::Call(e) => e.span,
            Expression::Lambda(e) => e.span,
            Expression::List(e) => e.span,
            Expression::Tuple(e) => e.span,
            Expression::StructLiteral(e) => e.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralExpr {
    pub value: Literal,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentExpr {
    pub ident: Ident,
    pub span: Span,
}

/// A reference to a binding exported by a dependency module: `Dep::name`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRefExpr {
    pub module: Ident,
    pub name: Ident,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub left: Box<Expression>,
    pub op: BinaryOp,
    pub right: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Box<Expression>,
    pub args: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub ty: TypeExpr,
}

/// An anonymous procedure. Parameters carry explicit type annotations; the
/// return annotation is optional (absent means the lambda consumes its
/// arguments without producing a value).
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaExpr {
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListExpr {
    pub elements: Vec<Expression>,
    pub mutable: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleExpr {
    pub elements: Vec<Expression>,
    pub mutable: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructLiteralExpr {
    pub fields: Vec<(Ident, Expression)>,
    pub mutable: bool,
    pub span: Span,
}
