///
/// Statement AST Nodes
///
/// This module defines all statement types in the Opal language.
///
/// Key statement categories:
/// - Declarations: variable declarations, assignments
/// - Control flow: if/else chains, while loops, return
/// - Type definitions: structs, user-defined (newtype) wrappers
/// - Procedures: function / provider / consumer definitions
/// - Module-level: static values, contract implementations
///
/// Design notes:
/// - DeclarationStmt covers `var x: t;`, `var x: t = e;` and `x := e;`
///   (annotation and initializer are independently optional)
/// - IfStmt chains else-if branches the way the parser produces them
/// - StructDefStmt with mutable=false is an `immutable struct` definition
///   and is subject to the deep-immutability field check
///

use crate::source::{Span, Spanned};
use super::expressions::{Expression, Param};
use super::types::{BlockingSpec, Ident, TypeExpr};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Declaration(DeclarationStmt),
    Assign(AssignStmt),
    Expression(ExprStmt),
    Return(ReturnStmt),
    If(IfStmt),
    While(WhileStmt),
    StructDef(StructDefStmt),
    TypeDef(TypeDefStmt),
    StaticValue(StaticValueStmt),
    Procedure(ProcedureDefStmt),
    ContractImpl(ContractImplStmt),
}

impl Spanned for Statement {
    fn span(&self) -> Span {
        match self {
            Statement::Declaration(s) => s.span,
            Statement::Assign(s) => s.span,
            Statement::Expression(s) => s.span,
            Statement::Return(s) => s.span,
            Statement::If(s) => s.span,
            Statement::While(s) => s.span,
            Statement::StructDef(s) => s.span,
            Statement::TypeDef(s) => s.span,
            Statement::StaticValue(s) => s.span,
            Statement::Procedure(s) => s.span,
            Statement::ContractImpl(s) => s.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclarationStmt {
    pub name: Ident,
    pub ty: Option<TypeExpr>,
    pub init: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    pub target: Ident,
    pub value: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprStmt {
    pub expr: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub value: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub condition: Expression,
    pub then_branch: Block,
    pub else_branch: Option<ElseBranch>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    ElseIf(Box<IfStmt>),
    Else(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub condition: Expression,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDefStmt {
    pub name: Ident,
    pub fields: Vec<(Ident, TypeExpr)>,
    pub mutable: bool,
    pub span: Span,
}

/// A user-defined nominal wrapper: `newtype Name<T, ...> : wrapped`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefStmt {
    pub name: Ident,
    pub type_params: Vec<Ident>,
    pub wrapped: TypeExpr,
    pub span: Span,
}

/// `static NAME: t;` — initialization is supplied by the module subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticValueStmt {
    pub name: Ident,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Function,
    Provider,
    Consumer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractRequirementSpec {
    pub contract: Ident,
    pub type_args: Vec<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDefStmt {
    pub name: Ident,
    pub kind: ProcedureKind,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub blocking: BlockingSpec,
    pub generic_params: Vec<Ident>,
    pub required_contracts: Vec<ContractRequirementSpec>,
    pub body: Block,
    pub span: Span,
}

/// Registers that an implementation of `contract` exists for the given
/// concrete type arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractImplStmt {
    pub contract: Ident,
    pub type_args: Vec<TypeExpr>,
    pub span: Span,
}
