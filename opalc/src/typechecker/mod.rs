//!
//! Semantic Analysis Module
//!
//! This module provides semantic analysis for Opal programs. The checker:
//!
//! 1. Collects top-level definitions (procedures, structs, user-defined
//!    types, contract impls) so forward references resolve
//! 2. Walks every statement, asserting and inferring types against the
//!    scoped symbol table
//! 3. Runs the transitive blocking fixpoint over the recorded call graph
//! 4. Checks the root scope for unused symbols
//!
//! Entry points: `check()` runs against a fresh symbol table;
//! `check_with_table()` accepts a table pre-seeded by module binding
//! (see `modules::bind_dep_modules`).
//!
//! Type errors are collected, not thrown; the driver decides what to do
//! with the resulting `TypeCheckResult`.
//!

pub mod annotations;
pub mod context;
pub mod env;
pub mod error;
pub mod generics;
pub mod infer;
pub mod modules;
pub mod types;

use std::collections::HashSet;

use lasso::{Rodeo, Spur};

use crate::ast::{Program, Statement};
use crate::diagnostic::MiscError;

pub use annotations::Annotations;
pub use context::CheckContext;
pub use env::{ScopeKind, SymbolTable};
pub use error::{TypeError, TypeResult};
pub use types::{Type, TypeRegistry};

use infer::TypeInferrer;

#[derive(Debug)]
pub struct TypeCheckResult {
    pub errors: Vec<TypeError>,
    pub misc_errors: Vec<MiscError>,
    pub warnings: Vec<String>,
    pub annotations: Annotations,
}

impl TypeCheckResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.misc_errors.is_empty()
    }
}

pub fn check(program: &Program, interner: &Rodeo, ctx: &mut CheckContext) -> TypeCheckResult {
    check_with_table(program, SymbolTable::new(), interner, ctx)
}

/// Checks a program against a symbol table that may already hold
/// dependency-module bindings. The table is consumed: the root scope is
/// exited (with the unused-symbol check) when checking completes.
pub fn check_with_table(
    program: &Program,
    mut table: SymbolTable,
    interner: &Rodeo,
    ctx: &mut CheckContext,
) -> TypeCheckResult {
    let mut errors = Vec::new();
    let mut misc_errors = Vec::new();
    let mut warnings = Vec::new();
    let mut annotations = Annotations::new();
    let mut next_lambda_id = 0;

    {
        let mut inferrer = TypeInferrer {
            env: &mut table,
            ctx,
            interner,
            errors: &mut errors,
            misc_errors: &mut misc_errors,
            warnings: &mut warnings,
            annotations: &mut annotations,
            next_lambda_id: &mut next_lambda_id,
            current_procedure: None,
            return_types: Vec::new(),
            generic_names: Vec::new(),
            predeclared: HashSet::new(),
            at_top_level: true,
        };

        let mut predeclared: HashSet<Spur> = HashSet::new();
        for stmt in &program.statements {
            match stmt {
                Statement::Procedure(p) => {
                    inferrer.declare_procedure(p);
                    predeclared.insert(p.name.symbol);
                }
                Statement::StructDef(s) => {
                    inferrer.declare_struct(s);
                    predeclared.insert(s.name.symbol);
                }
                Statement::TypeDef(t) => {
                    inferrer.declare_type_def(t);
                    predeclared.insert(t.name.symbol);
                }
                Statement::ContractImpl(c) => {
                    inferrer.register_contract_impl(c);
                }
                _ => {}
            }
        }
        inferrer.predeclared = predeclared;

        for stmt in &program.statements {
            inferrer.check_stmt(stmt);
        }

        let unused = inferrer.env.exit_scope(true);
        inferrer.report_unused(unused, program.span);
    }

    for violation in ctx.propagate_blocking() {
        errors.push(TypeError::BlockingMismatch {
            name: violation.name,
            via: violation.via,
            span: violation.def_span,
        });
    }

    TypeCheckResult {
        errors,
        misc_errors,
        warnings,
        annotations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::source::Span;
    use lasso::Rodeo;

    fn sp(n: u32) -> Span {
        Span::new(n * 10, n * 10 + 5)
    }

    fn ident(rodeo: &mut Rodeo, name: &str, n: u32) -> Ident {
        Ident::new(rodeo.get_or_intern(name), sp(n))
    }

    fn int_lit(value: i64, n: u32) -> Expression {
        Expression::Literal(LiteralExpr {
            value: Literal::Int(value),
            span: sp(n),
        })
    }

    fn var_ref(rodeo: &mut Rodeo, name: &str, n: u32) -> Expression {
        Expression::Identifier(IdentExpr {
            ident: Ident::new(rodeo.get_or_intern(name), sp(n)),
            span: sp(n),
        })
    }

    fn declare(rodeo: &mut Rodeo, name: &str, init: Expression, n: u32) -> Statement {
        Statement::Declaration(DeclarationStmt {
            name: ident(rodeo, name, n),
            ty: None,
            init: Some(init),
            span: sp(n),
        })
    }

    #[test]
    fn test_inference_and_usage_flags() {
        // x := 1; y := x + 2;  (y read so the program is warning-free)
        let mut rodeo = Rodeo::default();
        let program = Program::new(
            vec![
                declare(&mut rodeo, "x", int_lit(1, 1), 2),
                {
                    let x_ref = var_ref(&mut rodeo, "x", 3);
                    declare(
                        &mut rodeo,
                        "y",
                        Expression::Binary(BinaryExpr {
                            left: Box::new(x_ref),
                            op: BinaryOp::Add,
                            right: Box::new(int_lit(2, 4)),
                            span: sp(5),
                        }),
                        6,
                    )
                },
                Statement::Expression(ExprStmt {
                    expr: var_ref(&mut rodeo, "y", 7),
                    span: sp(7),
                }),
            ],
            Span::dummy(),
        );

        let mut ctx = CheckContext::new();
        let result = check(&program, &rodeo, &mut ctx);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(result.misc_errors.is_empty(), "{:?}", result.misc_errors);
        assert_eq!(result.annotations.expr_type(sp(5)), Some(&Type::Int));
    }

    #[test]
    fn test_unused_symbol_reported() {
        // x := 1;  (never read)
        let mut rodeo = Rodeo::default();
        let program = Program::new(
            vec![declare(&mut rodeo, "x", int_lit(1, 1), 2)],
            Span::dummy(),
        );

        let mut ctx = CheckContext::new();
        let result = check(&program, &rodeo, &mut ctx);
        assert!(result.errors.is_empty());
        assert_eq!(result.misc_errors.len(), 1);
        assert!(result.misc_errors[0].message.contains("unused symbol 'x'"));
        assert!(!result.is_clean());
    }

    #[test]
    fn test_undefined_reference() {
        let mut rodeo = Rodeo::default();
        let program = Program::new(
            vec![Statement::Expression(ExprStmt {
                expr: var_ref(&mut rodeo, "ghost", 1),
                span: sp(1),
            })],
            Span::dummy(),
        );

        let mut ctx = CheckContext::new();
        let result = check(&program, &rodeo, &mut ctx);
        assert!(matches!(
            result.errors[0],
            TypeError::UndefinedIdentifier { .. }
        ));
    }

    #[test]
    fn test_annotated_declaration_mismatch() {
        // var x: string = 1;
        let mut rodeo = Rodeo::default();
        let program = Program::new(
            vec![Statement::Declaration(DeclarationStmt {
                name: ident(&mut rodeo, "x", 1),
                ty: Some(TypeExpr::String),
                init: Some(int_lit(1, 2)),
                span: sp(3),
            })],
            Span::dummy(),
        );

        let mut ctx = CheckContext::new();
        let result = check(&program, &rodeo, &mut ctx);
        assert!(matches!(result.errors[0], TypeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_forward_reference_to_procedure() {
        // y := later(); function later() -> int { return 1; }
        let mut rodeo = Rodeo::default();
        let later = ident(&mut rodeo, "later", 1);
        let program = Program::new(
            vec![
                {
                    let later_ref = var_ref(&mut rodeo, "later", 2);
                    declare(
                        &mut rodeo,
                        "y",
                        Expression::Call(CallExpr {
                            callee: Box::new(later_ref),
                            args: vec![],
                            span: sp(3),
                        }),
                        4,
                    )
                },
                Statement::Expression(ExprStmt {
                    expr: var_ref(&mut rodeo, "y", 5),
                    span: sp(5),
                }),
                Statement::Procedure(ProcedureDefStmt {
                    name: later,
                    kind: ProcedureKind::Provider,
                    params: vec![],
                    ret: Some(TypeExpr::Int),
                    blocking: BlockingSpec::NonBlocking,
                    generic_params: vec![],
                    required_contracts: vec![],
                    body: Block {
                        statements: vec![Statement::Return(ReturnStmt {
                            value: Some(int_lit(1, 6)),
                            span: sp(6),
                        })],
                        span: sp(7),
                    },
                    span: sp(8),
                }),
            ],
            Span::dummy(),
        );

        let mut ctx = CheckContext::new();
        let result = check(&program, &rodeo, &mut ctx);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
    }

    #[test]
    fn test_redeclaration_rejected() {
        let mut rodeo = Rodeo::default();
        let program = Program::new(
            vec![
                declare(&mut rodeo, "x", int_lit(1, 1), 2),
                declare(&mut rodeo, "x", int_lit(2, 3), 4),
                Statement::Expression(ExprStmt {
                    expr: var_ref(&mut rodeo, "x", 5),
                    span: sp(5),
                }),
            ],
            Span::dummy(),
        );

        let mut ctx = CheckContext::new();
        let result = check(&program, &rodeo, &mut ctx);
        assert!(matches!(result.errors[0], TypeError::Redeclaration { .. }));
    }

    #[test]
    fn test_division_widens_to_float() {
        let mut rodeo = Rodeo::default();
        let program = Program::new(
            vec![
                declare(
                    &mut rodeo,
                    "q",
                    Expression::Binary(BinaryExpr {
                        left: Box::new(int_lit(7, 1)),
                        op: BinaryOp::Divide,
                        right: Box::new(int_lit(2, 2)),
                        span: sp(3),
                    }),
                    4,
                ),
                Statement::Expression(ExprStmt {
                    expr: var_ref(&mut rodeo, "q", 5),
                    span: sp(5),
                }),
            ],
            Span::dummy(),
        );

        let mut ctx = CheckContext::new();
        let result = check(&program, &rodeo, &mut ctx);
        assert!(result.errors.is_empty());
        assert_eq!(result.annotations.expr_type(sp(3)), Some(&Type::Float));
    }
}
