///
/// Semantic Analysis Integration Tests
///
/// End-to-end scenarios exercising the checker (and the interpreter) over
/// hand-built ASTs, the way the external parser would produce them. Each
/// builder method hands out a fresh span so that annotation lookups stay
/// unambiguous.
///

use lasso::Rodeo;

use opalc::ast::*;
use opalc::diagnostic::DiagnosticSink;
use opalc::interpreter::Interpreter;
use opalc::runtime::Value;
use opalc::source::{SourceFile, Span};
use opalc::typechecker::modules::{
    bind_dep_modules, ExportedProcedure, ExportedTypeDef, ModuleApi, ModuleDescriptor,
};
use opalc::typechecker::types::Blocking;
use opalc::typechecker::{check, check_with_table, CheckContext, SymbolTable, Type, TypeError};

struct B {
    rodeo: Rodeo,
    n: u32,
}

impl B {
    fn new() -> Self {
        Self {
            rodeo: Rodeo::default(),
            n: 0,
        }
    }

    fn sp(&mut self) -> Span {
        self.n += 1;
        Span::new(self.n * 16, self.n * 16 + 8)
    }

    fn id(&mut self, name: &str) -> Ident {
        let span = self.sp();
        Ident::new(self.rodeo.get_or_intern(name), span)
    }

    fn int(&mut self, value: i64) -> Expression {
        let span = self.sp();
        Expression::Literal(LiteralExpr {
            value: Literal::Int(value),
            span,
        })
    }

    fn boolean(&mut self, value: bool) -> Expression {
        let span = self.sp();
        Expression::Literal(LiteralExpr {
            value: Literal::Bool(value),
            span,
        })
    }

    fn strlit(&mut self, value: &str) -> Expression {
        let span = self.sp();
        Expression::Literal(LiteralExpr {
            value: Literal::Str(value.to_string()),
            span,
        })
    }

    fn var(&mut self, name: &str) -> Expression {
        let ident = self.id(name);
        Expression::Identifier(IdentExpr {
            ident,
            span: ident.span,
        })
    }

    fn bin(&mut self, left: Expression, op: BinaryOp, right: Expression) -> Expression {
        let span = self.sp();
        Expression::Binary(BinaryExpr {
            left: Box::new(left),
            op,
            right: Box::new(right),
            span,
        })
    }

    fn decl(&mut self, name: &str, init: Expression) -> Statement {
        let ident = self.id(name);
        let span = self.sp();
        Statement::Declaration(DeclarationStmt {
            name: ident,
            ty: None,
            init: Some(init),
            span,
        })
    }

    fn decl_typed(&mut self, name: &str, ty: TypeExpr, init: Option<Expression>) -> Statement {
        let ident = self.id(name);
        let span = self.sp();
        Statement::Declaration(DeclarationStmt {
            name: ident,
            ty: Some(ty),
            init,
            span,
        })
    }

    fn assign(&mut self, name: &str, value: Expression) -> Statement {
        let ident = self.id(name);
        let span = self.sp();
        Statement::Assign(AssignStmt {
            target: ident,
            value,
            span,
        })
    }

    /// A bare reference statement, marking the name used.
    fn use_stmt(&mut self, name: &str) -> Statement {
        let expr = self.var(name);
        let span = self.sp();
        Statement::Expression(ExprStmt { expr, span })
    }

    fn call(&mut self, name: &str, args: Vec<Expression>) -> Expression {
        let callee = self.var(name);
        let span = self.sp();
        Expression::Call(CallExpr {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    fn ret(&mut self, value: Option<Expression>) -> Statement {
        let span = self.sp();
        Statement::Return(ReturnStmt { value, span })
    }

    fn block(&mut self, statements: Vec<Statement>) -> Block {
        let span = self.sp();
        Block { statements, span }
    }

    fn function(
        &mut self,
        name: &str,
        kind: ProcedureKind,
        params: Vec<(&str, TypeExpr)>,
        ret: Option<TypeExpr>,
        blocking: BlockingSpec,
        body: Block,
    ) -> Statement {
        let ident = self.id(name);
        let params = params
            .into_iter()
            .map(|(pname, ty)| Param {
                name: self.id(pname),
                ty,
            })
            .collect();
        let span = self.sp();
        Statement::Procedure(ProcedureDefStmt {
            name: ident,
            kind,
            params,
            ret,
            blocking,
            generic_params: vec![],
            required_contracts: vec![],
            body,
            span,
        })
    }

    fn program(statements: Vec<Statement>) -> Program {
        Program::new(statements, Span::dummy())
    }
}

fn run_check(b: &B, program: &Program) -> opalc::typechecker::TypeCheckResult {
    let mut ctx = CheckContext::new();
    check(program, &b.rodeo, &mut ctx)
}

// S1: `x := 1; y := x + 2;` infers int for both, everything initialized and
// used, no diagnostics.
#[test]
fn declaration_and_inference() {
    let mut b = B::new();
    let x_ref = b.var("x");
    let two = b.int(2);
    let sum = b.bin(x_ref, BinaryOp::Add, two);
    let sum_span = match &sum {
        Expression::Binary(e) => e.span,
        _ => unreachable!(),
    };
    let one = b.int(1);
    let program = B::program(vec![
        b.decl("x", one),
        b.decl("y", sum),
        b.use_stmt("y"),
    ]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert!(result.misc_errors.is_empty(), "{:?}", result.misc_errors);
    assert_eq!(result.annotations.expr_type(sum_span), Some(&Type::Int));
}

// S2: an unread binding is reported on scope exit and the run exits
// non-zero.
#[test]
fn unused_symbol_sets_exit_status() {
    let mut b = B::new();
    let one = b.int(1);
    let program = B::program(vec![b.decl("x", one)]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty());
    assert_eq!(result.misc_errors.len(), 1);
    assert!(result.misc_errors[0].message.contains("unused symbol 'x'"));

    let mut sink = DiagnosticSink::new();
    sink.extend_type_errors(result.errors);
    sink.extend_misc_errors(result.misc_errors);
    let source = SourceFile::new("test.opal", "x := 1;");
    assert_eq!(sink.flush(&source, "test"), 1);
}

// S3: an immutable struct with a mutable field names the first offending
// field and suggests its deeply-immutable variant.
#[test]
fn immutable_struct_field_check() {
    let mut b = B::new();
    let field = b.id("a");
    let name = b.id("Box");
    let span = b.sp();
    let program = B::program(vec![Statement::StructDef(StructDefStmt {
        name,
        fields: vec![(field, TypeExpr::mut_list(TypeExpr::Int))],
        mutable: false,
        span,
    })]);

    let result = run_check(&b, &program);
    match &result.errors[0] {
        TypeError::MutableFieldInImmutableStruct {
            name,
            field,
            found,
            suggestion,
            ..
        } => {
            assert_eq!(name, "Box");
            assert_eq!(field, "a");
            assert_eq!(found, "mut list<int>");
            assert_eq!(suggestion.as_deref(), Some("list<int>"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

// S4: both branches of an exhaustive if/else initialize x, so the later
// read is fine; dropping the else makes the read possibly-uninitialized.
#[test]
fn branch_coverage_initialization() {
    for (with_else, expect_error) in [(true, false), (false, true)] {
        let mut b = B::new();
        let one = b.int(1);
        let assign_then = b.assign("x", one);
        let then_branch = b.block(vec![assign_then]);
        let else_branch = if with_else {
            let two = b.int(2);
            let assign_else = b.assign("x", two);
            let blk = b.block(vec![assign_else]);
            Some(ElseBranch::Else(blk))
        } else {
            None
        };
        let cond = b.boolean(true);
        let if_span = b.sp();
        let x_ref = b.var("x");
        let one_more = b.int(1);
        let sum = b.bin(x_ref, BinaryOp::Add, one_more);

        let program = B::program(vec![
            b.decl_typed("x", TypeExpr::Int, None),
            Statement::If(IfStmt {
                condition: cond,
                then_branch,
                else_branch,
                span: if_span,
            }),
            b.decl("y", sum),
            b.use_stmt("y"),
        ]);

        let result = run_check(&b, &program);
        let uninit = result
            .errors
            .iter()
            .any(|e| matches!(e, TypeError::UninitializedReference { .. }));
        assert_eq!(uninit, expect_error, "errors: {:?}", result.errors);
    }
}

// S5: a lambda reading an outer name records the capture and marks the
// outer binding used.
#[test]
fn lambda_capture() {
    let mut b = B::new();
    let x_ref = b.var("x");
    let ret = b.ret(Some(x_ref));
    let body = b.block(vec![ret]);
    let lambda_span = b.sp();
    let lambda = Expression::Lambda(LambdaExpr {
        params: vec![],
        ret: Some(TypeExpr::Int),
        body,
        span: lambda_span,
    });
    let one = b.int(1);
    let call = b.call("f", vec![]);

    let program = B::program(vec![
        b.decl("x", one),
        b.decl("f", lambda),
        b.decl("z", call),
        b.use_stmt("z"),
    ]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    // No unused-symbol diagnostic for x: the capture marked it used.
    assert!(result.misc_errors.is_empty(), "{:?}", result.misc_errors);
    assert_eq!(
        result.annotations.lambda_captures(lambda_span),
        Some(&["x".to_string()][..])
    );
}

// S6: a non-blocking procedure calling a blocking one is a hard error.
#[test]
fn blocking_mismatch() {
    let mut b = B::new();
    let one = b.int(1);
    let bar_ret = b.ret(Some(one));
    let bar_body = b.block(vec![bar_ret]);
    let bar = b.function(
        "bar",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::Blocking,
        bar_body,
    );

    let call_bar = b.call("bar", vec![]);
    let foo_ret = b.ret(Some(call_bar));
    let foo_body = b.block(vec![foo_ret]);
    let foo = b.function(
        "foo",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::NonBlocking,
        foo_body,
    );

    let call_foo = b.call("foo", vec![]);
    let program = B::program(vec![bar, foo, b.decl("r", call_foo), b.use_stmt("r")]);

    let result = run_check(&b, &program);
    let mismatch = result.errors.iter().find_map(|e| match e {
        TypeError::BlockingMismatch { name, via, .. } => Some((name.clone(), via.clone())),
        _ => None,
    });
    assert_eq!(mismatch, Some(("foo".to_string(), "bar".to_string())));
}

// Transitive case: baz -> foo -> blocking bar; baz is declared
// non-blocking and must also be flagged.
#[test]
fn blocking_propagates_transitively() {
    let mut b = B::new();
    let one = b.int(1);
    let bar_ret = b.ret(Some(one));
    let bar_body = b.block(vec![bar_ret]);
    let bar = b.function(
        "bar",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::Blocking,
        bar_body,
    );

    let call_bar = b.call("bar", vec![]);
    let foo_ret = b.ret(Some(call_bar));
    let foo_body = b.block(vec![foo_ret]);
    let foo = b.function(
        "foo",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::Blocking,
        foo_body,
    );

    let call_foo = b.call("foo", vec![]);
    let baz_ret = b.ret(Some(call_foo));
    let baz_body = b.block(vec![baz_ret]);
    let baz = b.function(
        "baz",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::NonBlocking,
        baz_body,
    );

    let call_baz = b.call("baz", vec![]);
    let program = B::program(vec![bar, foo, baz, b.decl("r", call_baz), b.use_stmt("r")]);

    let result = run_check(&b, &program);
    assert!(result.errors.iter().any(|e| matches!(
        e,
        TypeError::BlockingMismatch { name, .. } if name == "baz"
    )));
}

// blocking:0 procedures block only when a blocking procedure value is
// passed at position 0; the caller's declared annotation is checked
// against what was actually passed.
#[test]
fn blocking_generic_over_args() {
    for (pass_blocking, expect_violation) in [(true, false), (false, false), (true, true)] {
        // The first two rounds pass a blocking/non-blocking value from a
        // caller that may legally block; the third passes the blocking
        // value from a declared-non-blocking caller.
        let caller_blocking = if expect_violation {
            BlockingSpec::NonBlocking
        } else {
            BlockingSpec::Blocking
        };

        let mut b = B::new();
        let v1 = b.var("v");
        let bar_ret = b.ret(Some(v1));
        let bar_body = b.block(vec![bar_ret]);
        let bar = b.function(
            "bar",
            ProcedureKind::Function,
            vec![("v", TypeExpr::Int)],
            Some(TypeExpr::Int),
            BlockingSpec::Blocking,
            bar_body,
        );
        let v2 = b.var("v");
        let baz_ret = b.ret(Some(v2));
        let baz_body = b.block(vec![baz_ret]);
        let baz = b.function(
            "baz",
            ProcedureKind::Function,
            vec![("v", TypeExpr::Int)],
            Some(TypeExpr::Int),
            BlockingSpec::NonBlocking,
            baz_body,
        );

        let five = b.int(5);
        let cb_call = b.call("cb", vec![five]);
        let run_ret = b.ret(Some(cb_call));
        let run_body = b.block(vec![run_ret]);
        let run = b.function(
            "run",
            ProcedureKind::Function,
            vec![(
                "cb",
                TypeExpr::Function {
                    args: vec![TypeExpr::Int],
                    ret: Box::new(TypeExpr::Int),
                    blocking: BlockingSpec::Maybe,
                },
            )],
            Some(TypeExpr::Int),
            BlockingSpec::GenericOverArgs(vec![0]),
            run_body,
        );

        let passed = if pass_blocking { "bar" } else { "baz" };
        let passed_ref = b.var(passed);
        let run_call = b.call("run", vec![passed_ref]);
        let caller_ret = b.ret(Some(run_call));
        let caller_body = b.block(vec![caller_ret]);
        let caller = b.function(
            "caller",
            ProcedureKind::Provider,
            vec![],
            Some(TypeExpr::Int),
            caller_blocking,
            caller_body,
        );

        let other = if pass_blocking { "baz" } else { "bar" };
        let use_other = b.use_stmt(other);
        let caller_call = b.call("caller", vec![]);
        let program = B::program(vec![
            bar,
            baz,
            run,
            caller,
            b.decl("r", caller_call),
            b.use_stmt("r"),
            use_other,
        ]);

        let result = run_check(&b, &program);
        let violation = result.errors.iter().any(|e| {
            matches!(e, TypeError::BlockingMismatch { name, .. } if name == "caller")
        });
        assert_eq!(
            violation, expect_violation,
            "pass_blocking={} errors: {:?}",
            pass_blocking, result.errors
        );
    }
}

// Property 6: inside a procedure body only procedure-, module-, and
// type-definition bindings from outside resolve.
#[test]
fn procedure_boundary_gates_lookup() {
    let mut b = B::new();
    let one = b.int(1);
    let x_decl = b.decl("x", one);

    let x_ref = b.var("x");
    let ret = b.ret(Some(x_ref));
    let body = b.block(vec![ret]);
    let f = b.function(
        "f",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::NonBlocking,
        body,
    );

    let call_f = b.call("f", vec![]);
    let use_x = b.use_stmt("x");
    let program = B::program(vec![x_decl, f, b.decl("r", call_f), b.use_stmt("r"), use_x]);

    let result = run_check(&b, &program);
    assert!(result.errors.iter().any(|e| matches!(
        e,
        TypeError::UndefinedIdentifier { name, .. } if name == "x"
    )));
}

#[test]
fn procedures_visible_across_procedure_boundary() {
    let mut b = B::new();
    let one = b.int(1);
    let g_ret = b.ret(Some(one));
    let g_body = b.block(vec![g_ret]);
    let g = b.function(
        "g",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::NonBlocking,
        g_body,
    );

    let call_g = b.call("g", vec![]);
    let h_ret = b.ret(Some(call_g));
    let h_body = b.block(vec![h_ret]);
    let h = b.function(
        "h",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::NonBlocking,
        h_body,
    );

    let call_h = b.call("h", vec![]);
    let program = B::program(vec![g, h, b.decl("r", call_h), b.use_stmt("r")]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
}

#[test]
fn generic_procedure_call_infers_return_type() {
    let mut b = B::new();
    let t_param = b.id("T");
    let x_ref = b.var("x");
    let ret = b.ret(Some(x_ref));
    let body = b.block(vec![ret]);
    let name = b.id("first");
    let x_id = b.id("x");
    let t_name = b.id("T");
    let span = b.sp();
    let generic_fn = Statement::Procedure(ProcedureDefStmt {
        name,
        kind: ProcedureKind::Function,
        params: vec![Param {
            name: x_id,
            ty: TypeExpr::named(t_name),
        }],
        ret: Some(TypeExpr::named(t_param)),
        blocking: BlockingSpec::NonBlocking,
        generic_params: vec![t_param],
        required_contracts: vec![],
        body,
        span,
    });

    let five = b.int(5);
    let call = b.call("first", vec![five]);
    let call_span = match &call {
        Expression::Call(e) => e.span,
        _ => unreachable!(),
    };
    let program = B::program(vec![generic_fn, b.decl("v", call), b.use_stmt("v")]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.annotations.expr_type(call_span), Some(&Type::Int));
}

#[test]
fn missing_contract_impl_is_reported() {
    for (register_impl, expect_missing) in [(false, true), (true, false)] {
        let mut b = B::new();
        let t_param = b.id("T");
        let contract = b.id("Comparable");
        let a1 = b.var("a");
        let a2 = b.var("a");
        let eq = b.bin(a1, BinaryOp::Equals, a2);
        let ret = b.ret(Some(eq));
        let body = b.block(vec![ret]);
        let name = b.id("cmp");
        let a_id = b.id("a");
        let t_name = b.id("T");
        let t_arg = b.id("T");
        let span = b.sp();
        let generic_fn = Statement::Procedure(ProcedureDefStmt {
            name,
            kind: ProcedureKind::Function,
            params: vec![Param {
                name: a_id,
                ty: TypeExpr::named(t_name),
            }],
            ret: Some(TypeExpr::Bool),
            blocking: BlockingSpec::NonBlocking,
            generic_params: vec![t_param],
            required_contracts: vec![ContractRequirementSpec {
                contract,
                type_args: vec![TypeExpr::named(t_arg)],
            }],
            body,
            span,
        });

        let mut statements = vec![generic_fn];
        if register_impl {
            let impl_contract = b.id("Comparable");
            let impl_span = b.sp();
            statements.push(Statement::ContractImpl(ContractImplStmt {
                contract: impl_contract,
                type_args: vec![TypeExpr::Int],
                span: impl_span,
            }));
        }
        let five = b.int(5);
        let call = b.call("cmp", vec![five]);
        statements.push(b.decl("ok", call));
        statements.push(b.use_stmt("ok"));

        let result = run_check(&b, &B::program(statements));
        let missing = result
            .errors
            .iter()
            .any(|e| matches!(e, TypeError::MissingContractImpl { contract, .. } if contract == "Comparable"));
        assert_eq!(missing, expect_missing, "errors: {:?}", result.errors);
    }
}

#[test]
fn newtype_constructor_calls() {
    let mut b = B::new();
    let meters = b.id("Meters");
    let meters_span = b.sp();
    let newtype = Statement::TypeDef(TypeDefStmt {
        name: meters,
        type_params: vec![],
        wrapped: TypeExpr::Int,
        span: meters_span,
    });

    let five = b.int(5);
    let construct = b.call("Meters", vec![five]);
    let construct_span = match &construct {
        Expression::Call(e) => e.span,
        _ => unreachable!(),
    };
    let program = B::program(vec![newtype, b.decl("m", construct), b.use_stmt("m")]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.annotations.expr_type(construct_span),
        Some(&Type::user_defined("Meters"))
    );
}

#[test]
fn parameterized_newtype_constructor_infers_params() {
    let mut b = B::new();
    let boxed = b.id("Boxed");
    let t_param = b.id("T");
    let t_name = b.id("T");
    let boxed_span = b.sp();
    let newtype = Statement::TypeDef(TypeDefStmt {
        name: boxed,
        type_params: vec![t_param],
        wrapped: TypeExpr::list(TypeExpr::named(t_name)),
        span: boxed_span,
    });

    let one = b.int(1);
    let list_span = b.sp();
    let list = Expression::List(ListExpr {
        elements: vec![one],
        mutable: false,
        span: list_span,
    });
    let construct = b.call("Boxed", vec![list]);
    let construct_span = match &construct {
        Expression::Call(e) => e.span,
        _ => unreachable!(),
    };
    let program = B::program(vec![newtype, b.decl("bx", construct), b.use_stmt("bx")]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.annotations.expr_type(construct_span),
        Some(&Type::user_defined_parameterized("Boxed", vec![Type::Int]))
    );
}

#[test]
fn static_value_must_be_deeply_immutable() {
    let mut b = B::new();
    let name = b.id("CONFIG");
    let span = b.sp();
    let program = B::program(vec![Statement::StaticValue(StaticValueStmt {
        name,
        ty: TypeExpr::mut_list(TypeExpr::Int),
        span,
    })]);

    let result = run_check(&b, &program);
    assert!(matches!(
        result.errors[0],
        TypeError::MutableStaticValue { .. }
    ));
}

#[test]
fn oneof_and_set_annotation_invariants() {
    let mut b = B::new();
    let name = b.id("x");
    let span = b.sp();
    let name2 = b.id("y");
    let span2 = b.sp();
    let program = B::program(vec![
        Statement::Declaration(DeclarationStmt {
            name,
            ty: Some(TypeExpr::Oneof {
                variants: vec![TypeExpr::Int, TypeExpr::Int],
            }),
            init: None,
            span,
        }),
        Statement::Declaration(DeclarationStmt {
            name: name2,
            ty: Some(TypeExpr::Set {
                elem: Box::new(TypeExpr::Future {
                    value: Box::new(TypeExpr::Int),
                }),
                mutable: false,
            }),
            init: None,
            span: span2,
        }),
        b.use_stmt("x"),
        b.use_stmt("y"),
    ]);

    let result = run_check(&b, &program);
    assert!(result
        .errors
        .iter()
        .any(|e| matches!(e, TypeError::DuplicatedOneofVariant { .. })));
    assert!(result
        .errors
        .iter()
        .any(|e| matches!(e, TypeError::FutureNotHashable { .. })));
}

#[test]
fn dep_module_binding_and_calls() {
    let mut b = B::new();

    let api = ModuleApi {
        descriptor: ModuleDescriptor {
            project_package: "demo".to_string(),
            unique_module_name: "demo$strings".to_string(),
        },
        exported_types: vec![ExportedTypeDef {
            name: "Token".to_string(),
            param_names: vec![],
            wrapped: Type::String,
        }],
        exported_procedures: vec![ExportedProcedure {
            name: "hash".to_string(),
            signature: Type::function(vec![Type::String], Type::Int, Blocking::No),
        }],
        initializers: vec![],
        unwrappers: vec![],
    };

    let mut table = SymbolTable::new();
    let mut ctx = CheckContext::new();
    bind_dep_modules(
        &[("Strings".to_string(), api)],
        &mut table,
        &mut ctx,
        &mut b.rodeo,
    );

    let module = b.id("Strings");
    let name = b.id("hash");
    let mr_span = b.sp();
    let arg = b.strlit("abc");
    let call_span = b.sp();
    let call = Expression::Call(CallExpr {
        callee: Box::new(Expression::ModuleRef(ModuleRefExpr {
            module,
            name,
            span: mr_span,
        })),
        args: vec![arg],
        span: call_span,
    });

    let token_module = b.id("Strings");
    let token_name = b.id("Token");
    let tok = b.id("tok");
    let tok_span = b.sp();
    let program = B::program(vec![
        b.decl("h", call),
        b.use_stmt("h"),
        Statement::Declaration(DeclarationStmt {
            name: tok,
            ty: Some(TypeExpr::Named {
                module: Some(token_module),
                name: token_name,
                params: vec![],
            }),
            init: None,
            span: tok_span,
        }),
    ]);

    let result = check_with_table(&program, table, &b.rodeo, &mut ctx);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.annotations.expr_type(call_span), Some(&Type::Int));
    // `tok` is never read; that surfaces as the only misc diagnostic.
    assert_eq!(result.misc_errors.len(), 1);
}

#[test]
fn equality_requires_matching_operand_types() {
    let mut b = B::new();
    let one = b.int(1);
    let s = b.strlit("x");
    let eq = b.bin(one, BinaryOp::Equals, s);
    let program = B::program(vec![b.decl("c", eq), b.use_stmt("c")]);

    let result = run_check(&b, &program);
    assert!(matches!(
        result.errors[0],
        TypeError::OperandTypeMismatch { .. }
    ));
}

#[test]
fn interpreter_runs_checked_program() {
    let mut b = B::new();

    // function fact(n: int) -> int {
    //   if (n <= 1) { return 1; }
    //   return n * fact(n - 1);
    // }
    let n1 = b.var("n");
    let one1 = b.int(1);
    let cond = b.bin(n1, BinaryOp::LessThanEq, one1);
    let one2 = b.int(1);
    let base_ret = b.ret(Some(one2));
    let then_branch = b.block(vec![base_ret]);
    let if_span = b.sp();
    let base_case = Statement::If(IfStmt {
        condition: cond,
        then_branch,
        else_branch: None,
        span: if_span,
    });

    let n2 = b.var("n");
    let one3 = b.int(1);
    let n_minus = b.bin(n2, BinaryOp::Subtract, one3);
    let rec_call = b.call("fact", vec![n_minus]);
    let n3 = b.var("n");
    let product = b.bin(n3, BinaryOp::Multiply, rec_call);
    let rec_ret = b.ret(Some(product));

    let body = b.block(vec![base_case, rec_ret]);
    let fact = b.function(
        "fact",
        ProcedureKind::Function,
        vec![("n", TypeExpr::Int)],
        Some(TypeExpr::Int),
        BlockingSpec::NonBlocking,
        body,
    );

    let five = b.int(5);
    let call = b.call("fact", vec![five]);
    let program = B::program(vec![fact, b.decl("r", call), b.use_stmt("r")]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let r_ref = b.var("r");
    let mut interp = Interpreter::new(&b.rodeo, &result.annotations);
    interp.run(&program).unwrap();
    assert_eq!(interp.eval(&r_ref).unwrap(), Value::Int(120));
}

// Forward references the checker accepts must also run: a top-level call
// may precede the callee's defining statement.
#[test]
fn interpreter_forward_procedure_reference() {
    let mut b = B::new();

    // y := later(); function later() -> int { return 1; }
    let call = b.call("later", vec![]);
    let one = b.int(1);
    let later_ret = b.ret(Some(one));
    let later_body = b.block(vec![later_ret]);
    let later = b.function(
        "later",
        ProcedureKind::Provider,
        vec![],
        Some(TypeExpr::Int),
        BlockingSpec::NonBlocking,
        later_body,
    );
    let program = B::program(vec![b.decl("y", call), b.use_stmt("y"), later]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let y_ref = b.var("y");
    let mut interp = Interpreter::new(&b.rodeo, &result.annotations);
    interp.run(&program).unwrap();
    assert_eq!(interp.eval(&y_ref).unwrap(), Value::Int(1));
}

#[test]
fn interpreter_lambda_capture_is_a_snapshot() {
    let mut b = B::new();

    // x := 10; add := lambda(y: int) -> int { return x + y; };
    // x = 999; z := add(5);   => z == 15
    let x_ref = b.var("x");
    let y_ref = b.var("y");
    let sum = b.bin(x_ref, BinaryOp::Add, y_ref);
    let lam_ret = b.ret(Some(sum));
    let lam_body = b.block(vec![lam_ret]);
    let y_id = b.id("y");
    let lam_span = b.sp();
    let lambda = Expression::Lambda(LambdaExpr {
        params: vec![Param {
            name: y_id,
            ty: TypeExpr::Int,
        }],
        ret: Some(TypeExpr::Int),
        body: lam_body,
        span: lam_span,
    });

    let ten = b.int(10);
    let huge = b.int(999);
    let five = b.int(5);
    let call = b.call("add", vec![five]);
    let program = B::program(vec![
        b.decl("x", ten),
        b.decl("add", lambda),
        b.assign("x", huge),
        b.decl("z", call),
        b.use_stmt("z"),
        b.use_stmt("x"),
    ]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let z_ref = b.var("z");
    let mut interp = Interpreter::new(&b.rodeo, &result.annotations);
    interp.run(&program).unwrap();
    assert_eq!(interp.eval(&z_ref).unwrap(), Value::Int(15));
}

#[test]
fn interpreter_while_and_division() {
    let mut b = B::new();

    // i := 0; while (i < 3) { i = i + 1; } q := 7 / 2;
    let i_ref = b.var("i");
    let three = b.int(3);
    let cond = b.bin(i_ref, BinaryOp::LessThan, three);
    let i_ref2 = b.var("i");
    let one = b.int(1);
    let inc = b.bin(i_ref2, BinaryOp::Add, one);
    let assign = b.assign("i", inc);
    let body = b.block(vec![assign]);
    let while_span = b.sp();

    let seven = b.int(7);
    let two = b.int(2);
    let quotient = b.bin(seven, BinaryOp::Divide, two);

    let zero = b.int(0);
    let program = B::program(vec![
        b.decl("i", zero),
        Statement::While(WhileStmt {
            condition: cond,
            body,
            span: while_span,
        }),
        b.decl("q", quotient),
        b.use_stmt("q"),
        b.use_stmt("i"),
    ]);

    let result = run_check(&b, &program);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let i_final = b.var("i");
    let q_final = b.var("q");
    let mut interp = Interpreter::new(&b.rodeo, &result.annotations);
    interp.run(&program).unwrap();
    assert_eq!(interp.eval(&i_final).unwrap(), Value::Int(3));
    assert_eq!(interp.eval(&q_final).unwrap(), Value::Float(3.5));
}
