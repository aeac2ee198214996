//!
//! Statement and Expression Checking
//!
//! The tree walk at the heart of semantic analysis. Every expression form
//! supports two contracts: type inference (`infer_expr`) and type assertion
//! (`assert_expr`, which also drives contextual typing of lambdas and empty
//! list literals). Statements are checked by `check_stmt`.
//!
//! Type errors are recorded into the shared error vector and checking
//! continues with the `unknowable` placeholder; nothing is thrown. The
//! depth-first walk order of the AST is therefore exactly the diagnostic
//! order.
//!

use std::collections::{HashMap, HashSet};

use lasso::{Rodeo, Spur};

use crate::ast::{
    self, BinaryOp, BlockingSpec, Expression, ProcedureKind, Statement, TypeExpr, UnaryOp,
};
use crate::diagnostic::MiscError;
use crate::source::{Span, Spanned};

use super::annotations::Annotations;
use super::context::{CheckContext, ProcedureAttrs};
use super::env::{ScopeKind, SymbolTable, UnusedSymbol};
use super::error::TypeError;
use super::generics::{self, BindingFailure};
use super::modules::{dep_procedure_name, qualified_type_name};
use super::types::{
    Blocking, ContractRequirement, ProcedureSignature, Type, TypeConstructionError,
};

pub struct TypeInferrer<'a> {
    pub env: &'a mut SymbolTable,
    pub ctx: &'a mut CheckContext,
    pub interner: &'a Rodeo,
    pub errors: &'a mut Vec<TypeError>,
    pub misc_errors: &'a mut Vec<MiscError>,
    pub warnings: &'a mut Vec<String>,
    pub annotations: &'a mut Annotations,
    pub next_lambda_id: &'a mut u32,
    /// Side-table key of the procedure (or lambda) whose body is being
    /// checked; None at the top level.
    pub current_procedure: Option<String>,
    /// Stack of return contexts: None means the enclosing procedure is a
    /// consumer (no return value allowed).
    pub return_types: Vec<Option<Type>>,
    /// Generic type param names usable in annotations right now.
    pub generic_names: Vec<String>,
    /// Top-level statements already declared by the collection pass.
    pub predeclared: HashSet<Spur>,
    pub at_top_level: bool,
}

impl<'a> TypeInferrer<'a> {
    fn resolve(&self, symbol: Spur) -> &str {
        self.interner.resolve(&symbol)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn check_stmt(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Declaration(d) => self.check_declaration(d),
            Statement::Assign(a) => self.check_assign(a),
            Statement::Expression(e) => {
                self.infer_expr(&e.expr);
            }
            Statement::Return(r) => self.check_return(r),
            Statement::If(i) => self.check_if(i),
            Statement::While(w) => self.check_while(w),
            Statement::StructDef(s) => {
                if !(self.at_top_level && self.predeclared.contains(&s.name.symbol)) {
                    self.declare_struct(s);
                }
                self.validate_struct(s);
            }
            Statement::TypeDef(t) => {
                if !(self.at_top_level && self.predeclared.contains(&t.name.symbol)) {
                    self.declare_type_def(t);
                }
            }
            Statement::StaticValue(s) => self.check_static_value(s),
            Statement::Procedure(p) => {
                if !(self.at_top_level && self.predeclared.contains(&p.name.symbol)) {
                    self.declare_procedure(p);
                }
                self.check_procedure_body(p);
            }
            Statement::ContractImpl(c) => {
                if !self.at_top_level {
                    self.register_contract_impl(c);
                }
            }
        }
    }

    fn check_declaration(&mut self, d: &ast::DeclarationStmt) {
        let sym = d.name.symbol;
        if self.env.is_declared(sym) {
            self.errors.push(TypeError::Redeclaration {
                name: self.resolve(sym).to_string(),
                span: d.name.span,
            });
            return;
        }

        match (&d.ty, &d.init) {
            (Some(annotation), init) => {
                let declared = self.resolve_type_expr(annotation, d.span);
                if let Some(init) = init {
                    self.assert_expr(init, &declared);
                }
                self.env.observe(sym, declared);
                if init.is_some() {
                    self.env.initialize(sym);
                }
            }
            (None, Some(init)) => {
                let inferred = self.infer_expr(init);
                self.env.observe(sym, inferred);
                self.env.initialize(sym);
            }
            (None, None) => panic!(
                "Internal Compiler Error: declaration of '{}' has neither a type annotation nor an initializer",
                self.resolve(sym)
            ),
        }
    }

    fn check_assign(&mut self, a: &ast::AssignStmt) {
        let sym = a.target.symbol;
        if !self.env.is_declared(sym) {
            self.errors.push(TypeError::UndefinedIdentifier {
                name: self.resolve(sym).to_string(),
                span: a.target.span,
            });
            self.infer_expr(&a.value);
            return;
        }
        let target_ty = self
            .env
            .get_type(sym)
            .expect("Internal Compiler Error: declared binding without a type");
        self.assert_expr(&a.value, &target_ty);
        self.env.initialize(sym);
    }

    fn check_return(&mut self, r: &ast::ReturnStmt) {
        match self.return_types.last().cloned() {
            None => {
                self.errors.push(TypeError::ReturnOutsideProcedure { span: r.span });
                if let Some(value) = &r.value {
                    self.infer_expr(value);
                }
            }
            Some(None) => {
                if let Some(value) = &r.value {
                    self.errors.push(TypeError::ConsumerReturn { span: r.span });
                    self.infer_expr(value);
                }
            }
            Some(Some(expected)) => match &r.value {
                Some(value) => {
                    self.assert_expr(value, &expected);
                }
                None => {
                    self.errors.push(TypeError::MissingReturnValue {
                        expected: expected.to_string(),
                        span: r.span,
                    });
                }
            },
        }
    }

    fn check_if(&mut self, stmt: &ast::IfStmt) {
        // Branch inspection is only sound when some branch is guaranteed to
        // run, i.e. the chain ends in an else.
        let covers_all_paths = Self::chain_has_else(stmt);
        if covers_all_paths {
            self.env.begin_branch_inspection();
        }
        self.check_if_chain(stmt);
        if covers_all_paths {
            self.env.finalize_branches();
        }
    }

    fn chain_has_else(stmt: &ast::IfStmt) -> bool {
        match &stmt.else_branch {
            None => false,
            Some(ast::ElseBranch::Else(_)) => true,
            Some(ast::ElseBranch::ElseIf(next)) => Self::chain_has_else(next),
        }
    }

    fn check_if_chain(&mut self, stmt: &ast::IfStmt) {
        self.assert_expr(&stmt.condition, &Type::Bool);
        self.check_block(&stmt.then_branch);
        match &stmt.else_branch {
            None => {}
            Some(ast::ElseBranch::ElseIf(next)) => self.check_if_chain(next),
            Some(ast::ElseBranch::Else(block)) => self.check_block(block),
        }
    }

    fn check_while(&mut self, stmt: &ast::WhileStmt) {
        self.assert_expr(&stmt.condition, &Type::Bool);
        // The body may run zero times, so its initializations never merge
        // upward.
        self.check_block(&stmt.body);
    }

    fn check_block(&mut self, block: &ast::Block) {
        self.env.enter_scope(ScopeKind::Block);
        let was_top_level = std::mem::replace(&mut self.at_top_level, false);
        for stmt in &block.statements {
            self.check_stmt(stmt);
        }
        self.at_top_level = was_top_level;
        let unused = self.env.exit_scope(true);
        self.report_unused(unused, block.span);
    }

    pub fn report_unused(&mut self, unused: Vec<UnusedSymbol>, span: Span) {
        let mut unused: Vec<(String, Type)> = unused
            .into_iter()
            .map(|u| (self.resolve(u.name).to_string(), u.ty))
            .collect();
        unused.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, ty) in unused {
            if matches!(ty, Type::Struct { .. }) {
                self.warnings
                    .push(format!("struct type '{}' is defined but never used", name));
            } else {
                self.misc_errors
                    .push(MiscError::new(format!("unused symbol '{}'", name), Some(span)));
            }
        }
    }

    pub fn declare_struct(&mut self, s: &ast::StructDefStmt) {
        let sym = s.name.symbol;
        if self.env.is_declared(sym) {
            self.errors.push(TypeError::Redeclaration {
                name: self.resolve(sym).to_string(),
                span: s.name.span,
            });
            return;
        }
        let ty = self.resolve_struct_type(s);
        self.env.observe(sym, ty);
        self.env.initialize(sym);
        self.env.mark_type_def(sym);
    }

    fn resolve_struct_type(&mut self, s: &ast::StructDefStmt) -> Type {
        let fields = s
            .fields
            .iter()
            .map(|(name, te)| {
                (
                    self.resolve(name.symbol).to_string(),
                    self.resolve_type_expr(te, name.span),
                )
            })
            .collect();
        Type::structure(fields, s.mutable)
    }

    /// An immutable struct definition requires every field type to be
    /// deeply immutable; the first offending field is reported together
    /// with its deeply-immutable variant when one exists.
    fn validate_struct(&mut self, s: &ast::StructDefStmt) {
        if s.mutable {
            return;
        }
        for (field, te) in &s.fields {
            let field_ty = self.resolve_type_expr(te, field.span);
            if !field_ty.is_deeply_immutable(&self.ctx.registry) {
                let suggestion = field_ty
                    .deeply_immutable_recommendation(&self.ctx.registry)
                    .map(|t| t.to_string());
                self.errors.push(TypeError::MutableFieldInImmutableStruct {
                    name: self.resolve(s.name.symbol).to_string(),
                    field: self.resolve(field.symbol).to_string(),
                    found: field_ty.to_string(),
                    suggestion,
                    span: field.span,
                });
                break;
            }
        }
    }

    pub fn declare_type_def(&mut self, t: &ast::TypeDefStmt) {
        let sym = t.name.symbol;
        if self.env.is_declared(sym) {
            self.errors.push(TypeError::Redeclaration {
                name: self.resolve(sym).to_string(),
                span: t.name.span,
            });
            return;
        }
        let name = self.resolve(sym).to_string();
        let param_names: Vec<String> = t
            .type_params
            .iter()
            .map(|p| self.resolve(p.symbol).to_string())
            .collect();

        let depth = self.generic_names.len();
        self.generic_names.extend(param_names.iter().cloned());
        let wrapped = self.resolve_type_expr(&t.wrapped, t.span);
        self.generic_names.truncate(depth);

        self.ctx.registry.register(name.clone(), wrapped, param_names.clone());
        let params = param_names.into_iter().map(Type::generic).collect();
        self.env.observe(sym, Type::UserDefined { name, params });
        self.env.initialize(sym);
        self.env.mark_type_def(sym);
    }

    fn check_static_value(&mut self, s: &ast::StaticValueStmt) {
        let sym = s.name.symbol;
        if self.env.is_declared(sym) {
            self.errors.push(TypeError::Redeclaration {
                name: self.resolve(sym).to_string(),
                span: s.name.span,
            });
            return;
        }
        let ty = self.resolve_type_expr(&s.ty, s.span);
        self.env.observe(sym, ty.clone());
        // Actual initialization (and export validation) is handled by the
        // module subsystem.
        self.env.initialize(sym);
        self.env.mark_used(sym);

        // Static values may be read concurrently; anything mutable would be
        // a data race.
        if !matches!(ty, Type::Unknowable) && !ty.is_deeply_immutable(&self.ctx.registry) {
            self.errors.push(TypeError::MutableStaticValue {
                name: self.resolve(sym).to_string(),
                found: ty.to_string(),
                span: s.span,
            });
        }
    }

    pub fn register_contract_impl(&mut self, c: &ast::ContractImplStmt) {
        let contract = self.resolve(c.contract.symbol).to_string();
        let type_args: Vec<Type> = c
            .type_args
            .iter()
            .map(|te| self.resolve_type_expr(te, c.span))
            .collect();
        self.ctx.register_contract_impl(contract, type_args);
    }

    /// Builds the procedure's type from its declared signature and binds it
    /// at the current scope, so later siblings (and the body itself) can
    /// reference it.
    pub fn declare_procedure(&mut self, p: &ast::ProcedureDefStmt) {
        let sym = p.name.symbol;
        let name = self.resolve(sym).to_string();

        let ty = self.resolve_procedure_type(p);
        let blocking = convert_blocking(&p.blocking);

        if self.env.is_declared(sym) {
            self.errors.push(TypeError::Redeclaration {
                name,
                span: p.name.span,
            });
            return;
        }
        self.env.observe(sym, ty);
        self.env.initialize(sym);
        self.ctx
            .declare_procedure(name, ProcedureAttrs::new(blocking, p.span));
    }

    fn resolve_procedure_type(&mut self, p: &ast::ProcedureDefStmt) -> Type {
        let generic_params: Vec<String> = p
            .generic_params
            .iter()
            .map(|g| self.resolve(g.symbol).to_string())
            .collect();

        let depth = self.generic_names.len();
        self.generic_names.extend(generic_params.iter().cloned());

        let args: Vec<Type> = p
            .params
            .iter()
            .map(|param| self.resolve_type_expr(&param.ty, param.name.span))
            .collect();
        let ret = p.ret.as_ref().map(|te| self.resolve_type_expr(te, p.span));
        let required_contracts: Vec<ContractRequirement> = p
            .required_contracts
            .iter()
            .map(|req| ContractRequirement {
                contract: self.resolve(req.contract.symbol).to_string(),
                type_args: req
                    .type_args
                    .iter()
                    .map(|te| self.resolve_type_expr(te, p.span))
                    .collect(),
            })
            .collect();

        self.generic_names.truncate(depth);

        let blocking = convert_blocking(&p.blocking);
        let signature = |args: Vec<Type>, ret: Option<Type>| ProcedureSignature {
            args,
            ret: ret.map(Box::new),
            blocking: blocking.clone(),
            generic_params: generic_params.clone(),
            required_contracts: required_contracts.clone(),
        };

        match p.kind {
            ProcedureKind::Function => {
                Type::Function(signature(args, Some(ret.unwrap_or(Type::Nothing))))
            }
            ProcedureKind::Provider => {
                Type::Provider(signature(Vec::new(), Some(ret.unwrap_or(Type::Nothing))))
            }
            ProcedureKind::Consumer => Type::Consumer(signature(args, None)),
        }
    }

    fn check_procedure_body(&mut self, p: &ast::ProcedureDefStmt) {
        let name = self.resolve(p.name.symbol).to_string();

        let generic_params: Vec<String> = p
            .generic_params
            .iter()
            .map(|g| self.resolve(g.symbol).to_string())
            .collect();
        let depth = self.generic_names.len();
        self.generic_names.extend(generic_params);

        self.env.enter_scope(ScopeKind::Procedure);
        for param in &p.params {
            let ty = self.resolve_type_expr(&param.ty, param.name.span);
            // Parameters always bind fresh; writing through to a visible
            // outer binding of the same name would clobber it.
            self.env.put_with_hiding(param.name.symbol, ty, None);
            self.env.initialize(param.name.symbol);
        }

        let return_ctx = match p.kind {
            ProcedureKind::Consumer => None,
            _ => Some(
                p.ret
                    .as_ref()
                    .map(|te| self.resolve_type_expr(te, p.span))
                    .unwrap_or(Type::Nothing),
            ),
        };
        self.return_types.push(return_ctx);
        let previous = self.current_procedure.replace(name);
        let was_top_level = std::mem::replace(&mut self.at_top_level, false);

        for stmt in &p.body.statements {
            self.check_stmt(stmt);
        }

        self.at_top_level = was_top_level;
        self.current_procedure = previous;
        self.return_types.pop();

        let unused = self.env.exit_scope(true);
        self.report_unused(unused, p.span);
        self.generic_names.truncate(depth);
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn infer_expr(&mut self, expr: &Expression) -> Type {
        let ty = match expr {
            Expression::Literal(lit) => match &lit.value {
                ast::Literal::Int(_) => Type::Int,
                ast::Literal::Float(_) => Type::Float,
                ast::Literal::Str(_) => Type::String,
                ast::Literal::Bool(_) => Type::Bool,
                ast::Literal::Nothing => Type::Nothing,
            },
            Expression::Identifier(ident) => self.infer_identifier(ident),
            Expression::ModuleRef(mr) => self.infer_module_ref(mr),
            Expression::Binary(bin) => self.infer_binary(bin),
            Expression::Unary(un) => self.infer_unary(un),
            Expression::Call(call) => self.infer_call(call),
            Expression::Lambda(lambda) => self.check_lambda(lambda, None),
            Expression::List(list) => self.infer_list(list),
            Expression::Tuple(tuple) => self.infer_tuple(tuple),
            Expression::StructLiteral(lit) => self.infer_struct_literal(lit),
        };
        self.annotations.annotate_type(expr.span(), ty.clone());
        ty
    }

    /// Asserts the expression against an expected type, returning the
    /// found type. Lambdas and empty list literals are typed contextually
    /// from the expectation.
    pub fn assert_expr(&mut self, expr: &Expression, expected: &Type) -> Type {
        if let (Expression::Lambda(lambda), true) = (expr, expected.is_procedure()) {
            let found = self.check_lambda(lambda, Some(expected));
            self.annotations.annotate_type(expr.span(), found.clone());
            if !types_match(expected, &found) {
                self.errors.push(TypeError::type_mismatch(
                    expected.to_string(),
                    found.to_string(),
                    expr.span(),
                ));
            }
            return found;
        }

        if let (Expression::List(list), Type::List { elem, .. }) = (expr, expected) {
            if list.elements.is_empty() {
                let found = Type::list((**elem).clone(), list.mutable);
                self.annotations.annotate_type(expr.span(), found.clone());
                if !types_match(expected, &found) {
                    self.errors.push(TypeError::type_mismatch(
                        expected.to_string(),
                        found.to_string(),
                        expr.span(),
                    ));
                }
                return found;
            }
        }

        let found = self.infer_expr(expr);
        if !types_match(expected, &found) {
            self.errors.push(TypeError::type_mismatch(
                expected.to_string(),
                found.to_string(),
                expr.span(),
            ));
        }
        found
    }

    fn infer_identifier(&mut self, ident: &ast::IdentExpr) -> Type {
        let sym = ident.ident.symbol;
        if !self.env.is_declared(sym) {
            self.errors.push(TypeError::UndefinedIdentifier {
                name: self.resolve(sym).to_string(),
                span: ident.span,
            });
            return Type::Unknowable;
        }
        if !self.env.is_initialized(sym) {
            self.errors.push(TypeError::UninitializedReference {
                name: self.resolve(sym).to_string(),
                span: ident.span,
            });
        }
        self.env.mark_used(sym);
        self.env.get_type(sym).unwrap_or(Type::Unknowable)
    }

    fn infer_module_ref(&mut self, mr: &ast::ModuleRefExpr) -> Type {
        let alias = self.resolve(mr.module.symbol).to_string();
        if !self.ctx.dep_modules.contains_key(&alias) {
            self.errors.push(TypeError::UnknownModule {
                name: alias,
                span: mr.module.span,
            });
            return Type::Unknowable;
        }
        self.ctx.mark_module_used(&alias);

        let bound_name = dep_procedure_name(&alias, self.resolve(mr.name.symbol));
        let bound_sym = self.interner.get(&bound_name);
        match bound_sym {
            Some(sym) if self.env.is_declared(sym) => {
                self.env.mark_used(sym);
                self.env.get_type(sym).unwrap_or(Type::Unknowable)
            }
            _ => {
                self.errors.push(TypeError::UnknownModuleSymbol {
                    module: alias,
                    name: self.resolve(mr.name.symbol).to_string(),
                    span: mr.name.span,
                });
                Type::Unknowable
            }
        }
    }

    fn infer_binary(&mut self, bin: &ast::BinaryExpr) -> Type {
        let op = bin.op;

        if op.is_equality() {
            let left = self.infer_expr(&bin.left);
            let right = self.infer_expr(&bin.right);
            // Any pair of operands is comparable as long as both share one
            // type.
            if !types_match(&left, &right) {
                self.errors.push(TypeError::OperandTypeMismatch {
                    op: op.symbol().to_string(),
                    left: left.to_string(),
                    right: right.to_string(),
                    span: bin.span,
                });
            }
            return Type::Bool;
        }

        if op.is_logical() {
            self.assert_expr(&bin.left, &Type::Bool);
            self.assert_expr(&bin.right, &Type::Bool);
            return Type::Bool;
        }

        // Arithmetic and comparisons are numeric-only.
        let left = self.infer_expr(&bin.left);
        let right = self.infer_expr(&bin.right);
        let left_ok = self.assert_numeric_operand(&left, op.symbol(), bin.left.span());
        let right_ok = self.assert_numeric_operand(&right, op.symbol(), bin.right.span());
        if !left_ok || !right_ok {
            return if op.is_comparison() { Type::Bool } else { Type::Unknowable };
        }

        if op.is_comparison() {
            return Type::Bool;
        }
        if op == BinaryOp::Divide {
            // Division always widens both operands to float.
            return Type::Float;
        }
        if matches!(left, Type::Unknowable) || matches!(right, Type::Unknowable) {
            return Type::Unknowable;
        }
        if left == Type::Float || right == Type::Float {
            Type::Float
        } else {
            Type::Int
        }
    }

    fn assert_numeric_operand(&mut self, ty: &Type, op: &str, span: Span) -> bool {
        if ty.is_numeric() || matches!(ty, Type::Unknowable | Type::Undecided) {
            true
        } else {
            self.errors.push(TypeError::UnsupportedOperandType {
                op: op.to_string(),
                ty: ty.to_string(),
                span,
            });
            false
        }
    }

    fn infer_unary(&mut self, un: &ast::UnaryExpr) -> Type {
        match un.op {
            UnaryOp::Negate => {
                let ty = self.infer_expr(&un.operand);
                if self.assert_numeric_operand(&ty, un.op.symbol(), un.operand.span()) {
                    ty
                } else {
                    Type::Unknowable
                }
            }
            UnaryOp::Not => {
                self.assert_expr(&un.operand, &Type::Bool);
                Type::Bool
            }
        }
    }

    fn infer_list(&mut self, list: &ast::ListExpr) -> Type {
        let Some(first) = list.elements.first() else {
            // The element type of an empty literal is only decidable from
            // context (see assert_expr) or at runtime.
            return Type::List {
                elem: Box::new(Type::Undecided),
                mutable: list.mutable,
            };
        };
        let elem = self.infer_expr(first);
        for element in &list.elements[1..] {
            self.assert_expr(element, &elem);
        }
        Type::list(elem, list.mutable)
    }

    fn infer_tuple(&mut self, tuple: &ast::TupleExpr) -> Type {
        let elems = tuple
            .elements
            .iter()
            .map(|e| self.infer_expr(e))
            .collect();
        Type::tuple(elems, tuple.mutable)
    }

    fn infer_struct_literal(&mut self, lit: &ast::StructLiteralExpr) -> Type {
        let fields = lit
            .fields
            .iter()
            .map(|(name, value)| {
                (
                    self.resolve(name.symbol).to_string(),
                    self.infer_expr(value),
                )
            })
            .collect();
        Type::structure(fields, lit.mutable)
    }

    fn check_lambda(&mut self, lambda: &ast::LambdaExpr, expected: Option<&Type>) -> Type {
        let key = format!("$lambda${}", *self.next_lambda_id);
        *self.next_lambda_id += 1;
        // Lambdas carry no blocking annotation; whatever their bodies turn
        // out to do is baked into the resulting type below.
        self.ctx
            .declare_procedure(key.clone(), ProcedureAttrs::new(Blocking::Maybe, lambda.span));

        let expected_ret = expected
            .and_then(|t| t.signature())
            .and_then(|sig| sig.ret.as_deref().cloned());
        let return_ctx = match (&lambda.ret, expected_ret) {
            (Some(te), _) => Some(self.resolve_type_expr(te, lambda.span)),
            (None, Some(ret)) => Some(ret),
            (None, None) => None,
        };

        self.env.enter_scope(ScopeKind::Lambda);
        let mut arg_types = Vec::with_capacity(lambda.params.len());
        for param in &lambda.params {
            let ty = self.resolve_type_expr(&param.ty, param.name.span);
            // Lambda parameters may hide outer names.
            self.env.put_with_hiding(param.name.symbol, ty.clone(), None);
            self.env.initialize(param.name.symbol);
            arg_types.push(ty);
        }

        self.return_types.push(return_ctx.clone());
        let previous = self.current_procedure.replace(key.clone());
        let was_top_level = std::mem::replace(&mut self.at_top_level, false);

        for stmt in &lambda.body.statements {
            self.check_stmt(stmt);
        }

        self.at_top_level = was_top_level;
        self.current_procedure = previous;
        self.return_types.pop();

        let captured: Vec<String> = self
            .env
            .captured_in_current_scope()
            .into_iter()
            .map(|sym| self.resolve(sym).to_string())
            .collect();
        self.annotations.record_lambda_captures(lambda.span, captured);

        let unused = self.env.exit_scope(true);
        self.report_unused(unused, lambda.span);

        let effective_blocking = self
            .ctx
            .procedure_attrs(&key)
            .map(|a| a.effective_blocking)
            .unwrap_or(false);
        let blocking = if effective_blocking { Blocking::Yes } else { Blocking::No };

        match return_ctx {
            Some(ret) if lambda.params.is_empty() => Type::provider(ret, blocking),
            Some(ret) => Type::function(arg_types, ret, blocking),
            None => Type::consumer(arg_types, blocking),
        }
    }

    fn infer_call(&mut self, call: &ast::CallExpr) -> Type {
        match call.callee.as_ref() {
            Expression::Identifier(ident) => {
                let sym = ident.ident.symbol;
                if !self.env.is_declared(sym) {
                    self.errors.push(TypeError::UndefinedIdentifier {
                        name: self.resolve(sym).to_string(),
                        span: ident.span,
                    });
                    return Type::Unknowable;
                }
                if !self.env.is_initialized(sym) {
                    self.errors.push(TypeError::UninitializedReference {
                        name: self.resolve(sym).to_string(),
                        span: ident.span,
                    });
                }
                self.env.mark_used(sym);
                let ty = self.env.get_type(sym).unwrap_or(Type::Unknowable);
                self.annotations.annotate_type(ident.span, ty.clone());

                if self.env.is_type_definition(sym) {
                    if let Type::UserDefined { name, .. } = &ty {
                        let name = name.clone();
                        return self.check_constructor_call(&name, call);
                    }
                }

                let name = self.resolve(sym).to_string();
                let callee_key = self
                    .ctx
                    .procedure_attrs(&name)
                    .is_some()
                    .then(|| name.clone());
                self.check_procedure_call(&ty, callee_key, &name, call)
            }
            Expression::ModuleRef(mr) => {
                let ty = self.infer_module_ref(mr);
                self.annotations.annotate_type(mr.span, ty.clone());
                let desc = format!(
                    "{}::{}",
                    self.resolve(mr.module.symbol),
                    self.resolve(mr.name.symbol)
                );
                self.check_procedure_call(&ty, None, &desc, call)
            }
            other => {
                let ty = self.infer_expr(other);
                self.check_procedure_call(&ty, None, "<expression>", call)
            }
        }
    }

    /// Calling a user-defined type's name constructs the nominal type: one
    /// argument checked against the wrapped body, with the declared type
    /// params inferred from the argument by unification.
    fn check_constructor_call(&mut self, type_name: &str, call: &ast::CallExpr) -> Type {
        let wrapped = self
            .ctx
            .registry
            .wrapped_type(type_name)
            .unwrap_or_else(|| {
                panic!(
                    "Internal Compiler Error: unregistered user-defined type '{}'",
                    type_name
                )
            })
            .clone();
        let param_names: Vec<String> = self
            .ctx
            .registry
            .param_names(type_name)
            .unwrap_or_default()
            .to_vec();

        if call.args.len() != 1 {
            self.errors.push(TypeError::ArityMismatch {
                expected: 1,
                found: call.args.len(),
                span: call.span,
            });
            for arg in &call.args {
                self.infer_expr(arg);
            }
            return Type::user_defined(type_name);
        }
        let arg = &call.args[0];

        if param_names.is_empty() {
            self.assert_expr(arg, &wrapped);
            return Type::user_defined(type_name);
        }

        let arg_ty = self.infer_expr(arg);
        let mut bindings = HashMap::new();
        if let Err(failure) = generics::bind_generic_args(&wrapped, &arg_ty, &mut bindings) {
            self.push_binding_failure(failure, &bindings, arg.span());
        }
        let params = param_names
            .iter()
            .map(|param| match bindings.get(param) {
                Some(ty) => ty.clone(),
                None => {
                    self.errors.push(TypeError::GenericInferenceFailure {
                        param: param.clone(),
                        span: call.span,
                    });
                    Type::Unknowable
                }
            })
            .collect();
        Type::user_defined_parameterized(type_name, params)
    }

    fn check_procedure_call(
        &mut self,
        callee_ty: &Type,
        callee_key: Option<String>,
        callee_desc: &str,
        call: &ast::CallExpr,
    ) -> Type {
        let signature = match callee_ty {
            Type::Function(sig) | Type::Provider(sig) | Type::Consumer(sig) => sig.clone(),
            Type::Unknowable => {
                for arg in &call.args {
                    self.infer_expr(arg);
                }
                return Type::Unknowable;
            }
            other => {
                self.errors.push(TypeError::NotCallable {
                    ty: other.to_string(),
                    span: call.span,
                });
                for arg in &call.args {
                    self.infer_expr(arg);
                }
                return Type::Unknowable;
            }
        };

        if signature.args.len() != call.args.len() {
            self.errors.push(TypeError::ArityMismatch {
                expected: signature.args.len(),
                found: call.args.len(),
                span: call.span,
            });
            for arg in &call.args {
                self.infer_expr(arg);
            }
            return signature
                .ret
                .as_deref()
                .cloned()
                .unwrap_or(Type::Nothing);
        }

        let mut arg_types = Vec::with_capacity(call.args.len());
        let ret = if signature.is_generic() {
            let mut bindings: HashMap<String, Type> = HashMap::new();
            for (param, arg) in signature.args.iter().zip(call.args.iter()) {
                let arg_ty = self.infer_expr(arg);
                if let Err(failure) =
                    generics::bind_generic_args(param, &arg_ty, &mut bindings)
                {
                    self.push_binding_failure(failure, &bindings, arg.span());
                }
                arg_types.push(arg_ty);
            }
            for param in &signature.generic_params {
                if !bindings.contains_key(param) {
                    self.errors.push(TypeError::GenericInferenceFailure {
                        param: param.clone(),
                        span: call.span,
                    });
                }
            }

            self.check_contract_obligations(&signature, &bindings, call.span);

            signature
                .ret
                .as_deref()
                .map(|r| generics::substitute(r, &bindings))
                .unwrap_or(Type::Nothing)
        } else {
            for (param, arg) in signature.args.iter().zip(call.args.iter()) {
                arg_types.push(self.assert_expr(arg, param));
            }
            signature
                .ret
                .as_deref()
                .cloned()
                .unwrap_or(Type::Nothing)
        };

        self.check_call_blocking(&signature, callee_key, callee_desc, &arg_types);
        ret
    }

    fn push_binding_failure(
        &mut self,
        failure: BindingFailure,
        bindings: &HashMap<String, Type>,
        span: Span,
    ) {
        match failure {
            BindingFailure::Conflict { param, first, second } => {
                self.errors.push(TypeError::GenericBindingConflict {
                    param,
                    first: first.to_string(),
                    second: second.to_string(),
                    span,
                });
            }
            BindingFailure::Mismatch { expected, found } => {
                // Substitute whatever has been inferred so far so the
                // message shows concrete types where possible.
                self.errors.push(TypeError::type_mismatch(
                    expected.render(bindings),
                    found.to_string(),
                    span,
                ));
            }
        }
    }

    /// Specializing a generic procedure also specializes its contract
    /// obligations: fully concrete obligations must have a registered
    /// implementation; still-generic ones transfer onto the enclosing
    /// generic procedure.
    fn check_contract_obligations(
        &mut self,
        signature: &ProcedureSignature,
        bindings: &HashMap<String, Type>,
        span: Span,
    ) {
        for req in generics::substitute_requirements(&signature.required_contracts, bindings) {
            if req.type_args.iter().any(generics::contains_generic) {
                if let Some(current) = &self.current_procedure {
                    if let Some(attrs) = self.ctx.procedure_attrs_mut(current) {
                        if !attrs.required_contracts.contains(&req) {
                            attrs.required_contracts.push(req);
                        }
                    }
                }
            } else if !self.ctx.has_contract_impl(&req.contract, &req.type_args) {
                let args = req
                    .type_args
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.errors.push(TypeError::MissingContractImpl {
                    contract: req.contract,
                    args,
                    span,
                });
            }
        }
    }

    fn check_call_blocking(
        &mut self,
        signature: &ProcedureSignature,
        callee_key: Option<String>,
        callee_desc: &str,
        arg_types: &[Type],
    ) {
        let mut call_blocks = matches!(signature.blocking, Blocking::Yes);

        // blocking:i|j procedures block iff a blocking procedure value is
        // passed at one of the listed argument positions.
        if let Blocking::GenericOverArgs(indices) = &signature.blocking {
            for &idx in indices {
                if let Some(arg_ty) = arg_types.get(idx) {
                    if let Some(arg_sig) = arg_ty.signature() {
                        if matches!(arg_sig.blocking, Blocking::Yes) {
                            call_blocks = true;
                        }
                    }
                }
            }
        }

        if let Some(key) = &callee_key {
            if let Some(attrs) = self.ctx.procedure_attrs(key) {
                if attrs.effective_blocking {
                    call_blocks = true;
                }
            }
            if let Some(current) = self.current_procedure.clone() {
                self.ctx.record_call(&current, key);
            }
        }

        if call_blocks {
            if let Some(current) = self.current_procedure.clone() {
                self.ctx.mark_effectively_blocking(&current, callee_desc);
            }
        }
    }

    // ------------------------------------------------------------------
    // Type annotations
    // ------------------------------------------------------------------

    pub fn resolve_type_expr(&mut self, te: &TypeExpr, span: Span) -> Type {
        match te {
            TypeExpr::Int => Type::Int,
            TypeExpr::Float => Type::Float,
            TypeExpr::String => Type::String,
            TypeExpr::Bool => Type::Bool,
            TypeExpr::Nothing => Type::Nothing,
            TypeExpr::List { elem, mutable } => {
                Type::list(self.resolve_type_expr(elem, span), *mutable)
            }
            TypeExpr::Set { elem, mutable } => {
                let elem = self.resolve_type_expr(elem, span);
                self.construct_or_report(Type::set(elem, *mutable), span)
            }
            TypeExpr::Map { key, value, mutable } => {
                let key = self.resolve_type_expr(key, span);
                let value = self.resolve_type_expr(value, span);
                self.construct_or_report(Type::map(key, value, *mutable), span)
            }
            TypeExpr::Tuple { elems, mutable } => Type::tuple(
                elems.iter().map(|e| self.resolve_type_expr(e, span)).collect(),
                *mutable,
            ),
            TypeExpr::Struct { fields, mutable } => Type::structure(
                fields
                    .iter()
                    .map(|(name, ty)| {
                        (
                            self.resolve(name.symbol).to_string(),
                            self.resolve_type_expr(ty, name.span),
                        )
                    })
                    .collect(),
                *mutable,
            ),
            TypeExpr::Oneof { variants } => {
                let variants = variants
                    .iter()
                    .map(|v| self.resolve_type_expr(v, span))
                    .collect();
                self.construct_or_report(Type::oneof(variants), span)
            }
            TypeExpr::Future { value } => Type::future(self.resolve_type_expr(value, span)),
            TypeExpr::Named { module: Some(module), name, params } => {
                let alias = self.resolve(module.symbol).to_string();
                let Some(dep) = self.ctx.dep_modules.get(&alias) else {
                    self.errors.push(TypeError::UnknownModule {
                        name: alias,
                        span: module.span,
                    });
                    return Type::Unknowable;
                };
                let qualified = qualified_type_name(
                    &dep.descriptor.unique_module_name,
                    self.resolve(name.symbol),
                );
                self.ctx.mark_module_used(&alias);
                if !self.ctx.registry.contains(&qualified) {
                    self.errors.push(TypeError::UnknownTypeName {
                        name: qualified,
                        span: name.span,
                    });
                    return Type::Unknowable;
                }
                let params = params
                    .iter()
                    .map(|p| self.resolve_type_expr(p, span))
                    .collect();
                Type::UserDefined { name: qualified, params }
            }
            TypeExpr::Named { module: None, name, params } => {
                let name_str = self.resolve(name.symbol).to_string();
                if self.generic_names.contains(&name_str) {
                    return Type::generic(name_str);
                }
                if self.ctx.registry.contains(&name_str) {
                    let params = params
                        .iter()
                        .map(|p| self.resolve_type_expr(p, span))
                        .collect();
                    return Type::UserDefined { name: name_str, params };
                }
                // Locally defined struct type names resolve to the struct
                // type bound when the definition was observed.
                let sym = name.symbol;
                if self.env.is_declared(sym) && self.env.is_type_definition(sym) {
                    self.env.mark_used(sym);
                    return self.env.get_type(sym).unwrap_or(Type::Unknowable);
                }
                self.errors.push(TypeError::UnknownTypeName {
                    name: name_str,
                    span: name.span,
                });
                Type::Unknowable
            }
            TypeExpr::Function { args, ret, blocking } => {
                let args = args.iter().map(|a| self.resolve_type_expr(a, span)).collect();
                let ret = self.resolve_type_expr(ret, span);
                Type::Function(ProcedureSignature {
                    args,
                    ret: Some(Box::new(ret)),
                    blocking: convert_blocking(blocking),
                    generic_params: Vec::new(),
                    required_contracts: Vec::new(),
                })
            }
            TypeExpr::Provider { ret, blocking } => {
                let ret = self.resolve_type_expr(ret, span);
                Type::Provider(ProcedureSignature {
                    args: Vec::new(),
                    ret: Some(Box::new(ret)),
                    blocking: convert_blocking(blocking),
                    generic_params: Vec::new(),
                    required_contracts: Vec::new(),
                })
            }
            TypeExpr::Consumer { args, blocking } => {
                let args = args.iter().map(|a| self.resolve_type_expr(a, span)).collect();
                Type::Consumer(ProcedureSignature {
                    args,
                    ret: None,
                    blocking: convert_blocking(blocking),
                    generic_params: Vec::new(),
                    required_contracts: Vec::new(),
                })
            }
        }
    }

    fn construct_or_report(
        &mut self,
        result: Result<Type, TypeConstructionError>,
        span: Span,
    ) -> Type {
        match result {
            Ok(ty) => ty,
            Err(TypeConstructionError::DuplicatedOneofVariant { variant }) => {
                self.errors
                    .push(TypeError::DuplicatedOneofVariant { variant, span });
                Type::Unknowable
            }
            Err(TypeConstructionError::FutureNotHashable { ty, position }) => {
                self.errors.push(TypeError::FutureNotHashable {
                    ty,
                    position: position.to_string(),
                    span,
                });
                Type::Unknowable
            }
        }
    }
}

fn convert_blocking(spec: &BlockingSpec) -> Blocking {
    match spec {
        BlockingSpec::NonBlocking => Blocking::No,
        BlockingSpec::Blocking => Blocking::Yes,
        BlockingSpec::Maybe => Blocking::Maybe,
        BlockingSpec::GenericOverArgs(indices) => Blocking::GenericOverArgs(indices.clone()),
    }
}

/// Structural match with the two analysis placeholders acting as wildcards:
/// `unknowable` stands for an already-reported error, `undecided` for a
/// runtime-only type. Mutability is strict everywhere.
pub fn types_match(expected: &Type, found: &Type) -> bool {
    match (expected, found) {
        (Type::Unknowable, _) | (_, Type::Unknowable) => true,
        (Type::Undecided, _) | (_, Type::Undecided) => true,
        (
            Type::List { elem: a, mutable: am },
            Type::List { elem: b, mutable: bm },
        )
        | (
            Type::Set { elem: a, mutable: am },
            Type::Set { elem: b, mutable: bm },
        ) => am == bm && types_match(a, b),
        (
            Type::Map { key: ak, value: av, mutable: am },
            Type::Map { key: bk, value: bv, mutable: bm },
        ) => am == bm && types_match(ak, bk) && types_match(av, bv),
        (
            Type::Tuple { elems: a, mutable: am },
            Type::Tuple { elems: b, mutable: bm },
        ) => {
            am == bm
                && a.len() == b.len()
                && a.iter().zip(b.iter()).all(|(x, y)| types_match(x, y))
        }
        (
            Type::Struct { fields: a, mutable: am },
            Type::Struct { fields: b, mutable: bm },
        ) => {
            am == bm
                && a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|((an, at), (bn, bt))| an == bn && types_match(at, bt))
        }
        (Type::Future { value: a }, Type::Future { value: b }) => types_match(a, b),
        (
            Type::UserDefined { name: an, params: ap },
            Type::UserDefined { name: bn, params: bp },
        ) => {
            an == bn
                && ap.len() == bp.len()
                && ap.iter().zip(bp.iter()).all(|(x, y)| types_match(x, y))
        }
        (Type::Function(a), Type::Function(b))
        | (Type::Provider(a), Type::Provider(b))
        | (Type::Consumer(a), Type::Consumer(b)) => signatures_match(a, b),
        _ => expected == found,
    }
}

// A `blocking?` expectation is generic over the blocking annotation and
// accepts any procedure value of the right shape.
fn signatures_match(expected: &ProcedureSignature, found: &ProcedureSignature) -> bool {
    if expected.args.len() != found.args.len() {
        return false;
    }
    let args_ok = expected
        .args
        .iter()
        .zip(found.args.iter())
        .all(|(a, b)| types_match(a, b));
    let ret_ok = match (&expected.ret, &found.ret) {
        (Some(a), Some(b)) => types_match(a, b),
        (None, None) => true,
        _ => false,
    };
    let blocking_ok =
        expected.blocking == found.blocking || expected.blocking == Blocking::Maybe;
    args_ok && ret_ok && blocking_ok
}
