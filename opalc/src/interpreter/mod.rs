//!
//! Interpreter Backend
//!
//! Tree-walk evaluation of a checked program. The interpreter reuses the
//! scoped symbol table: values flow through `put_value`/`get_value`, lambda
//! definitions snapshot the captured bindings the checker recorded, and
//! procedure bodies run inside PROCEDURE/LAMBDA scopes with the same
//! visibility rules as checking.
//!
//! Programs are expected to have been checked first: name resolution and
//! type mismatches at runtime indicate either an unchecked program or an
//! internal inconsistency.
//!

use std::rc::Rc;

use indexmap::IndexMap;
use lasso::Rodeo;
use thiserror::Error;

use crate::ast::{self, BinaryOp, Expression, Program, Statement, UnaryOp};
use crate::runtime::{ProcedureValue, Value};
use crate::source::{Span, Spanned};
use crate::typechecker::types::Blocking;
use crate::typechecker::{Annotations, ScopeKind, SymbolTable, Type};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero { span: Span },

    #[error("variable '{name}' was read before initialization")]
    Uninitialized { name: String, span: Span },

    #[error("value of type {ty} is not callable")]
    NotCallable { ty: String, span: Span },

    #[error("operator '{op}' is not defined for {ty}")]
    InvalidOperands { op: String, ty: String, span: Span },

    #[error("{what} is not supported by the interpreter backend")]
    Unsupported { what: String, span: Span },
}

enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter<'a> {
    env: SymbolTable,
    interner: &'a Rodeo,
    annotations: &'a Annotations,
}

impl<'a> Interpreter<'a> {
    pub fn new(interner: &'a Rodeo, annotations: &'a Annotations) -> Self {
        Self {
            env: SymbolTable::new(),
            interner,
            annotations,
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        // Bind every top-level procedure before executing anything, the
        // same collect-then-run split the checker uses; earlier statements
        // may call procedures defined further down.
        for stmt in &program.statements {
            if let Statement::Procedure(p) = stmt {
                self.bind_procedure(p);
            }
        }
        for stmt in &program.statements {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    /// Evaluates a single expression against the current environment;
    /// exposed for driver-level REPL use and tests.
    pub fn eval(&mut self, expr: &Expression) -> Result<Value, RuntimeError> {
        self.eval_expr(expr)
    }

    fn exec_stmt(&mut self, stmt: &Statement) -> Result<Flow, RuntimeError> {
        match stmt {
            Statement::Declaration(d) => {
                match &d.init {
                    Some(init) => {
                        let value = self.eval_expr(init)?;
                        let ty = self
                            .annotations
                            .expr_type(init.span())
                            .cloned()
                            .unwrap_or(Type::Undecided);
                        self.env.put_value(d.name.symbol, ty, Some(value));
                    }
                    None => {
                        self.env.put_value(d.name.symbol, Type::Undecided, None);
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::Assign(a) => {
                let value = self.eval_expr(&a.value)?;
                self.env.update_value(a.target.symbol, value);
                self.env.initialize(a.target.symbol);
                Ok(Flow::Normal)
            }
            Statement::Expression(e) => {
                self.eval_expr(&e.expr)?;
                Ok(Flow::Normal)
            }
            Statement::Return(r) => {
                let value = match &r.value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Nothing,
                };
                Ok(Flow::Return(value))
            }
            Statement::If(i) => self.exec_if(i),
            Statement::While(w) => {
                loop {
                    let cond = self.eval_expr(&w.condition)?;
                    if !self.expect_bool(cond, w.condition.span())? {
                        break;
                    }
                    match self.exec_block(&w.body)? {
                        Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::Procedure(p) => {
                self.bind_procedure(p);
                Ok(Flow::Normal)
            }
            // Type-level statements have no runtime effect.
            Statement::StructDef(_) | Statement::TypeDef(_) | Statement::ContractImpl(_) => {
                Ok(Flow::Normal)
            }
            Statement::StaticValue(s) => Err(RuntimeError::Unsupported {
                what: "static value initialization".to_string(),
                span: s.span,
            }),
        }
    }

    fn bind_procedure(&mut self, p: &ast::ProcedureDefStmt) {
        let params = p
            .params
            .iter()
            .map(|param| (param.name.symbol, Type::Undecided))
            .collect();
        let procedure = Value::Procedure(Rc::new(ProcedureValue {
            params,
            body: p.body.clone(),
            captured: Vec::new(),
            is_lambda: false,
        }));
        // The binding must be procedure-kinded for visibility from other
        // procedure bodies; arg payloads are irrelevant here.
        let arity_placeholder = vec![Type::Undecided; p.params.len()];
        let ty = match p.kind {
            ast::ProcedureKind::Function => {
                Type::function(arity_placeholder, Type::Undecided, Blocking::No)
            }
            ast::ProcedureKind::Provider => Type::provider(Type::Undecided, Blocking::No),
            ast::ProcedureKind::Consumer => Type::consumer(arity_placeholder, Blocking::No),
        };
        self.env.put_value(p.name.symbol, ty, Some(procedure));
    }

    fn exec_if(&mut self, stmt: &ast::IfStmt) -> Result<Flow, RuntimeError> {
        let cond = self.eval_expr(&stmt.condition)?;
        if self.expect_bool(cond, stmt.condition.span())? {
            return self.exec_block(&stmt.then_branch);
        }
        match &stmt.else_branch {
            None => Ok(Flow::Normal),
            Some(ast::ElseBranch::ElseIf(next)) => self.exec_if(next),
            Some(ast::ElseBranch::Else(block)) => self.exec_block(block),
        }
    }

    fn exec_block(&mut self, block: &ast::Block) -> Result<Flow, RuntimeError> {
        self.env.enter_scope(ScopeKind::Block);
        let flow = self.exec_stmts(&block.statements);
        self.env.exit_scope(false);
        flow
    }

    fn exec_stmts(&mut self, statements: &[Statement]) -> Result<Flow, RuntimeError> {
        for stmt in statements {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_expr(&mut self, expr: &Expression) -> Result<Value, RuntimeError> {
        match expr {
            Expression::Literal(lit) => Ok(match &lit.value {
                ast::Literal::Int(v) => Value::Int(*v),
                ast::Literal::Float(v) => Value::Float(*v),
                ast::Literal::Str(s) => Value::str(s),
                ast::Literal::Bool(b) => Value::Bool(*b),
                ast::Literal::Nothing => Value::Nothing,
            }),
            Expression::Identifier(ident) => {
                self.env.get_value(ident.ident.symbol).ok_or_else(|| {
                    RuntimeError::Uninitialized {
                        name: self.interner.resolve(&ident.ident.symbol).to_string(),
                        span: ident.span,
                    }
                })
            }
            Expression::ModuleRef(mr) => Err(RuntimeError::Unsupported {
                what: "dependency module references".to_string(),
                span: mr.span,
            }),
            Expression::Binary(bin) => self.eval_binary(bin),
            Expression::Unary(un) => self.eval_unary(un),
            Expression::Call(call) => self.eval_call(call),
            Expression::Lambda(lambda) => self.eval_lambda(lambda),
            Expression::List(list) => {
                let values = list
                    .elements
                    .iter()
                    .map(|e| self.eval_expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::list(values))
            }
            Expression::Tuple(tuple) => {
                let values = tuple
                    .elements
                    .iter()
                    .map(|e| self.eval_expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Tuple(Rc::new(values)))
            }
            Expression::StructLiteral(lit) => {
                let mut fields = IndexMap::new();
                for (name, value) in &lit.fields {
                    let value = self.eval_expr(value)?;
                    fields.insert(self.interner.resolve(&name.symbol).to_string(), value);
                }
                Ok(Value::Struct(Rc::new(std::cell::RefCell::new(fields))))
            }
        }
    }

    fn eval_binary(&mut self, bin: &ast::BinaryExpr) -> Result<Value, RuntimeError> {
        // Short-circuit forms first.
        if bin.op == BinaryOp::And || bin.op == BinaryOp::Or {
            let left = self.eval_expr(&bin.left)?;
            let left = self.expect_bool(left, bin.left.span())?;
            let short_circuit = match bin.op {
                BinaryOp::And => !left,
                _ => left,
            };
            if short_circuit {
                return Ok(Value::Bool(left));
            }
            let right = self.eval_expr(&bin.right)?;
            let right = self.expect_bool(right, bin.right.span())?;
            return Ok(Value::Bool(right));
        }

        let left = self.eval_expr(&bin.left)?;
        let right = self.eval_expr(&bin.right)?;

        match bin.op {
            BinaryOp::Equals => Ok(Value::Bool(left == right)),
            BinaryOp::NotEquals => Ok(Value::Bool(left != right)),
            BinaryOp::Divide => {
                // Division always widens to float.
                let l = self.expect_numeric(&left, bin.op, bin.left.span())?;
                let r = self.expect_numeric(&right, bin.op, bin.right.span())?;
                if r == 0.0 {
                    return Err(RuntimeError::DivisionByZero { span: bin.span });
                }
                Ok(Value::Float(l / r))
            }
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply => {
                match (&left, &right) {
                    (Value::Int(l), Value::Int(r)) => Ok(Value::Int(match bin.op {
                        BinaryOp::Add => l + r,
                        BinaryOp::Subtract => l - r,
                        _ => l * r,
                    })),
                    _ => {
                        let l = self.expect_numeric(&left, bin.op, bin.left.span())?;
                        let r = self.expect_numeric(&right, bin.op, bin.right.span())?;
                        Ok(Value::Float(match bin.op {
                            BinaryOp::Add => l + r,
                            BinaryOp::Subtract => l - r,
                            _ => l * r,
                        }))
                    }
                }
            }
            BinaryOp::LessThan
            | BinaryOp::LessThanEq
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanEq => {
                let l = self.expect_numeric(&left, bin.op, bin.left.span())?;
                let r = self.expect_numeric(&right, bin.op, bin.right.span())?;
                Ok(Value::Bool(match bin.op {
                    BinaryOp::LessThan => l < r,
                    BinaryOp::LessThanEq => l <= r,
                    BinaryOp::GreaterThan => l > r,
                    _ => l >= r,
                }))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn eval_unary(&mut self, un: &ast::UnaryExpr) -> Result<Value, RuntimeError> {
        let value = self.eval_expr(&un.operand)?;
        match un.op {
            UnaryOp::Negate => match value {
                Value::Int(v) => Ok(Value::Int(-v)),
                Value::Float(v) => Ok(Value::Float(-v)),
                other => Err(RuntimeError::InvalidOperands {
                    op: un.op.symbol().to_string(),
                    ty: other.type_name().to_string(),
                    span: un.span,
                }),
            },
            UnaryOp::Not => {
                let b = self.expect_bool(value, un.operand.span())?;
                Ok(Value::Bool(!b))
            }
        }
    }

    fn eval_lambda(&mut self, lambda: &ast::LambdaExpr) -> Result<Value, RuntimeError> {
        // Snapshot exactly the bindings the checker recorded as captured.
        let mut captured = Vec::new();
        if let Some(names) = self.annotations.lambda_captures(lambda.span) {
            for name in names {
                let Some(sym) = self.interner.get(name) else {
                    continue;
                };
                let ty = self.env.get_type(sym).unwrap_or(Type::Undecided);
                if let Some(value) = self.env.get_value(sym) {
                    captured.push((sym, ty, value));
                }
            }
        }
        let params = lambda
            .params
            .iter()
            .map(|param| (param.name.symbol, Type::Undecided))
            .collect();
        Ok(Value::Procedure(Rc::new(ProcedureValue {
            params,
            body: lambda.body.clone(),
            captured,
            is_lambda: true,
        })))
    }

    fn eval_call(&mut self, call: &ast::CallExpr) -> Result<Value, RuntimeError> {
        let callee = self.eval_expr(&call.callee)?;
        let Value::Procedure(procedure) = callee else {
            return Err(RuntimeError::NotCallable {
                ty: callee.type_name().to_string(),
                span: call.span,
            });
        };

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.eval_expr(arg)?);
        }
        debug_assert_eq!(
            args.len(),
            procedure.params.len(),
            "arity should have been checked"
        );

        let kind = if procedure.is_lambda {
            ScopeKind::Lambda
        } else {
            ScopeKind::Procedure
        };
        self.env.enter_scope(kind);
        for (sym, ty, value) in &procedure.captured {
            self.env.put_with_hiding(*sym, ty.clone(), Some(value.clone()));
        }
        for ((sym, ty), value) in procedure.params.iter().zip(args) {
            self.env.put_with_hiding(*sym, ty.clone(), Some(value));
        }

        let flow = self.exec_stmts(&procedure.body.statements);
        self.env.exit_scope(false);

        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nothing),
        }
    }

    fn expect_bool(&self, value: Value, span: Span) -> Result<bool, RuntimeError> {
        value.is_truthy().ok_or_else(|| RuntimeError::InvalidOperands {
            op: "bool context".to_string(),
            ty: value.type_name().to_string(),
            span,
        })
    }

    fn expect_numeric(
        &self,
        value: &Value,
        op: BinaryOp,
        span: Span,
    ) -> Result<f64, RuntimeError> {
        match value {
            Value::Int(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            other => Err(RuntimeError::InvalidOperands {
                op: op.symbol().to_string(),
                ty: other.type_name().to_string(),
                span,
            }),
        }
    }
}
