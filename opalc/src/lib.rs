///
/// opalc - The Opal Compiler Front-End Library
///
/// This crate provides the semantic analysis core for the Opal programming
/// language. It includes:
///
/// - source: Source spans and file handling for diagnostics
/// - ast: Abstract syntax tree definitions (produced by the external parser)
/// - typechecker: Type algebra, scoped symbol table, semantic checker,
///   generics, and dependency-module binding
/// - diagnostic: Ordered diagnostic queues and rich terminal reporting
/// - runtime / interpreter: Tree-walk evaluation of checked programs
///
/// Entry points:
/// - `typechecker::check`: Check a program against a fresh symbol table
/// - `typechecker::check_with_table`: Check against a table pre-seeded with
///   dependency-module bindings
/// - `interpreter::Interpreter::run`: Evaluate a checked program
///

pub mod ast;
pub mod diagnostic;
pub mod interpreter;
pub mod runtime;
pub mod source;
pub mod typechecker;

pub use diagnostic::DiagnosticSink;
pub use source::{SourceFile, Span};
pub use typechecker::{check, check_with_table, CheckContext, SymbolTable, Type, TypeError};
