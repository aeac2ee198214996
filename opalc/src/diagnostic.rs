//!
//! Diagnostic Module - Error Accumulation and Rich Reporting
//!
//! Three ordered queues accumulate everything a compilation run produces:
//! parser errors (recorded by the external parser), type errors (recorded
//! by the semantic checker) and misc errors (unused symbols, driver
//! failures). `flush` renders all three in recording order through miette
//! (line numbers, column positions, source snippets, help suggestions) and
//! returns the process exit status: non-zero iff any queue is non-empty.
//!
//! Usage:
//!   let mut sink = DiagnosticSink::new();
//!   sink.extend_type_errors(result.errors);
//!   let status = sink.flush(&source, "my_program");
//!

use miette::{Diagnostic, LabeledSpan, NamedSource, Report, SourceSpan};
use thiserror::Error;

use crate::source::{SourceFile, Span};
use crate::typechecker::TypeError;

/// A syntax error recorded by the external parser.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

/// An error outside the parser/type-checker taxonomy (unused symbols,
/// driver-level failures). Not every misc error has a usable location.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct MiscError {
    pub message: String,
    pub span: Option<Span>,
}

impl MiscError {
    pub fn new(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct OpalDiagnostic {
    message: String,
    src: NamedSource<String>,
    span: SourceSpan,
    label: String,
    help_text: Option<String>,
}

impl Diagnostic for OpalDiagnostic {
    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.src)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(LabeledSpan::new_primary_with_span(
            Some(self.label.clone()),
            self.span,
        ))))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        self.help_text
            .as_ref()
            .map(|h| Box::new(h.clone()) as Box<dyn std::fmt::Display>)
    }
}

impl OpalDiagnostic {
    pub fn from_parse_error(err: &ParseError, source: &SourceFile) -> Self {
        let (line, col) = source.line_col(err.span.start);
        Self {
            message: format!("parse error at {}:{}", line, col),
            src: NamedSource::new(&source.name, source.source.clone()),
            span: span_to_source_span(err.span),
            label: err.message.clone(),
            help_text: None,
        }
    }

    pub fn from_type_error(err: &TypeError, source: &SourceFile, unit_name: &str) -> Self {
        let span = err.span();
        let (line, col) = source.line_col(span.start);
        Self {
            message: format!("error in {}: {} at {}:{}", unit_name, err, line, col),
            src: NamedSource::new(&source.name, source.source.clone()),
            span: span_to_source_span(span),
            label: type_error_label(err),
            help_text: err.suggestion(),
        }
    }

    pub fn from_misc_error(err: &MiscError, source: &SourceFile) -> Self {
        let span = err.span.unwrap_or(Span::dummy());
        Self {
            message: err.message.clone(),
            src: NamedSource::new(&source.name, source.source.clone()),
            span: span_to_source_span(span),
            label: "here".to_string(),
            help_text: None,
        }
    }
}

fn span_to_source_span(span: Span) -> SourceSpan {
    (span.start as usize, span.len() as usize).into()
}

fn type_error_label(err: &TypeError) -> String {
    match err {
        TypeError::TypeMismatch { expected, .. } => format!("expected {}", expected),
        TypeError::UndefinedIdentifier { .. } => "not found in this scope".to_string(),
        TypeError::UninitializedReference { .. } => "may be uninitialized here".to_string(),
        TypeError::Redeclaration { .. } => "already declared".to_string(),
        TypeError::MutableFieldInImmutableStruct { field, .. } => {
            format!("mutable field '{}'", field)
        }
        TypeError::BlockingMismatch { .. } => "declared non-blocking".to_string(),
        TypeError::MissingContractImpl { contract, .. } => {
            format!("no implementation of '{}'", contract)
        }
        TypeError::ArityMismatch { expected, .. } => format!("expected {} arguments", expected),
        TypeError::NotCallable { .. } => "not a procedure".to_string(),
        TypeError::MutableStaticValue { .. } => "must be deeply immutable".to_string(),
        _ => "error".to_string(),
    }
}

/// Accumulates the three diagnostic streams of one compilation run, in
/// recording order.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    parse_errors: Vec<ParseError>,
    type_errors: Vec<TypeError>,
    misc_errors: Vec<MiscError>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_parse_error(&mut self, err: ParseError) {
        self.parse_errors.push(err);
    }

    pub fn push_type_error(&mut self, err: TypeError) {
        self.type_errors.push(err);
    }

    pub fn push_misc_error(&mut self, err: MiscError) {
        self.misc_errors.push(err);
    }

    pub fn extend_type_errors(&mut self, errors: impl IntoIterator<Item = TypeError>) {
        self.type_errors.extend(errors);
    }

    pub fn extend_misc_errors(&mut self, errors: impl IntoIterator<Item = MiscError>) {
        self.misc_errors.extend(errors);
    }

    pub fn has_errors(&self) -> bool {
        !self.parse_errors.is_empty()
            || !self.type_errors.is_empty()
            || !self.misc_errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.parse_errors.len() + self.type_errors.len() + self.misc_errors.len()
    }

    pub fn type_errors(&self) -> &[TypeError] {
        &self.type_errors
    }

    pub fn misc_errors(&self) -> &[MiscError] {
        &self.misc_errors
    }

    /// Clears all queues; required between compilation runs sharing one
    /// process.
    pub fn reset(&mut self) {
        self.parse_errors.clear();
        self.type_errors.clear();
        self.misc_errors.clear();
    }

    /// Renders every queued diagnostic in order (parse, then type, then
    /// misc; each queue in recording order) and returns the exit status.
    /// `unit_name` names the compilation unit in type-error headers.
    pub fn flush(&self, source: &SourceFile, unit_name: &str) -> i32 {
        for err in &self.parse_errors {
            let report = Report::new(OpalDiagnostic::from_parse_error(err, source));
            eprintln!("{:?}", report);
        }
        for err in &self.type_errors {
            let report = Report::new(OpalDiagnostic::from_type_error(err, source, unit_name));
            eprintln!("{:?}", report);
        }
        for err in &self.misc_errors {
            let report = Report::new(OpalDiagnostic::from_misc_error(err, source));
            eprintln!("{:?}", report);
        }
        if self.has_errors() {
            let count = self.error_count();
            eprintln!("{} error{}", count, if count == 1 { "" } else { "s" });
            1
        } else {
            0
        }
    }
}
