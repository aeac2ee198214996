///
/// Source Location Module
///
/// Byte ranges into the single compilation unit being checked. The checker
/// runs over one source text at a time (dependency modules contribute only
/// their parsed API surface, never source bytes), so a span is just a
/// half-open `start..end` pair of byte offsets.
///
/// `SourceFile` pairs the text with its display name so the diagnostic
/// reporter can render snippets and 1-based line/column positions.
///

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The zero span used for synthesized nodes with no source position.
    pub const fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    /// The smallest span covering both `self` and `other`; used to span a
    /// construct from its first token through its last.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

pub trait Spanned {
    fn span(&self) -> Span;
}

/// A named source text. The checker itself never reads source bytes; this
/// exists so the diagnostic reporter can render snippets and line/column
/// positions for spans produced by the external parser.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub source: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// 1-based line and (byte) column for a byte offset. Offsets past the
    /// end of the text clamp to the last position.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let upto = &self.source.as_bytes()[..(offset as usize).min(self.source.len())];
        let line = upto.iter().filter(|&&b| b == b'\n').count() as u32 + 1;
        let col = upto
            .iter()
            .rev()
            .take_while(|&&b| b != b'\n')
            .count() as u32
            + 1;
        (line, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_to_covers_both_ends() {
        // `x := f(1)` — the call spans from the callee through the closing
        // paren regardless of argument order.
        let callee = Span::new(5, 6);
        let arg = Span::new(7, 8);
        assert_eq!(callee.to(arg), Span::new(5, 8));
        assert_eq!(arg.to(callee), Span::new(5, 8));
    }

    #[test]
    fn test_span_len() {
        assert_eq!(Span::new(3, 9).len(), 6);
        assert!(Span::dummy().is_empty());
        assert!(!Span::new(3, 9).is_empty());
    }

    #[test]
    fn test_line_col_multiline() {
        let file = SourceFile::new(
            "demo.opal",
            "var x: int;\nif (true) {\n  x = 1;\n}\n",
        );
        assert_eq!(file.line_col(0), (1, 1));
        assert_eq!(file.line_col(4), (1, 5));
        assert_eq!(file.line_col(12), (2, 1));
        assert_eq!(file.line_col(26), (3, 3));
        // Past-the-end offsets clamp instead of panicking.
        assert_eq!(file.line_col(10_000), (5, 1));
    }
}
