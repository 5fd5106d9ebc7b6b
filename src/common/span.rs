use std::fmt::{Display, Formatter, Result};
use std::rc::Rc;

use crate::common::source::Source;

/// A contiguous slice of a `Source`, stored as a byte offset and
/// length rather than a borrowed `&str`, so tokens, tree nodes, and
/// errors can carry their origin without tying the whole pipeline to
/// the source's lifetime. The empty span is the origin of anything
/// synthesized with no position, like an unexpected end of input.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Span {
    source: Option<Rc<Source>>,
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(source: &Rc<Source>, offset: usize, length: usize) -> Span {
        Span {
            source: Some(Rc::clone(source)),
            offset,
            length,
        }
    }

    /// A one-character span, for errors at a single position.
    pub fn point(source: &Rc<Source>, offset: usize) -> Span {
        Span {
            source: Some(Rc::clone(source)),
            offset,
            length: 1,
        }
    }

    /// A span with no position at all. Combining it with a real span
    /// yields the real one.
    pub fn empty() -> Span {
        Span {
            source: None,
            offset: 0,
            length: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none()
    }

    /// The smallest span covering both inputs, including anything
    /// between them. A parent node's span covers its children:
    /// ```plain
    /// val nest = :pair 1 2
    /// ^^^^^^^^             | a
    ///            ^^^^^     | b
    /// ^^^^^^^^^^^^^^^^     | combined
    /// ```
    pub fn combine(a: &Span, b: &Span) -> Span {
        if a.is_empty() {
            return b.clone();
        }
        if b.is_empty() {
            return a.clone();
        }

        let offset = a.offset.min(b.offset);
        let end = (a.offset + a.length).max(b.offset + b.length);

        return Span::new(a.source.as_ref().unwrap(), offset, end - offset);
    }

    /// Folds a whole list down with `Span::combine`.
    pub fn join(mut spans: Vec<Span>) -> Span {
        let mut combined = match spans.pop() {
            Some(span) => span,
            None => return Span::empty(),
        };

        while let Some(span) = spans.pop() {
            combined = Span::combine(&combined, &span)
        }

        return combined;
    }

    /// The spanned slice of the source text. Panics on an empty span
    /// or one cut along an invalid byte boundary.
    pub fn contents(&self) -> String {
        let contents = &self.source.as_ref().unwrap().contents;
        contents[self.offset..(self.offset + self.length).min(contents.len())].to_string()
    }

    /// The 0-based line and column the span starts on, found by
    /// counting newlines in everything before it.
    fn line_col(&self) -> (usize, usize) {
        let before = &self.source.as_ref().unwrap().contents[..self.offset];
        let line = before.matches('\n').count();
        let col = before.len() - before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        (line, col)
    }
}

impl Display for Span {
    /// Points at the spanned text, the way errors present it:
    /// ```plain
    /// In ./source:2:7
    ///   |
    /// 2 | add a spot
    ///   |       ^^^^
    /// ```
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let source = match &self.source {
            Some(source) => source,
            None => return writeln!(f, "In {}", "<unknown location>"),
        };

        let (line, col) = self.line_col();
        let text = source.contents.lines().nth(line).unwrap_or("");
        let number = (line + 1).to_string();
        let padding = " ".repeat(number.len());

        // clamp the underline to the end of the line
        let carrots = self.length.max(1).min(text.len().saturating_sub(col).max(1));

        writeln!(f, "In {}:{}:{}", source.path.display(), line + 1, col + 1)?;
        writeln!(f, "{} |", padding)?;
        writeln!(f, "{} | {}", number, text)?;
        writeln!(f, "{} | {}{}", padding, " ".repeat(col), "^".repeat(carrots))
    }
}

/// Anything paired with the place it came from. The lexer hands the
/// parser `Spanned<Token>`s, the parser builds `Spanned<Ast>` nodes
/// out of them, and errors pick the spans back up for display.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Spanned<T> {
    pub item: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(item: T, span: Span) -> Spanned<T> {
        Spanned { item, span }
    }
}
