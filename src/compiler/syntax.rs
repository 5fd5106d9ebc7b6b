use std::fmt;

use crate::common::span::Span;

/// A location in source code with an optional hint
/// specific to that location, attached to a `Syntax` error.
#[derive(Debug, PartialEq, Eq)]
pub struct Note {
    pub span: Span,
    pub hint: Option<String>,
}

impl Note {
    pub fn new(span: &Span) -> Note {
        Note {
            span: span.clone(),
            hint: None,
        }
    }

    pub fn new_with_hint(hint: &str, span: &Span) -> Note {
        Note {
            span: span.clone(),
            hint: Some(hint.to_string()),
        }
    }
}

/// Represents a static error (syntax, semantics, etc.) found at
/// compile time, a mistake in the program being compiled.
/// Usually one `Note` per error is enough.
#[derive(Debug, PartialEq, Eq)]
pub struct Syntax {
    pub reason: String,
    pub notes: Vec<Note>,
}

impl Syntax {
    /// Creates a new static error with a single note that does not have a hint.
    pub fn error(reason: &str, span: &Span) -> Syntax {
        Syntax {
            reason: reason.to_string(),
            notes: vec![Note::new(span)],
        }
    }

    /// Creates a new static error with a single note that has a hint.
    pub fn error_with_note(reason: &str, note: Note) -> Syntax {
        Syntax {
            reason: reason.to_string(),
            notes: vec![note],
        }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for note in self.notes.iter() {
            write!(f, "{}", note.span)?;
            if let Some(hint) = &note.hint {
                writeln!(f, "note: {}", hint)?;
            }
        }
        write!(f, "Syntax Error: {}", self.reason)
    }
}

/// A violated invariant inside the compiler itself, not a mistake in
/// the program being compiled. Fatal; compilation does not recover.
#[derive(Debug, PartialEq, Eq)]
pub struct Ice {
    pub message: String,
}

impl Ice {
    pub fn new(message: &str) -> Ice {
        Ice {
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Ice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Internal Compiler Error: {}\nThis is a bug in the compiler, not in your program.",
            self.message
        )
    }
}

/// Anything the pipeline can fail with before the VM runs.
#[derive(Debug, PartialEq, Eq)]
pub enum CompilerError {
    Syntax(Syntax),
    Ice(Ice),
}

impl From<Syntax> for CompilerError {
    fn from(syntax: Syntax) -> CompilerError {
        CompilerError::Syntax(syntax)
    }
}

impl From<Ice> for CompilerError {
    fn from(ice: Ice) -> CompilerError {
        CompilerError::Ice(ice)
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerError::Syntax(syntax) => write!(f, "{}", syntax),
            CompilerError::Ice(ice) => write!(f, "{}", ice),
        }
    }
}
