use std::fmt;

/// Represents a runtime error, i.e. a trap.
/// The VM does not recover or restart: the first trap halts
/// execution and is reported at the public boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub kind: String,
    pub message: String,
}

impl Trace {
    pub fn error(kind: &str, message: &str) -> Trace {
        Trace {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runtime {}: {}", self.kind, self.message)
    }
}
