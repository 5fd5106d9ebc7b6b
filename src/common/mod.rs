//! Contains datastructures and utility functions
//! common to both the `compiler` and `vm`.
//!
//! - Source code representation and span annotations.
//! - The tagged word encoding shared by the whole pipeline.
//! - Symbol and arity tables.
//! - The const-table encoder.
//! - Opcodes and instruction packing.

pub mod source;
pub mod span;
pub mod value;
pub mod symbol;
pub mod constant;
pub mod opcode;

pub use source::Source;
pub use span::{Span, Spanned};
pub use value::Value;
