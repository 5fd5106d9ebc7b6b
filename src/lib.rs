//! # Siskin
//! A small expression-oriented functional language: integers,
//! symbols, compound symbols with payloads, let-bindings,
//! first-class lambdas with lexical closures, tail calls, and
//! pattern matching, compiled to a 32-register virtual machine.
//!
//! The pipeline runs source text through the lexer, the parser, the
//! A-normalizing normalizer, the recursion resolver, the code
//! generator, and the assembler, producing a `Program` of packed
//! 32-bit instruction words the `Vm` executes:
//!
//! ```
//! use siskin::{run, Source};
//! use siskin::vm::Data;
//!
//! let result = run(Source::source("add 4 7")).unwrap();
//! assert_eq!(result, Data::Number(11));
//! ```

use std::fmt;
use std::rc::Rc;

pub mod common;
pub mod compiler;
pub mod vm;

pub use common::source::Source;
pub use compiler::assemble::Program;

use compiler::{assemble::assemble, gen::gen, lex::lex, normalize::normalize, parse::parse};
use compiler::syntax::CompilerError;
use vm::{Data, Trace, Vm};

/// Everything that can go wrong between a source string and a value.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Compile(CompilerError),
    Run(Trace),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(error) => write!(f, "{}", error),
            Error::Run(trace) => write!(f, "{}", trace),
        }
    }
}

/// Compiles a source into an executable program.
pub fn compile(source: Rc<Source>) -> Result<Program, CompilerError> {
    let tokens = lex(source)?;
    let ast = parse(&tokens)?;

    let normalized = normalize(&ast)?;
    let mut consts = normalized.consts;
    let functions = gen(&normalized.nst, &mut consts)?;

    Ok(assemble(
        &functions,
        consts.into_words(),
        normalized.symbols,
    ))
}

/// Compiles and runs a source, decoding the result.
pub fn run(source: Rc<Source>) -> Result<Data, Error> {
    let program = compile(source).map_err(Error::Compile)?;

    let mut vm = Vm::init(program);
    let value = vm.run().map_err(Error::Run)?;
    Ok(vm.decode(value))
}
