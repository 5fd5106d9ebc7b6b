use crate::common::span::Spanned;

/// The surface tree handed to the normalizer by the parser.
/// Application is by juxtaposition, so `Call` carries the whole
/// argument list rather than currying one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ast {
    Number(i32),
    Str(String),
    /// A symbol literal; plain when `args` is empty,
    /// compound otherwise.
    Symbol {
        name: String,
        args: Vec<Spanned<Ast>>,
    },
    Var(String),
    Call {
        fun: Box<Spanned<Ast>>,
        args: Vec<Spanned<Ast>>,
    },
    /// `val f (x y) = e` (named) or `val (x y) = e` (anonymous).
    /// The name is the binding the lambda may recur on.
    Lambda {
        name: Option<String>,
        params: Vec<String>,
        body: Box<Spanned<Ast>>,
    },
    /// `val x = e`
    Bind {
        name: String,
        value: Box<Spanned<Ast>>,
    },
    /// A sequence of statements; the last one is the value.
    Block(Vec<Spanned<Ast>>),
    Match {
        subject: Box<Spanned<Ast>>,
        branches: Vec<MatchArm>,
    },
    /// `module { val ... }`, a list of named fields.
    Module(Vec<(String, Spanned<Ast>)>),
    /// `m.field`
    Lookup {
        module: Box<Spanned<Ast>>,
        field: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchArm {
    pub pattern: Spanned<Pattern>,
    pub body: Spanned<Ast>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Number(i32),
    /// `:sym` or `:sym sub-patterns`.
    Symbol {
        name: String,
        args: Vec<Spanned<Pattern>>,
    },
    /// A capture variable.
    Var(String),
    /// `_`; captures like a variable, but the slot is unnamed.
    Wildcard,
}
