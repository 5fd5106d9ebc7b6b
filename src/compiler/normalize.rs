use std::collections::HashMap;

use crate::common::{
    constant::{ConstTable, Constant},
    span::{Span, Spanned},
    symbol::{ArityTable, SymbolTable},
};
use crate::compiler::{
    ast::{Ast, MatchArm, Pattern},
    nst::{Atom, Lambda, MatchBranch, Nst, NstVar, PrimOp, VarKind},
    resolve,
    syntax::{CompilerError, Ice, Syntax},
};

/// The normalizer's output: the tree in A-normal form with no
/// `Recursive` variables left, the const-table, and the symbol
/// names in id order.
#[derive(Debug)]
pub struct Normalized {
    pub nst: Nst,
    pub consts: ConstTable,
    pub symbols: Vec<String>,
}

/// Lowers a surface tree into A-normal form.
///
/// Two passes: the first hoists every non-trivial sub-expression
/// into a fresh `Let` and classifies variable references against the
/// context stack; the second (the recursion resolver) rewrites the
/// `Recursive` placeholders the first pass left behind, along with
/// any constant classifications that recursion invalidates.
pub fn normalize(ast: &Spanned<Ast>) -> Result<Normalized, CompilerError> {
    let mut normalizer = Normalizer {
        contexts: vec![Context::top()],
        symbols: SymbolTable::new(),
        arities: ArityTable::new(),
        consts: ConstTable::new(),
        gensym: 0,
    };

    let nst = normalizer.body(ast)?;
    let nst = resolve::resolve(nst)?;

    Ok(Normalized {
        nst,
        consts: normalizer.consts,
        symbols: normalizer.symbols.into_names(),
    })
}

/// What a name is bound to within one context.
#[derive(Debug, Clone, Copy)]
struct Binding {
    kind: VarKind,
    /// False when the bound value is a compile-time constant;
    /// references from inner scopes then re-materialize it instead
    /// of capturing the register.
    dynamic: bool,
}

/// One lexical scope: a lambda or match-branch body
/// (or the program itself).
#[derive(Debug)]
struct Context {
    bound: HashMap<String, Binding>,
    /// Names used here that resolve to a dynamic binding in some
    /// outer scope, in first-use order. These become the closure's
    /// captures.
    dyn_free: Vec<String>,
    /// Constant free variables already rebound locally in this
    /// scope, so each is materialized once.
    locconsts: HashMap<String, String>,
    /// The binding the scope's lambda may recur on.
    lambda_name: Option<String>,
}

impl Context {
    fn top() -> Context {
        Context {
            bound: HashMap::new(),
            dyn_free: vec![],
            locconsts: HashMap::new(),
            lambda_name: None,
        }
    }

    fn function(params: &[String], lambda_name: Option<String>) -> Context {
        let mut context = Context::top();
        for param in params {
            context.bound.insert(
                param.clone(),
                Binding {
                    kind: VarKind::Param,
                    dynamic: true,
                },
            );
        }
        context.lambda_name = lambda_name;
        return context;
    }
}

/// Bindings the current expression has accumulated so far;
/// folded into nested `Let`s once the trailing atom is known.
type Binds = Vec<(String, Atom)>;

struct Normalizer {
    contexts: Vec<Context>,
    symbols: SymbolTable,
    arities: ArityTable,
    consts: ConstTable,
    gensym: usize,
}

/// Is this atom a compile-time constant when let-bound?
/// Constants are plain literals, plain symbols, fully-static
/// compound symbols, and capture-free lambdas.
fn constant_atom(atom: &Atom) -> bool {
    match atom {
        Atom::Number(_) | Atom::Symbol(_) => true,
        Atom::Compound { fills, .. } => fills.is_empty(),
        Atom::Lambda(lambda) => lambda.free.is_empty(),
        _ => false,
    }
}

impl Normalizer {
    fn fresh(&mut self, prefix: &str) -> String {
        self.gensym += 1;
        format!("${}:{}", prefix, self.gensym)
    }

    fn context(&mut self) -> &mut Context {
        self.contexts.last_mut().unwrap()
    }

    /// Binds `name` in the current context.
    fn declare(&mut self, name: &str, kind: VarKind, dynamic: bool) {
        self.context()
            .bound
            .insert(name.to_string(), Binding { kind, dynamic });
    }

    /// Resolves a name against the context stack, innermost first.
    /// A hit in the current context comes back as-is; a dynamic hit
    /// further out is recorded as a capture; a constant hit becomes
    /// a `ConstantFree`; a lambda's own name becomes `Recursive`.
    fn lookup(&mut self, name: &str, span: &Span) -> Result<NstVar, Syntax> {
        let last = self.contexts.len() - 1;

        for depth in (0..self.contexts.len()).rev() {
            let context = &self.contexts[depth];

            if let Some(binding) = context.bound.get(name).copied() {
                if depth == last {
                    return Ok(NstVar::new(name, binding.kind));
                }
                if binding.dynamic {
                    let current = &mut self.contexts[last];
                    if !current.dyn_free.iter().any(|f| f == name) {
                        current.dyn_free.push(name.to_string());
                    }
                    return Ok(NstVar::new(name, VarKind::DynamicFree));
                }
                return Ok(NstVar::new(name, VarKind::ConstantFree));
            }

            if context.lambda_name.as_deref() == Some(name) {
                return Ok(NstVar::new(name, VarKind::Recursive));
            }
        }

        Err(Syntax::error(
            &format!("Unknown variable `{}`", name),
            span,
        ))
    }

    /// Normalizes a whole function (or program) body:
    /// accumulated bindings fold outward into nested `Let`s
    /// around the trailing atom.
    fn body(&mut self, ast: &Spanned<Ast>) -> Result<Nst, CompilerError> {
        let mut binds = vec![];
        let atom = self.atomize(ast, &mut binds)?;

        let mut nst = Nst::Atom(atom);
        for (name, atom) in binds.into_iter().rev() {
            nst = Nst::Let {
                name,
                atom,
                body: Box::new(nst),
            };
        }
        Ok(nst)
    }

    /// Makes sure a sub-expression is a variable,
    /// hoisting it into a fresh binding if it is not one already.
    fn name_expr(
        &mut self,
        ast: &Spanned<Ast>,
        binds: &mut Binds,
    ) -> Result<NstVar, CompilerError> {
        let atom = self.atomize(ast, binds)?;

        if let Atom::Var(var) = atom {
            return Ok(var);
        }

        let name = self.fresh("tmp");
        self.declare(&name, VarKind::Local, !constant_atom(&atom));
        binds.push((name.clone(), atom));
        Ok(NstVar::new(&name, VarKind::Local))
    }

    /// The atomization rules: reduces one expression to an atom,
    /// pushing the bindings it needs along the way.
    fn atomize(&mut self, ast: &Spanned<Ast>, binds: &mut Binds) -> Result<Atom, CompilerError> {
        match &ast.item {
            Ast::Number(n) => Ok(Atom::Number(*n)),

            Ast::Str(text) => Ok(Atom::Str(self.consts.string(text))),

            Ast::Symbol { name, args } => self.symbol(name, args, binds),

            Ast::Var(name) => self.variable(name, &ast.span, binds),

            Ast::Call { fun, args } => self.application(fun, args, binds),

            Ast::Lambda { name, params, body } => self.lambda(name, params, body),

            Ast::Bind { name, value } => {
                let atom = self.atomize(value, binds)?;
                self.declare(name, VarKind::Local, !constant_atom(&atom));
                binds.push((name.clone(), atom));
                Ok(Atom::Var(NstVar::new(name, VarKind::Local)))
            }

            Ast::Block(statements) => {
                let (last, rest) = statements.split_last().unwrap();

                for statement in rest {
                    let atom = self.atomize(statement, binds)?;
                    // keep non-trivial discarded values in ANF
                    if !matches!(atom, Atom::Var(_)) {
                        let name = self.fresh("seq");
                        binds.push((name, atom));
                    }
                }
                self.atomize(last, binds)
            }

            Ast::Match { subject, branches } => self.match_expr(subject, branches, binds),

            Ast::Module(fields) => self.module(fields, binds),

            Ast::Lookup { module, field } => {
                let module = self.name_expr(module, binds)?;
                let id = self.symbols.intern(field);

                let name = self.fresh("sym");
                self.declare(&name, VarKind::Local, false);
                binds.push((name.clone(), Atom::Symbol(id)));

                Ok(Atom::Lookup {
                    module,
                    symbol: NstVar::new(&name, VarKind::Local),
                })
            }
        }
    }

    /// A symbol literal. All-static payloads encode wholesale into
    /// the const-table; dynamic slots are hoisted to variables and
    /// the cell becomes a template with `Number 0` placeholders.
    fn symbol(
        &mut self,
        name: &str,
        args: &[Spanned<Ast>],
        binds: &mut Binds,
    ) -> Result<Atom, CompilerError> {
        let id = self.symbols.intern(name);

        if args.is_empty() {
            return Ok(Atom::Symbol(id));
        }

        let mut children = Vec::with_capacity(args.len());
        let mut fills = vec![];

        for (slot, arg) in args.iter().enumerate() {
            match self.static_constant(arg) {
                Some(constant) => children.push(constant),
                None => {
                    children.push(Constant::Number(0));
                    let var = self.name_expr(arg, binds)?;
                    fills.push((slot, var));
                }
            }
        }

        let word = self.consts.encode(&Constant::Compound(id, children));
        Ok(Atom::Compound {
            addr: word.payload(),
            fills,
        })
    }

    /// The constant tree of an expression, if it is static:
    /// a number, a plain symbol, or a compound symbol whose every
    /// argument is static.
    fn static_constant(&mut self, ast: &Spanned<Ast>) -> Option<Constant> {
        match &ast.item {
            Ast::Number(n) => Some(Constant::Number(*n)),
            Ast::Symbol { name, args } => {
                let id = self.symbols.intern(name);
                if args.is_empty() {
                    return Some(Constant::Symbol(id));
                }

                let mut children = Vec::with_capacity(args.len());
                for arg in args {
                    children.push(self.static_constant(arg)?);
                }
                Some(Constant::Compound(id, children))
            }
            _ => None,
        }
    }

    /// A variable in use position. Locals, params and captures pass
    /// through; constant free variables are rebound locally once per
    /// scope under a `$locconst:` name; recursive placeholders are
    /// let-bound for the resolver to rewrite.
    fn variable(
        &mut self,
        name: &str,
        span: &Span,
        binds: &mut Binds,
    ) -> Result<Atom, CompilerError> {
        let var = self.lookup(name, span)?;

        match var.kind {
            VarKind::Local | VarKind::Param | VarKind::DynamicFree => Ok(Atom::Var(var)),

            VarKind::ConstantFree => {
                if let Some(local) = self.context().locconsts.get(name) {
                    return Ok(Atom::Var(NstVar::new(local, VarKind::Local)));
                }

                let local = format!("$locconst:{}", name);
                self.context()
                    .locconsts
                    .insert(name.to_string(), local.clone());
                self.declare(&local, VarKind::Local, false);
                binds.push((local.clone(), Atom::Var(var)));
                Ok(Atom::Var(NstVar::new(&local, VarKind::Local)))
            }

            VarKind::Recursive => {
                let local = self.fresh("rec");
                self.declare(&local, VarKind::Local, true);
                binds.push((local.clone(), Atom::Var(var)));
                Ok(Atom::Var(NstVar::new(&local, VarKind::Local)))
            }
        }
    }

    /// An application. Primitive heads with exact arity become
    /// `Prim`; otherwise the head's recorded arity decides between a
    /// saturated call, a partial application, and an over-saturated
    /// call that is split in two.
    fn application(
        &mut self,
        fun: &Spanned<Ast>,
        args: &[Spanned<Ast>],
        binds: &mut Binds,
    ) -> Result<Atom, CompilerError> {
        if let Ast::Var(name) = &fun.item {
            if let Some((op, arity)) = PrimOp::lookup(name) {
                if args.len() == arity {
                    let mut refs = Vec::with_capacity(args.len());
                    for arg in args {
                        refs.push(self.name_expr(arg, binds)?);
                    }
                    return Ok(Atom::Prim { op, args: refs });
                }
            }
        }

        let arity = match &fun.item {
            Ast::Var(name) => self.arities.lookup(name),
            _ => None,
        };

        let fun = self.name_expr(fun, binds)?;
        let mut refs = Vec::with_capacity(args.len());
        for arg in args {
            refs.push(self.name_expr(arg, binds)?);
        }

        match arity {
            // arity unknown: the generic apply sorts it out at runtime
            None => Ok(Atom::Call { fun, args: refs }),

            Some((_, params)) if refs.len() == params => Ok(Atom::Call { fun, args: refs }),

            Some((captured, params)) if refs.len() < params => {
                if captured > 0 {
                    return Err(Ice::new(&format!(
                        "partial application of `{}`, which captures its environment",
                        fun.name
                    ))
                    .into());
                }
                Ok(Atom::Partial { fun, args: refs })
            }

            // over-saturated: feed the arity, then apply the result
            // to whatever is left
            Some((_, params)) => {
                let first = refs[..params].to_vec();
                let rest = refs[params..].to_vec();

                let name = self.fresh("tmp");
                self.declare(&name, VarKind::Local, true);
                binds.push((name.clone(), Atom::Call { fun, args: first }));

                Ok(Atom::Call {
                    fun: NstVar::new(&name, VarKind::Local),
                    args: rest,
                })
            }
        }
    }

    fn lambda(
        &mut self,
        name: &Option<String>,
        params: &[String],
        body: &Spanned<Ast>,
    ) -> Result<Atom, CompilerError> {
        self.contexts
            .push(Context::function(params, name.clone()));
        let nst_body = self.body(body)?;
        let context = self.contexts.pop().unwrap();

        let free = context.dyn_free;
        self.pull_up(&free);

        if let Some(name) = name {
            self.arities.record(name, free.len(), params.len());
        }

        Ok(Atom::Lambda(Lambda {
            name: name.clone(),
            free,
            params: params.to_vec(),
            body: Box::new(nst_body),
            self_slot: None,
        }))
    }

    /// A popped scope's captures that the enclosing scope cannot bind
    /// become captures of the enclosing scope as well.
    fn pull_up(&mut self, free: &[String]) {
        for name in free {
            let enclosing = self.context();
            if !enclosing.bound.contains_key(name)
                && !enclosing.dyn_free.iter().any(|f| f == name)
            {
                enclosing.dyn_free.push(name.clone());
            }
        }
    }

    fn match_expr(
        &mut self,
        subject: &Spanned<Ast>,
        arms: &[MatchArm],
        binds: &mut Binds,
    ) -> Result<Atom, CompilerError> {
        let subject = self.name_expr(subject, binds)?;

        // encode all the patterns up front so the match-data cell is
        // contiguous, then normalize the branch bodies
        let mut roots = Vec::with_capacity(arms.len());
        let mut all_captures = Vec::with_capacity(arms.len());

        for arm in arms {
            let mut captures = vec![];
            let mut slot = 0;
            let root = self.pattern(&arm.pattern, &mut slot, &mut captures)?;

            for (i, name) in captures.iter().enumerate() {
                if name != "_" && captures[..i].contains(name) {
                    return Err(Syntax::error(
                        &format!("Pattern binds `{}` more than once", name),
                        &arm.pattern.span,
                    )
                    .into());
                }
            }

            roots.push(root);
            all_captures.push(captures);
        }

        let pattern = self.consts.match_cell(&roots);
        let max_captures = all_captures.iter().map(|c| c.len()).max().unwrap_or(0);

        let mut branches = Vec::with_capacity(arms.len());
        for (arm, captures) in arms.iter().zip(all_captures) {
            self.contexts.push(Context::function(&captures, None));
            let body = self.body(&arm.body)?;
            let context = self.contexts.pop().unwrap();

            let free = context.dyn_free;
            self.pull_up(&free);

            branches.push(MatchBranch {
                free,
                captures,
                body: Box::new(body),
            });
        }

        Ok(Atom::Match {
            max_captures,
            subject,
            pattern,
            branches,
        })
    }

    /// Encodes one pattern, threading the capture slot counter and
    /// collecting captured names in slot order.
    fn pattern(
        &mut self,
        pattern: &Spanned<Pattern>,
        slot: &mut u32,
        captures: &mut Vec<String>,
    ) -> Result<Constant, CompilerError> {
        match &pattern.item {
            Pattern::Number(n) => Ok(Constant::Number(*n)),

            Pattern::Symbol { name, args } => {
                let id = self.symbols.intern(name);
                if args.is_empty() {
                    return Ok(Constant::Symbol(id));
                }

                let mut children = Vec::with_capacity(args.len());
                for arg in args {
                    children.push(self.pattern(arg, slot, captures)?);
                }
                Ok(Constant::Compound(id, children))
            }

            Pattern::Var(name) => {
                captures.push(name.clone());
                let var = Constant::MatchVar(*slot);
                *slot += 1;
                Ok(var)
            }

            Pattern::Wildcard => {
                captures.push("_".to_string());
                let var = Constant::MatchVar(*slot);
                *slot += 1;
                Ok(var)
            }
        }
    }

    /// A module literal: the fields are bound in the enclosing scope
    /// (so later fields can use earlier ones), and the module value
    /// itself is a compound symbol of interleaved key/value slots.
    fn module(
        &mut self,
        fields: &[(String, Spanned<Ast>)],
        binds: &mut Binds,
    ) -> Result<Atom, CompilerError> {
        let mut children = Vec::with_capacity(fields.len() * 2);
        let mut fills = Vec::with_capacity(fields.len());

        for (slot, (name, value)) in fields.iter().enumerate() {
            let id = self.symbols.intern(name);

            let atom = self.atomize(value, binds)?;
            self.declare(name, VarKind::Local, !constant_atom(&atom));
            binds.push((name.clone(), atom));

            children.push(Constant::Symbol(id));
            children.push(Constant::Number(0));
            fills.push((slot * 2 + 1, NstVar::new(name, VarKind::Local)));
        }

        let id = self.symbols.intern("module");
        let word = self.consts.encode(&Constant::Compound(id, children));

        Ok(Atom::Module {
            addr: word.payload(),
            fills,
        })
    }
}
