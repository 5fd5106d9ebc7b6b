use std::collections::{HashMap, HashSet};

use crate::common::{constant::ConstTable, opcode::IMM_MAX, value::Value};
use crate::compiler::{
    nst::{Atom, Lambda, MatchBranch, Nst, NstVar, PrimOp, VarKind},
    syntax::{CompilerError, Ice},
    tac::{Reg, Tac},
};

/// The register file is 32 wide, a firm limit set by the five-bit
/// register fields in the instruction encoding. Running out is a
/// compile error, not a spill.
pub const MAX_REGISTERS: u8 = 32;

/// Lowers the normalized tree into per-function TAC listings.
/// Function 0 is the program entry. Wide literals may still be
/// pushed into the const-table on the way through.
pub fn gen(nst: &Nst, consts: &mut ConstTable) -> Result<Vec<Vec<Tac>>, CompilerError> {
    let mut gen = Gen {
        functions: vec![],
        scopes: vec![],
        consts,
    };

    gen.function(&[], &[], nst)?;
    Ok(gen.functions.into_iter().map(|f| f.unwrap()).collect())
}

/// A compile-time constant bound in some frame, re-materialized
/// wherever a `ConstantFree` reference needs it.
#[derive(Debug, Clone, Copy)]
enum CtConst {
    Number(i32),
    Symbol(u32),
    Compound(u32),
    Lambda(usize),
}

/// Register bookkeeping for one function being compiled.
/// Captures sit at registers `0..f`, parameters at `f..f+p`, and
/// locals are handed out monotonically after that.
struct Frame {
    frees: HashMap<String, Reg>,
    params: HashMap<String, Reg>,
    locals: HashMap<String, Reg>,
    /// Registers known to hold a static function address,
    /// callable with `Call` instead of `GenAp`.
    direct: HashSet<Reg>,
    next: u8,
    code: Vec<Tac>,
}

impl Frame {
    fn new(free: &[String], params: &[String]) -> Result<Frame, Ice> {
        let mut frame = Frame {
            frees: HashMap::new(),
            params: HashMap::new(),
            locals: HashMap::new(),
            direct: HashSet::new(),
            next: 0,
            code: vec![],
        };

        for name in free {
            let reg = frame.alloc()?;
            frame.frees.insert(name.clone(), reg);
        }
        for name in params {
            let reg = frame.alloc()?;
            frame.params.insert(name.clone(), reg);
        }
        return Ok(frame);
    }

    fn alloc(&mut self) -> Result<Reg, Ice> {
        if self.next >= MAX_REGISTERS {
            return Err(Ice::new("register file exhausted (32 registers per frame)"));
        }
        let reg = self.next;
        self.next += 1;
        Ok(reg)
    }

    /// The register a classified reference lives in.
    fn reg_of(&self, var: &NstVar) -> Result<Reg, Ice> {
        let reg = match var.kind {
            VarKind::Local => self.locals.get(&var.name),
            VarKind::Param => self.params.get(&var.name),
            VarKind::DynamicFree => self.frees.get(&var.name),
            VarKind::ConstantFree | VarKind::Recursive => None,
        };

        reg.copied()
            .ok_or_else(|| Ice::new(&format!("unknown variable `{}` at codegen", var.name)))
    }

    /// The register a capture-list name lives in, whatever it is here.
    fn name_reg(&self, name: &str) -> Result<Reg, Ice> {
        self.locals
            .get(name)
            .or_else(|| self.params.get(name))
            .or_else(|| self.frees.get(name))
            .copied()
            .ok_or_else(|| Ice::new(&format!("unknown capture `{}` at codegen", name)))
    }
}

struct Gen<'a> {
    functions: Vec<Option<Vec<Tac>>>,
    /// Per-frame compile-time constants, for `ConstantFree`
    /// materialization from enclosing frames.
    scopes: Vec<HashMap<String, CtConst>>,
    consts: &'a mut ConstTable,
}

impl<'a> Gen<'a> {
    /// Compiles one function body, returning its index.
    fn function(
        &mut self,
        free: &[String],
        params: &[String],
        body: &Nst,
    ) -> Result<usize, CompilerError> {
        let index = self.functions.len();
        self.functions.push(None);
        self.scopes.push(HashMap::new());

        let mut frame = Frame::new(free, params)?;
        frame.code.push(Tac::FunHeader {
            free: free.len() as u8,
            params: params.len() as u8,
        });

        if let Some(result) = self.walk(&mut frame, body)? {
            frame.code.push(Tac::Ret(result));
        }

        self.scopes.pop();
        self.functions[index] = Some(frame.code);
        Ok(index)
    }

    /// Walks a body in tail position. Returns the result register,
    /// or `None` when the body already left through a tail call.
    fn walk(&mut self, frame: &mut Frame, nst: &Nst) -> Result<Option<Reg>, CompilerError> {
        match nst {
            Nst::Let { name, atom, body } => {
                let escapes = escapes(name, body);
                let dst = frame.alloc()?;
                self.atom(frame, atom, dst, Some(name.as_str()), escapes)?;
                frame.locals.insert(name.clone(), dst);
                self.walk(frame, body)
            }

            Nst::Atom(atom) => match atom {
                // a bare reference needs no move on the way out
                Atom::Var(var)
                    if var.kind != VarKind::ConstantFree && var.kind != VarKind::Recursive =>
                {
                    Ok(Some(frame.reg_of(var)?))
                }

                Atom::Call { fun, args } => {
                    self.stage(frame, args)?;
                    let fun = frame.reg_of(fun)?;
                    let call = if frame.direct.contains(&fun) {
                        Tac::TailCall {
                            fun,
                            args: args.len() as u8,
                        }
                    } else {
                        Tac::TailGenAp {
                            fun,
                            args: args.len() as u8,
                        }
                    };
                    frame.code.push(call);
                    Ok(None)
                }

                Atom::Match {
                    max_captures,
                    subject,
                    pattern,
                    branches,
                } => {
                    self.match_dispatch(frame, *max_captures, subject, *pattern, branches, None)?;
                    Ok(None)
                }

                _ => {
                    let dst = frame.alloc()?;
                    self.atom(frame, atom, dst, None, true)?;
                    Ok(Some(dst))
                }
            },
        }
    }

    /// The per-atom emission rules.
    fn atom(
        &mut self,
        frame: &mut Frame,
        atom: &Atom,
        dst: Reg,
        name: Option<&str>,
        escapes: bool,
    ) -> Result<(), CompilerError> {
        match atom {
            Atom::Number(n) => {
                self.load_number(frame, dst, *n);
                self.record(name, CtConst::Number(*n));
            }

            Atom::Symbol(id) => {
                frame.code.push(Tac::LoadPs(dst, *id));
                self.record(name, CtConst::Symbol(*id));
            }

            Atom::Str(value) => {
                let cell = self.consts.value_cell(*value);
                frame.code.push(Tac::LoadC(dst, cell));
            }

            Atom::Compound { addr, fills } | Atom::Module { addr, fills } => {
                if fills.is_empty() && matches!(atom, Atom::Compound { .. }) {
                    frame.code.push(Tac::LoadCs(dst, *addr));
                    self.record(name, CtConst::Compound(*addr));
                } else {
                    // a writable copy of the template, patched slot by slot
                    frame.code.push(Tac::CopySym { dst, addr: *addr });
                    for (slot, var) in fills {
                        let val = frame.reg_of(var)?;
                        frame.code.push(Tac::SetSymField {
                            sym: dst,
                            val,
                            slot: *slot as u8,
                        });
                    }
                }
            }

            Atom::Prim { op, args } => {
                let a = frame.reg_of(&args[0])?;
                let tac = match op {
                    PrimOp::Not => Tac::Not(dst, a),
                    binary => {
                        let b = frame.reg_of(&args[1])?;
                        match binary {
                            PrimOp::Add => Tac::Add(dst, a, b),
                            PrimOp::Sub => Tac::Sub(dst, a, b),
                            PrimOp::Mul => Tac::Mul(dst, a, b),
                            PrimOp::Div => Tac::Div(dst, a, b),
                            PrimOp::Lt => Tac::Lt(dst, a, b),
                            PrimOp::Gt => Tac::Gt(dst, a, b),
                            PrimOp::Eq => Tac::Eq(dst, a, b),
                            PrimOp::Or => Tac::Or(dst, a, b),
                            PrimOp::And => Tac::And(dst, a, b),
                            PrimOp::Not => unreachable!(),
                        }
                    }
                };
                frame.code.push(tac);
            }

            Atom::Var(var) => match var.kind {
                VarKind::Local | VarKind::Param | VarKind::DynamicFree => {
                    let src = frame.reg_of(var)?;
                    frame.code.push(Tac::Move(dst, src));
                    if frame.direct.contains(&src) {
                        frame.direct.insert(dst);
                    }
                }
                VarKind::ConstantFree => {
                    let constant = self.const_lookup(&var.name)?;
                    self.materialize(frame, dst, constant, name, escapes);
                }
                VarKind::Recursive => {
                    return Err(Ice::new(&format!(
                        "recursive reference `{}` survived resolution",
                        var.name
                    ))
                    .into())
                }
            },

            Atom::Lambda(lambda) => self.lambda(frame, lambda, dst, name, escapes)?,

            Atom::Call { fun, args } => {
                self.stage(frame, args)?;
                let fun = frame.reg_of(fun)?;
                let call = if frame.direct.contains(&fun) {
                    Tac::Call {
                        dst,
                        fun,
                        args: args.len() as u8,
                    }
                } else {
                    Tac::GenAp {
                        dst,
                        fun,
                        args: args.len() as u8,
                    }
                };
                frame.code.push(call);
            }

            Atom::Partial { fun, args } => {
                self.stage(frame, args)?;
                let fun = frame.reg_of(fun)?;
                frame.code.push(Tac::PartAp {
                    dst,
                    fun,
                    args: args.len() as u8,
                });
            }

            Atom::Match {
                max_captures,
                subject,
                pattern,
                branches,
            } => {
                self.match_dispatch(frame, *max_captures, subject, *pattern, branches, Some(dst))?;
            }

            Atom::Lookup { module, symbol } => {
                let module = frame.reg_of(module)?;
                let symbol = frame.reg_of(symbol)?;
                frame.code.push(Tac::ModLookup {
                    dst,
                    module,
                    symbol,
                });
            }
        }
        Ok(())
    }

    /// Small numbers ride the immediate; anything wide or negative
    /// goes through a one-word const cell.
    fn load_number(&mut self, frame: &mut Frame, dst: Reg, n: i32) {
        if n >= 0 && n as u32 <= IMM_MAX {
            frame.code.push(Tac::LoadI(dst, n as u32));
        } else {
            let cell = self.consts.value_cell(Value::number(n));
            frame.code.push(Tac::LoadC(dst, cell));
        }
    }

    fn record(&mut self, name: Option<&str>, constant: CtConst) {
        if let Some(name) = name {
            self.scopes
                .last_mut()
                .unwrap()
                .insert(name.to_string(), constant);
        }
    }

    /// Finds a constant bound in some enclosing frame.
    fn const_lookup(&self, name: &str) -> Result<CtConst, Ice> {
        for scope in self.scopes[..self.scopes.len() - 1].iter().rev() {
            if let Some(constant) = scope.get(name) {
                return Ok(*constant);
            }
        }
        Err(Ice::new(&format!(
            "constant `{}` not found in any enclosing frame",
            name
        )))
    }

    /// Re-emits an outer frame's constant into a local register.
    fn materialize(
        &mut self,
        frame: &mut Frame,
        dst: Reg,
        constant: CtConst,
        name: Option<&str>,
        escapes: bool,
    ) {
        match constant {
            CtConst::Number(n) => self.load_number(frame, dst, n),
            CtConst::Symbol(id) => frame.code.push(Tac::LoadPs(dst, id)),
            CtConst::Compound(addr) => frame.code.push(Tac::LoadCs(dst, addr)),
            CtConst::Lambda(index) => {
                frame.code.push(Tac::LoadF(dst, index));
                if escapes {
                    frame.code.push(Tac::MakeCl {
                        dst,
                        fun: dst,
                        captures: 0,
                    });
                } else {
                    frame.direct.insert(dst);
                }
            }
        }
        self.record(name, constant);
    }

    /// Closure construction. Capture-free lambdas load as bare
    /// function values and stay directly callable unless the value
    /// escapes; capturing lambdas stage their captures and wrap.
    /// A recursive lambda's self slot is patched after allocation.
    fn lambda(
        &mut self,
        frame: &mut Frame,
        lambda: &Lambda,
        dst: Reg,
        name: Option<&str>,
        escapes: bool,
    ) -> Result<(), CompilerError> {
        let index = self.function(&lambda.free, &lambda.params, &lambda.body)?;

        if lambda.free.is_empty() {
            frame.code.push(Tac::LoadF(dst, index));
            if escapes {
                frame.code.push(Tac::MakeCl {
                    dst,
                    fun: dst,
                    captures: 0,
                });
            } else {
                frame.direct.insert(dst);
            }
            self.record(name, CtConst::Lambda(index));
            return Ok(());
        }

        for (slot, free_name) in lambda.free.iter().enumerate() {
            if lambda.self_slot == Some(slot) {
                continue;
            }
            let src = frame.name_reg(free_name)?;
            frame.code.push(Tac::SetArg {
                index: slot as u8,
                src,
                count: 0,
            });
        }

        frame.code.push(Tac::LoadF(dst, index));

        if let Some(slot) = lambda.self_slot {
            // placeholder until the record exists
            frame.code.push(Tac::SetArg {
                index: slot as u8,
                src: dst,
                count: 0,
            });
        }

        frame.code.push(Tac::MakeCl {
            dst,
            fun: dst,
            captures: lambda.free.len() as u8,
        });

        if let Some(slot) = lambda.self_slot {
            frame.code.push(Tac::SetClVal {
                closure: dst,
                val: dst,
                slot: slot as u8,
            });
        }
        Ok(())
    }

    fn stage(&mut self, frame: &mut Frame, args: &[NstVar]) -> Result<(), CompilerError> {
        for (index, arg) in args.iter().enumerate() {
            let src = frame.reg_of(arg)?;
            frame.code.push(Tac::SetArg {
                index: index as u8,
                src,
                count: 0,
            });
        }
        Ok(())
    }

    /// Match lowering. Branch bodies compile to functions of their
    /// captured variables; the capture window sits at the top of the
    /// register bank; the `Match` instruction lands in a table of
    /// relative jumps, one per branch, laid out after the branch
    /// fragments are measured.
    fn match_dispatch(
        &mut self,
        frame: &mut Frame,
        max_captures: usize,
        subject: &NstVar,
        pattern: u32,
        branches: &[MatchBranch],
        dst: Option<Reg>,
    ) -> Result<(), CompilerError> {
        if max_captures as u8 > MAX_REGISTERS {
            return Err(Ice::new("match captures exceed the register file").into());
        }
        let cap_base = MAX_REGISTERS - max_captures as u8;

        // materialize each branch as a callable
        let mut branch_regs = Vec::with_capacity(branches.len());
        for branch in branches {
            let index = self.function(&branch.free, &branch.captures, &branch.body)?;
            let reg = frame.alloc()?;

            if branch.free.is_empty() {
                frame.code.push(Tac::LoadF(reg, index));
                frame.direct.insert(reg);
            } else {
                for (slot, free_name) in branch.free.iter().enumerate() {
                    let src = frame.name_reg(free_name)?;
                    frame.code.push(Tac::SetArg {
                        index: slot as u8,
                        src,
                        count: 0,
                    });
                }
                frame.code.push(Tac::LoadF(reg, index));
                frame.code.push(Tac::MakeCl {
                    dst: reg,
                    fun: reg,
                    captures: branch.free.len() as u8,
                });
            }
            branch_regs.push(reg);
        }

        let pat_reg = frame.alloc()?;
        frame.code.push(Tac::LoadAddr(pat_reg, pattern));

        if frame.next > cap_base {
            return Err(
                Ice::new("match capture window collides with allocated registers").into(),
            );
        }

        let subject = frame.reg_of(subject)?;
        frame.code.push(Tac::Match {
            subject,
            pattern: pat_reg,
            captures: cap_base,
        });

        // branch call fragments, measured before the table is laid out
        let mut fragments: Vec<Vec<Tac>> = Vec::with_capacity(branches.len());
        for (i, branch) in branches.iter().enumerate() {
            let mut code = vec![];
            let captures = branch.captures.len() as u8;

            if captures > 0 {
                // the whole capture window stages in one batched op
                code.push(Tac::SetArg {
                    index: 0,
                    src: cap_base,
                    count: captures - 1,
                });
            }

            let fun = branch_regs[i];
            let direct = frame.direct.contains(&fun);
            code.push(match (dst, direct) {
                (Some(dst), true) => Tac::Call {
                    dst,
                    fun,
                    args: captures,
                },
                (Some(dst), false) => Tac::GenAp {
                    dst,
                    fun,
                    args: captures,
                },
                (None, true) => Tac::TailCall {
                    fun,
                    args: captures,
                },
                (None, false) => Tac::TailGenAp {
                    fun,
                    args: captures,
                },
            });
            fragments.push(code);
        }

        // each fragment gets a trailing jump past the rest
        let full: Vec<usize> = fragments.iter().map(|f| f.len() + 1).collect();
        let count = fragments.len();

        let mut preceding = 0;
        for (i, len) in full.iter().enumerate() {
            frame.code.push(Tac::Jmp((count - 1 - i + preceding) as u32));
            preceding += len;
        }

        for (i, fragment) in fragments.into_iter().enumerate() {
            frame.code.extend(fragment);
            let rest: usize = full[i + 1..].iter().sum();
            frame.code.push(Tac::Jmp(rest as u32));
        }

        Ok(())
    }
}

/// Does `name` flow anywhere other than the head of a call?
/// A bound function that never escapes stays an unboxed code address
/// in a direct-call register; one that does gets wrapped into a
/// zero-capture closure so it can travel as a value.
fn escapes(name: &str, nst: &Nst) -> bool {
    match nst {
        Nst::Let { atom, body, .. } => atom_escapes(name, atom) || escapes(name, body),
        Nst::Atom(atom) => atom_escapes(name, atom),
    }
}

fn atom_escapes(name: &str, atom: &Atom) -> bool {
    let named = |var: &NstVar| var.name == name;
    match atom {
        Atom::Var(var) => named(var),
        Atom::Prim { args, .. } => args.iter().any(named),
        // the head of an application doesn't escape; arguments do
        Atom::Call { args, .. } | Atom::Partial { args, .. } => args.iter().any(named),
        Atom::Compound { fills, .. } | Atom::Module { fills, .. } => {
            fills.iter().any(|(_, var)| named(var))
        }
        Atom::Lambda(lambda) => lambda.free.iter().any(|f| f == name),
        Atom::Match {
            subject, branches, ..
        } => named(subject) || branches.iter().any(|b| b.free.iter().any(|f| f == name)),
        Atom::Lookup { module, symbol } => named(module) || named(symbol),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::source::Source;
    use crate::compiler::{lex::lex, normalize::normalize, parse::parse};

    fn functions(source: &str) -> Vec<Vec<Tac>> {
        let tokens = lex(Source::source(source)).unwrap();
        let ast = parse(&tokens).unwrap();
        let mut normalized = normalize(&ast).unwrap();
        gen(&normalized.nst, &mut normalized.consts).unwrap()
    }

    #[test]
    fn a_primitive_program() {
        let tac = functions("add 1 2");
        assert_eq!(
            tac[0],
            vec![
                Tac::FunHeader { free: 0, params: 0 },
                Tac::LoadI(0, 1),
                Tac::LoadI(1, 2),
                Tac::Add(2, 0, 1),
                Tac::Ret(2),
            ],
        );
    }

    #[test]
    fn direct_calls_stay_direct() {
        let tac = functions("val id (x) = x\nid 7");

        // the identity function is just its parameter
        assert_eq!(
            tac[1],
            vec![Tac::FunHeader { free: 0, params: 1 }, Tac::Ret(0)]
        );

        // the final application is in tail position
        assert_eq!(
            tac[0],
            vec![
                Tac::FunHeader { free: 0, params: 0 },
                Tac::LoadF(0, 1),
                Tac::LoadI(1, 7),
                Tac::SetArg {
                    index: 0,
                    src: 1,
                    count: 0
                },
                Tac::TailCall { fun: 0, args: 1 },
            ],
        );
    }

    #[test]
    fn capturing_lambdas_wrap_into_closures() {
        let tac = functions("val f (x) = { val (y) = add x y }\nf 1");

        // the outer body stages x, loads the inner function, wraps it
        let outer = &tac[1];
        assert!(outer.contains(&Tac::SetArg {
            index: 0,
            src: 0,
            count: 0
        }));
        assert!(outer
            .iter()
            .any(|tac| matches!(tac, Tac::MakeCl { captures: 1, .. })));
    }

    #[test]
    fn escaping_functions_are_boxed() {
        // f is passed as an argument, so it can't stay a raw address
        let tac = functions("val f (x) = x\nval g (h) = h 1\ng f");
        assert!(tac[0]
            .iter()
            .any(|tac| matches!(tac, Tac::MakeCl { captures: 0, .. })));
    }

    #[test]
    fn tail_calls_reuse_the_frame() {
        let tac = functions("val loop (n) = loop n\nloop 1");
        assert!(tac[1].iter().any(|tac| matches!(tac, Tac::TailGenAp { .. })));
    }

    #[test]
    fn wide_numbers_go_through_the_const_table() {
        let tac = functions("val x = -5\nx");
        assert!(tac[0].iter().any(|t| matches!(t, Tac::LoadC(..))));
    }

    #[test]
    fn match_tables_jump_to_their_branches() {
        let tac = functions("match 1 { 0 -> 10, 1 -> 11, _ -> 12 }");
        let entry = &tac[0];

        let at = entry
            .iter()
            .position(|t| matches!(t, Tac::Match { .. }))
            .expect("a match instruction");

        // three branches: the table's jumps step into fragments of
        // two instructions each (a call and a trailing jump)
        assert_eq!(entry[at + 1], Tac::Jmp(2));
        assert_eq!(entry[at + 2], Tac::Jmp(3));
        assert_eq!(entry[at + 3], Tac::Jmp(4));
    }

    #[test]
    fn too_many_bindings_exhaust_the_registers() {
        let mut source = String::new();
        for i in 0..40 {
            source.push_str(&format!("val x{} = {}\n", i, i));
        }
        source.push_str("x0");

        let tokens = lex(Source::source(&source)).unwrap();
        let ast = parse(&tokens).unwrap();
        let mut normalized = normalize(&ast).unwrap();
        assert!(matches!(
            gen(&normalized.nst, &mut normalized.consts),
            Err(CompilerError::Ice(_))
        ));
    }

    #[test]
    fn recursive_closures_patch_their_self_slot() {
        let tac = functions("val loop (n) = match n { 0 -> 0, _ -> loop 0 }\nloop 1");
        // the closure for `loop` is built (and patched) in the entry frame
        assert!(tac[0].iter().any(|t| matches!(t, Tac::SetClVal { .. })));
    }
}
