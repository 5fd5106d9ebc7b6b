use std::fmt;

use crate::common::opcode::{self, ri, rrr, Opcode};
use crate::compiler::tac::Tac;

/// A fully assembled program: the packed instruction stream, the
/// const-table words, and the symbol names in id order. Everything
/// here is read-only once built; the VM owns no other input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub code: Vec<u32>,
    pub consts: Vec<u32>,
    pub symbols: Vec<String>,
}

/// Flattens the per-function TAC listings into one word stream.
/// Two passes: the first records where each function lands, the
/// second packs every instruction, substituting function indices
/// with the absolute offsets the first pass found.
pub fn assemble(functions: &[Vec<Tac>], consts: Vec<u32>, symbols: Vec<String>) -> Program {
    let mut addresses = Vec::with_capacity(functions.len());
    let mut offset = 0u32;
    for function in functions {
        addresses.push(offset);
        offset += function.len() as u32;
    }

    let mut code = Vec::with_capacity(offset as usize);
    for function in functions {
        for tac in function {
            code.push(encode(tac, &addresses));
        }
    }

    Program {
        code,
        consts,
        symbols,
    }
}

fn encode(tac: &Tac, addresses: &[u32]) -> u32 {
    match *tac {
        Tac::FunHeader { free, params } => ri(Opcode::FunHeader, free, params as u32),
        Tac::Ret(r) => rrr(Opcode::Ret, r, 0, 0),
        Tac::LoadI(r, imm) | Tac::LoadAddr(r, imm) => ri(Opcode::LoadI, r, imm),
        Tac::LoadPs(r, id) => ri(Opcode::LoadPs, r, id),
        Tac::LoadCs(r, addr) => ri(Opcode::LoadCs, r, addr),
        Tac::LoadC(r, addr) => ri(Opcode::LoadC, r, addr),
        Tac::LoadF(r, index) => ri(Opcode::LoadF, r, addresses[index]),
        Tac::Add(d, a, b) => rrr(Opcode::Add, d, a, b),
        Tac::Sub(d, a, b) => rrr(Opcode::Sub, d, a, b),
        Tac::Mul(d, a, b) => rrr(Opcode::Mul, d, a, b),
        Tac::Div(d, a, b) => rrr(Opcode::Div, d, a, b),
        Tac::Lt(d, a, b) => rrr(Opcode::Lt, d, a, b),
        Tac::Gt(d, a, b) => rrr(Opcode::Gt, d, a, b),
        Tac::Eq(d, a, b) => rrr(Opcode::Eq, d, a, b),
        Tac::Or(d, a, b) => rrr(Opcode::Or, d, a, b),
        Tac::And(d, a, b) => rrr(Opcode::And, d, a, b),
        Tac::Not(d, a) => rrr(Opcode::Not, d, a, 0),
        Tac::Move(d, s) => rrr(Opcode::Move, d, s, 0),
        Tac::SetArg { index, src, count } => rrr(Opcode::SetArg, index, src, count),
        Tac::Call { dst, fun, args } => rrr(Opcode::Call, dst, fun, args),
        Tac::GenAp { dst, fun, args } => rrr(Opcode::GenAp, dst, fun, args),
        Tac::TailCall { fun, args } => rrr(Opcode::TailCall, 0, fun, args),
        Tac::TailGenAp { fun, args } => rrr(Opcode::TailGenAp, 0, fun, args),
        Tac::PartAp { dst, fun, args } => rrr(Opcode::PartAp, dst, fun, args),
        Tac::MakeCl { dst, fun, captures } => rrr(Opcode::MakeCl, dst, fun, captures),
        Tac::SetClVal { closure, val, slot } => rrr(Opcode::SetClVal, closure, val, slot),
        Tac::CopySym { dst, addr } => ri(Opcode::CopySym, dst, addr),
        Tac::SetSymField { sym, val, slot } => rrr(Opcode::SetSymField, sym, val, slot),
        Tac::ModLookup {
            dst,
            module,
            symbol,
        } => rrr(Opcode::ModLookup, dst, module, symbol),
        Tac::Jmp(over) => ri(Opcode::Jmp, 0, over),
        Tac::Match {
            subject,
            pattern,
            captures,
        } => rrr(Opcode::Match, subject, pattern, captures),
    }
}

impl fmt::Display for Program {
    /// A plain disassembly dump, one instruction per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- constants: {} words", self.consts.len())?;
        writeln!(f, "-- code:")?;

        for (at, word) in self.code.iter().enumerate() {
            let op = Opcode::from_word(*word);
            let (r0, r1, r2) = (opcode::r0(*word), opcode::r1(*word), opcode::r2(*word));
            let imm = opcode::imm(*word);

            match op {
                Opcode::FunHeader => {
                    writeln!(f, "{:>4}: fun_header {} {}", at, r0, imm)?
                }
                Opcode::LoadI
                | Opcode::LoadPs
                | Opcode::LoadCs
                | Opcode::LoadC
                | Opcode::LoadF
                | Opcode::CopySym => writeln!(f, "{:>4}: {:?} r{} {}", at, op, r0, imm)?,
                Opcode::Jmp => writeln!(f, "{:>4}: jmp +{}", at, imm)?,
                _ => writeln!(f, "{:>4}: {:?} r{} r{} r{}", at, op, r0, r1, r2)?,
            }
        }
        Ok(())
    }
}
