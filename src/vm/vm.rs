use crate::common::opcode::{self, Opcode};
use crate::common::value::{Tag, Value};
use crate::compiler::assemble::Program;
use crate::vm::{data::Data, frame::Frame, heap::Heap, matcher, trace::Trace};

/// Each call frame owns a window of 32 registers in one flat array;
/// advancing the base by the frame size steps into the callee's
/// window, and the staging area for outgoing arguments is simply the
/// start of the next window.
const FRAME_SIZE: usize = 32;

/// Non-tail recursion deeper than this traps instead of crashing.
const MAX_DEPTH: usize = 8192;

/// A `Vm` executes an assembled `Program`.
/// Each VM's state is self-contained, so more than one can be
/// spawned if needed; nothing is shared and nothing persists.
#[derive(Debug)]
pub struct Vm {
    program: Program,
    regs: Vec<u32>,
    frames: Vec<Frame>,
    heap: Heap,
    ip: usize,
    rb: usize,
}

// this impl contains initialization, the core dispatch loop, and the
// register helpers; the next one holds the opcode implementations
impl Vm {
    pub fn init(program: Program) -> Vm {
        Vm {
            program,
            regs: vec![0; FRAME_SIZE * 2],
            frames: vec![],
            heap: Heap::new(),
            ip: 0,
            rb: 0,
        }
    }

    fn get(&self, r: usize) -> Value {
        Value(self.regs[self.rb + r])
    }

    fn set(&mut self, r: usize, value: Value) {
        let at = self.rb + r;
        self.ensure(at + 1);
        self.regs[at] = value.0;
    }

    fn ensure(&mut self, len: usize) {
        if self.regs.len() < len {
            self.regs.resize(len, 0);
        }
    }

    /// Fetch, decode, dispatch, repeat; a `Ret` on the bottom frame
    /// hands back the program's result.
    pub fn run(&mut self) -> Result<Value, Trace> {
        loop {
            if self.ip >= self.program.code.len() {
                return Err(Trace::error(
                    "VmError",
                    "instruction pointer ran off the stream",
                ));
            }

            let word = self.program.code[self.ip];
            let (r0, r1, r2) = (opcode::r0(word), opcode::r1(word), opcode::r2(word));
            let imm = opcode::imm(word);

            match Opcode::from_word(word) {
                // arity markers execute as no-ops
                Opcode::FunHeader => self.ip += 1,

                Opcode::LoadI => {
                    self.set(r0, Value::number(imm as i32));
                    self.ip += 1;
                }
                Opcode::LoadPs => {
                    self.set(r0, Value::symbol(imm));
                    self.ip += 1;
                }
                Opcode::LoadCs => {
                    self.set(r0, Value::compound(imm));
                    self.ip += 1;
                }
                Opcode::LoadC => {
                    let value = Value(self.program.consts[imm as usize]);
                    self.set(r0, value);
                    self.ip += 1;
                }
                Opcode::LoadF => {
                    self.set(r0, Value::function(imm));
                    self.ip += 1;
                }

                op @ (Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Lt
                | Opcode::Gt) => {
                    self.arith(op, r0, r1, r2)?;
                    self.ip += 1;
                }

                Opcode::Eq => {
                    let equal = self.get(r1) == self.get(r2);
                    self.set(r0, Value::boolean(equal));
                    self.ip += 1;
                }

                Opcode::Or => {
                    let value = self.truth(r1)? || self.truth(r2)?;
                    self.set(r0, Value::boolean(value));
                    self.ip += 1;
                }
                Opcode::And => {
                    let value = self.truth(r1)? && self.truth(r2)?;
                    self.set(r0, Value::boolean(value));
                    self.ip += 1;
                }
                Opcode::Not => {
                    let value = !self.truth(r1)?;
                    self.set(r0, Value::boolean(value));
                    self.ip += 1;
                }

                Opcode::Move => {
                    let value = self.get(r1);
                    self.set(r0, value);
                    self.ip += 1;
                }

                Opcode::SetArg => {
                    // stage slots r0..=r0+r2 from registers r1..=r1+r2
                    for k in 0..=r2 {
                        let value = self.get(r1 + k);
                        let at = self.rb + FRAME_SIZE + r0 + k;
                        self.ensure(at + 1);
                        self.regs[at] = value.0;
                    }
                    self.ip += 1;
                }

                Opcode::Call => self.call(r0 as u8, r1, r2)?,
                Opcode::TailCall => self.tail_call(r1, r2)?,

                Opcode::GenAp => {
                    let fun = self.get(r1);
                    if let Some(value) = self.apply(r0 as u8, fun, r2, false, self.ip + 1)? {
                        return Ok(value);
                    }
                }
                Opcode::TailGenAp => {
                    let fun = self.get(r1);
                    if let Some(value) = self.apply(r0 as u8, fun, r2, true, 0)? {
                        return Ok(value);
                    }
                }

                Opcode::PartAp => self.part_ap(r0, r1, r2)?,
                Opcode::MakeCl => self.make_cl(r0, r1, r2)?,

                Opcode::SetClVal => {
                    let closure = self.get(r0);
                    if !closure.is(Tag::Closure) {
                        return Err(Trace::error(
                            "TypeError",
                            "capture write into something that isn't a closure",
                        ));
                    }
                    let value = self.get(r1);
                    self.heap.set(closure.payload() + 1 + r2 as u32, value.0);
                    self.ip += 1;
                }

                Opcode::CopySym => self.copy_sym(r0, imm)?,

                Opcode::SetSymField => {
                    let symbol = self.get(r0);
                    if !symbol.is(Tag::HeapCompound) {
                        return Err(Trace::error(
                            "TypeError",
                            "field write into something that isn't a writable symbol",
                        ));
                    }
                    let value = self.get(r1);
                    self.heap.set(symbol.payload() + 1 + r2 as u32, value.0);
                    self.ip += 1;
                }

                Opcode::ModLookup => self.mod_lookup(r0, r1, r2)?,

                Opcode::Jmp => self.ip += imm as usize + 1,

                Opcode::Match => self.dispatch(r0, r1, r2)?,

                Opcode::Ret => {
                    let value = self.get(r0);
                    if let Some(value) = self.ret(value)? {
                        return Ok(value);
                    }
                }
            }
        }
    }

    fn symbol_name(&self, id: u32) -> String {
        match self.program.symbols.get(id as usize) {
            Some(name) => name.clone(),
            None => format!("sym#{}", id),
        }
    }

    /// Decodes a tagged word into its observable form,
    /// chasing const-table and heap references.
    pub fn decode(&self, value: Value) -> Data {
        match value.tag() {
            Tag::Number => Data::Number(value.as_number()),
            Tag::Symbol => Data::Symbol(self.symbol_name(value.payload())),
            Tag::Function => Data::Function,
            Tag::Closure => Data::Closure,

            Tag::Compound => {
                let base = value.payload() as usize;
                let header = Value(self.program.consts[base]);
                let (symbol, arity) = header.as_compound_header();
                let payload = (0..arity)
                    .map(|i| self.decode(Value(self.program.consts[base + 1 + i as usize])))
                    .collect();
                Data::Compound(self.symbol_name(symbol), payload)
            }

            Tag::HeapCompound => {
                let base = value.payload();
                let header = Value(self.heap.get(base));
                let (symbol, arity) = header.as_compound_header();
                let payload = (0..arity)
                    .map(|i| self.decode(Value(self.heap.get(base + 1 + i))))
                    .collect();
                Data::Compound(self.symbol_name(symbol), payload)
            }

            Tag::Str => {
                let base = value.payload() as usize;
                let len = Value(self.program.consts[base]).payload() as usize;
                let mut bytes = Vec::with_capacity(len);
                for i in 0..len {
                    let word = self.program.consts[base + 1 + i / 4];
                    bytes.push((word >> (i % 4 * 8)) as u8);
                }
                Data::Str(String::from_utf8_lossy(&bytes).into_owned())
            }

            // cell-header tags never reach a register
            other => unreachable!("{:?} tag escaped the const-table", other),
        }
    }
}

// opcode implementations
impl Vm {
    fn arith(&mut self, op: Opcode, d: usize, a: usize, b: usize) -> Result<(), Trace> {
        let (x, y) = (self.get(a), self.get(b));
        if !x.is(Tag::Number) || !y.is(Tag::Number) {
            return Err(Trace::error(
                "TypeError",
                &format!(
                    "arithmetic needs numbers, got `{}` and `{}`",
                    self.decode(x),
                    self.decode(y)
                ),
            ));
        }

        let (x, y) = (x.as_number(), y.as_number());
        let value = match op {
            Opcode::Add => Value::number(x.wrapping_add(y)),
            Opcode::Sub => Value::number(x.wrapping_sub(y)),
            Opcode::Mul => Value::number(x.wrapping_mul(y)),
            Opcode::Div => {
                if y == 0 {
                    return Err(Trace::error("DivideByZero", "division by zero"));
                }
                Value::number(x / y)
            }
            Opcode::Lt => Value::boolean(x < y),
            Opcode::Gt => Value::boolean(x > y),
            _ => unreachable!(),
        };

        self.set(d, value);
        Ok(())
    }

    fn truth(&self, r: usize) -> Result<bool, Trace> {
        let value = self.get(r);
        if value == Value::boolean(true) {
            Ok(true)
        } else if value == Value::boolean(false) {
            Ok(false)
        } else {
            Err(Trace::error(
                "TypeError",
                &format!("expected a boolean, got `{}`", self.decode(value)),
            ))
        }
    }

    fn push_frame(&mut self, return_ip: usize, result: u8) -> Result<(), Trace> {
        if self.frames.len() >= MAX_DEPTH {
            return Err(Trace::error("StackOverflow", "call stack overflow"));
        }
        self.frames.push(Frame::call(return_ip, self.rb, result));
        Ok(())
    }

    /// Direct call: the target is a static function address and the
    /// staged arguments already sit at the callee's registers 0..n.
    fn call(&mut self, result: u8, fun: usize, _argc: usize) -> Result<(), Trace> {
        let fun = self.get(fun);
        if !fun.is(Tag::Function) {
            return Err(Trace::error("TypeError", "direct call to a non-function"));
        }

        self.push_frame(self.ip + 1, result)?;
        self.rb += FRAME_SIZE;
        self.ensure(self.rb + 2 * FRAME_SIZE);
        self.ip = fun.payload() as usize;
        Ok(())
    }

    /// Direct tail call: the staged arguments drop into the current
    /// frame, which the callee takes over.
    fn tail_call(&mut self, fun: usize, argc: usize) -> Result<(), Trace> {
        let fun = self.get(fun);
        if !fun.is(Tag::Function) {
            return Err(Trace::error("TypeError", "direct call to a non-function"));
        }

        for i in 0..argc {
            self.regs[self.rb + i] = self.regs[self.rb + FRAME_SIZE + i];
        }
        self.ip = fun.payload() as usize;
        Ok(())
    }

    /// A callable's code address and the values its record carries:
    /// captures first, then any arguments a partial application has
    /// already collected.
    fn unwrap_callable(&self, fun: Value) -> Result<(usize, Vec<u32>), Trace> {
        match fun.tag() {
            Tag::Function => Ok((fun.payload() as usize, vec![])),
            Tag::Closure => {
                let base = fun.payload();
                let size = self.heap.size(base);
                let code = Value(self.heap.get(base));
                if !code.is(Tag::Function) {
                    return Err(Trace::error("VmError", "corrupt closure record"));
                }
                let vals = (1..size as u32).map(|i| self.heap.get(base + i)).collect();
                Ok((code.payload() as usize, vals))
            }
            _ => Err(Trace::error(
                "TypeError",
                &format!("`{}` is not callable", self.decode(fun)),
            )),
        }
    }

    /// The generic apply: works out the target's arity from its
    /// `fun_header` and handles exact, under- and over-saturated
    /// calls. `resume` is where execution continues if the apply
    /// produces a value without entering the callee.
    fn apply(
        &mut self,
        result: u8,
        fun: Value,
        argc: usize,
        tail: bool,
        resume: usize,
    ) -> Result<Option<Value>, Trace> {
        let (addr, vals) = self.unwrap_callable(fun)?;

        let header = self.program.code[addr];
        if Opcode::from_word(header) != Opcode::FunHeader {
            return Err(Trace::error(
                "VmError",
                "applied code without an arity marker",
            ));
        }
        let free = opcode::r0(header);
        let params = opcode::imm(header) as usize;

        if vals.len() < free || vals.len() - free > params {
            return Err(Trace::error("VmError", "corrupt closure record"));
        }
        let given = vals.len() - free;
        let need = params - given;

        if argc == need {
            let k = vals.len();
            if k + argc > FRAME_SIZE {
                return Err(Trace::error("VmError", "too many arguments for one frame"));
            }

            if tail {
                for i in 0..argc {
                    self.regs[self.rb + k + i] = self.regs[self.rb + FRAME_SIZE + i];
                }
                for (i, val) in vals.iter().enumerate() {
                    self.regs[self.rb + i] = *val;
                }
            } else {
                self.push_frame(resume, result)?;
                let rb = self.rb + FRAME_SIZE;
                self.ensure(rb + 2 * FRAME_SIZE);
                // the staged arguments sit at the bottom of the new
                // window; shift them above the record's values
                for i in (0..argc).rev() {
                    self.regs[rb + k + i] = self.regs[rb + i];
                }
                for (i, val) in vals.iter().enumerate() {
                    self.regs[rb + i] = *val;
                }
                self.rb = rb;
            }
            self.ip = addr;
            return Ok(None);
        }

        if argc < need {
            // under-saturated: a widened record collects the args
            let mut record = Vec::with_capacity(1 + vals.len() + argc);
            record.push(Value::function(addr as u32).0);
            record.extend(vals);
            for i in 0..argc {
                record.push(self.regs[self.rb + FRAME_SIZE + i]);
            }

            let closure = Value::closure(self.heap.alloc(&record));
            if tail {
                return self.ret(closure);
            }
            self.set(result as usize, closure);
            self.ip = resume;
            return Ok(None);
        }

        // over-saturated: feed the arity now, park the surplus in the
        // frame, and re-apply when the callee comes back
        let surplus: Vec<u32> = (need..argc)
            .map(|i| self.regs[self.rb + FRAME_SIZE + i])
            .collect();

        if self.frames.len() >= MAX_DEPTH {
            return Err(Trace::error("StackOverflow", "call stack overflow"));
        }
        self.frames.push(Frame {
            return_ip: resume,
            return_rb: self.rb,
            result,
            pending: surplus,
            pending_tail: tail,
        });

        let k = vals.len();
        let rb = self.rb + FRAME_SIZE;
        self.ensure(rb + 2 * FRAME_SIZE);
        for i in (0..need).rev() {
            self.regs[rb + k + i] = self.regs[rb + i];
        }
        for (i, val) in vals.iter().enumerate() {
            self.regs[rb + i] = *val;
        }
        self.rb = rb;
        self.ip = addr;
        Ok(None)
    }

    /// Return out of the current frame. With surplus arguments
    /// parked, the returned value is immediately re-applied to them.
    fn ret(&mut self, value: Value) -> Result<Option<Value>, Trace> {
        let frame = match self.frames.pop() {
            None => return Ok(Some(value)),
            Some(frame) => frame,
        };
        self.rb = frame.return_rb;

        if frame.pending.is_empty() {
            self.ip = frame.return_ip;
            self.set(frame.result as usize, value);
            return Ok(None);
        }

        let argc = frame.pending.len();
        for (i, word) in frame.pending.iter().enumerate() {
            let at = self.rb + FRAME_SIZE + i;
            self.ensure(at + 1);
            self.regs[at] = *word;
        }

        if frame.pending_tail {
            self.apply(0, value, argc, true, 0)
        } else {
            self.apply(frame.result, value, argc, false, frame.return_ip)
        }
    }

    /// Build a partial application record:
    /// the code word, anything already collected, the new arguments.
    fn part_ap(&mut self, dst: usize, fun: usize, argc: usize) -> Result<(), Trace> {
        let fun = self.get(fun);
        let (addr, vals) = self.unwrap_callable(fun)?;

        let mut record = Vec::with_capacity(1 + vals.len() + argc);
        record.push(Value::function(addr as u32).0);
        record.extend(vals);
        for i in 0..argc {
            record.push(self.regs[self.rb + FRAME_SIZE + i]);
        }

        let closure = Value::closure(self.heap.alloc(&record));
        self.set(dst, closure);
        self.ip += 1;
        Ok(())
    }

    /// Wrap a function and its staged captures into a heap record.
    fn make_cl(&mut self, dst: usize, fun: usize, count: usize) -> Result<(), Trace> {
        let fun = self.get(fun);
        if !fun.is(Tag::Function) {
            return Err(Trace::error("TypeError", "closure over a non-function"));
        }

        let mut record = Vec::with_capacity(1 + count);
        record.push(fun.0);
        for i in 0..count {
            record.push(self.regs[self.rb + FRAME_SIZE + i]);
        }

        let closure = Value::closure(self.heap.alloc(&record));
        self.set(dst, closure);
        self.ip += 1;
        Ok(())
    }

    /// Copy a compound-symbol template out of the const-table into
    /// the heap, where its payload slots can be written.
    fn copy_sym(&mut self, dst: usize, addr: u32) -> Result<(), Trace> {
        let header = Value(self.program.consts[addr as usize]);
        if !header.is(Tag::CompoundHeader) {
            return Err(Trace::error("VmError", "copy of a non-symbol template"));
        }

        let (_, arity) = header.as_compound_header();
        let block: Vec<u32> = (0..=arity)
            .map(|i| self.program.consts[(addr + i) as usize])
            .collect();

        let at = self.heap.alloc(&block);
        self.set(dst, Value::heap_compound(at));
        self.ip += 1;
        Ok(())
    }

    /// The name-lookup primitive: scan a module's key/value slots
    /// for a bitwise match on the key symbol.
    fn mod_lookup(&mut self, dst: usize, module: usize, symbol: usize) -> Result<(), Trace> {
        let module = self.get(module);
        let key = self.get(symbol);

        let (header, base, heaped) = match module.tag() {
            Tag::HeapCompound => (Value(self.heap.get(module.payload())), module.payload(), true),
            Tag::Compound => (
                Value(self.program.consts[module.payload() as usize]),
                module.payload(),
                false,
            ),
            _ => {
                return Err(Trace::error(
                    "TypeError",
                    &format!("member lookup on `{}`", self.decode(module)),
                ))
            }
        };

        let (_, arity) = header.as_compound_header();
        let mut slot = 0;
        while slot + 1 < arity {
            let at = base + 1 + slot;
            let pair_key = if heaped {
                self.heap.get(at)
            } else {
                self.program.consts[at as usize]
            };

            if pair_key == key.0 {
                let value = if heaped {
                    self.heap.get(at + 1)
                } else {
                    self.program.consts[at as usize + 1]
                };
                self.set(dst, Value(value));
                self.ip += 1;
                return Ok(());
            }
            slot += 2;
        }

        Err(Trace::error(
            "LookupError",
            &format!("module has no member `{}`", self.symbol_name(key.payload())),
        ))
    }

    /// Pattern dispatch: select a branch, write the captures into
    /// their register window, and fall into the jump table.
    fn dispatch(&mut self, subject: usize, pattern: usize, captures: usize) -> Result<(), Trace> {
        let subject = self.get(subject);
        let pattern = self.get(pattern).payload();

        let selection = matcher::dispatch(&self.program.consts, &self.heap, subject, pattern)?;
        for (slot, value) in selection.captures {
            self.set(captures + slot as usize, value);
        }

        self.ip += 1 + selection.branch;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::constant::{ConstTable, Constant};
    use crate::compiler::assemble::assemble;
    use crate::compiler::tac::Tac;

    fn run(functions: Vec<Vec<Tac>>, consts: Vec<u32>) -> Result<Value, Trace> {
        let program = assemble(&functions, consts, vec![]);
        Vm::init(program).run()
    }

    #[test]
    fn loads_a_number_into_a_register() {
        let result = run(vec![vec![Tac::LoadI(0, 55), Tac::Ret(0)]], vec![]);
        assert_eq!(result.unwrap(), Value::number(55));
    }

    #[test]
    fn adds_two_numbers() {
        let result = run(
            vec![vec![
                Tac::LoadI(1, 5),
                Tac::LoadI(2, 32),
                Tac::Add(0, 1, 2),
                Tac::Ret(0),
            ]],
            vec![],
        );
        assert_eq!(result.unwrap(), Value::number(37));
    }

    #[test]
    fn moves_a_register() {
        let result = run(
            vec![vec![Tac::LoadI(2, 37), Tac::Move(0, 2), Tac::Ret(0)]],
            vec![],
        );
        assert_eq!(result.unwrap(), Value::number(37));
    }

    #[test]
    fn directly_calls_a_function() {
        let result = run(
            vec![
                vec![
                    Tac::LoadI(1, 15),
                    Tac::LoadI(2, 23),
                    Tac::Add(4, 1, 2),
                    Tac::LoadF(3, 1),
                    Tac::SetArg {
                        index: 0,
                        src: 4,
                        count: 0,
                    },
                    Tac::Call {
                        dst: 0,
                        fun: 3,
                        args: 1,
                    },
                    Tac::Ret(0),
                ],
                vec![
                    Tac::FunHeader { free: 0, params: 1 },
                    Tac::LoadI(1, 100),
                    Tac::Add(0, 0, 1),
                    Tac::Ret(0),
                ],
            ],
            vec![],
        );
        assert_eq!(result.unwrap(), Value::number(138));
    }

    #[test]
    fn calls_a_closure_downwards() {
        let result = run(
            vec![
                // wrap fun2 over 80, hand it to fun1
                vec![
                    Tac::LoadF(2, 2),
                    Tac::LoadI(3, 80),
                    Tac::SetArg {
                        index: 0,
                        src: 3,
                        count: 0,
                    },
                    Tac::MakeCl {
                        dst: 2,
                        fun: 2,
                        captures: 1,
                    },
                    Tac::LoadF(1, 1),
                    Tac::SetArg {
                        index: 0,
                        src: 2,
                        count: 0,
                    },
                    Tac::Call {
                        dst: 0,
                        fun: 1,
                        args: 1,
                    },
                    Tac::Ret(0),
                ],
                // fun1: applies the closure it got to 115 + 23
                vec![
                    Tac::FunHeader { free: 0, params: 1 },
                    Tac::LoadI(1, 115),
                    Tac::LoadI(2, 23),
                    Tac::Add(3, 1, 2),
                    Tac::SetArg {
                        index: 0,
                        src: 3,
                        count: 0,
                    },
                    Tac::GenAp {
                        dst: 0,
                        fun: 0,
                        args: 1,
                    },
                    Tac::Ret(0),
                ],
                // fun2: capture at r0, argument at r1
                vec![
                    Tac::FunHeader { free: 1, params: 1 },
                    Tac::Sub(0, 1, 0),
                    Tac::Ret(0),
                ],
            ],
            vec![],
        );
        // 115 + 23 - 80
        assert_eq!(result.unwrap(), Value::number(58));
    }

    #[test]
    fn calls_a_closure_upwards() {
        let result = run(
            vec![
                // fun1 builds and returns a closure; apply it to 80
                vec![
                    Tac::LoadF(1, 1),
                    Tac::Call {
                        dst: 1,
                        fun: 1,
                        args: 0,
                    },
                    Tac::LoadI(2, 80),
                    Tac::SetArg {
                        index: 0,
                        src: 2,
                        count: 0,
                    },
                    Tac::GenAp {
                        dst: 0,
                        fun: 1,
                        args: 1,
                    },
                    Tac::Ret(0),
                ],
                vec![
                    Tac::FunHeader { free: 0, params: 0 },
                    Tac::LoadF(0, 2),
                    Tac::LoadI(1, 24),
                    Tac::SetArg {
                        index: 0,
                        src: 1,
                        count: 0,
                    },
                    Tac::MakeCl {
                        dst: 0,
                        fun: 0,
                        captures: 1,
                    },
                    Tac::Ret(0),
                ],
                vec![
                    Tac::FunHeader { free: 1, params: 1 },
                    Tac::Sub(0, 1, 0),
                    Tac::Ret(0),
                ],
            ],
            vec![],
        );
        // 80 - 24
        assert_eq!(result.unwrap(), Value::number(56));
    }

    #[test]
    fn jumps_forward() {
        let result = run(
            vec![vec![
                Tac::LoadI(0, 66),
                Tac::Jmp(1),
                Tac::Ret(0),
                Tac::LoadI(0, 70),
                Tac::Ret(0),
            ]],
            vec![],
        );
        assert_eq!(result.unwrap(), Value::number(70));
    }

    #[test]
    fn matches_a_number() {
        let mut table = ConstTable::new();
        let addr = table.match_cell(&[Constant::Number(11), Constant::Number(22)]);

        let result = run(
            vec![vec![
                Tac::LoadI(0, 600),
                Tac::LoadI(1, 22),
                Tac::LoadAddr(2, addr),
                Tac::Match {
                    subject: 1,
                    pattern: 2,
                    captures: 0,
                },
                Tac::Jmp(1),
                Tac::Jmp(2),
                Tac::LoadI(0, 4),
                Tac::Ret(0),
                Tac::LoadI(0, 300),
                Tac::Ret(0),
            ]],
            table.into_words(),
        );
        assert_eq!(result.unwrap(), Value::number(300));
    }

    #[test]
    fn matches_a_compound_symbol() {
        let mut table = ConstTable::new();
        let addr = table.match_cell(&[
            Constant::Compound(1, vec![Constant::Number(55), Constant::Number(66)]),
            Constant::Compound(1, vec![Constant::Number(55), Constant::Number(77)]),
        ]);
        let subject = table.encode(&Constant::Compound(
            1,
            vec![Constant::Number(55), Constant::Number(77)],
        ));

        let result = run(
            vec![vec![
                Tac::LoadCs(1, subject.payload()),
                Tac::LoadAddr(2, addr),
                Tac::Match {
                    subject: 1,
                    pattern: 2,
                    captures: 0,
                },
                Tac::Jmp(1),
                Tac::Jmp(2),
                Tac::LoadI(0, 100),
                Tac::Ret(0),
                Tac::LoadI(0, 300),
                Tac::Ret(0),
            ]],
            table.into_words(),
        );
        assert_eq!(result.unwrap(), Value::number(300));
    }

    #[test]
    fn binds_a_value_in_a_match() {
        let mut table = ConstTable::new();
        let addr = table.match_cell(&[
            Constant::Compound(1, vec![Constant::Number(55), Constant::Number(66)]),
            Constant::Compound(1, vec![Constant::Number(55), Constant::MatchVar(0)]),
        ]);
        let subject = table.encode(&Constant::Compound(
            1,
            vec![Constant::Number(55), Constant::Number(77)],
        ));

        let result = run(
            vec![vec![
                Tac::LoadCs(1, subject.payload()),
                Tac::LoadAddr(2, addr),
                // captures land from register 4 up
                Tac::Match {
                    subject: 1,
                    pattern: 2,
                    captures: 4,
                },
                Tac::Jmp(1),
                Tac::Jmp(2),
                Tac::LoadI(0, 22),
                Tac::Ret(0),
                Tac::Move(0, 4),
                Tac::Ret(0),
            ]],
            table.into_words(),
        );
        assert_eq!(result.unwrap(), Value::number(77));
    }

    #[test]
    fn unmatched_subjects_trap() {
        let mut table = ConstTable::new();
        let addr = table.match_cell(&[Constant::Number(1)]);

        let result = run(
            vec![vec![
                Tac::LoadI(1, 2),
                Tac::LoadAddr(2, addr),
                Tac::Match {
                    subject: 1,
                    pattern: 2,
                    captures: 0,
                },
                Tac::Jmp(0),
                Tac::Ret(1),
            ]],
            table.into_words(),
        );
        assert_eq!(result.unwrap_err().kind, "MatchError");
    }

    #[test]
    fn under_saturation_builds_a_partial() {
        let result = run(
            vec![
                vec![
                    Tac::LoadF(1, 1),
                    Tac::LoadI(2, 30),
                    Tac::SetArg {
                        index: 0,
                        src: 2,
                        count: 0,
                    },
                    // one argument for a two-argument function
                    Tac::GenAp {
                        dst: 3,
                        fun: 1,
                        args: 1,
                    },
                    Tac::LoadI(4, 12),
                    Tac::SetArg {
                        index: 0,
                        src: 4,
                        count: 0,
                    },
                    Tac::GenAp {
                        dst: 0,
                        fun: 3,
                        args: 1,
                    },
                    Tac::Ret(0),
                ],
                vec![
                    Tac::FunHeader { free: 0, params: 2 },
                    Tac::Add(2, 0, 1),
                    Tac::Ret(2),
                ],
            ],
            vec![],
        );
        assert_eq!(result.unwrap(), Value::number(42));
    }

    #[test]
    fn over_saturation_applies_the_result() {
        let result = run(
            vec![
                // call a one-parameter function with two arguments
                vec![
                    Tac::LoadF(1, 1),
                    Tac::LoadI(2, 10),
                    Tac::LoadI(3, 3),
                    Tac::SetArg {
                        index: 0,
                        src: 2,
                        count: 0,
                    },
                    Tac::SetArg {
                        index: 1,
                        src: 3,
                        count: 0,
                    },
                    Tac::GenAp {
                        dst: 0,
                        fun: 1,
                        args: 2,
                    },
                    Tac::Ret(0),
                ],
                // fun1 wraps its argument into a closure over fun2
                vec![
                    Tac::FunHeader { free: 0, params: 1 },
                    Tac::LoadF(1, 2),
                    Tac::SetArg {
                        index: 0,
                        src: 0,
                        count: 0,
                    },
                    Tac::MakeCl {
                        dst: 1,
                        fun: 1,
                        captures: 1,
                    },
                    Tac::Ret(1),
                ],
                // fun2: argument minus capture
                vec![
                    Tac::FunHeader { free: 1, params: 1 },
                    Tac::Sub(0, 1, 0),
                    Tac::Ret(0),
                ],
            ],
            vec![],
        );
        // (3) - (10)
        assert_eq!(result.unwrap(), Value::number(-7));
    }

    #[test]
    fn arithmetic_on_non_numbers_traps() {
        let result = run(
            vec![vec![Tac::LoadPs(0, 2), Tac::LoadI(1, 1), Tac::Add(2, 0, 1), Tac::Ret(2)]],
            vec![],
        );
        assert_eq!(result.unwrap_err().kind, "TypeError");
    }

    #[test]
    fn batched_set_arg_stages_a_window() {
        // stage three consecutive registers with one instruction
        let result = run(
            vec![
                vec![
                    Tac::LoadI(1, 7),
                    Tac::LoadI(2, 8),
                    Tac::LoadI(3, 9),
                    Tac::LoadF(4, 1),
                    Tac::SetArg {
                        index: 0,
                        src: 1,
                        count: 2,
                    },
                    Tac::Call {
                        dst: 0,
                        fun: 4,
                        args: 3,
                    },
                    Tac::Ret(0),
                ],
                vec![
                    Tac::FunHeader { free: 0, params: 3 },
                    Tac::Add(3, 0, 1),
                    Tac::Add(3, 3, 2),
                    Tac::Ret(3),
                ],
            ],
            vec![],
        );
        assert_eq!(result.unwrap(), Value::number(24));
    }

    #[test]
    fn writable_symbols_copy_and_patch() {
        let mut table = ConstTable::new();
        let template = table.encode(&Constant::Compound(
            1,
            vec![Constant::Number(0), Constant::Number(5)],
        ));

        let program = assemble(
            &[vec![
                Tac::CopySym {
                    dst: 0,
                    addr: template.payload(),
                },
                Tac::LoadI(1, 9),
                Tac::SetSymField {
                    sym: 0,
                    val: 1,
                    slot: 0,
                },
                Tac::Ret(0),
            ]],
            table.into_words(),
            vec![],
        );

        let mut vm = Vm::init(program);
        let value = vm.run().unwrap();
        assert_eq!(value.tag(), Tag::HeapCompound);
        assert_eq!(
            vm.decode(value),
            Data::Compound(
                "sym#1".to_string(),
                vec![Data::Number(9), Data::Number(5)],
            ),
        );
    }
}
