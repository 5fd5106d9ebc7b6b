use std::collections::HashMap;

use crate::common::value::Value;

/// A compile-time constant tree, built by the normalizer out of
/// static literals and match patterns, before it is flattened
/// into the const-table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Number(i32),
    Symbol(u32),
    /// A compound symbol: `(symbol id, children)`.
    /// Dynamic argument slots appear as `Number(0)` placeholders,
    /// patched at runtime with `set_sym_field`.
    Compound(u32, Vec<Constant>),
    /// A pattern capture: matches anything,
    /// writing the matched value into the given capture slot.
    MatchVar(u32),
}

/// The const-table: a flat, append-only sequence of words built at
/// compile time and read-only from then on. Addresses handed out are
/// word offsets. Cells are deduped by content, so encoding the same
/// literal twice yields the same address, and bitwise value equality
/// extends to const references.
#[derive(Debug, Clone)]
pub struct ConstTable {
    words: Vec<Value>,
    cells: HashMap<Vec<Value>, u32>,
}

impl ConstTable {
    pub fn new() -> ConstTable {
        ConstTable {
            words: vec![],
            cells: HashMap::new(),
        }
    }

    /// Appends a cell, returning its word address.
    /// An identical cell that was already encoded is reused.
    fn cell(&mut self, words: Vec<Value>) -> u32 {
        if let Some(addr) = self.cells.get(&words) {
            return *addr;
        }

        let addr = self.words.len() as u32;
        self.words.extend(words.iter().copied());
        self.cells.insert(words, addr);
        return addr;
    }

    /// A one-word cell holding an arbitrary tagged value,
    /// the target of a `load_c` instruction. Used for numbers too
    /// wide for an immediate and for string references.
    pub fn value_cell(&mut self, value: Value) -> u32 {
        self.cell(vec![value])
    }

    /// Encodes a string literal: a length header followed by the
    /// bytes packed four to a word. Returns the string value itself,
    /// tagged with the header's address.
    pub fn string(&mut self, text: &str) -> Value {
        let bytes = text.as_bytes();
        let mut words = vec![Value::string_header(bytes.len() as u32)];

        for chunk in bytes.chunks(4) {
            let mut word = 0u32;
            for (i, byte) in chunk.iter().enumerate() {
                word |= (*byte as u32) << (i * 8);
            }
            words.push(Value(word));
        }

        Value::string(self.cell(words))
    }

    /// Reads a string cell back out of the table.
    pub fn string_at(&self, addr: u32) -> String {
        let len = self.words[addr as usize].payload() as usize;
        let mut bytes = Vec::with_capacity(len);

        for i in 0..len {
            let word = self.words[addr as usize + 1 + i / 4].0;
            bytes.push((word >> (i % 4 * 8)) as u8);
        }

        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Encodes a constant tree, returning its tagged word form.
    /// Atomic constants encode in place; compound symbols get a cell
    /// of their own (children first) and encode as a reference to it.
    pub fn encode(&mut self, constant: &Constant) -> Value {
        match constant {
            Constant::Number(n) => Value::number(*n),
            Constant::Symbol(id) => Value::symbol(*id),
            Constant::MatchVar(slot) => Value::match_var(*slot),
            Constant::Compound(symbol, children) => {
                let mut words = vec![Value::compound_header(*symbol, children.len() as u32)];
                for child in children {
                    let word = self.encode(child);
                    words.push(word);
                }
                Value::compound(self.cell(words))
            }
        }
    }

    /// Encodes a match-data cell: a branch-count header followed by
    /// one pattern-root word per branch. Returns the cell's address.
    pub fn match_cell(&mut self, branches: &[Constant]) -> u32 {
        let roots: Vec<Value> = branches.iter().map(|b| self.encode(b)).collect();

        let mut words = vec![Value::match_header(branches.len() as u32)];
        words.extend(roots);
        self.cell(words)
    }

    pub fn word(&self, addr: u32) -> Value {
        self.words[addr as usize]
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// The finished word stream, handed to the VM.
    pub fn into_words(self) -> Vec<u32> {
        self.words.into_iter().map(|v| v.0).collect()
    }
}
