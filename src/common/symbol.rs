use std::collections::HashMap;

/// Assigns a dense integer id to each distinct symbol name,
/// in first-seen order. Ids 0 and 1 are reserved for the
/// booleans `false` and `true`, so comparison primitives can
/// build their results without a table lookup.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        let mut table = SymbolTable {
            names: vec![],
            ids: HashMap::new(),
        };

        // reserved, in this order
        table.intern("false");
        table.intern("true");
        return table;
    }

    /// The id for a name, interning it if it has not been seen before.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }

        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        return id;
    }

    pub fn name(&self, id: u32) -> &str {
        &self.names[id as usize]
    }

    /// All interned names, indexed by id.
    pub fn into_names(self) -> Vec<String> {
        self.names
    }
}

/// Records, for each name known to be bound to a lambda, how many
/// values it captures and how many parameters it takes. Queried when
/// normalizing an application to decide whether the call is saturated,
/// partial, or over-saturated.
#[derive(Debug, Clone)]
pub struct ArityTable {
    map: HashMap<String, (usize, usize)>,
}

impl ArityTable {
    pub fn new() -> ArityTable {
        ArityTable {
            map: HashMap::new(),
        }
    }

    pub fn record(&mut self, name: &str, captured: usize, params: usize) {
        self.map.insert(name.to_string(), (captured, params));
    }

    /// `(captured, params)` if `name` is known to be a lambda.
    pub fn lookup(&self, name: &str) -> Option<(usize, usize)> {
        self.map.get(name).copied()
    }
}
