//! Symbol table: an interner shared by the compiler and the interpreter.
//!
//! Every human-readable datum in the emitted code (profile text, log
//! messages, subroutine-return type tags, user-defined operator names and
//! signatures) appears in the stream only as a dense [`SymbolId`]. The
//! table itself travels with the emitted bytecode and is read-only once
//! compilation finishes.

use indexmap::IndexMap;

use crate::id::SymbolId;

/// String interner with dense ids.
///
/// Ids are assigned in interning order, so the id of a string is also its
/// position in the table, and iteration recovers insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    names: IndexMap<String, ()>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from its string vector (load path).
    pub fn from_strings(strings: Vec<String>) -> Self {
        Self {
            names: strings.into_iter().map(|s| (s, ())).collect(),
        }
    }

    /// Intern a string, returning its id. Idempotent: a string already in
    /// the table keeps its original id.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(index) = self.names.get_index_of(name) {
            return SymbolId::from_usize(index);
        }
        let (index, _) = self.names.insert_full(name.to_string(), ());
        SymbolId::from_usize(index)
    }

    /// Look up the string for an id.
    pub fn resolve(&self, id: SymbolId) -> Option<&str> {
        self.names.get_index(id.index()).map(|(name, _)| name.as_str())
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate over all strings in id order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(|s| s.as_str())
    }

    /// Clone the strings out in id order (save path).
    pub fn to_strings(&self) -> Vec<String> {
        self.names.keys().cloned().collect()
    }
}
