//! The emitted artifact: instruction stream, symbol table, I/O sidetable.
//!
//! A [`Bytecode`] value is immutable after compilation and may be shared by
//! any number of interpreter instances. It also carries the frame sizes
//! (iterator and timer slot counts) the interpreter needs to pre-allocate
//! its per-invocation state.
//!
//! # Persistence
//!
//! Bytecode can be written to disk and mapped back. The serialized form is
//! a minimal data struct (rkyv-archived, validated on load); the symbol
//! table's lookup index is rebuilt when loading.

use memmap2::Mmap;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::ser::Serializer;
use rkyv::{check_archived_root, Archive, Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::ops::{Opcode, Word};
use crate::symbols::SymbolTable;

/// One opaque I/O directive: key/value options describing a load or store
/// the interpreter will perform. The compiler only records these; it never
/// executes them.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct IoDirective {
    pub options: Vec<(String, String)>,
}

impl IoDirective {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Look up an option value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Serializable form of a bytecode artifact
#[derive(Archive, Deserialize, Serialize, Default)]
#[archive(check_bytes)]
struct BytecodeData {
    words: Vec<Word>,
    symbols: Vec<String>,
    io_directives: Vec<Vec<IoDirective>>,
    iter_slots: u64,
    timer_slots: u64,
}

/// A compiled program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    /// The instruction stream, terminated by a single stop word.
    pub words: Vec<Word>,
    /// Owner of every string the stream references by symbol id.
    pub symbols: SymbolTable,
    /// Directive sets referenced by load/store instructions, in emission
    /// order; the stream carries indexes into this table.
    pub io_directives: Vec<Vec<IoDirective>>,
    /// Iterator registers the interpreter frame must provide.
    pub iter_slots: usize,
    /// Timer slots the interpreter frame must provide.
    pub timer_slots: usize,
}

impl Bytecode {
    /// Length of the stream in words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Whether the stream is terminated by the stop word.
    pub fn is_terminated(&self) -> bool {
        self.words.last() == Some(&(Opcode::Stop as Word))
    }

    /// Save to disk, atomically (write to a temp file, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), String> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create bytecode directory: {}", e))?;
        }

        let data = BytecodeData {
            words: self.words.clone(),
            symbols: self.symbols.to_strings(),
            io_directives: self.io_directives.clone(),
            iter_slots: self.iter_slots as u64,
            timer_slots: self.timer_slots as u64,
        };

        let mut serializer = AllocSerializer::<4096>::default();
        serializer
            .serialize_value(&data)
            .map_err(|e| format!("Failed to serialize bytecode: {}", e))?;
        let bytes = serializer.into_serializer().into_inner();

        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)
                .map_err(|e| format!("Failed to create temp file: {}", e))?;
            file.write_all(&bytes)
                .map_err(|e| format!("Failed to write bytecode: {}", e))?;
            file.sync_all()
                .map_err(|e| format!("Failed to sync bytecode: {}", e))?;
        }

        fs::rename(&temp_path, path).map_err(|e| format!("Failed to rename bytecode: {}", e))?;

        Ok(())
    }

    /// Load from disk, validating the archive before deserializing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let file =
            File::open(path.as_ref()).map_err(|e| format!("Failed to open bytecode: {}", e))?;

        let mmap =
            unsafe { Mmap::map(&file) }.map_err(|e| format!("Failed to mmap bytecode: {}", e))?;

        if mmap.is_empty() {
            return Err("Bytecode file is empty".to_string());
        }

        let archived = check_archived_root::<BytecodeData>(&mmap)
            .map_err(|e| format!("Failed to validate bytecode: {}", e))?;

        let data: BytecodeData = archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|_| "Failed to deserialize bytecode")?;

        Ok(Self {
            words: data.words,
            symbols: SymbolTable::from_strings(data.symbols),
            io_directives: data.io_directives,
            iter_slots: data.iter_slots as usize,
            timer_slots: data.timer_slots as usize,
        })
    }
}
