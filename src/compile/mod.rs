//! Code generation: lowering IR trees to the flat instruction stream.
//!
//! The generator is a recursive walk over the IR with two threaded
//! arguments: the node being lowered and an *exit address*, the stream
//! offset a `break` or `exit` in the current scope jumps to. Nested
//! operations forward the exit address unchanged; entering a loop installs
//! a new one.
//!
//! # Two-pass emission
//!
//! Forward branch targets are not known when a jump is emitted, so the
//! generator walks the IR twice. The first pass allocates labels and
//! records their offsets as they become known; an unresolved label reads
//! as offset zero. Between passes the stream, the I/O sidetable and the
//! iterator/timer allocators are cleared, but the label table survives.
//! The second pass is word-for-word identical except that every label now
//! resolves to the offset pass one recorded. This works because traversal
//! is deterministic: both passes allocate the same labels in the same
//! order. The stream then ends with a single stop word.

mod expr;
mod op;
mod stmt;

use log::debug;

use crate::bytecode::{Bytecode, IoDirective};
use crate::error::{CompileError, CompileResult};
use crate::id::{IterSlot, Label, RelId, SymbolId, TimerSlot};
use crate::index::{normalize_signature, IndexAnalysis};
use crate::ir::{Expr, Program};
use crate::ops::{Opcode, Word};
use crate::relation::RelationEncoder;
use crate::symbols::SymbolTable;

/// How `Parallel` statements are lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelMode {
    /// Emit children in sequence. The default.
    #[default]
    Serial,
    /// Emit the forking scaffold: child count, join address, per-child
    /// start addresses, and per-child bodies.
    Fork,
}

/// Code-generation options.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub parallel: ParallelMode,
}

/// The result of a compilation: the executable artifact plus the encoded
/// relation descriptors the interpreter instantiates its stores from.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub code: Bytecode,
    pub relations: RelationEncoder,
}

/// Compile a program against an index analysis.
pub fn compile<A: IndexAnalysis>(
    program: &Program,
    analysis: &A,
    options: &Options,
) -> CompileResult<Compiled> {
    let relations = RelationEncoder::new(program, analysis);
    let mut gen = CodeGenerator::new(relations, analysis, options);

    gen.emit_stmt(&program.entry, 0)?;
    debug!(
        "pass 1: {} labels over {} provisional words",
        gen.next_label, gen.words.len()
    );

    gen.reset_for_second_pass();
    gen.emit_stmt(&program.entry, 0)?;
    gen.emit(Opcode::Stop);
    debug!(
        "pass 2: {} words, {} relations, {} symbols, {} iterator slots",
        gen.words.len(),
        gen.relations.len(),
        gen.symbols.len(),
        gen.next_iter
    );

    Ok(gen.finish())
}

/// The generator's working state. Lives for one compilation; everything it
/// owns is either transferred into the [`Compiled`] result or discarded.
pub(crate) struct CodeGenerator<'a, A: IndexAnalysis> {
    analysis: &'a A,
    options: &'a Options,
    relations: RelationEncoder,
    symbols: SymbolTable,
    words: Vec<Word>,
    io_directives: Vec<Vec<IoDirective>>,
    /// Label id → resolved stream offset; preserved across the two passes.
    label_offsets: Vec<usize>,
    next_label: usize,
    next_iter: usize,
    next_timer: usize,
}

impl<'a, A: IndexAnalysis> CodeGenerator<'a, A> {
    fn new(relations: RelationEncoder, analysis: &'a A, options: &'a Options) -> Self {
        Self {
            analysis,
            options,
            relations,
            symbols: SymbolTable::new(),
            words: Vec::new(),
            io_directives: Vec::new(),
            label_offsets: Vec::new(),
            next_label: 0,
            next_iter: 0,
            next_timer: 0,
        }
    }

    /// Clear everything except the label table, ready for the second walk.
    fn reset_for_second_pass(&mut self) {
        self.words.clear();
        self.io_directives.clear();
        self.next_label = 0;
        self.next_iter = 0;
        self.next_timer = 0;
    }

    fn finish(self) -> Compiled {
        Compiled {
            code: Bytecode {
                words: self.words,
                symbols: self.symbols,
                io_directives: self.io_directives,
                iter_slots: self.next_iter,
                timer_slots: self.next_timer,
            },
            relations: self.relations,
        }
    }

    // ---- stream emission ---------------------------------------------

    pub(crate) fn emit(&mut self, op: Opcode) {
        self.words.push(op as Word);
    }

    pub(crate) fn push(&mut self, word: Word) {
        self.words.push(word);
    }

    pub(crate) fn push_usize(&mut self, value: usize) {
        self.words.push(value as Word);
    }

    /// The current stream offset.
    pub(crate) fn here(&self) -> usize {
        self.words.len()
    }

    // ---- allocators --------------------------------------------------

    pub(crate) fn new_label(&mut self) -> Label {
        let label = Label::from_usize(self.next_label);
        self.next_label += 1;
        label
    }

    pub(crate) fn new_iter(&mut self) -> IterSlot {
        let slot = IterSlot::from_usize(self.next_iter);
        self.next_iter += 1;
        slot
    }

    pub(crate) fn new_timer(&mut self) -> TimerSlot {
        let slot = TimerSlot::from_usize(self.next_timer);
        self.next_timer += 1;
        slot
    }

    // ---- label table -------------------------------------------------

    /// The offset a label resolves to. During the first pass a label not
    /// yet recorded reads as zero; the second pass sees the offsets the
    /// first pass recorded.
    pub(crate) fn address_of(&self, label: Label) -> usize {
        self.label_offsets.get(label.index()).copied().unwrap_or(0)
    }

    pub(crate) fn set_address(&mut self, label: Label, offset: usize) {
        if label.index() >= self.label_offsets.len() {
            self.label_offsets.resize(label.index() + 1, 0);
        }
        self.label_offsets[label.index()] = offset;
    }

    // ---- lookups -----------------------------------------------------

    pub(crate) fn intern(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    /// Relation id and arity in one borrow.
    pub(crate) fn rel_meta(&self, name: &str) -> CompileResult<(RelId, usize)> {
        let info = self.relations.get(name)?;
        Ok((info.id, info.arity))
    }

    /// The lexicographic index position a pattern on `relation` selects.
    pub(crate) fn index_position(
        &self,
        relation: &str,
        pattern: &[Expr],
    ) -> CompileResult<usize> {
        let info = self.relations.get(relation)?;
        let signature = normalize_signature(
            self.analysis.search_signature(relation, pattern),
            info.arity,
        );
        info.index_set
            .lex_position(signature)
            .ok_or_else(|| CompileError::MissingIndex {
                relation: relation.to_string(),
                signature,
            })
    }

    pub(crate) fn parallel_mode(&self) -> ParallelMode {
        self.options.parallel
    }

    pub(crate) fn push_io_directives(&mut self, directives: &[IoDirective]) -> usize {
        self.io_directives.push(directives.to_vec());
        self.io_directives.len() - 1
    }
}
