//! Disassembler: structural view of an emitted stream.
//!
//! Renders the flat word stream back into instructions for debugging and
//! for structural assertions in tests. Decoding needs the relation
//! encoder because a few instructions trail a mask whose word count
//! depends on the relation's arity.

use crate::bytecode::Bytecode;
use crate::id::RelId;
use crate::ops::{type_mask_words, Opcode, Word};
use crate::relation::RelationEncoder;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the opcode word in the stream.
    pub offset: usize,
    pub opcode: Opcode,
    pub operands: Vec<Word>,
}

impl Instruction {
    /// Stream offsets this instruction can transfer control to.
    pub fn branch_targets(&self) -> Vec<usize> {
        match self.opcode {
            Opcode::Goto | Opcode::JumpIfZero | Opcode::JumpIfNonZero => {
                vec![self.operands[0] as usize]
            }
            // Operand 2 is the skip address for a null reference.
            Opcode::UnpackRecord => vec![self.operands[2] as usize],
            // Join address, then one start address per child.
            Opcode::ForkParallel => self.operands[1..].iter().map(|&w| w as usize).collect(),
            _ => vec![],
        }
    }

    /// Relation-id operands.
    pub fn relation_ids(&self) -> Vec<Word> {
        let at = |positions: &[usize]| positions.iter().map(|&i| self.operands[i]).collect();
        match self.opcode {
            Opcode::IsEmpty
            | Opcode::FullExists
            | Opcode::Exists
            | Opcode::ExistsOneWord
            | Opcode::Create
            | Opcode::Clear
            | Opcode::Drop
            | Opcode::Fact
            | Opcode::Load
            | Opcode::Store
            | Opcode::LogSize => at(&[0]),
            Opcode::InitFullIter
            | Opcode::InitRangeIter
            | Opcode::InitRangeIterOneWord
            | Opcode::Project => at(&[1]),
            Opcode::Merge | Opcode::Swap => at(&[0, 1]),
            Opcode::LogRelationTimer => at(&[2]),
            _ => vec![],
        }
    }

    /// Symbol-id operands.
    pub fn symbol_ids(&self) -> Vec<Word> {
        let at = |positions: &[usize]| positions.iter().map(|&i| self.operands[i]).collect();
        match self.opcode {
            Opcode::UserOp => at(&[0, 1]),
            Opcode::Search | Opcode::ReturnValue | Opcode::LogSize => at(&[1]),
            Opcode::Filter | Opcode::DebugInfo | Opcode::LogTimer | Opcode::LogRelationTimer => {
                at(&[0])
            }
            _ => vec![],
        }
    }

    /// Iterator-slot operands.
    pub fn iter_slots(&self) -> Vec<Word> {
        match self.opcode {
            Opcode::InitFullIter
            | Opcode::InitRangeIter
            | Opcode::InitRangeIterOneWord
            | Opcode::IterNotAtEnd
            | Opcode::IterSelect
            | Opcode::IterInc
            | Opcode::AggregateCount => vec![self.operands[0]],
            _ => vec![],
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}  {:?}", self.offset, self.opcode)?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

/// How many operand words an opcode carries.
enum OperandCount {
    Fixed(usize),
    /// Relation, index position, then arity-dependent mask words.
    Existence,
    /// Slot, relation, index position, then arity-dependent mask words.
    RangeInit,
    /// Child count, join address, then one start address per child.
    Fork,
}

fn operand_count(opcode: Opcode) -> OperandCount {
    use OperandCount::*;
    match opcode {
        Opcode::Number
        | Opcode::PackRecord
        | Opcode::SubroutineArg
        | Opcode::Max
        | Opcode::Min
        | Opcode::Cat
        | Opcode::IsEmpty
        | Opcode::FullExists
        | Opcode::IterNotAtEnd
        | Opcode::IterInc
        | Opcode::Goto
        | Opcode::JumpIfZero
        | Opcode::JumpIfNonZero
        | Opcode::AggregateCount
        | Opcode::AggregateReturn
        | Opcode::Filter
        | Opcode::DebugInfo
        | Opcode::Create
        | Opcode::Clear
        | Opcode::Drop
        | Opcode::StopLogTimer => Fixed(1),
        Opcode::TupleElement
        | Opcode::InitFullIter
        | Opcode::IterSelect
        | Opcode::Search
        | Opcode::Project
        | Opcode::ReturnValue
        | Opcode::Fact
        | Opcode::Merge
        | Opcode::Swap
        | Opcode::Load
        | Opcode::Store
        | Opcode::LogSize
        | Opcode::LogTimer => Fixed(2),
        Opcode::UserOp
        | Opcode::ExistsOneWord
        | Opcode::UnpackRecord
        | Opcode::LogRelationTimer => Fixed(3),
        Opcode::InitRangeIterOneWord => Fixed(4),
        Opcode::Exists => Existence,
        Opcode::InitRangeIter => RangeInit,
        Opcode::ForkParallel => Fork,
        _ => Fixed(0),
    }
}

/// Decode a stream into instructions.
///
/// Fails on a word that names no opcode, a truncated instruction, or a
/// mask-carrying instruction whose relation operand is out of range.
pub fn disassemble(
    code: &Bytecode,
    relations: &RelationEncoder,
) -> Result<Vec<Instruction>, String> {
    let words = &code.words;
    let mut instructions = Vec::new();
    let mut at = 0;

    let arity_of = |word: Word, at: usize| -> Result<usize, String> {
        let id = usize::try_from(word)
            .map_err(|_| format!("negative relation id {} at offset {}", word, at))?;
        relations
            .info(RelId::from_usize(id))
            .map(|info| info.arity)
            .ok_or_else(|| format!("relation id {} at offset {} out of range", id, at))
    };

    while at < words.len() {
        let opcode = Opcode::from_word(words[at])
            .ok_or_else(|| format!("word {} at offset {} is not an opcode", words[at], at))?;

        let count = match operand_count(opcode) {
            OperandCount::Fixed(n) => n,
            OperandCount::Existence => {
                let rel = *words
                    .get(at + 1)
                    .ok_or_else(|| format!("truncated {:?} at offset {}", opcode, at))?;
                2 + type_mask_words(arity_of(rel, at)?)
            }
            OperandCount::RangeInit => {
                let rel = *words
                    .get(at + 2)
                    .ok_or_else(|| format!("truncated {:?} at offset {}", opcode, at))?;
                3 + type_mask_words(arity_of(rel, at)?)
            }
            OperandCount::Fork => {
                let children = *words
                    .get(at + 1)
                    .ok_or_else(|| format!("truncated {:?} at offset {}", opcode, at))?;
                let children = usize::try_from(children)
                    .map_err(|_| format!("negative fork count at offset {}", at))?;
                2 + children
            }
        };

        if at + 1 + count > words.len() {
            return Err(format!("truncated {:?} at offset {}", opcode, at));
        }

        let operands = words[at + 1..at + 1 + count].to_vec();
        instructions.push(Instruction {
            offset: at,
            opcode,
            operands,
        });
        at += 1 + count;
    }

    Ok(instructions)
}

/// Render a whole stream, one instruction per line.
pub fn dump(code: &Bytecode, relations: &RelationEncoder) -> Result<String, String> {
    let mut out = String::new();
    for instruction in disassemble(code, relations)? {
        out.push_str(&instruction.to_string());
        out.push('\n');
    }
    Ok(out)
}
