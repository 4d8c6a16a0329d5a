//! Expression and condition lowering.
//!
//! Expressions are stack code in post-order: operands first, operator
//! last. Variadic operators carry an arity word; concatenation and
//! user-defined operators take their arguments in reverse so the
//! interpreter pops them left-to-right.

use crate::error::{CompileError, CompileResult};
use crate::id::{IterSlot, RelId};
use crate::index::IndexAnalysis;
use crate::ir::{Cond, ConstraintOp, Expr, IntrinsicOp};
use crate::ops::{Opcode, Word, WORD_BITS};

use super::CodeGenerator;

/// Pack a per-column bound-mask into stream words: bit `j` of word `i`
/// covers column `i * WORD_BITS + j`.
pub(crate) fn pack_type_mask(arity: usize, mask: &[bool]) -> Vec<Word> {
    let words = crate::ops::type_mask_words(arity);
    (0..words)
        .map(|i| {
            let mut packed: u32 = 0;
            for j in 0..WORD_BITS {
                let column = i * WORD_BITS + j;
                if column >= arity {
                    break;
                }
                if mask.get(column).copied().unwrap_or(false) {
                    packed |= 1 << j;
                }
            }
            packed as Word
        })
        .collect()
}

impl<A: IndexAnalysis> CodeGenerator<'_, A> {
    pub(crate) fn emit_expr(&mut self, expr: &Expr, exit: usize) -> CompileResult<()> {
        match expr {
            Expr::Number(value) => {
                self.emit(Opcode::Number);
                self.push(*value);
            }
            Expr::TupleElement { tuple, column } => {
                self.emit(Opcode::TupleElement);
                self.push_usize(*tuple);
                self.push_usize(*column);
            }
            Expr::AutoIncrement => {
                self.emit(Opcode::AutoIncrement);
            }
            Expr::Intrinsic { op, args } => {
                self.emit_intrinsic(*op, args, exit)?;
            }
            Expr::UserDefined {
                name,
                signature,
                args,
            } => {
                for arg in args.iter().rev() {
                    self.emit_expr(arg, exit)?;
                }
                self.emit(Opcode::UserOp);
                let name = self.intern(name);
                self.push_usize(name.index());
                let signature = self.intern(signature);
                self.push_usize(signature.index());
                self.push_usize(args.len());
            }
            Expr::Pack { args } => {
                for arg in args {
                    self.emit_expr(arg, exit)?;
                }
                self.emit(Opcode::PackRecord);
                self.push_usize(args.len());
            }
            Expr::SubroutineArg(index) => {
                self.emit(Opcode::SubroutineArg);
                self.push_usize(*index);
            }
            Expr::Undefined => {
                return Err(CompileError::MalformedIr(
                    "undefined value outside a search pattern".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn emit_intrinsic(
        &mut self,
        op: IntrinsicOp,
        args: &[Expr],
        exit: usize,
    ) -> CompileResult<()> {
        use IntrinsicOp::*;

        let fixed = |n: usize| -> CompileResult<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(CompileError::MalformedIr(format!(
                    "operator {:?} expects {} arguments, got {}",
                    op,
                    n,
                    args.len()
                )))
            }
        };

        let opcode = match op {
            Ord => Opcode::Ord,
            Strlen => Opcode::Strlen,
            Neg => Opcode::Neg,
            Bnot => Opcode::Bnot,
            Lnot => Opcode::Lnot,
            ToNumber => Opcode::ToNumber,
            ToString => Opcode::ToString,
            Add => Opcode::Add,
            Sub => Opcode::Sub,
            Mul => Opcode::Mul,
            Div => Opcode::Div,
            Exp => Opcode::Exp,
            Mod => Opcode::Mod,
            Band => Opcode::Band,
            Bor => Opcode::Bor,
            Bxor => Opcode::Bxor,
            Land => Opcode::Land,
            Lor => Opcode::Lor,
            Max => Opcode::Max,
            Min => Opcode::Min,
            Cat => Opcode::Cat,
            Substr => Opcode::Substr,
        };

        match op {
            Ord | Strlen | Neg | Bnot | Lnot | ToNumber | ToString => {
                fixed(1)?;
                self.emit_expr(&args[0], exit)?;
                self.emit(opcode);
            }
            Add | Sub | Mul | Div | Exp | Mod | Band | Bor | Bxor | Land | Lor => {
                fixed(2)?;
                self.emit_expr(&args[0], exit)?;
                self.emit_expr(&args[1], exit)?;
                self.emit(opcode);
            }
            Substr => {
                fixed(3)?;
                self.emit_expr(&args[0], exit)?;
                self.emit_expr(&args[1], exit)?;
                self.emit_expr(&args[2], exit)?;
                self.emit(opcode);
            }
            Max | Min => {
                for arg in args {
                    self.emit_expr(arg, exit)?;
                }
                self.emit(opcode);
                self.push_usize(args.len());
            }
            Cat => {
                // Reversed so the interpreter pops left-to-right.
                for arg in args.iter().rev() {
                    self.emit_expr(arg, exit)?;
                }
                self.emit(opcode);
                self.push_usize(args.len());
            }
        }
        Ok(())
    }

    pub(crate) fn emit_cond(&mut self, cond: &Cond, exit: usize) -> CompileResult<()> {
        match cond {
            Cond::True => self.emit(Opcode::True),
            Cond::False => self.emit(Opcode::False),
            Cond::And(lhs, rhs) => {
                self.emit_cond(lhs, exit)?;
                self.emit_cond(rhs, exit)?;
                self.emit(Opcode::And);
            }
            Cond::Not(inner) => {
                self.emit_cond(inner, exit)?;
                self.emit(Opcode::Not);
            }
            Cond::Empty(relation) => {
                let (rel, _) = self.rel_meta(relation)?;
                self.emit(Opcode::IsEmpty);
                self.push_usize(rel.index());
            }
            Cond::Exists { relation, values } => {
                self.emit_exists(relation, values, exit, false)?;
            }
            Cond::ProvenanceExists { relation, values } => {
                self.emit_exists(relation, values, exit, true)?;
            }
            Cond::Constraint { op, lhs, rhs } => {
                self.emit(Opcode::Constraint);
                self.emit_expr(lhs, exit)?;
                self.emit_expr(rhs, exit)?;
                self.emit(match op {
                    ConstraintOp::Eq => Opcode::Eq,
                    ConstraintOp::Ne => Opcode::Ne,
                    ConstraintOp::Lt => Opcode::Lt,
                    ConstraintOp::Le => Opcode::Le,
                    ConstraintOp::Gt => Opcode::Gt,
                    ConstraintOp::Ge => Opcode::Ge,
                    ConstraintOp::Match => Opcode::Match,
                    ConstraintOp::NotMatch => Opcode::NotMatch,
                    ConstraintOp::Contains => Opcode::Contains,
                    ConstraintOp::NotContains => Opcode::NotContains,
                });
            }
        }
        Ok(())
    }

    /// Lower an existence check. Bound values are emitted in reverse
    /// column order so the interpreter pops them ascending when it
    /// assembles the range key.
    ///
    /// A provenance check never constrains the relation's final two
    /// columns (they hold provenance metadata), and is therefore never a
    /// full-order containment check.
    fn emit_exists(
        &mut self,
        relation: &str,
        values: &[Expr],
        exit: usize,
        provenance: bool,
    ) -> CompileResult<()> {
        let (rel, arity) = self.rel_meta(relation)?;
        let bound_limit = if provenance {
            arity.saturating_sub(2)
        } else {
            arity
        };

        let mut mask = vec![false; arity];
        let mut any_bound = false;
        let mut all_bound = !provenance;
        for i in (0..bound_limit).rev() {
            match values.get(i) {
                Some(value) if !value.is_undefined() => {
                    self.emit_expr(value, exit)?;
                    any_bound = true;
                    mask[i] = true;
                }
                _ => all_bound = false,
            }
        }

        if !any_bound {
            // No bound column: this is just a non-emptiness test.
            self.emit(Opcode::IsEmpty);
            self.push_usize(rel.index());
            self.emit(Opcode::Not);
        } else if all_bound {
            // Every column bound: full-order containment, no mask needed.
            self.emit(Opcode::FullExists);
            self.push_usize(rel.index());
        } else {
            let pattern = &values[..bound_limit.min(values.len())];
            let position = self.index_position(relation, pattern)?;
            self.emit_existence_inst(arity, rel, position, &mask);
        }
        Ok(())
    }

    fn emit_existence_inst(&mut self, arity: usize, rel: RelId, position: usize, mask: &[bool]) {
        let packed = pack_type_mask(arity, mask);
        // The single-word form spares the interpreter a length check; it
        // is by far the common case.
        if packed.len() == 1 {
            self.emit(Opcode::ExistsOneWord);
        } else {
            self.emit(Opcode::Exists);
        }
        self.push_usize(rel.index());
        self.push_usize(position);
        for word in packed {
            self.push(word);
        }
    }

    /// Open a range iterator over the index `position` selects, with the
    /// packed bound-column mask as trailing operands.
    pub(crate) fn emit_range_init(
        &mut self,
        arity: usize,
        rel: RelId,
        position: usize,
        iter: IterSlot,
        mask: &[bool],
    ) {
        let packed = pack_type_mask(arity, mask);
        if packed.len() == 1 {
            self.emit(Opcode::InitRangeIterOneWord);
        } else {
            self.emit(Opcode::InitRangeIter);
        }
        self.push_usize(iter.index());
        self.push_usize(rel.index());
        self.push_usize(position);
        for word in packed {
            self.push(word);
        }
    }
}
