//! Tuple-operation lowering: the loop nests of a query.
//!
//! Every operation that iterates a relation instantiates one skeleton:
//!
//! ```text
//!     INIT_*        slot, relation [, index position, mask words]
//! L0: ITER_NOT_AT_END slot
//!     JUMP_IF_ZERO  Lend
//!     ITER_SELECT   slot, tuple
//!     <per-operation body>
//!     ITER_INC      slot
//!     GOTO          L0
//! Lend:
//! ```
//!
//! Scans run the nested operation as the body; choices gate it behind a
//! condition and leave the loop after the first match; aggregates fold an
//! accumulator and run the nested operation once afterwards.

use crate::error::CompileResult;
use crate::id::IterSlot;
use crate::index::IndexAnalysis;
use crate::ir::{AggregateFn, Cond, Expr, Op, TupleId};
use crate::ops::{Opcode, MAX_DOMAIN, MIN_DOMAIN};

use super::CodeGenerator;

impl<A: IndexAnalysis> CodeGenerator<'_, A> {
    pub(crate) fn emit_op(&mut self, op: &Op, exit: usize) -> CompileResult<()> {
        match op {
            Op::Scan {
                relation,
                tuple,
                profile_text,
                nested,
            } => self.emit_scan(relation, *tuple, profile_text, nested),
            Op::IndexScan {
                relation,
                tuple,
                pattern,
                profile_text,
                nested,
            } => self.emit_index_scan(relation, *tuple, pattern, profile_text, nested, exit),
            Op::Choice {
                relation,
                tuple,
                condition,
                profile_text,
                nested,
            } => self.emit_choice(relation, *tuple, None, condition, profile_text, nested, exit),
            Op::IndexChoice {
                relation,
                tuple,
                pattern,
                condition,
                profile_text,
                nested,
            } => self.emit_choice(
                relation,
                *tuple,
                Some(pattern),
                condition,
                profile_text,
                nested,
                exit,
            ),
            Op::UnpackRecord {
                expr,
                arity,
                tuple,
                profile_text,
                nested,
            } => self.emit_unpack(expr, *arity, *tuple, profile_text, nested, exit),
            Op::Aggregate {
                function,
                relation,
                tuple,
                condition,
                expr,
                profile_text,
                nested,
            } => {
                self.emit(Opcode::Aggregate);
                let iter = self.new_iter();
                let (rel, _) = self.rel_meta(relation)?;
                self.emit(Opcode::InitFullIter);
                self.push_usize(iter.index());
                self.push_usize(rel.index());
                self.emit_aggregate_loop(
                    *function,
                    condition,
                    expr,
                    *tuple,
                    iter,
                    profile_text,
                    nested,
                    exit,
                )
            }
            Op::IndexAggregate {
                function,
                relation,
                tuple,
                pattern,
                condition,
                expr,
                profile_text,
                nested,
            } => {
                self.emit(Opcode::IndexAggregate);
                let iter = self.new_iter();
                self.emit_pattern_init(relation, pattern, iter, exit)?;
                self.emit_aggregate_loop(
                    *function,
                    condition,
                    expr,
                    *tuple,
                    iter,
                    profile_text,
                    nested,
                    exit,
                )
            }
            Op::Break { condition, nested } => {
                self.emit_cond(condition, exit)?;
                self.emit(Opcode::JumpIfNonZero);
                self.push_usize(exit);
                self.emit_op(nested, exit)
            }
            Op::Filter {
                condition,
                profile_text,
                nested,
            } => {
                self.emit(Opcode::Filter);
                let profile = self.intern(profile_text);
                self.push_usize(profile.index());
                let skip = self.new_label();
                self.emit_cond(condition, exit)?;
                self.emit(Opcode::JumpIfZero);
                let target = self.address_of(skip);
                self.push_usize(target);
                self.emit_op(nested, exit)?;
                let end = self.here();
                self.set_address(skip, end);
                Ok(())
            }
            Op::Project { relation, values } => {
                let (rel, arity) = self.rel_meta(relation)?;
                for value in values.iter().rev() {
                    self.emit_expr(value, exit)?;
                }
                self.emit(Opcode::Project);
                self.push_usize(arity);
                self.push_usize(rel.index());
                Ok(())
            }
            Op::Return { values } => {
                // The type tag records, right-to-left, which positions
                // carry a value ('V') and which are placeholders ('_').
                let mut types = String::new();
                for value in values.iter().rev() {
                    if value.is_undefined() {
                        types.push('_');
                    } else {
                        types.push('V');
                        self.emit_expr(value, exit)?;
                    }
                }
                self.emit(Opcode::ReturnValue);
                self.push_usize(values.len());
                let types = self.intern(&types);
                self.push_usize(types.index());
                Ok(())
            }
        }
    }

    /// The search marker every loop body starts with: a has-profile flag
    /// and the interned profile text, then the nested operation.
    fn emit_search_body(
        &mut self,
        profile_text: &str,
        nested: &Op,
        exit: usize,
    ) -> CompileResult<()> {
        self.emit(Opcode::Search);
        self.push(if profile_text.is_empty() { 0 } else { 1 });
        let profile = self.intern(profile_text);
        self.push_usize(profile.index());
        self.emit_op(nested, exit)
    }

    /// Emit a range pattern's bound values (reverse column order) and the
    /// matching iterator init: full order when nothing is bound, a range
    /// index otherwise.
    fn emit_pattern_init(
        &mut self,
        relation: &str,
        pattern: &[Expr],
        iter: IterSlot,
        exit: usize,
    ) -> CompileResult<()> {
        let (rel, arity) = self.rel_meta(relation)?;
        let mut mask = vec![false; arity];
        let mut full_order = true;
        for i in (0..arity).rev() {
            match pattern.get(i) {
                Some(value) if !value.is_undefined() => {
                    self.emit_expr(value, exit)?;
                    full_order = false;
                    mask[i] = true;
                }
                _ => {}
            }
        }

        if full_order {
            self.emit(Opcode::InitFullIter);
            self.push_usize(iter.index());
            self.push_usize(rel.index());
        } else {
            let position = self.index_position(relation, pattern)?;
            self.emit_range_init(arity, rel, position, iter, &mask);
        }
        Ok(())
    }

    fn emit_scan(
        &mut self,
        relation: &str,
        tuple: TupleId,
        profile_text: &str,
        nested: &Op,
    ) -> CompileResult<()> {
        self.emit(Opcode::Scan);
        let iter = self.new_iter();
        let end = self.new_label();

        let (rel, _) = self.rel_meta(relation)?;
        self.emit(Opcode::InitFullIter);
        self.push_usize(iter.index());
        self.push_usize(rel.index());

        let top = self.here();
        self.emit(Opcode::IterNotAtEnd);
        self.push_usize(iter.index());
        self.emit(Opcode::JumpIfZero);
        let end_addr = self.address_of(end);
        self.push_usize(end_addr);

        self.emit(Opcode::IterSelect);
        self.push_usize(iter.index());
        self.push_usize(tuple);

        // The loop's own end is the exit address for breaks in the body.
        self.emit_search_body(profile_text, nested, end_addr)?;

        self.emit(Opcode::IterInc);
        self.push_usize(iter.index());
        self.emit(Opcode::Goto);
        self.push_usize(top);

        let here = self.here();
        self.set_address(end, here);
        Ok(())
    }

    fn emit_index_scan(
        &mut self,
        relation: &str,
        tuple: TupleId,
        pattern: &[Expr],
        profile_text: &str,
        nested: &Op,
        exit: usize,
    ) -> CompileResult<()> {
        self.emit(Opcode::IndexScan);
        let iter = self.new_iter();
        let end = self.new_label();

        self.emit_pattern_init(relation, pattern, iter, exit)?;

        let top = self.here();
        self.emit(Opcode::IterNotAtEnd);
        self.push_usize(iter.index());
        self.emit(Opcode::JumpIfZero);
        let end_addr = self.address_of(end);
        self.push_usize(end_addr);

        self.emit(Opcode::IterSelect);
        self.push_usize(iter.index());
        self.push_usize(tuple);

        self.emit_search_body(profile_text, nested, end_addr)?;

        self.emit(Opcode::IterInc);
        self.push_usize(iter.index());
        self.emit(Opcode::Goto);
        self.push_usize(top);

        let here = self.here();
        self.set_address(end, here);
        Ok(())
    }

    /// Choice and indexed choice share one lowering; `pattern: None` means
    /// a full scan. On a matching tuple control jumps over the advance
    /// into the nested operation, then falls through past the loop.
    #[allow(clippy::too_many_arguments)]
    fn emit_choice(
        &mut self,
        relation: &str,
        tuple: TupleId,
        pattern: Option<&[Expr]>,
        condition: &Cond,
        profile_text: &str,
        nested: &Op,
        exit: usize,
    ) -> CompileResult<()> {
        self.emit(match pattern {
            None => Opcode::Choice,
            Some(_) => Opcode::IndexChoice,
        });
        let iter = self.new_iter();
        let matched = self.new_label();
        let end = self.new_label();

        match pattern {
            None => {
                let (rel, _) = self.rel_meta(relation)?;
                self.emit(Opcode::InitFullIter);
                self.push_usize(iter.index());
                self.push_usize(rel.index());
            }
            Some(pattern) => self.emit_pattern_init(relation, pattern, iter, exit)?,
        }

        let top = self.here();
        self.emit(Opcode::IterNotAtEnd);
        self.push_usize(iter.index());
        self.emit(Opcode::JumpIfZero);
        let end_addr = self.address_of(end);
        self.push_usize(end_addr);

        self.emit(Opcode::IterSelect);
        self.push_usize(iter.index());
        self.push_usize(tuple);

        self.emit_cond(condition, exit)?;
        self.emit(Opcode::JumpIfNonZero);
        let matched_addr = self.address_of(matched);
        self.push_usize(matched_addr);

        self.emit(Opcode::IterInc);
        self.push_usize(iter.index());
        self.emit(Opcode::Goto);
        self.push_usize(top);

        let here = self.here();
        self.set_address(matched, here);
        self.emit_search_body(profile_text, nested, exit)?;
        let here = self.here();
        self.set_address(end, here);
        Ok(())
    }

    fn emit_unpack(
        &mut self,
        expr: &Expr,
        arity: usize,
        tuple: TupleId,
        profile_text: &str,
        nested: &Op,
        exit: usize,
    ) -> CompileResult<()> {
        self.emit_expr(expr, exit)?;
        self.emit(Opcode::UnpackRecord);
        let end = self.new_label();
        self.push_usize(arity);
        self.push_usize(tuple);
        // The interpreter skips to this address when the reference is null.
        let end_addr = self.address_of(end);
        self.push_usize(end_addr);
        self.emit_search_body(profile_text, nested, exit)?;
        let here = self.here();
        self.set_address(end, here);
        Ok(())
    }

    /// The aggregate loop shared by the full-order and indexed variants:
    /// everything after the iterator init.
    ///
    /// A `count` with a trivially-true condition collapses to a single
    /// cardinality read. Otherwise the accumulator is seeded (`min` with
    /// the domain maximum, `max` with the domain minimum, `count`/`sum`
    /// with zero), folded per matching tuple, then written into the tuple
    /// register. For `min`/`max`, an accumulator still equal to its seed
    /// means no tuple matched and the nested operation is skipped; a seed
    /// value occurring in real data is indistinguishable from that, which
    /// matches the evaluator's established behaviour.
    #[allow(clippy::too_many_arguments)]
    fn emit_aggregate_loop(
        &mut self,
        function: AggregateFn,
        condition: &Cond,
        expr: &Expr,
        tuple: TupleId,
        iter: IterSlot,
        profile_text: &str,
        nested: &Op,
        exit: usize,
    ) -> CompileResult<()> {
        let done = self.new_label();
        let skip = self.new_label();

        let trivially_true = matches!(condition, Cond::True);
        if function == AggregateFn::Count && trivially_true {
            self.emit(Opcode::AggregateCount);
            self.push_usize(iter.index());
        } else {
            self.emit(Opcode::Number);
            self.push(match function {
                AggregateFn::Min => MAX_DOMAIN,
                AggregateFn::Max => MIN_DOMAIN,
                AggregateFn::Count | AggregateFn::Sum => 0,
            });

            let top = self.here();
            self.emit(Opcode::IterNotAtEnd);
            self.push_usize(iter.index());
            self.emit(Opcode::JumpIfZero);
            let done_addr = self.address_of(done);
            self.push_usize(done_addr);

            self.emit(Opcode::IterSelect);
            self.push_usize(iter.index());
            self.push_usize(tuple);

            let advance = self.new_label();
            if !trivially_true {
                self.emit_cond(condition, exit)?;
                self.emit(Opcode::JumpIfZero);
                let advance_addr = self.address_of(advance);
                self.push_usize(advance_addr);
            }

            if function != AggregateFn::Count {
                self.emit_expr(expr, exit)?;
            }
            match function {
                AggregateFn::Min => {
                    self.emit(Opcode::Min);
                    self.push_usize(2);
                }
                AggregateFn::Max => {
                    self.emit(Opcode::Max);
                    self.push_usize(2);
                }
                AggregateFn::Count => {
                    self.emit(Opcode::Number);
                    self.push(1);
                    self.emit(Opcode::Add);
                }
                AggregateFn::Sum => {
                    self.emit(Opcode::Add);
                }
            }

            let here = self.here();
            self.set_address(advance, here);
            self.emit(Opcode::IterInc);
            self.push_usize(iter.index());
            self.emit(Opcode::Goto);
            self.push_usize(top);
        }

        let here = self.here();
        self.set_address(done, here);
        self.emit(Opcode::AggregateReturn);
        self.push_usize(tuple);

        if matches!(function, AggregateFn::Min | AggregateFn::Max) {
            // Re-read the written result and compare against the seed; if
            // they are equal no tuple matched and the nested operation is
            // skipped, so sentinel extrema never escape into derived data.
            self.emit(Opcode::TupleElement);
            self.push_usize(tuple);
            self.push_usize(0);
            self.emit(Opcode::Number);
            self.push(if function == AggregateFn::Min {
                MAX_DOMAIN
            } else {
                MIN_DOMAIN
            });
            self.emit(Opcode::Eq);
            self.emit(Opcode::JumpIfNonZero);
            let skip_addr = self.address_of(skip);
            self.push_usize(skip_addr);
        }

        self.emit_search_body(profile_text, nested, exit)?;
        let here = self.here();
        self.set_address(skip, here);
        Ok(())
    }
}
