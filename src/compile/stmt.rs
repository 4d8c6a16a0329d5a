//! Statement lowering.
//!
//! Statements are the program's outer control structure: sequences,
//! fixpoint loops, relation maintenance, I/O description and timing
//! scopes. Loops install a fresh exit address for their body; everything
//! else threads the incoming one through unchanged.

use crate::error::{CompileError, CompileResult};
use crate::index::IndexAnalysis;
use crate::ir::Stmt;
use crate::ops::Opcode;

use super::{CodeGenerator, ParallelMode};

impl<A: IndexAnalysis> CodeGenerator<'_, A> {
    pub(crate) fn emit_stmt(&mut self, stmt: &Stmt, exit: usize) -> CompileResult<()> {
        match stmt {
            Stmt::Sequence(children) => {
                self.emit(Opcode::Sequence);
                for child in children {
                    self.emit_stmt(child, exit)?;
                }
                Ok(())
            }
            Stmt::Parallel(children) => self.emit_parallel(children, exit),
            Stmt::Loop(body) => {
                let top = self.here();
                self.emit(Opcode::LoopHeader);

                // The body's exit address: past the loop. A nested Exit
                // whose condition holds jumps here.
                let end = self.new_label();
                let end_addr = self.address_of(end);
                self.emit_stmt(body, end_addr)?;

                self.emit(Opcode::IncIteration);
                self.emit(Opcode::Goto);
                self.push_usize(top);
                self.emit(Opcode::ResetIteration);
                let here = self.here();
                self.set_address(end, here);
                Ok(())
            }
            Stmt::Exit(condition) => {
                self.emit_cond(condition, exit)?;
                self.emit(Opcode::JumpIfNonZero);
                self.push_usize(exit);
                Ok(())
            }
            Stmt::Query(op) => {
                self.emit(Opcode::Query);
                self.emit_op(op, exit)
            }
            Stmt::Stratum(body) => {
                self.emit(Opcode::Stratum);
                self.emit_stmt(body, exit)
            }
            Stmt::DebugInfo { message, body } => {
                self.emit(Opcode::DebugInfo);
                let message = self.intern(message);
                self.push_usize(message.index());
                self.emit_stmt(body, exit)
            }
            Stmt::LogTimer { message, body } => {
                self.emit(Opcode::LogTimer);
                let timer = self.new_timer();
                let message = self.intern(message);
                self.push_usize(message.index());
                self.push_usize(timer.index());
                self.emit_stmt(body, exit)?;
                self.emit(Opcode::StopLogTimer);
                self.push_usize(timer.index());
                Ok(())
            }
            Stmt::LogRelationTimer {
                message,
                relation,
                body,
            } => {
                self.emit(Opcode::LogRelationTimer);
                let timer = self.new_timer();
                let message = self.intern(message);
                self.push_usize(message.index());
                self.push_usize(timer.index());
                let (rel, _) = self.rel_meta(relation)?;
                self.push_usize(rel.index());
                self.emit_stmt(body, exit)?;
                self.emit(Opcode::StopLogTimer);
                self.push_usize(timer.index());
                Ok(())
            }
            Stmt::Create(relation) => self.emit_relation_stmt(Opcode::Create, relation),
            Stmt::Clear(relation) => self.emit_relation_stmt(Opcode::Clear, relation),
            Stmt::Drop(relation) => self.emit_relation_stmt(Opcode::Drop, relation),
            Stmt::LogSize { relation, message } => {
                let (rel, _) = self.rel_meta(relation)?;
                self.emit(Opcode::LogSize);
                self.push_usize(rel.index());
                let message = self.intern(message);
                self.push_usize(message.index());
                Ok(())
            }
            Stmt::Load {
                relation,
                directives,
            } => {
                let (rel, _) = self.rel_meta(relation)?;
                self.emit(Opcode::Load);
                self.push_usize(rel.index());
                let index = self.push_io_directives(directives);
                self.push_usize(index);
                Ok(())
            }
            Stmt::Store {
                relation,
                directives,
            } => {
                let (rel, _) = self.rel_meta(relation)?;
                self.emit(Opcode::Store);
                self.push_usize(rel.index());
                let index = self.push_io_directives(directives);
                self.push_usize(index);
                Ok(())
            }
            Stmt::Fact { relation, values } => {
                let (rel, arity) = self.rel_meta(relation)?;
                for i in (0..arity).rev() {
                    let value = values.get(i).ok_or_else(|| {
                        CompileError::MalformedIr(format!(
                            "fact for '{}' has {} values, relation has arity {}",
                            relation,
                            values.len(),
                            arity
                        ))
                    })?;
                    self.emit_expr(value, exit)?;
                }
                self.emit(Opcode::Fact);
                self.push_usize(rel.index());
                self.push_usize(arity);
                Ok(())
            }
            Stmt::Merge { source, target } => {
                let (source, _) = self.rel_meta(source)?;
                let (target, _) = self.rel_meta(target)?;
                self.emit(Opcode::Merge);
                self.push_usize(source.index());
                self.push_usize(target.index());
                Ok(())
            }
            Stmt::Swap { first, second } => {
                let (first, _) = self.rel_meta(first)?;
                let (second, _) = self.rel_meta(second)?;
                self.emit(Opcode::Swap);
                self.push_usize(first.index());
                self.push_usize(second.index());
                Ok(())
            }
        }
    }

    fn emit_relation_stmt(&mut self, opcode: Opcode, relation: &str) -> CompileResult<()> {
        let (rel, _) = self.rel_meta(relation)?;
        self.emit(opcode);
        self.push_usize(rel.index());
        Ok(())
    }

    /// Lower a parallel block. Serial mode emits the children in sequence
    /// with no wrapper, so a single child is indistinguishable from that
    /// child on its own and an empty block emits nothing. Fork mode emits
    /// the forking scaffold; blocks of zero or one child serialise there
    /// too, since forking them buys nothing.
    fn emit_parallel(&mut self, children: &[Stmt], exit: usize) -> CompileResult<()> {
        if self.parallel_mode() == ParallelMode::Serial || children.len() <= 1 {
            for child in children {
                self.emit_stmt(child, exit)?;
            }
            return Ok(());
        }

        self.emit(Opcode::ForkParallel);
        self.push_usize(children.len());
        let end = self.new_label();
        let end_addr = self.address_of(end);
        self.push_usize(end_addr);

        let starts: Vec<_> = children.iter().map(|_| self.new_label()).collect();
        for &start in &starts {
            let addr = self.address_of(start);
            self.push_usize(addr);
        }

        for (child, &start) in children.iter().zip(&starts) {
            let here = self.here();
            self.set_address(start, here);
            self.emit_stmt(child, exit)?;
            self.emit(Opcode::JoinParallel);
            self.emit(Opcode::Nop);
        }

        let here = self.here();
        self.set_address(end, here);
        Ok(())
    }
}
