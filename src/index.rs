//! Index selection: signatures, lexicographic order sets, and the oracle.
//!
//! Which physical index a search uses is decided by an index analysis that
//! lives upstream of this crate. The compiler only needs two questions
//! answered per relation: "which lexicographic orders were selected?" and
//! "which columns does this operation bind?". [`IndexAnalysis`] is that
//! contract; [`SignatureAnalysis`] is a naive, obviously-correct oracle
//! derived from the program itself, used by tests and by callers that have
//! no smarter analysis to offer.

use indexmap::IndexMap;

use crate::ir::{Cond, Expr, Op, Program, Stmt};

/// A search signature: bit `i` set means column `i` is bound at query time.
pub type SearchSignature = u64;

/// Bits a signature can carry; columns past this never participate in
/// index selection.
const SIGNATURE_BITS: usize = 64;

/// The signature of a range pattern: one bit per defined column.
pub fn signature_of_pattern(pattern: &[Expr]) -> SearchSignature {
    let mut signature = 0;
    for (i, value) in pattern.iter().enumerate().take(SIGNATURE_BITS) {
        if !value.is_undefined() {
            signature |= 1 << i;
        }
    }
    signature
}

/// A zero signature means "full order": normalise it to the all-ones mask
/// of the relation's width.
pub fn normalize_signature(signature: SearchSignature, arity: usize) -> SearchSignature {
    if signature != 0 {
        return signature;
    }
    if arity >= SIGNATURE_BITS {
        SearchSignature::MAX
    } else {
        (1 << arity) - 1
    }
}

/// The ordered set of lexicographic indexes selected for one relation.
///
/// The position of a signature in this set is the integer the emitted code
/// uses to name the index at run time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSet {
    orders: Vec<SearchSignature>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from signatures in order, dropping duplicates.
    pub fn from_signatures(signatures: impl IntoIterator<Item = SearchSignature>) -> Self {
        let mut set = Self::new();
        for signature in signatures {
            set.add(signature);
        }
        set
    }

    /// Append a signature unless it is already present.
    pub fn add(&mut self, signature: SearchSignature) {
        if !self.orders.contains(&signature) {
            self.orders.push(signature);
        }
    }

    /// The lexicographic order position for a signature, if any index
    /// matches it exactly.
    pub fn lex_position(&self, signature: SearchSignature) -> Option<usize> {
        self.orders.iter().position(|&s| s == signature)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn orders(&self) -> &[SearchSignature] {
        &self.orders
    }
}

/// The index-analysis oracle the compiler consults.
///
/// Both operations are referentially transparent and may be called
/// repeatedly for the same inputs.
pub trait IndexAnalysis {
    /// The index set selected for `relation`. Unknown relations yield an
    /// empty set, which makes every positional lookup fail.
    fn indexes_for(&self, relation: &str) -> IndexSet;

    /// The bound-columns signature of an operation on `relation` whose
    /// range pattern (or existence value list) is `pattern`.
    fn search_signature(&self, _relation: &str, pattern: &[Expr]) -> SearchSignature {
        signature_of_pattern(pattern)
    }
}

/// A minimal oracle computed from the program itself.
///
/// Walks the IR once and records, per relation and in traversal order, the
/// normalised signature of every operation that will ask for an index
/// position. Compiling a program against its own `SignatureAnalysis` can
/// therefore never miss an index.
#[derive(Debug, Clone, Default)]
pub struct SignatureAnalysis {
    sets: IndexMap<String, IndexSet>,
}

impl SignatureAnalysis {
    /// Collect the index sets a program needs.
    pub fn analyze(program: &Program) -> Self {
        let mut analysis = Self::default();
        analysis.walk_stmt(program, &program.entry);
        analysis
    }

    fn record(&mut self, program: &Program, relation: &str, pattern: &[Expr]) {
        let Some(decl) = program.relation(relation) else {
            // An undeclared relation is a compile error; nothing to index.
            return;
        };
        let signature = normalize_signature(signature_of_pattern(pattern), decl.arity);
        self.sets
            .entry(relation.to_string())
            .or_default()
            .add(signature);
    }

    /// Record a range pattern if its lowering will request an index
    /// position: any bound column does, an all-free pattern iterates the
    /// full order instead.
    fn record_pattern(&mut self, program: &Program, relation: &str, pattern: &[Expr]) {
        if pattern.iter().any(|v| !v.is_undefined()) {
            self.record(program, relation, pattern);
        }
    }

    fn walk_stmt(&mut self, program: &Program, stmt: &Stmt) {
        match stmt {
            Stmt::Sequence(children) | Stmt::Parallel(children) => {
                for child in children {
                    self.walk_stmt(program, child);
                }
            }
            Stmt::Loop(body) | Stmt::Stratum(body) => self.walk_stmt(program, body),
            Stmt::DebugInfo { body, .. }
            | Stmt::LogTimer { body, .. }
            | Stmt::LogRelationTimer { body, .. } => self.walk_stmt(program, body),
            Stmt::Exit(condition) => self.walk_cond(program, condition),
            Stmt::Query(op) => self.walk_op(program, op),
            Stmt::Create(_)
            | Stmt::Clear(_)
            | Stmt::Drop(_)
            | Stmt::LogSize { .. }
            | Stmt::Load { .. }
            | Stmt::Store { .. }
            | Stmt::Fact { .. }
            | Stmt::Merge { .. }
            | Stmt::Swap { .. } => {}
        }
    }

    fn walk_op(&mut self, program: &Program, op: &Op) {
        match op {
            Op::Scan { nested, .. } => self.walk_op(program, nested),
            Op::IndexScan {
                relation,
                pattern,
                nested,
                ..
            } => {
                self.record_pattern(program, relation, pattern);
                self.walk_op(program, nested);
            }
            Op::Choice {
                condition, nested, ..
            } => {
                self.walk_cond(program, condition);
                self.walk_op(program, nested);
            }
            Op::IndexChoice {
                relation,
                pattern,
                condition,
                nested,
                ..
            } => {
                self.record_pattern(program, relation, pattern);
                self.walk_cond(program, condition);
                self.walk_op(program, nested);
            }
            Op::UnpackRecord { nested, .. } => self.walk_op(program, nested),
            Op::Aggregate {
                condition, nested, ..
            } => {
                self.walk_cond(program, condition);
                self.walk_op(program, nested);
            }
            Op::IndexAggregate {
                relation,
                pattern,
                condition,
                nested,
                ..
            } => {
                self.record_pattern(program, relation, pattern);
                self.walk_cond(program, condition);
                self.walk_op(program, nested);
            }
            Op::Break { condition, nested } => {
                self.walk_cond(program, condition);
                self.walk_op(program, nested);
            }
            Op::Filter {
                condition, nested, ..
            } => {
                self.walk_cond(program, condition);
                self.walk_op(program, nested);
            }
            Op::Project { .. } | Op::Return { .. } => {}
        }
    }

    fn walk_cond(&mut self, program: &Program, cond: &Cond) {
        match cond {
            Cond::And(lhs, rhs) => {
                self.walk_cond(program, lhs);
                self.walk_cond(program, rhs);
            }
            Cond::Not(inner) => self.walk_cond(program, inner),
            Cond::Exists { relation, values } => {
                // Mixed bound/free patterns do a positional lookup; all-free
                // becomes an emptiness check and all-bound a full-order
                // containment check, neither of which needs an index. Bound
                // columns are counted against the declared arity, exactly as
                // the lowering classifies them.
                let Some(decl) = program.relation(relation) else {
                    return;
                };
                let is_bound = |i: usize| values.get(i).is_some_and(|v| !v.is_undefined());
                let bound = (0..decl.arity).filter(|&i| is_bound(i)).count();
                if bound > 0 && bound < decl.arity {
                    let limit = decl.arity.min(values.len());
                    self.record(program, relation, &values[..limit]);
                }
            }
            Cond::ProvenanceExists { relation, values } => {
                let Some(decl) = program.relation(relation) else {
                    return;
                };
                let limit = decl.arity.saturating_sub(2).min(values.len());
                if values[..limit].iter().any(|v| !v.is_undefined()) {
                    self.record(program, relation, &values[..limit]);
                }
            }
            Cond::True | Cond::False | Cond::Empty(_) | Cond::Constraint { .. } => {}
        }
    }
}

impl IndexAnalysis for SignatureAnalysis {
    fn indexes_for(&self, relation: &str) -> IndexSet {
        self.sets.get(relation).cloned().unwrap_or_default()
    }
}
