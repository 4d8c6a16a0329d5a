//! Ramlog: bytecode compiler core of a Datalog evaluator.
//!
//! Takes a tree-shaped relational-algebra program and lowers it into a
//! flat, jump-threaded instruction stream for a register-and-stack virtual
//! machine. The compiler binds every relational operation to the physical
//! index it will use, interns relations and strings into dense ids, and
//! resolves forward branch targets by walking the tree twice.
//!
//! The IR construction pipeline, the interpreter and the physical relation
//! stores are external collaborators: the IR arrives as plain data
//! ([`ir::Program`]), index selection is consulted through the
//! [`index::IndexAnalysis`] trait, and the result is an immutable
//! [`bytecode::Bytecode`] artifact plus the relation descriptors the
//! interpreter instantiates its stores from.
//!
//! ```
//! use ramlog::index::SignatureAnalysis;
//! use ramlog::ir::{Expr, Op, Program, RelationDecl, Stmt};
//!
//! let program = Program::new(
//!     vec![RelationDecl::new("out", 1)],
//!     Stmt::Query(Box::new(Op::Project {
//!         relation: "out".to_string(),
//!         values: vec![Expr::Number(42)],
//!     })),
//! );
//! let analysis = SignatureAnalysis::analyze(&program);
//! let compiled = ramlog::compile(&program, &analysis, &Default::default()).unwrap();
//! assert!(compiled.code.is_terminated());
//! ```

pub mod bytecode;
pub mod compile;
pub mod disasm;
pub mod error;
pub mod id;
pub mod index;
pub mod ir;
pub mod ops;
pub mod relation;
pub mod symbols;

pub use bytecode::{Bytecode, IoDirective};
pub use compile::{compile, Compiled, Options, ParallelMode};
pub use error::{CompileError, CompileResult};
pub use ops::{Opcode, Word};
pub use relation::{RelationEncoder, RelationInfo, StorageKind};
pub use symbols::SymbolTable;
