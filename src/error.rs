//! Compilation error types.
//!
//! Every error here is an invariant violation: the program handed to the
//! compiler was malformed, or the index analysis is inconsistent with it.
//! Nothing is recovered locally; errors propagate to the compile entry
//! point and abort the compilation.

use crate::index::SearchSignature;

/// Compilation errors
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileError {
    /// An IR node that must not reach code generation (e.g. an undefined
    /// value outside a search pattern).
    MalformedIr(String),
    /// A relation referenced by an operation but never declared.
    UnknownRelation(String),
    /// An operator the backend cannot lower.
    UnsupportedOperator(String),
    /// The index analysis offers no lexicographic order matching a search
    /// signature. There is no fallback to a sequential scan.
    MissingIndex {
        relation: String,
        signature: SearchSignature,
    },
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::MalformedIr(what) => write!(f, "malformed IR: {}", what),
            CompileError::UnknownRelation(name) => write!(f, "unknown relation: {}", name),
            CompileError::UnsupportedOperator(name) => {
                write!(f, "unsupported operator: {}", name)
            }
            CompileError::MissingIndex {
                relation,
                signature,
            } => {
                write!(
                    f,
                    "no index on relation '{}' matches search signature {:#b}",
                    relation, signature
                )
            }
        }
    }
}

impl std::error::Error for CompileError {}

pub type CompileResult<T> = Result<T, CompileError>;
