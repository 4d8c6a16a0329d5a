//! Relation encoding: dense ids and physical descriptors.
//!
//! The emitted bytecode never names a relation; it carries a dense integer
//! id. The encoder owns the id space and, per relation, the descriptor the
//! interpreter needs to materialise a physical store: arity, column type
//! qualifiers, the selected index set and the storage kind.

use indexmap::IndexMap;

use crate::error::{CompileError, CompileResult};
use crate::id::RelId;
use crate::index::{IndexAnalysis, IndexSet};
use crate::ir::{Program, RelationDecl, Representation};

/// Relations wider than this get an indirect store regardless of their
/// declared representation: fully materialised per-column indexes stop
/// paying for themselves.
pub const MAX_DIRECT_INDEX_ARITY: usize = 12;

/// Physical storage kind of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Default,
    OrderedTree,
    Trie,
    Equivalence,
    /// Row store with indirect per-index views; forced for wide relations.
    Indirect,
}

/// Select the storage kind for a declaration.
fn storage_kind(decl: &RelationDecl) -> StorageKind {
    if decl.arity > MAX_DIRECT_INDEX_ARITY {
        return StorageKind::Indirect;
    }
    match decl.representation {
        Representation::Default => StorageKind::Default,
        Representation::Btree => StorageKind::OrderedTree,
        Representation::Brie => StorageKind::Trie,
        Representation::Eqrel => StorageKind::Equivalence,
    }
}

/// An encoded relation: everything the interpreter needs to build and
/// address its physical store. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationInfo {
    pub id: RelId,
    pub name: String,
    pub arity: usize,
    pub attribute_types: Vec<String>,
    pub index_set: IndexSet,
    pub kind: StorageKind,
}

/// Interns relations into dense ids and owns their descriptors.
///
/// Construction pre-interns every relation the program declares, so ids
/// are stable and independent of the order in which code generation
/// discovers references.
#[derive(Debug, Clone, Default)]
pub struct RelationEncoder {
    ids: IndexMap<String, ()>,
    infos: Vec<RelationInfo>,
}

impl RelationEncoder {
    /// Build an encoder over a program's declared relations.
    pub fn new(program: &Program, analysis: &impl IndexAnalysis) -> Self {
        let mut encoder = Self::default();
        for decl in &program.relations {
            encoder.intern(decl, analysis);
        }
        encoder
    }

    /// Intern a relation, returning its id. Idempotent by name: the first
    /// call materialises the descriptor, later calls return the same id.
    pub fn intern(&mut self, decl: &RelationDecl, analysis: &impl IndexAnalysis) -> RelId {
        if let Some(index) = self.ids.get_index_of(decl.name.as_str()) {
            return RelId::from_usize(index);
        }
        let (index, _) = self.ids.insert_full(decl.name.clone(), ());
        let id = RelId::from_usize(index);
        self.infos.push(RelationInfo {
            id,
            name: decl.name.clone(),
            arity: decl.arity,
            attribute_types: decl.attribute_types.clone(),
            index_set: analysis.indexes_for(&decl.name),
            kind: storage_kind(decl),
        });
        id
    }

    /// The id of a relation already interned; referencing a relation that
    /// was never declared is malformed IR.
    pub fn id_of(&self, name: &str) -> CompileResult<RelId> {
        self.ids
            .get_index_of(name)
            .map(RelId::from_usize)
            .ok_or_else(|| CompileError::UnknownRelation(name.to_string()))
    }

    /// Descriptor lookup by id.
    pub fn info(&self, id: RelId) -> Option<&RelationInfo> {
        self.infos.get(id.index())
    }

    /// Descriptor lookup by name.
    pub fn get(&self, name: &str) -> CompileResult<&RelationInfo> {
        let id = self.id_of(name)?;
        Ok(&self.infos[id.index()])
    }

    /// Number of encoded relations.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Iterate descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &RelationInfo> {
        self.infos.iter()
    }
}
