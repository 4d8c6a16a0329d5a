//! Typed dense-id newtypes for the compiler.
//!
//! Every resource the compiler allocates (relations, interned symbols,
//! branch labels, iterator registers, profile timers) is named by a dense
//! integer: ids form a prefix of the naturals in allocation order, so a
//! `Vec` indexed by the id is always a valid lookup structure.
//!
//! We use a newtype per id space so that, e.g., an iterator slot can never
//! be passed where a branch label is expected, and Debug output says which
//! space a number belongs to.

macro_rules! define_id {
    ($v:vis $name:ident, $doc:tt) => {
        #[doc = $doc]
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        $v struct $name {
            rep: usize,
        }

        impl $name {
            /// Wrap a raw index.
            pub fn from_usize(index: usize) -> Self {
                Self { rep: index }
            }

            /// The raw index.
            pub fn index(self) -> usize {
                self.rep
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.rep)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.rep)
            }
        }
    };
}

define_id!(
    pub RelId,
    "Relation id: index into the relation encoder's descriptor vector. \
     Dense in interning order; the bytecode references relations only by this."
);

define_id!(
    pub SymbolId,
    "Symbol id: index into the symbol table. Every human-readable string in \
     the emitted code (messages, profile text, type tags) is one of these."
);

define_id!(
    pub Label,
    "Branch label: generator-internal name for a stream offset that is \
     resolved across the two emission passes."
);

define_id!(
    pub IterSlot,
    "Iterator slot: index of an iterator register in the interpreter's \
     per-invocation frame. Allocated in traversal order."
);

define_id!(
    pub TimerSlot,
    "Timer slot: index of a profile timer in the interpreter's \
     per-invocation frame. Allocated in traversal order."
);
