// id.rs — Typed indices for program entities
//
// Every table in a program is indexed by a plain integer; wrapping each in
// its own newtype keeps a view index from being passed where a buffer index
// is expected. Display forms match the listing sigils (`b3`, `v7`, `c12`).

use std::fmt;

use serde::Serialize;

macro_rules! index_type {
    ($(#[$doc:meta])* $name:ident, $sigil:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub fn from_index(index: usize) -> Self {
                $name(index as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($sigil, "{}"), self.0)
            }
        }
    };
}

index_type!(
    /// Buffer (matrix) index. `BufferId(0)` is the null buffer.
    BufferId,
    "b"
);
index_type!(
    /// View (submatrix) index. `ViewId(0)` is the empty view.
    ViewId,
    "v"
);
index_type!(
    /// Global variable index, contiguous per buffer in buffer order.
    VariableId,
    "x"
);
index_type!(
    /// Position of an instruction in the program.
    InstrIndex,
    "c"
);
index_type!(ComponentId, "k");
index_type!(
    /// Network node; Backprop names a node, not a component.
    NodeId,
    "n"
);
index_type!(
    /// Entry in the precomputed-indexes table; 0 means "none".
    PrecomputedId,
    "a"
);
index_type!(RowsTableId, "r");
index_type!(PairsTableId, "p");
index_type!(RangesTableId, "g");

impl BufferId {
    pub const NULL: BufferId = BufferId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl ViewId {
    pub const EMPTY: ViewId = ViewId(0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
