// AST node types for .nnc program listings.
//
// One item per listing line. Declarations keep raw integers and
// instructions keep their raw operand list, so that range, density and
// operand-shape checks can report against the item's span during assembly.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each item's span covers the source range of its line.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::caps::Caps;
use crate::id::*;
use crate::ir::EndpointRole;
use crate::lexer::Op;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete listing: a sequence of items in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub items: Vec<Item>,
    pub span: Span,
}

/// One listing line with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Component(ComponentDecl),
    Node(NodeDecl),
    /// `precomputed N`: entries a1..aN exist in addition to a0.
    Precomputed(i64),
    Buffer(BufferDecl),
    View(ViewDecl),
    Rows(RowsDecl),
    Pairs(PairsDecl),
    Ranges(RangesDecl),
    Endpoint(EndpointDecl),
    Instr(InstrStmt),
}

// ── component kN in=I out=O flag* ──

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDecl {
    pub id: u32,
    pub input_dim: i64,
    pub output_dim: i64,
    pub caps: Caps,
}

// ── node nN (input | output | kM) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Input,
    Output,
    Component(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDecl {
    pub id: u32,
    pub role: NodeRole,
}

// ── buffer bN rows cols ──

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDecl {
    pub id: u32,
    pub num_rows: i64,
    pub num_cols: i64,
}

// ── view vN bM row-offset rows col-offset cols ──

#[derive(Debug, Clone, PartialEq)]
pub struct ViewDecl {
    pub id: u32,
    pub buffer: u32,
    pub row_offset: i64,
    pub num_rows: i64,
    pub col_offset: i64,
    pub num_cols: i64,
}

// ── Tables ──

/// `rows rN [i, ...]`; `-1` is the no-source sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct RowsDecl {
    pub id: u32,
    pub rows: Vec<(i64, Span)>,
}

/// One entry of a pairs table: `(vN, row)` or the integer pair `(-1, -1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairEntry {
    View(u32, i64),
    Ints(i64, i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairsDecl {
    pub id: u32,
    pub pairs: Vec<(PairEntry, Span)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangesDecl {
    pub id: u32,
    pub ranges: Vec<(i64, i64, Span)>,
}

// ── (input | output) nN bValue [bDeriv] ──

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDecl {
    pub role: EndpointRole,
    pub node: u32,
    pub value: u32,
    pub deriv: Option<u32>,
}

// ── [cN:] mnemonic operand* ──

/// A typed instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Buffer(BufferId),
    View(ViewId),
    Component(ComponentId),
    Node(NodeId),
    Precomputed(PrecomputedId),
    Rows(RowsTableId),
    Pairs(PairsTableId),
    Ranges(RangesTableId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrStmt {
    pub label: Option<(u32, Span)>,
    pub op: Op,
    pub operands: Vec<Operand>,
}
