// ir.rs — Compiled program representation consumed by the analysis
//
// A `Program` is a finalized instruction sequence over a fixed set of
// buffers and views, plus the auxiliary tables some opcodes index into and
// the endpoint bindings that mark buffers as external inputs/outputs.
//
// Preconditions: none (data-only module).
// Postconditions: entry 0 of `buffers` and `views` is always the null entry.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::id::*;

// ── Buffers and views ──

/// A 2-D buffer. Entry 0 of `Program::buffers` is the null buffer (0×0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferInfo {
    pub num_rows: u32,
    pub num_cols: u32,
}

/// A rectangular view into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewInfo {
    pub buffer: BufferId,
    pub row_offset: u32,
    pub num_rows: u32,
    pub col_offset: u32,
    pub num_cols: u32,
}

impl ViewInfo {
    /// One past the last column covered.
    pub fn col_end(&self) -> u32 {
        self.col_offset.saturating_add(self.num_cols)
    }

    /// True if the view spans every row of `buffer`.
    pub fn covers_all_rows(&self, buffer: &BufferInfo) -> bool {
        self.row_offset == 0 && self.num_rows == buffer.num_rows
    }

    /// True if the view is the whole of `buffer`.
    pub fn covers_whole(&self, buffer: &BufferInfo) -> bool {
        self.covers_all_rows(buffer) && self.col_offset == 0 && self.num_cols == buffer.num_cols
    }
}

// ── Auxiliary tables ──

/// Per-row source row for AddRows/CopyRows; `None` means "no source".
pub type RowsTable = Vec<Option<u32>>;

/// Per-row (view, row) pair for the *-Multi opcodes; `None` is the sentinel pair.
pub type PairsTable = Vec<Option<(ViewId, u32)>>;

/// A half-open source row range for AddRowRanges. Signed so that malformed
/// tables can be represented and rejected by the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowRange {
    pub start: i32,
    pub end: i32,
}

// ── Endpoints ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Input,
    Output,
}

/// Binding of one graph endpoint to its value buffer and optional
/// derivative buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub node: NodeId,
    pub role: EndpointRole,
    pub value: BufferId,
    pub deriv: Option<BufferId>,
}

// ── Instructions ──

/// One program step. Each opcode carries exactly the operands it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    AllocZeroed {
        buffer: BufferId,
    },
    AllocUndefined {
        buffer: BufferId,
    },
    Dealloc {
        buffer: BufferId,
    },
    Propagate {
        component: ComponentId,
        precomputed: PrecomputedId,
        input: ViewId,
        output: ViewId,
    },
    StoreStats {
        component: ComponentId,
        view: ViewId,
    },
    /// `input`, `output` and `input_deriv` may be the empty view.
    Backprop {
        node: NodeId,
        precomputed: PrecomputedId,
        input: ViewId,
        output: ViewId,
        output_deriv: ViewId,
        input_deriv: ViewId,
    },
    MatrixCopy {
        dest: ViewId,
        src: ViewId,
    },
    MatrixAdd {
        dest: ViewId,
        src: ViewId,
    },
    AddRows {
        dest: ViewId,
        src: ViewId,
        rows: RowsTableId,
    },
    CopyRows {
        dest: ViewId,
        src: ViewId,
        rows: RowsTableId,
    },
    AddRowsMulti {
        dest: ViewId,
        pairs: PairsTableId,
    },
    CopyRowsMulti {
        dest: ViewId,
        pairs: PairsTableId,
    },
    AddToRowsMulti {
        src: ViewId,
        pairs: PairsTableId,
    },
    CopyToRowsMulti {
        src: ViewId,
        pairs: PairsTableId,
    },
    AddRowRanges {
        dest: ViewId,
        src: ViewId,
        ranges: RangesTableId,
    },
    NoOp,
    /// Separates the forward pass from the backward pass.
    Marker,
}

impl Instr {
    /// Listing mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::AllocZeroed { .. } => "alloc_zeroed",
            Instr::AllocUndefined { .. } => "alloc_undefined",
            Instr::Dealloc { .. } => "dealloc",
            Instr::Propagate { .. } => "propagate",
            Instr::StoreStats { .. } => "store_stats",
            Instr::Backprop { .. } => "backprop",
            Instr::MatrixCopy { .. } => "copy",
            Instr::MatrixAdd { .. } => "add",
            Instr::AddRows { .. } => "add_rows",
            Instr::CopyRows { .. } => "copy_rows",
            Instr::AddRowsMulti { .. } => "add_rows_multi",
            Instr::CopyRowsMulti { .. } => "copy_rows_multi",
            Instr::AddToRowsMulti { .. } => "add_to_rows_multi",
            Instr::CopyToRowsMulti { .. } => "copy_to_rows_multi",
            Instr::AddRowRanges { .. } => "add_row_ranges",
            Instr::NoOp => "noop",
            Instr::Marker => "marker",
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.mnemonic();
        match *self {
            Instr::AllocZeroed { buffer }
            | Instr::AllocUndefined { buffer }
            | Instr::Dealloc { buffer } => write!(f, "{op} {buffer}"),
            Instr::Propagate {
                component,
                precomputed,
                input,
                output,
            } => write!(f, "{op} {component} {precomputed} {input} {output}"),
            Instr::StoreStats { component, view } => write!(f, "{op} {component} {view}"),
            Instr::Backprop {
                node,
                precomputed,
                input,
                output,
                output_deriv,
                input_deriv,
            } => write!(
                f,
                "{op} {node} {precomputed} {input} {output} {output_deriv} {input_deriv}"
            ),
            Instr::MatrixCopy { dest, src } | Instr::MatrixAdd { dest, src } => {
                write!(f, "{op} {dest} {src}")
            }
            Instr::AddRows { dest, src, rows } | Instr::CopyRows { dest, src, rows } => {
                write!(f, "{op} {dest} {src} {rows}")
            }
            Instr::AddRowsMulti { dest, pairs } | Instr::CopyRowsMulti { dest, pairs } => {
                write!(f, "{op} {dest} {pairs}")
            }
            Instr::AddToRowsMulti { src, pairs } | Instr::CopyToRowsMulti { src, pairs } => {
                write!(f, "{op} {src} {pairs}")
            }
            Instr::AddRowRanges { dest, src, ranges } => write!(f, "{op} {dest} {src} {ranges}"),
            Instr::NoOp | Instr::Marker => write!(f, "{op}"),
        }
    }
}

// ── Program ──

/// A finalized program snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Index 0 is the null buffer.
    pub buffers: Vec<BufferInfo>,
    /// Index 0 is the empty view.
    pub views: Vec<ViewInfo>,
    pub instrs: Vec<Instr>,
    pub rows_tables: Vec<RowsTable>,
    pub pairs_tables: Vec<PairsTable>,
    pub ranges_tables: Vec<Vec<RowRange>>,
    /// Number of precomputed-index entries, including the "none" entry 0.
    pub num_precomputed: u32,
    pub endpoints: Vec<Endpoint>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// An empty program holding only the null buffer and empty view.
    pub fn new() -> Self {
        Program {
            buffers: vec![BufferInfo {
                num_rows: 0,
                num_cols: 0,
            }],
            views: vec![ViewInfo {
                buffer: BufferId::NULL,
                row_offset: 0,
                num_rows: 0,
                col_offset: 0,
                num_cols: 0,
            }],
            instrs: Vec::new(),
            rows_tables: Vec::new(),
            pairs_tables: Vec::new(),
            ranges_tables: Vec::new(),
            num_precomputed: 1,
            endpoints: Vec::new(),
        }
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn buffer(&self, id: BufferId) -> Option<&BufferInfo> {
        self.buffers.get(id.index())
    }

    pub fn view(&self, id: ViewId) -> Option<&ViewInfo> {
        self.views.get(id.index())
    }

    /// Append a buffer and return its id.
    pub fn add_buffer(&mut self, num_rows: u32, num_cols: u32) -> BufferId {
        self.buffers.push(BufferInfo { num_rows, num_cols });
        BufferId::from_index(self.buffers.len() - 1)
    }

    /// Append a view and return its id.
    pub fn add_view(
        &mut self,
        buffer: BufferId,
        row_offset: u32,
        num_rows: u32,
        col_offset: u32,
        num_cols: u32,
    ) -> ViewId {
        self.views.push(ViewInfo {
            buffer,
            row_offset,
            num_rows,
            col_offset,
            num_cols,
        });
        ViewId::from_index(self.views.len() - 1)
    }

    /// Append a view covering all of `buffer`; `None` if `buffer` is unknown.
    pub fn add_whole_view(&mut self, buffer: BufferId) -> Option<ViewId> {
        let info = *self.buffer(buffer)?;
        Some(self.add_view(buffer, 0, info.num_rows, 0, info.num_cols))
    }

    /// Position of the first pass marker, if any.
    pub fn marker_position(&self) -> Option<InstrIndex> {
        self.instrs
            .iter()
            .position(|i| matches!(i, Instr::Marker))
            .map(InstrIndex::from_index)
    }
}
