// listing.rs — Assembly of parsed .nnc listings into analysis inputs
//
// Walks the parsed listing in source order and builds the `Network`
// capability registry and the `Program` the analysis consumes. Ids must be
// declared densely (buffers and views from 1, everything else from 0) and
// integer fields must fit their target types; instruction operands are
// matched against the mnemonic's signature.
//
// Preconditions: none; `load` lexes and parses the source itself.
// Postconditions: on success, the program's instruction `i` is the listing's
//                 `i`-th instruction line, and every declared table is present.
// Failure modes: syntax errors (E0001), out-of-order declarations (E0002),
//                out-of-range values (E0003), label mismatches (E0004),
//                endpoint role mismatches (E0005), malformed sentinels (E0409).
//                Assembly continues past errors so that all are reported.
// Side effects: `tracing` debug event on success.

use crate::ast::{self, ItemKind, NodeRole, Operand, PairEntry, Span};
use crate::caps::{CapabilityQuery, ComponentInfo, Network, NodeKind};
use crate::diag::{codes, Diagnostic, Location};
use crate::id::*;
use crate::ir::{Endpoint, EndpointRole, Instr, Program, RowRange};
use crate::lexer::Op;

/// An assembled listing: the capability registry plus the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub network: Network,
    pub program: Program,
}

/// Lex, parse and assemble `source`.
pub fn load(source: &str) -> Result<Listing, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    if !parsed.errors.is_empty() {
        return Err(parsed
            .errors
            .iter()
            .map(|e| {
                Diagnostic::error(
                    codes::E0001_LISTING_SYNTAX,
                    Location::Source(*e.span()),
                    e.to_string(),
                )
            })
            .collect());
    }
    let Some(listing) = parsed.listing else {
        return Err(vec![Diagnostic::error(
            codes::E0001_LISTING_SYNTAX,
            Location::Program,
            "listing produced no items",
        )]);
    };
    assemble(&listing)
}

/// Assemble an already-parsed listing.
pub fn assemble(listing: &ast::Listing) -> Result<Listing, Vec<Diagnostic>> {
    let mut asm = Assembler::default();
    for item in &listing.items {
        asm.item(item);
    }
    if !asm.diagnostics.is_empty() {
        return Err(asm.diagnostics);
    }
    tracing::debug!(
        components = asm.network.num_components(),
        buffers = asm.program.num_buffers() - 1,
        views = asm.program.num_views() - 1,
        instrs = asm.program.instrs.len(),
        "assembled listing"
    );
    Ok(Listing {
        network: asm.network,
        program: asm.program,
    })
}

/// 1-based line and column of byte `offset` in `source`.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let col = before
        .rfind('\n')
        .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
        + 1;
    (line, col)
}

// ── Assembler ──

#[derive(Default)]
struct Assembler {
    network: Network,
    program: Program,
    /// Role of each declared node, indexed by node id.
    node_roles: Vec<NodeRole>,
    precomputed_declared: bool,
    diagnostics: Vec<Diagnostic>,
}

impl Assembler {
    fn error(&mut self, code: crate::diag::DiagCode, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(code, Location::Source(span), message));
    }

    /// Check that a declared id is the next one in sequence.
    fn dense(&mut self, sigil: char, id: u32, expected: usize, span: Span) -> bool {
        if id as usize == expected {
            return true;
        }
        self.error(
            codes::E0002_DECL_ORDER,
            span,
            format!("expected {sigil}{expected} to be declared next, found {sigil}{id}"),
        );
        false
    }

    fn unsigned(&mut self, what: &str, value: i64, span: Span) -> Option<u32> {
        match u32::try_from(value) {
            Ok(v) => Some(v),
            Err(_) => {
                self.error(
                    codes::E0003_BAD_VALUE,
                    span,
                    format!("{what} must be between 0 and {}, found {value}", u32::MAX),
                );
                None
            }
        }
    }

    fn signed(&mut self, what: &str, value: i64, span: Span) -> Option<i32> {
        match i32::try_from(value) {
            Ok(v) => Some(v),
            Err(_) => {
                self.error(
                    codes::E0003_BAD_VALUE,
                    span,
                    format!("{what} does not fit in 32 bits: {value}"),
                );
                None
            }
        }
    }

    fn item(&mut self, item: &ast::Item) {
        let span = item.span;
        match &item.kind {
            ItemKind::Component(decl) => self.component(decl, span),
            ItemKind::Node(decl) => self.node(decl, span),
            ItemKind::Precomputed(n) => self.precomputed(*n, span),
            ItemKind::Buffer(decl) => self.buffer(decl, span),
            ItemKind::View(decl) => self.view(decl, span),
            ItemKind::Rows(decl) => self.rows(decl, span),
            ItemKind::Pairs(decl) => self.pairs(decl, span),
            ItemKind::Ranges(decl) => self.ranges(decl, span),
            ItemKind::Endpoint(decl) => self.endpoint(decl, span),
            ItemKind::Instr(stmt) => self.instr(stmt, span),
        }
    }

    // ── Network ──

    fn component(&mut self, decl: &ast::ComponentDecl, span: Span) {
        let next = self.network.num_components();
        if !self.dense('k', decl.id, next, span) {
            return;
        }
        let input_dim = self.unsigned("input width", decl.input_dim, span);
        let output_dim = self.unsigned("output width", decl.output_dim, span);
        // Keep ids dense even when a width is rejected.
        self.network.add_component(ComponentInfo {
            input_dim: input_dim.unwrap_or(0),
            output_dim: output_dim.unwrap_or(0),
            caps: decl.caps,
        });
    }

    fn node(&mut self, decl: &ast::NodeDecl, span: Span) {
        if !self.dense('n', decl.id, self.node_roles.len(), span) {
            return;
        }
        let kind = match decl.role {
            NodeRole::Input => NodeKind::Input,
            NodeRole::Output => NodeKind::Output,
            NodeRole::Component(k) => {
                if k as usize >= self.network.num_components() {
                    self.error(
                        codes::E0002_DECL_ORDER,
                        span,
                        format!("node n{} uses undeclared component k{k}", decl.id),
                    );
                }
                NodeKind::Component(ComponentId(k))
            }
        };
        self.node_roles.push(decl.role);
        self.network.add_node(kind);
    }

    fn precomputed(&mut self, n: i64, span: Span) {
        if self.precomputed_declared {
            self.error(
                codes::E0002_DECL_ORDER,
                span,
                "precomputed entries declared twice",
            );
            return;
        }
        self.precomputed_declared = true;
        // a0 always exists on top of the declared entries.
        match u32::try_from(n).ok().and_then(|n| n.checked_add(1)) {
            Some(count) => self.program.num_precomputed = count,
            None => self.error(
                codes::E0003_BAD_VALUE,
                span,
                format!("precomputed entry count out of range: {n}"),
            ),
        }
    }

    // ── Buffers and views ──

    fn buffer(&mut self, decl: &ast::BufferDecl, span: Span) {
        if !self.dense('b', decl.id, self.program.num_buffers(), span) {
            return;
        }
        let rows = self.unsigned("buffer rows", decl.num_rows, span).unwrap_or(0);
        let cols = self.unsigned("buffer columns", decl.num_cols, span).unwrap_or(0);
        self.program.add_buffer(rows, cols);
    }

    fn view(&mut self, decl: &ast::ViewDecl, span: Span) {
        if !self.dense('v', decl.id, self.program.num_views(), span) {
            return;
        }
        let buffer = BufferId(decl.buffer);
        if buffer.is_null() || buffer.index() >= self.program.num_buffers() {
            self.error(
                codes::E0002_DECL_ORDER,
                span,
                format!("view v{} is over undeclared buffer {buffer}", decl.id),
            );
        }
        let row_offset = self.unsigned("row offset", decl.row_offset, span).unwrap_or(0);
        let num_rows = self.unsigned("view rows", decl.num_rows, span).unwrap_or(0);
        let col_offset = self.unsigned("column offset", decl.col_offset, span).unwrap_or(0);
        let num_cols = self.unsigned("view columns", decl.num_cols, span).unwrap_or(0);
        self.program
            .add_view(buffer, row_offset, num_rows, col_offset, num_cols);
    }

    // ── Tables ──

    fn rows(&mut self, decl: &ast::RowsDecl, span: Span) {
        if !self.dense('r', decl.id, self.program.rows_tables.len(), span) {
            return;
        }
        let mut table = Vec::with_capacity(decl.rows.len());
        for &(row, row_span) in &decl.rows {
            let entry = match row {
                -1 => None,
                r if r < -1 => {
                    self.error(
                        codes::E0409_SENTINEL,
                        row_span,
                        format!("negative row {r}; the no-source sentinel is -1"),
                    );
                    None
                }
                r => self.unsigned("row", r, row_span),
            };
            table.push(entry);
        }
        self.program.rows_tables.push(table);
    }

    fn pairs(&mut self, decl: &ast::PairsDecl, span: Span) {
        if !self.dense('p', decl.id, self.program.pairs_tables.len(), span) {
            return;
        }
        let mut table = Vec::with_capacity(decl.pairs.len());
        for &(entry, entry_span) in &decl.pairs {
            let pair = match entry {
                PairEntry::Ints(-1, -1) => None,
                PairEntry::Ints(a, b) => {
                    self.error(
                        codes::E0409_SENTINEL,
                        entry_span,
                        format!("sentinel pair must be (-1, -1), found ({a}, {b})"),
                    );
                    None
                }
                PairEntry::View(v, row) => self
                    .unsigned("row", row, entry_span)
                    .map(|row| (ViewId(v), row)),
            };
            table.push(pair);
        }
        self.program.pairs_tables.push(table);
    }

    fn ranges(&mut self, decl: &ast::RangesDecl, span: Span) {
        if !self.dense('g', decl.id, self.program.ranges_tables.len(), span) {
            return;
        }
        let mut table = Vec::with_capacity(decl.ranges.len());
        for &(start, end, range_span) in &decl.ranges {
            let start = self.signed("range start", start, range_span);
            let end = self.signed("range end", end, range_span);
            if let (Some(start), Some(end)) = (start, end) {
                table.push(RowRange { start, end });
            }
        }
        self.program.ranges_tables.push(table);
    }

    // ── Endpoints ──

    fn endpoint(&mut self, decl: &ast::EndpointDecl, span: Span) {
        let Some(&role) = self.node_roles.get(decl.node as usize) else {
            self.error(
                codes::E0002_DECL_ORDER,
                span,
                format!("endpoint names undeclared node n{}", decl.node),
            );
            return;
        };
        let matches = matches!(
            (decl.role, role),
            (EndpointRole::Input, NodeRole::Input) | (EndpointRole::Output, NodeRole::Output)
        );
        if !matches {
            let want = match decl.role {
                EndpointRole::Input => "input",
                EndpointRole::Output => "output",
            };
            self.error(
                codes::E0005_NODE_ROLE,
                span,
                format!("n{} is not an {want} node", decl.node),
            );
            return;
        }
        self.program.endpoints.push(Endpoint {
            node: NodeId(decl.node),
            role: decl.role,
            value: BufferId(decl.value),
            deriv: decl.deriv.map(BufferId),
        });
    }

    // ── Instructions ──

    fn instr(&mut self, stmt: &ast::InstrStmt, span: Span) {
        let position = self.program.instrs.len();
        if let Some((label, label_span)) = stmt.label {
            if label as usize != position {
                self.error(
                    codes::E0004_LABEL_MISMATCH,
                    label_span,
                    format!("label c{label} on instruction c{position}"),
                );
            }
        }
        match build_instr(stmt.op, &stmt.operands) {
            Ok(instr) => self.program.instrs.push(instr),
            Err(msg) => {
                self.error(codes::E0001_LISTING_SYNTAX, span, msg);
                // Keep later labels aligned with their lines.
                self.program.instrs.push(Instr::NoOp);
            }
        }
    }
}

/// Match `operands` against the operand signature of `op`.
fn build_instr(op: Op, operands: &[Operand]) -> Result<Instr, String> {
    use Operand as O;

    let instr = match (op, operands) {
        (Op::AllocZeroed, &[O::Buffer(buffer)]) => Instr::AllocZeroed { buffer },
        (Op::AllocUndefined, &[O::Buffer(buffer)]) => Instr::AllocUndefined { buffer },
        (Op::Dealloc, &[O::Buffer(buffer)]) => Instr::Dealloc { buffer },
        (
            Op::Propagate,
            &[O::Component(component), O::Precomputed(precomputed), O::View(input), O::View(output)],
        ) => Instr::Propagate {
            component,
            precomputed,
            input,
            output,
        },
        (Op::StoreStats, &[O::Component(component), O::View(view)]) => {
            Instr::StoreStats { component, view }
        }
        (
            Op::Backprop,
            &[O::Node(node), O::Precomputed(precomputed), O::View(input), O::View(output), O::View(output_deriv), O::View(input_deriv)],
        ) => Instr::Backprop {
            node,
            precomputed,
            input,
            output,
            output_deriv,
            input_deriv,
        },
        (Op::Copy, &[O::View(dest), O::View(src)]) => Instr::MatrixCopy { dest, src },
        (Op::Add, &[O::View(dest), O::View(src)]) => Instr::MatrixAdd { dest, src },
        (Op::AddRows, &[O::View(dest), O::View(src), O::Rows(rows)]) => {
            Instr::AddRows { dest, src, rows }
        }
        (Op::CopyRows, &[O::View(dest), O::View(src), O::Rows(rows)]) => {
            Instr::CopyRows { dest, src, rows }
        }
        (Op::AddRowsMulti, &[O::View(dest), O::Pairs(pairs)]) => {
            Instr::AddRowsMulti { dest, pairs }
        }
        (Op::CopyRowsMulti, &[O::View(dest), O::Pairs(pairs)]) => {
            Instr::CopyRowsMulti { dest, pairs }
        }
        (Op::AddToRowsMulti, &[O::View(src), O::Pairs(pairs)]) => {
            Instr::AddToRowsMulti { src, pairs }
        }
        (Op::CopyToRowsMulti, &[O::View(src), O::Pairs(pairs)]) => {
            Instr::CopyToRowsMulti { src, pairs }
        }
        (Op::AddRowRanges, &[O::View(dest), O::View(src), O::Ranges(ranges)]) => {
            Instr::AddRowRanges { dest, src, ranges }
        }
        (Op::NoOp, &[]) => Instr::NoOp,
        (Op::Marker, &[]) => Instr::Marker,
        (Op::NoOp | Op::Marker, _) => return Err(format!("`{op}` takes no operands")),
        _ => {
            return Err(format!(
                "`{op}` expects operands `{}`",
                op.signature()
            ))
        }
    };
    Ok(instr)
}

// ── Tests ──
