// verify.rs — Program well-formedness checks
//
// Fail-fast checks over a program and its analysis. Each returns the first
// violation as a coded error diagnostic; the only non-fatal finding (an
// input buffer that is never touched) goes to the caller's `DiagSink`.
//
// Preconditions: none for `check_indexes` / `check_order`; the analysis-based
//                checks expect an `Analysis` built from the same program.
// Postconditions: `Checker::check` returns the analysis only if every
//                 enabled check passed.
// Failure modes: see `diag::codes` E04xx..E08xx.
// Side effects: warnings recorded in the sink are also logged via `tracing`.

use crate::access::AccessKind;
use crate::analysis::Analysis;
use crate::caps::{Caps, CapabilityQuery, ComponentInfo, NodeKind};
use crate::diag::{codes, DiagCode, DiagLevel, DiagSink, Diagnostic, Location};
use crate::id::{
    BufferId, ComponentId, InstrIndex, NodeId, PairsTableId, PrecomputedId, VariableId, ViewId,
};
use crate::ir::{Instr, PairsTable, Program, ViewInfo};

// ── Options ──

/// Which optional checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    /// Reject writes to a variable after it has been purely read. Programs
    /// rewritten to compute in place legitimately violate this.
    pub check_rewrite: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            check_rewrite: true,
        }
    }
}

// ── Checker ──

/// Runs the full check battery over one program.
pub struct Checker<'a, C: ?Sized> {
    options: CheckOptions,
    caps: &'a C,
    program: &'a Program,
}

impl<'a, C: CapabilityQuery + ?Sized> Checker<'a, C> {
    pub fn new(options: CheckOptions, caps: &'a C, program: &'a Program) -> Self {
        Checker {
            options,
            caps,
            program,
        }
    }

    /// Bounds, then analysis, then ordering, lifecycle, undefined use and
    /// (if enabled) rewrite safety.
    pub fn check(&self, sink: &mut DiagSink) -> Result<Analysis, Diagnostic> {
        self.check_indexes()?;
        let analysis = Analysis::build(self.caps, self.program)?;
        check_order(self.program)?;
        check_buffer_accesses(&analysis, sink)?;
        check_undefined(&analysis)?;
        if self.options.check_rewrite {
            check_rewrite(&analysis)?;
        }
        tracing::debug!(
            instrs = self.program.instrs.len(),
            variables = analysis.variables.num_variables(),
            check_rewrite = self.options.check_rewrite,
            "program passed all checks"
        );
        Ok(analysis)
    }

    /// Every operand in range and every shape consistent with the
    /// components and tables involved.
    pub fn check_indexes(&self) -> Result<(), Diagnostic> {
        check_views(self.program)?;
        for (c, instr) in self.program.instrs.iter().enumerate() {
            let at = IndexCheck {
                caps: self.caps,
                program: self.program,
                at: InstrIndex::from_index(c),
            };
            at.check(instr)?;
        }
        Ok(())
    }
}

/// Views must name a real buffer and lie inside it.
fn check_views(program: &Program) -> Result<(), Diagnostic> {
    for (v, view) in program.views.iter().enumerate().skip(1) {
        let id = ViewId::from_index(v);
        let buffer = match program.buffer(view.buffer) {
            Some(buffer) if !view.buffer.is_null() => buffer,
            _ => {
                return Err(Diagnostic::error(
                    codes::E0103_VIEW_BUFFER,
                    Location::View(id),
                    format!("view {id} refers to unknown buffer {}", view.buffer),
                ))
            }
        };
        let row_end = view.row_offset as u64 + view.num_rows as u64;
        let col_end = view.col_offset as u64 + view.num_cols as u64;
        if row_end > buffer.num_rows as u64 || col_end > buffer.num_cols as u64 {
            return Err(Diagnostic::error(
                codes::E0400_INDEX_RANGE,
                Location::View(id),
                format!(
                    "view {id} (rows {}..{row_end}, cols {}..{col_end}) exceeds {} ({}x{})",
                    view.row_offset, view.col_offset, view.buffer, buffer.num_rows, buffer.num_cols
                ),
            ));
        }
    }
    Ok(())
}

// ── Bounds / shape ──

struct IndexCheck<'a, C: ?Sized> {
    caps: &'a C,
    program: &'a Program,
    at: InstrIndex,
}

impl<'a, C: CapabilityQuery + ?Sized> IndexCheck<'a, C> {
    fn fail(&self, code: DiagCode, message: String) -> Diagnostic {
        Diagnostic::error(code, Location::Instr(self.at), message)
    }

    fn view(&self, id: ViewId, role: &str, optional: bool) -> Result<&'a ViewInfo, Diagnostic> {
        match self.program.view(id) {
            Some(view) if optional || !id.is_empty() => Ok(view),
            _ => Err(self.fail(
                codes::E0400_INDEX_RANGE,
                format!("{role} operand {id} of {} is out of range", self.at),
            )),
        }
    }

    fn component(&self, id: ComponentId) -> Result<&'a ComponentInfo, Diagnostic> {
        self.caps.component(id).ok_or_else(|| {
            self.fail(
                codes::E0200_UNKNOWN_COMPONENT,
                format!("{} refers to unknown component {id}", self.at),
            )
        })
    }

    fn node_component(&self, id: NodeId) -> Result<&'a ComponentInfo, Diagnostic> {
        match self.caps.node(id) {
            Some(NodeKind::Component(k)) => self.component(k),
            _ => Err(self.fail(
                codes::E0201_UNKNOWN_NODE,
                format!("{} backpropagates through {id}, which is not a component node", self.at),
            )),
        }
    }

    fn precomputed(&self, id: PrecomputedId, info: &ComponentInfo) -> Result<(), Diagnostic> {
        if id.0 >= self.program.num_precomputed {
            return Err(self.fail(
                codes::E0408_PRECOMPUTED,
                format!(
                    "{} uses precomputed indexes {id}, but only a0..a{} exist",
                    self.at,
                    self.program.num_precomputed.saturating_sub(1)
                ),
            ));
        }
        if id.0 != 0 && info.has(Caps::SIMPLE) {
            return Err(self.fail(
                codes::E0408_PRECOMPUTED,
                format!("{} passes precomputed indexes {id} to a simple component", self.at),
            ));
        }
        Ok(())
    }

    fn cols(&self, view: &ViewInfo, expected: u32, what: &str) -> Result<(), Diagnostic> {
        if view.num_cols != expected {
            return Err(self.fail(
                codes::E0401_DIM_MISMATCH,
                format!(
                    "{}: {what} has {} columns, expected {expected}",
                    self.at, view.num_cols
                ),
            ));
        }
        Ok(())
    }

    fn rows(&self, actual: usize, expected: usize, what: &str) -> Result<(), Diagnostic> {
        if actual != expected {
            return Err(self.fail(
                codes::E0402_ROWS_MISMATCH,
                format!("{}: {what} has {actual} rows, expected {expected}", self.at),
            ));
        }
        Ok(())
    }

    fn not_self(&self, a: ViewId, b: ViewId, what: &str) -> Result<(), Diagnostic> {
        if a == b {
            return Err(self.fail(
                codes::E0403_IN_PLACE,
                format!("{} {what} {a} in place, which is not supported", self.at),
            ));
        }
        Ok(())
    }

    fn pairs(&self, id: PairsTableId) -> Result<&'a PairsTable, Diagnostic> {
        self.program.pairs_tables.get(id.index()).ok_or_else(|| {
            self.fail(
                codes::E0203_TABLE_RANGE,
                format!("{} refers to unknown pairs table {id}", self.at),
            )
        })
    }

    fn check(&self, instr: &Instr) -> Result<(), Diagnostic> {
        match *instr {
            Instr::AllocZeroed { buffer }
            | Instr::AllocUndefined { buffer }
            | Instr::Dealloc { buffer } => {
                if buffer.is_null() || buffer.index() >= self.program.num_buffers() {
                    return Err(self.fail(
                        codes::E0400_INDEX_RANGE,
                        format!("{} names buffer {buffer}, which is out of range", self.at),
                    ));
                }
            }
            Instr::Propagate {
                component,
                precomputed,
                input,
                output,
            } => {
                let info = self.component(component)?;
                self.precomputed(precomputed, info)?;
                let simple = info.has(Caps::SIMPLE);
                // Only non-simple components may run without an input, and
                // then only with input_dim 0 (the empty view has no columns).
                let in_view = self.view(input, "input", !simple)?;
                let out_view = self.view(output, "output", false)?;
                self.cols(in_view, info.input_dim, "input")?;
                self.cols(out_view, info.output_dim, "output")?;
                if simple {
                    self.rows(in_view.num_rows as usize, out_view.num_rows as usize, "input")?;
                }
                if !info.has(Caps::PROPAGATE_IN_PLACE) {
                    self.not_self(input, output, "propagates")?;
                }
            }
            Instr::StoreStats { component, view } => {
                let info = self.component(component)?;
                if !info.has(Caps::STORES_STATS) {
                    return Err(self.fail(
                        codes::E0406_CAPABILITY,
                        format!("{} stores stats for {component}, which keeps none", self.at),
                    ));
                }
                let stats = self.view(view, "stats", false)?;
                self.cols(stats, info.output_dim, "stats view")?;
            }
            Instr::Backprop {
                node,
                precomputed,
                input,
                output,
                output_deriv,
                input_deriv,
            } => self.check_backprop(node, precomputed, [input, output, output_deriv, input_deriv])?,
            Instr::MatrixCopy { dest, src } | Instr::MatrixAdd { dest, src } => {
                let d = self.view(dest, "destination", false)?;
                let s = self.view(src, "source", false)?;
                if (d.num_rows, d.num_cols) != (s.num_rows, s.num_cols) {
                    return Err(self.fail(
                        codes::E0401_DIM_MISMATCH,
                        format!(
                            "{}: {dest} is {}x{} but {src} is {}x{}",
                            self.at, d.num_rows, d.num_cols, s.num_rows, s.num_cols
                        ),
                    ));
                }
                self.not_self(dest, src, "copies or adds")?;
            }
            Instr::AddRows { dest, src, rows } | Instr::CopyRows { dest, src, rows } => {
                let d = self.view(dest, "destination", false)?;
                let s = self.view(src, "source", false)?;
                let table = self.program.rows_tables.get(rows.index()).ok_or_else(|| {
                    self.fail(
                        codes::E0203_TABLE_RANGE,
                        format!("{} refers to unknown rows table {rows}", self.at),
                    )
                })?;
                self.rows(table.len(), d.num_rows as usize, "rows table")?;
                self.cols(s, d.num_cols, "source")?;
                if let Some(bad) = table.iter().flatten().find(|&&r| r >= s.num_rows) {
                    return Err(self.fail(
                        codes::E0405_ROW_RANGE,
                        format!(
                            "{}: source row {bad} is out of range for {src} ({} rows)",
                            self.at, s.num_rows
                        ),
                    ));
                }
                self.not_self(dest, src, "copies rows")?;
            }
            Instr::AddRowsMulti { dest: own, pairs }
            | Instr::CopyRowsMulti { dest: own, pairs } => self.check_multi(own, pairs, false)?,
            Instr::AddToRowsMulti { src: own, pairs }
            | Instr::CopyToRowsMulti { src: own, pairs } => self.check_multi(own, pairs, true)?,
            Instr::AddRowRanges { dest, src, ranges } => {
                let d = self.view(dest, "destination", false)?;
                let s = self.view(src, "source", false)?;
                let table = self.program.ranges_tables.get(ranges.index()).ok_or_else(|| {
                    self.fail(
                        codes::E0203_TABLE_RANGE,
                        format!("{} refers to unknown ranges table {ranges}", self.at),
                    )
                })?;
                self.rows(table.len(), d.num_rows as usize, "ranges table")?;
                self.cols(s, d.num_cols, "source")?;
                let src_rows = s.num_rows as i64;
                for range in table {
                    let (start, end) = (range.start as i64, range.end as i64);
                    if start < 0 || end < start || end > src_rows {
                        return Err(self.fail(
                            codes::E0405_ROW_RANGE,
                            format!(
                                "{}: row range [{start}, {end}) is invalid for {src} ({src_rows} rows)",
                                self.at
                            ),
                        ));
                    }
                }
            }
            Instr::NoOp | Instr::Marker => {}
        }
        Ok(())
    }

    fn check_backprop(
        &self,
        node: NodeId,
        precomputed: PrecomputedId,
        [input, output, output_deriv, input_deriv]: [ViewId; 4],
    ) -> Result<(), Diagnostic> {
        let info = self.node_component(node)?;
        self.precomputed(precomputed, info)?;
        let in_view = self.view(input, "input", true)?;
        let out_view = self.view(output, "output", true)?;
        let out_deriv = self.view(output_deriv, "output-derivative", false)?;
        let in_deriv = self.view(input_deriv, "input-derivative", true)?;

        if info.has(Caps::BACKPROP_NEEDS_INPUT) && input.is_empty() {
            return Err(self.fail(
                codes::E0406_CAPABILITY,
                format!("{}: backprop through {node} needs its input", self.at),
            ));
        }
        if info.has(Caps::BACKPROP_NEEDS_OUTPUT) && output.is_empty() {
            return Err(self.fail(
                codes::E0406_CAPABILITY,
                format!("{}: backprop through {node} needs its output", self.at),
            ));
        }
        if input_deriv.is_empty() && !info.has(Caps::UPDATABLE) {
            return Err(self.fail(
                codes::E0407_NO_EFFECT,
                format!(
                    "{}: backprop through {node} computes no input derivative and updates nothing",
                    self.at
                ),
            ));
        }
        if !info.has(Caps::BACKPROP_IN_PLACE) {
            self.not_self(output_deriv, input_deriv, "backpropagates")?;
        }

        if !input.is_empty() {
            self.cols(in_view, info.input_dim, "input")?;
        }
        if !output.is_empty() {
            self.cols(out_view, info.output_dim, "output")?;
        }
        self.cols(out_deriv, info.output_dim, "output derivative")?;
        if !input_deriv.is_empty() {
            self.cols(in_deriv, info.input_dim, "input derivative")?;
        }

        if !input.is_empty() && !input_deriv.is_empty() {
            self.rows(in_deriv.num_rows as usize, in_view.num_rows as usize, "input derivative")?;
        }
        if !output.is_empty() {
            self.rows(out_deriv.num_rows as usize, out_view.num_rows as usize, "output derivative")?;
        }
        if info.has(Caps::SIMPLE) && !input_deriv.is_empty() {
            self.rows(in_deriv.num_rows as usize, out_deriv.num_rows as usize, "input derivative")?;
        }
        Ok(())
    }

    fn check_multi(&self, own: ViewId, pairs: PairsTableId, scatter: bool) -> Result<(), Diagnostic> {
        let own_view = self.view(own, "matrix", false)?;
        let table = self.pairs(pairs)?;
        self.rows(table.len(), own_view.num_rows as usize, "pairs table")?;
        for &(view, row) in table.iter().flatten() {
            let other = match self.program.view(view) {
                Some(other) if !view.is_empty() => other,
                _ => {
                    return Err(self.fail(
                        codes::E0400_INDEX_RANGE,
                        format!("{}: pairs table {pairs} names {view}, which is out of range", self.at),
                    ))
                }
            };
            if row >= other.num_rows {
                return Err(self.fail(
                    codes::E0405_ROW_RANGE,
                    format!(
                        "{}: pairs table {pairs} names row {row} of {view}, which has {} rows",
                        self.at, other.num_rows
                    ),
                ));
            }
            self.not_self(own, view, "gathers or scatters rows of")?;
            self.cols(other, own_view.num_cols, "paired view")?;
        }
        if scatter {
            let mut targets: Vec<(ViewId, u32)> = table.iter().flatten().copied().collect();
            targets.sort_unstable();
            if let Some(w) = targets.windows(2).find(|w| w[0] == w[1]) {
                let (view, row) = w[0];
                return Err(self.fail(
                    codes::E0404_DUPLICATE_TARGET,
                    format!(
                        "{}: row {row} of {view} appears more than once in scatter table {pairs}",
                        self.at
                    ),
                ));
            }
        }
        Ok(())
    }
}

// ── Ordering ──

/// Exactly one marker, with every Propagate/StoreStats before it and every
/// Backprop after it.
pub fn check_order(program: &Program) -> Result<(), Diagnostic> {
    let Some(first) = program.marker_position() else {
        return Err(Diagnostic::error(
            codes::E0500_MARKER_COUNT,
            Location::Program,
            "program has no forward/backward marker",
        ));
    };
    let marker = first.index();
    let extra: Vec<usize> = program.instrs[marker + 1..]
        .iter()
        .enumerate()
        .filter(|(_, i)| matches!(i, Instr::Marker))
        .map(|(c, _)| marker + 1 + c)
        .collect();
    if let Some(&second) = extra.first() {
        return Err(Diagnostic::error(
            codes::E0500_MARKER_COUNT,
            Location::Instr(InstrIndex::from_index(second)),
            format!("program has {} markers; expected exactly one", extra.len() + 1),
        ));
    }

    for (c, instr) in program.instrs.iter().enumerate() {
        let at = InstrIndex::from_index(c);
        let violation = match instr {
            Instr::Backprop { .. } if c < marker => {
                Some((codes::E0501_BACKPROP_BEFORE_MARKER, "backprop before the marker"))
            }
            Instr::Propagate { .. } if c > marker => {
                Some((codes::E0502_PROPAGATE_AFTER_MARKER, "propagate after the marker"))
            }
            Instr::StoreStats { .. } if c > marker => {
                Some((codes::E0503_STORE_STATS_AFTER_MARKER, "store_stats after the marker"))
            }
            _ => None,
        };
        if let Some((code, what)) = violation {
            return Err(Diagnostic::error(
                code,
                Location::Instr(at),
                format!("{at}: {what} at c{marker}"),
            ));
        }
    }
    Ok(())
}

// ── Buffer lifecycle ──

/// Allocation, deallocation and access order of every buffer.
pub fn check_buffer_accesses(analysis: &Analysis, sink: &mut DiagSink) -> Result<(), Diagnostic> {
    for (b, record) in analysis.buffer_accesses.iter().enumerate().skip(1) {
        let buffer = BufferId::from_index(b);
        let fail = |code, message: String| Err(Diagnostic::error(code, Location::Buffer(buffer), message));

        if record.is_input {
            if let Some(alloc) = record.allocate {
                return fail(
                    codes::E0600_INPUT_ALLOCATED,
                    format!("input buffer {buffer} is allocated at {alloc}"),
                );
            }
        } else {
            let Some(alloc) = record.allocate else {
                return fail(
                    codes::E0601_NOT_ALLOCATED,
                    format!("buffer {buffer} is never allocated"),
                );
            };
            match record.accesses.first() {
                None => {
                    return fail(
                        codes::E0602_NEVER_ACCESSED,
                        format!("buffer {buffer} is never accessed"),
                    )
                }
                Some(first) if first.instr < alloc => {
                    return fail(
                        codes::E0603_ACCESS_BEFORE_ALLOC,
                        format!("buffer {buffer} is accessed at {} before its allocation at {alloc}", first.instr),
                    )
                }
                Some(_) => {}
            }
        }

        if record.is_output {
            if let Some(dealloc) = record.deallocate {
                return fail(
                    codes::E0604_OUTPUT_DEALLOCATED,
                    format!("output buffer {buffer} is deallocated at {dealloc}"),
                );
            }
        } else {
            let Some(dealloc) = record.deallocate else {
                return fail(
                    codes::E0605_NOT_DEALLOCATED,
                    format!("buffer {buffer} is never deallocated"),
                );
            };
            match record.accesses.last() {
                None if record.is_input => {
                    sink.warn_once(
                        Diagnostic::new(
                            DiagLevel::Warning,
                            Location::Buffer(buffer),
                            format!("input buffer {buffer} is never accessed"),
                        )
                        .with_code(codes::W0600_UNUSED_INPUT)
                        .with_hint("an unneeded input or derivative was supplied; reported once"),
                    );
                }
                None => {
                    return fail(
                        codes::E0602_NEVER_ACCESSED,
                        format!("buffer {buffer} is never accessed"),
                    )
                }
                Some(last) if last.instr >= dealloc => {
                    return fail(
                        codes::E0606_ACCESS_AFTER_DEALLOC,
                        format!("buffer {buffer} is accessed at {} after its deallocation at {dealloc}", last.instr),
                    )
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

// ── Variable-level checks ──

fn variable_is_input(analysis: &Analysis, x: VariableId) -> bool {
    analysis
        .variables
        .buffer_for_variable(x)
        .and_then(|b| analysis.accesses_of_buffer(b))
        .is_some_and(|record| record.is_input)
}

fn variable_location(analysis: &Analysis, x: VariableId) -> String {
    match analysis.variables.buffer_for_variable(x) {
        Some(b) => format!("variable {x} (part of {b})"),
        None => format!("variable {x}"),
    }
}

/// Every variable outside input buffers is written before it is read.
pub fn check_undefined(analysis: &Analysis) -> Result<(), Diagnostic> {
    for (x, accesses) in analysis.variable_accesses.iter().enumerate() {
        let x = VariableId::from_index(x);
        if variable_is_input(analysis, x) {
            continue;
        }
        match accesses.first() {
            None => {
                return Err(Diagnostic::error(
                    codes::E0700_VARIABLE_UNUSED,
                    Location::Variable(x),
                    format!("{} is never used", variable_location(analysis, x)),
                ))
            }
            Some(first) if first.kind != AccessKind::Write => {
                return Err(Diagnostic::error(
                    codes::E0701_READ_BEFORE_WRITE,
                    Location::Variable(x),
                    format!(
                        "{} is read at {} before it is written",
                        variable_location(analysis, x),
                        first.instr
                    ),
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// No variable is modified after its first pure read.
pub fn check_rewrite(analysis: &Analysis) -> Result<(), Diagnostic> {
    for (x, accesses) in analysis.variable_accesses.iter().enumerate() {
        let x = VariableId::from_index(x);
        if accesses.is_empty() && !variable_is_input(analysis, x) {
            return Err(Diagnostic::error(
                codes::E0800_VARIABLE_UNUSED,
                Location::Variable(x),
                format!("{} is never used", variable_location(analysis, x)),
            ));
        }
        let Some(first_read) = accesses.iter().position(|a| a.kind == AccessKind::Read) else {
            continue;
        };
        if let Some(write) = accesses[first_read + 1..]
            .iter()
            .find(|a| a.kind != AccessKind::Read)
        {
            return Err(Diagnostic::error(
                codes::E0801_WRITE_AFTER_READ,
                Location::Variable(x),
                format!(
                    "{} is modified at {} after being read at {}",
                    variable_location(analysis, x),
                    write.instr,
                    accesses[first_read].instr
                ),
            )
            .with_hint("expected only after in-place optimization; pass --no-check-rewrite"));
        }
    }
    Ok(())
}
