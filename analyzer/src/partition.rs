// partition.rs — Column partition of buffers into variables
//
// Splits every buffer, along its columns, into the coarsest set of disjoint
// variables such that each view covers a whole run of variables. Split
// points are the distinct column offsets and column ends of the views of
// that buffer. Variables are numbered globally in buffer order.
//
// Preconditions: `program.buffers[0]` / `program.views[0]` are the null entries.
// Postconditions: every non-null view maps to a non-empty variable range that
//                 lies inside its buffer's block; every buffer's variables tile
//                 its full column range; every variable has an owner.
// Failure modes: view on a null/unknown buffer, buffer with no views, views
//                leaving columns uncovered, view covering no columns,
//                split-point lookup miss.
// Side effects: none.

use std::ops::Range;

use serde::Serialize;

use crate::access::{AccessKind, InstrAttributes};
use crate::diag::{codes, Diagnostic, Location};
use crate::id::{BufferId, VariableId, ViewId};
use crate::ir::Program;

/// Variable partition of a program's buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variables {
    /// Sorted, deduplicated column split points per buffer.
    split_points: Vec<Vec<u32>>,
    /// First variable of each buffer; one extra trailing entry.
    buffer_base: Vec<u32>,
    /// Half-open variable range per view.
    view_ranges: Vec<(u32, u32)>,
    view_buffer: Vec<BufferId>,
    view_full_rows: Vec<bool>,
    view_whole: Vec<bool>,
    variable_buffer: Vec<BufferId>,
}

impl Variables {
    pub fn build(program: &Program) -> Result<Self, Diagnostic> {
        let split_points = compute_split_points(program)?;

        let mut buffer_base = Vec::with_capacity(split_points.len() + 1);
        buffer_base.push(0);
        let mut next = 0u32;
        for (b, split) in split_points.iter().enumerate() {
            if b > 0 {
                next += (split.len() - 1) as u32;
            }
            buffer_base.push(next);
        }

        let mut vars = Variables {
            split_points,
            buffer_base,
            view_ranges: vec![(0, 0)],
            view_buffer: vec![BufferId::NULL],
            view_full_rows: vec![false],
            view_whole: vec![false],
            variable_buffer: Vec::new(),
        };
        vars.compute_view_ranges(program)?;
        vars.compute_variable_buffers()?;

        tracing::debug!(
            buffers = program.num_buffers() - 1,
            views = program.num_views() - 1,
            variables = vars.num_variables(),
            "partitioned buffers into variables"
        );
        Ok(vars)
    }

    fn compute_view_ranges(&mut self, program: &Program) -> Result<(), Diagnostic> {
        for (v, view) in program.views.iter().enumerate().skip(1) {
            let view_id = ViewId::from_index(v);
            let b = view.buffer.index();
            let split = &self.split_points[b];
            let start = split_position(split, view.col_offset, view_id)?;
            let end = split_position(split, view.col_end(), view_id)?;
            if end <= start {
                return Err(Diagnostic::error(
                    codes::E0100_SPLIT_POINT,
                    Location::View(view_id),
                    format!("view {view_id} covers no columns of {}", view.buffer),
                ));
            }
            let base = self.buffer_base[b];
            self.view_ranges.push((base + start as u32, base + end as u32));
            self.view_buffer.push(view.buffer);
            let info = &program.buffers[b];
            self.view_full_rows.push(view.covers_all_rows(info));
            self.view_whole.push(view.covers_whole(info));
        }
        Ok(())
    }

    fn compute_variable_buffers(&mut self) -> Result<(), Diagnostic> {
        let num_buffers = self.split_points.len();
        self.variable_buffer = vec![BufferId::NULL; self.num_variables()];
        for b in 1..num_buffers {
            let (lo, hi) = (self.buffer_base[b], self.buffer_base[b + 1]);
            for x in lo..hi {
                self.variable_buffer[x as usize] = BufferId::from_index(b);
            }
        }
        // Every view must land inside its own buffer's block.
        for (v, &(lo, hi)) in self.view_ranges.iter().enumerate().skip(1) {
            let owner = self.view_buffer[v];
            for x in lo..hi {
                if self.variable_buffer[x as usize] != owner {
                    return Err(Diagnostic::error(
                        codes::E0102_VARIABLE_OWNER,
                        Location::Variable(VariableId(x)),
                        format!(
                            "variable x{x} is claimed by {} through view v{v} but belongs to {}",
                            owner, self.variable_buffer[x as usize]
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn num_variables(&self) -> usize {
        self.buffer_base.last().copied().unwrap_or(0) as usize
    }

    /// Number of buffers including the null buffer.
    pub fn num_buffers(&self) -> usize {
        self.split_points.len()
    }

    /// Number of views including the empty view.
    pub fn num_views(&self) -> usize {
        self.view_ranges.len()
    }

    /// Variables covered by `view`; empty for the empty view.
    pub fn variables_for_view(&self, view: ViewId) -> Option<Range<usize>> {
        self.view_ranges
            .get(view.index())
            .map(|&(lo, hi)| lo as usize..hi as usize)
    }

    /// Variables owned by `buffer`; empty for the null buffer.
    pub fn variables_for_buffer(&self, buffer: BufferId) -> Option<Range<usize>> {
        let b = buffer.index();
        if b >= self.num_buffers() {
            return None;
        }
        Some(self.buffer_base[b] as usize..self.buffer_base[b + 1] as usize)
    }

    pub fn buffer_for_variable(&self, variable: VariableId) -> Option<BufferId> {
        self.variable_buffer.get(variable.index()).copied()
    }

    pub fn view_buffer(&self, view: ViewId) -> Option<BufferId> {
        self.view_buffer.get(view.index()).copied()
    }

    /// True if `view` spans all rows of its buffer.
    pub fn view_is_full_rows(&self, view: ViewId) -> bool {
        self.view_full_rows.get(view.index()).copied().unwrap_or(false)
    }

    pub fn view_is_whole_buffer(&self, view: ViewId) -> bool {
        self.view_whole.get(view.index()).copied().unwrap_or(false)
    }

    /// Record an access of `kind` through `view` into `attrs`.
    ///
    /// A write through a view that misses some rows also reads the covered
    /// variables; a write through anything short of the whole buffer also
    /// reads the buffer. The empty view and unknown views record nothing.
    pub fn record_access(&self, view: ViewId, kind: AccessKind, attrs: &mut InstrAttributes) {
        if view.is_empty() {
            return;
        }
        let (Some(range), Some(buffer)) = (self.variables_for_view(view), self.view_buffer(view))
        else {
            return;
        };
        let variables = range.map(VariableId::from_index);
        if kind.reads() {
            attrs.variables_read.extend(variables.clone());
            attrs.buffers_read.push(buffer);
            attrs.views_read.push(view);
        }
        if kind.writes() {
            attrs.variables_written.extend(variables.clone());
            attrs.buffers_written.push(buffer);
            attrs.views_written.push(view);
            if !self.view_is_full_rows(view) {
                attrs.variables_read.extend(variables);
            }
            if !self.view_is_whole_buffer(view) {
                attrs.buffers_read.push(buffer);
            }
        }
    }

    pub fn split_points(&self, buffer: BufferId) -> &[u32] {
        self.split_points
            .get(buffer.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Half-open column range of `variable` within its buffer.
    pub fn variable_columns(&self, variable: VariableId) -> Option<(u32, u32)> {
        let b = self.buffer_for_variable(variable)?.index();
        let local = variable.0.checked_sub(self.buffer_base[b])? as usize;
        let split = &self.split_points[b];
        Some((*split.get(local)?, *split.get(local + 1)?))
    }
}

fn compute_split_points(program: &Program) -> Result<Vec<Vec<u32>>, Diagnostic> {
    let num_buffers = program.num_buffers();
    let mut split_points: Vec<Vec<u32>> = vec![Vec::new(); num_buffers];
    for (v, view) in program.views.iter().enumerate().skip(1) {
        let b = view.buffer.index();
        if view.buffer.is_null() || b >= num_buffers {
            return Err(Diagnostic::error(
                codes::E0103_VIEW_BUFFER,
                Location::View(ViewId::from_index(v)),
                format!(
                    "view v{v} refers to {} (valid buffers are b1..b{})",
                    view.buffer,
                    num_buffers.saturating_sub(1)
                ),
            ));
        }
        split_points[b].push(view.col_offset);
        split_points[b].push(view.col_end());
    }
    for (b, split) in split_points.iter_mut().enumerate().skip(1) {
        split.sort_unstable();
        split.dedup();
        if split.len() < 2 {
            return Err(Diagnostic::error(
                codes::E0101_BUFFER_WITHOUT_VIEWS,
                Location::Buffer(BufferId::from_index(b)),
                format!("buffer b{b} has no view covering any of its columns"),
            )
            .with_hint("every buffer needs at least one view, usually the whole-buffer view"));
        }
        let num_cols = program.buffers[b].num_cols;
        let (first, last) = (split[0], split[split.len() - 1]);
        if first != 0 || last != num_cols {
            return Err(Diagnostic::error(
                codes::E0104_COLUMNS_UNCOVERED,
                Location::Buffer(BufferId::from_index(b)),
                format!(
                    "views of buffer b{b} span columns [{first},{last}) but the buffer has {num_cols}"
                ),
            )
            .with_hint("add the whole-buffer view"));
        }
    }
    Ok(split_points)
}

/// Position of `col` among `split`; a miss means the view boundary does not
/// land on a split point, which the construction above rules out for
/// well-formed input.
fn split_position(split: &[u32], col: u32, view: ViewId) -> Result<usize, Diagnostic> {
    split.binary_search(&col).map_err(|_| {
        Diagnostic::error(
            codes::E0100_SPLIT_POINT,
            Location::View(view),
            format!("column {col} of view {view} is not a split point of its buffer"),
        )
    })
}
