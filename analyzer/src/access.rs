// access.rs — Per-instruction access classification
//
// Derives, for every instruction, the sets of variables, views and buffers it
// reads and writes. Opcode semantics decide the access kind of each operand;
// `Variables::record_access` expands a view access into variables.
//
// Preconditions: `vars` was built from the same program.
// Postconditions: every attribute set is sorted and deduplicated.
// Failure modes: unknown component/node, view or table index out of range.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::caps::{Caps, CapabilityQuery, ComponentInfo};
use crate::diag::{codes, Diagnostic, Location};
use crate::id::{BufferId, ComponentId, InstrIndex, PairsTableId, RowsTableId, VariableId, ViewId};
use crate::ir::{Instr, PairsTable, Program, RowsTable};
use crate::partition::Variables;

// ── Access kinds ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
    ReadWrite,
}

impl AccessKind {
    pub fn reads(self) -> bool {
        matches!(self, AccessKind::Read | AccessKind::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, AccessKind::Write | AccessKind::ReadWrite)
    }

    /// Kind of a touch that is a read, a write, or both.
    pub fn from_flags(read: bool, written: bool) -> AccessKind {
        match (read, written) {
            (true, true) => AccessKind::ReadWrite,
            (true, false) => AccessKind::Read,
            _ => AccessKind::Write,
        }
    }

    /// Short form used in dumps.
    pub fn letter(self) -> &'static str {
        match self {
            AccessKind::Read => "r",
            AccessKind::Write => "w",
            AccessKind::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// One entry of an access history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Access {
    pub instr: InstrIndex,
    pub kind: AccessKind,
}

// ── Instruction attributes ──

/// What one instruction reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstrAttributes {
    pub variables_read: Vec<VariableId>,
    pub variables_written: Vec<VariableId>,
    pub views_read: Vec<ViewId>,
    pub views_written: Vec<ViewId>,
    pub buffers_read: Vec<BufferId>,
    pub buffers_written: Vec<BufferId>,
    /// Updates state outside the program's buffers (learnable parameters).
    pub has_side_effects: bool,
}

impl InstrAttributes {
    fn normalize(&mut self) {
        sort_dedup(&mut self.variables_read);
        sort_dedup(&mut self.variables_written);
        sort_dedup(&mut self.views_read);
        sort_dedup(&mut self.views_written);
        sort_dedup(&mut self.buffers_read);
        sort_dedup(&mut self.buffers_written);
    }
}

fn sort_dedup<T: Ord>(v: &mut Vec<T>) {
    v.sort_unstable();
    v.dedup();
}

// ── Classification ──

struct Classifier<'a, C: ?Sized> {
    caps: &'a C,
    program: &'a Program,
    vars: &'a Variables,
    at: InstrIndex,
    attrs: InstrAttributes,
}

impl<C: CapabilityQuery + ?Sized> Classifier<'_, C> {
    fn record(&mut self, view: ViewId, kind: AccessKind) -> Result<(), Diagnostic> {
        if view.index() >= self.vars.num_views() {
            return Err(Diagnostic::error(
                codes::E0202_VIEW_RANGE,
                Location::Instr(self.at),
                format!(
                    "instruction {} refers to {view}, but only {} views exist",
                    self.at,
                    self.vars.num_views()
                ),
            ));
        }
        self.vars.record_access(view, kind, &mut self.attrs);
        Ok(())
    }

    fn component(&self, id: ComponentId) -> Result<&ComponentInfo, Diagnostic> {
        self.caps.component(id).ok_or_else(|| {
            Diagnostic::error(
                codes::E0200_UNKNOWN_COMPONENT,
                Location::Instr(self.at),
                format!("instruction {} refers to unknown component {id}", self.at),
            )
        })
    }

    fn rows_table(&self, id: RowsTableId) -> Result<&RowsTable, Diagnostic> {
        self.program
            .rows_tables
            .get(id.index())
            .ok_or_else(|| self.table_error(&id))
    }

    fn pairs_table(&self, id: PairsTableId) -> Result<&PairsTable, Diagnostic> {
        self.program
            .pairs_tables
            .get(id.index())
            .ok_or_else(|| self.table_error(&id))
    }

    fn table_error(&self, id: &dyn fmt::Display) -> Diagnostic {
        Diagnostic::error(
            codes::E0203_TABLE_RANGE,
            Location::Instr(self.at),
            format!("instruction {} refers to unknown table {id}", self.at),
        )
    }

    fn classify(&mut self, instr: &Instr) -> Result<(), Diagnostic> {
        use AccessKind::*;

        match *instr {
            Instr::AllocZeroed { buffer } => {
                let range = self.vars.variables_for_buffer(buffer).filter(|_| !buffer.is_null());
                let Some(range) = range else {
                    return Err(Diagnostic::error(
                        codes::E0305_BUFFER_RANGE,
                        Location::Instr(self.at),
                        format!("instruction {} allocates unknown buffer {buffer}", self.at),
                    ));
                };
                self.attrs
                    .variables_written
                    .extend(range.map(VariableId::from_index));
                self.attrs.buffers_written.push(buffer);
            }
            Instr::AllocUndefined { .. } | Instr::Dealloc { .. } => {}
            Instr::Propagate {
                component,
                input,
                output,
                ..
            } => {
                let adds = self.component(component)?.has(Caps::PROPAGATE_ADDS);
                self.record(input, Read)?;
                self.record(output, if adds { ReadWrite } else { Write })?;
            }
            Instr::StoreStats { view, .. } => self.record(view, Read)?,
            Instr::Backprop {
                node,
                input,
                output,
                output_deriv,
                input_deriv,
                ..
            } => {
                let info = *self.caps.component_for_node(node).ok_or_else(|| {
                    Diagnostic::error(
                        codes::E0201_UNKNOWN_NODE,
                        Location::Instr(self.at),
                        format!(
                            "instruction {} backpropagates through {node}, which is not a known component node",
                            self.at
                        ),
                    )
                })?;
                self.record(input, Read)?;
                self.record(output, Read)?;
                self.record(output_deriv, Read)?;
                let adds = info.has(Caps::BACKPROP_ADDS);
                self.record(input_deriv, if adds { ReadWrite } else { Write })?;
                // StoreStats also mutates component state but stays unflagged.
                self.attrs.has_side_effects = info.has(Caps::UPDATABLE);
            }
            Instr::MatrixCopy { dest, src } => {
                self.record(dest, Write)?;
                self.record(src, Read)?;
            }
            Instr::MatrixAdd { dest, src }
            | Instr::AddRows { dest, src, .. }
            | Instr::AddRowRanges { dest, src, .. } => {
                self.record(dest, ReadWrite)?;
                self.record(src, Read)?;
            }
            Instr::CopyRows { dest, src, rows } => {
                let partial = self.rows_table(rows)?.iter().any(Option::is_none);
                self.record(dest, if partial { ReadWrite } else { Write })?;
                self.record(src, Read)?;
            }
            Instr::AddRowsMulti { dest, pairs } => {
                self.record(dest, ReadWrite)?;
                for view in distinct_views_in_pairs(self.pairs_table(pairs)?) {
                    self.record(view, Read)?;
                }
            }
            Instr::CopyRowsMulti { dest, pairs } => {
                self.record(dest, Write)?;
                for view in distinct_views_in_pairs(self.pairs_table(pairs)?) {
                    self.record(view, Read)?;
                }
            }
            Instr::AddToRowsMulti { src, pairs } | Instr::CopyToRowsMulti { src, pairs } => {
                self.record(src, Read)?;
                for view in distinct_views_in_pairs(self.pairs_table(pairs)?) {
                    self.record(view, ReadWrite)?;
                }
            }
            Instr::NoOp | Instr::Marker => {}
        }
        Ok(())
    }
}

/// Classify instruction `index` of `program`.
pub fn classify_instruction<C: CapabilityQuery + ?Sized>(
    caps: &C,
    program: &Program,
    vars: &Variables,
    index: InstrIndex,
) -> Result<InstrAttributes, Diagnostic> {
    let instr = program.instrs.get(index.index()).ok_or_else(|| {
        Diagnostic::error(
            codes::E0400_INDEX_RANGE,
            Location::Instr(index),
            format!(
                "instruction {index} is past the end of a {}-instruction program",
                program.instrs.len()
            ),
        )
    })?;
    let mut classifier = Classifier {
        caps,
        program,
        vars,
        at: index,
        attrs: InstrAttributes::default(),
    };
    classifier.classify(instr)?;
    let mut attrs = classifier.attrs;
    attrs.normalize();
    Ok(attrs)
}

/// Classify every instruction of `program`, in order.
pub fn classify_program<C: CapabilityQuery + ?Sized>(
    caps: &C,
    program: &Program,
    vars: &Variables,
) -> Result<Vec<InstrAttributes>, Diagnostic> {
    (0..program.instrs.len())
        .map(|c| classify_instruction(caps, program, vars, InstrIndex::from_index(c)))
        .collect()
}

/// The distinct non-sentinel views named by a pairs table, ascending.
pub fn distinct_views_in_pairs(pairs: &[Option<(ViewId, u32)>]) -> Vec<ViewId> {
    let mut views: Vec<ViewId> = pairs.iter().flatten().map(|&(view, _)| view).collect();
    sort_dedup(&mut views);
    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{Network, NodeKind};
    use crate::id::{NodeId, PrecomputedId};

    struct Fixture {
        net: Network,
        program: Program,
        plain: ComponentId,
        adds: ComponentId,
        node_plain: NodeId,
        node_updatable: NodeId,
    }

    /// b1 4x4 (v1 whole, v3 rows 0..2), b2 4x4 (v2 whole), b3 4x4 (v4 whole).
    fn fixture() -> Fixture {
        let mut net = Network::new();
        let info = |caps| ComponentInfo {
            input_dim: 4,
            output_dim: 4,
            caps,
        };
        let plain = net.add_component(info(Caps::NONE));
        let adds = net.add_component(info(Caps::PROPAGATE_ADDS | Caps::BACKPROP_ADDS));
        let upd = net.add_component(info(Caps::UPDATABLE));
        net.add_node(NodeKind::Input);
        let node_plain = net.add_node(NodeKind::Component(plain));
        let node_updatable = net.add_node(NodeKind::Component(upd));

        let mut program = Program::new();
        let b1 = program.add_buffer(4, 4);
        let b2 = program.add_buffer(4, 4);
        let b3 = program.add_buffer(4, 4);
        program.add_whole_view(b1).unwrap();
        program.add_whole_view(b2).unwrap();
        program.add_view(b1, 0, 2, 0, 4);
        program.add_whole_view(b3).unwrap();
        program.rows_tables.push(vec![Some(0), Some(1), Some(2), Some(3)]);
        program.rows_tables.push(vec![Some(0), None, Some(2), Some(3)]);
        program.pairs_tables.push(vec![
            Some((ViewId(2), 0)),
            None,
            Some((ViewId(4), 1)),
            Some((ViewId(2), 3)),
        ]);
        Fixture {
            net,
            program,
            plain,
            adds,
            node_plain,
            node_updatable,
        }
    }

    fn classify(f: &Fixture, instr: Instr) -> Result<InstrAttributes, Diagnostic> {
        let mut program = f.program.clone();
        program.instrs = vec![instr];
        let vars = Variables::build(&program).unwrap();
        classify_instruction(&f.net, &program, &vars, InstrIndex(0))
    }

    fn xs(ids: &[u32]) -> Vec<VariableId> {
        ids.iter().map(|&i| VariableId(i)).collect()
    }

    #[test]
    fn alloc_zeroed_writes_whole_buffer() {
        let f = fixture();
        let a = classify(&f, Instr::AllocZeroed { buffer: BufferId(2) }).unwrap();
        assert_eq!(a.variables_written, xs(&[1]));
        assert_eq!(a.buffers_written, vec![BufferId(2)]);
        assert!(a.variables_read.is_empty());
        assert!(a.views_written.is_empty());
    }

    #[test]
    fn alloc_undefined_and_dealloc_touch_nothing() {
        let f = fixture();
        for instr in [
            Instr::AllocUndefined { buffer: BufferId(1) },
            Instr::Dealloc { buffer: BufferId(1) },
            Instr::NoOp,
            Instr::Marker,
        ] {
            assert_eq!(classify(&f, instr).unwrap(), InstrAttributes::default());
        }
    }

    #[test]
    fn propagate_write_or_readwrite_by_capability() {
        let f = fixture();
        let prop = |component| Instr::Propagate {
            component,
            precomputed: PrecomputedId(0),
            input: ViewId(1),
            output: ViewId(2),
        };
        let a = classify(&f, prop(f.plain)).unwrap();
        assert_eq!(a.variables_read, xs(&[0]));
        assert_eq!(a.variables_written, xs(&[1]));
        let a = classify(&f, prop(f.adds)).unwrap();
        assert_eq!(a.variables_read, xs(&[0, 1]));
        assert_eq!(a.variables_written, xs(&[1]));
        assert!(!a.has_side_effects);
    }

    #[test]
    fn store_stats_only_reads() {
        let f = fixture();
        let a = classify(
            &f,
            Instr::StoreStats {
                component: f.plain,
                view: ViewId(2),
            },
        )
        .unwrap();
        assert_eq!(a.variables_read, xs(&[1]));
        assert!(a.variables_written.is_empty());
        assert!(!a.has_side_effects);
    }

    #[test]
    fn backprop_side_effects_follow_updatable() {
        let f = fixture();
        let bp = |node| Instr::Backprop {
            node,
            precomputed: PrecomputedId(0),
            input: ViewId(1),
            output: ViewId::EMPTY,
            output_deriv: ViewId(4),
            input_deriv: ViewId(2),
        };
        let a = classify(&f, bp(f.node_plain)).unwrap();
        assert_eq!(a.variables_read, xs(&[0, 2]));
        assert_eq!(a.variables_written, xs(&[1]));
        assert!(!a.has_side_effects);
        let a = classify(&f, bp(f.node_updatable)).unwrap();
        assert!(a.has_side_effects);
    }

    #[test]
    fn backprop_through_input_node_is_rejected() {
        let f = fixture();
        let err = classify(
            &f,
            Instr::Backprop {
                node: NodeId(0),
                precomputed: PrecomputedId(0),
                input: ViewId::EMPTY,
                output: ViewId::EMPTY,
                output_deriv: ViewId(1),
                input_deriv: ViewId::EMPTY,
            },
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::E0201_UNKNOWN_NODE));
    }

    #[test]
    fn matrix_copy_and_add() {
        let f = fixture();
        let a = classify(
            &f,
            Instr::MatrixCopy {
                dest: ViewId(2),
                src: ViewId(1),
            },
        )
        .unwrap();
        assert_eq!(a.variables_read, xs(&[0]));
        assert_eq!(a.variables_written, xs(&[1]));
        let a = classify(
            &f,
            Instr::MatrixAdd {
                dest: ViewId(2),
                src: ViewId(1),
            },
        )
        .unwrap();
        assert_eq!(a.variables_read, xs(&[0, 1]));
        assert_eq!(a.views_read, vec![ViewId(1), ViewId(2)]);
    }

    #[test]
    fn copy_rows_flips_on_sentinel() {
        let f = fixture();
        let copy = |rows| Instr::CopyRows {
            dest: ViewId(2),
            src: ViewId(1),
            rows: RowsTableId(rows),
        };
        let full = classify(&f, copy(0)).unwrap();
        assert_eq!(full.variables_read, xs(&[0]));
        let partial = classify(&f, copy(1)).unwrap();
        assert_eq!(partial.variables_read, xs(&[0, 1]));
        assert_eq!(partial.variables_written, xs(&[1]));
    }

    #[test]
    fn gather_reads_distinct_sources() {
        let f = fixture();
        let a = classify(
            &f,
            Instr::CopyRowsMulti {
                dest: ViewId(1),
                pairs: PairsTableId(0),
            },
        )
        .unwrap();
        assert_eq!(a.variables_read, xs(&[1, 2]));
        assert_eq!(a.variables_written, xs(&[0]));
        let a = classify(
            &f,
            Instr::AddRowsMulti {
                dest: ViewId(1),
                pairs: PairsTableId(0),
            },
        )
        .unwrap();
        assert_eq!(a.variables_read, xs(&[0, 1, 2]));
    }

    #[test]
    fn scatter_read_writes_every_destination() {
        let f = fixture();
        let a = classify(
            &f,
            Instr::CopyToRowsMulti {
                src: ViewId(1),
                pairs: PairsTableId(0),
            },
        )
        .unwrap();
        assert_eq!(a.variables_read, xs(&[0, 1, 2]));
        assert_eq!(a.variables_written, xs(&[1, 2]));
        assert_eq!(a.views_written, vec![ViewId(2), ViewId(4)]);
    }

    #[test]
    fn partial_row_write_marks_read() {
        let f = fixture();
        let a = classify(
            &f,
            Instr::MatrixCopy {
                dest: ViewId(3),
                src: ViewId(2),
            },
        )
        .unwrap();
        assert_eq!(a.variables_read, xs(&[0, 1]));
        assert_eq!(a.variables_written, xs(&[0]));
        assert_eq!(a.buffers_read, vec![BufferId(1), BufferId(2)]);
    }

    #[test]
    fn out_of_range_operands_are_rejected() {
        let f = fixture();
        let err = classify(
            &f,
            Instr::MatrixCopy {
                dest: ViewId(9),
                src: ViewId(1),
            },
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::E0202_VIEW_RANGE));
        let err = classify(
            &f,
            Instr::CopyRows {
                dest: ViewId(2),
                src: ViewId(1),
                rows: RowsTableId(7),
            },
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::E0203_TABLE_RANGE));
        let err = classify(
            &f,
            Instr::Propagate {
                component: ComponentId(9),
                precomputed: PrecomputedId(0),
                input: ViewId(1),
                output: ViewId(2),
            },
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::E0200_UNKNOWN_COMPONENT));
    }

    #[test]
    fn distinct_views_skip_sentinels() {
        let pairs = vec![Some((ViewId(3), 0)), None, Some((ViewId(1), 2)), Some((ViewId(3), 1))];
        assert_eq!(distinct_views_in_pairs(&pairs), vec![ViewId(1), ViewId(3)]);
        assert!(distinct_views_in_pairs(&[None, None]).is_empty());
    }
}
