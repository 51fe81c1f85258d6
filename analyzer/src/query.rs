// query.rs — Read-only helpers over a finished analysis
//
// Point questions optimizers ask about buffer and view lifetimes. Unknown
// ids answer `false` / `None` rather than failing.

use crate::access::{Access, AccessKind};
use crate::analysis::Analysis;
use crate::id::{BufferId, InstrIndex, VariableId, ViewId};
use crate::ir::Program;

/// True if `buffer` is accessed before `instr`, not counting the access made
/// by its own allocation.
pub fn buffer_is_accessed_before(analysis: &Analysis, buffer: BufferId, instr: InstrIndex) -> bool {
    let Some(record) = analysis.accesses_of_buffer(buffer) else {
        return false;
    };
    let mut accesses = record.accesses.iter();
    let Some(first) = accesses.next() else {
        return false;
    };
    if Some(first.instr) != record.allocate {
        return first.instr < instr;
    }
    accesses.next().is_some_and(|second| second.instr < instr)
}

/// True if `buffer` is accessed after `instr`. Deallocation is not an access.
pub fn buffer_is_accessed_after(analysis: &Analysis, buffer: BufferId, instr: InstrIndex) -> bool {
    analysis
        .accesses_of_buffer(buffer)
        .and_then(|record| record.accesses.last())
        .is_some_and(|last| last.instr > instr)
}

/// True if some access to `buffer` after `instr` writes it.
pub fn buffer_is_written_after(analysis: &Analysis, buffer: BufferId, instr: InstrIndex) -> bool {
    analysis.accesses_of_buffer(buffer).is_some_and(|record| {
        writes_after(&record.accesses, instr).next().is_some()
    })
}

/// Earliest instruction after `instr` that writes any variable under `view`.
pub fn first_write_to_view_after(
    analysis: &Analysis,
    view: ViewId,
    instr: InstrIndex,
) -> Option<InstrIndex> {
    let range = analysis.variables.variables_for_view(view)?;
    range
        .filter_map(|x| {
            writes_after(analysis.accesses_of_variable(VariableId::from_index(x)), instr).last()
        })
        .min()
}

/// Non-read accesses after `instr`, latest first.
fn writes_after(accesses: &[Access], instr: InstrIndex) -> impl Iterator<Item = InstrIndex> + '_ {
    accesses
        .iter()
        .rev()
        .take_while(move |a| a.instr > instr)
        .filter(|a| a.kind != AccessKind::Read)
        .map(|a| a.instr)
}

/// Views over each buffer, indexed by buffer. Entry 0 (the null buffer)
/// stays empty; the empty view is never listed.
pub fn views_by_buffer(program: &Program) -> Vec<Vec<ViewId>> {
    let mut lists = vec![Vec::new(); program.num_buffers()];
    for (v, view) in program.views.iter().enumerate().skip(1) {
        if view.buffer.is_null() {
            continue;
        }
        if let Some(list) = lists.get_mut(view.buffer.index()) {
            list.push(ViewId::from_index(v));
        }
    }
    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{Caps, ComponentInfo, Network, NodeKind};
    use crate::id::{ComponentId, NodeId, PrecomputedId};
    use crate::ir::{Endpoint, EndpointRole, Instr};

    // b1: input, read at c1 and c5.
    // b2: c0(w) c1(w) c3(r) c4(rw), allocated at c0.
    // b3: allocated undefined at c2, written at c3 and c5.
    fn fixture() -> (Program, Analysis) {
        let mut net = Network::new();
        let k = net.add_component(ComponentInfo {
            input_dim: 2,
            output_dim: 2,
            caps: Caps::SIMPLE,
        });
        net.add_node(NodeKind::Input);
        net.add_node(NodeKind::Component(k));
        let mut p = Program::new();
        let b1 = p.add_buffer(3, 2);
        let b2 = p.add_buffer(3, 2);
        let b3 = p.add_buffer(3, 2);
        p.add_whole_view(b1).unwrap();
        p.add_whole_view(b2).unwrap();
        p.add_whole_view(b3).unwrap();
        // v4: left column of b2.
        p.add_view(b2, 0, 3, 0, 1);
        let prop = |input, output| Instr::Propagate {
            component: ComponentId(0),
            precomputed: PrecomputedId(0),
            input: ViewId(input),
            output: ViewId(output),
        };
        p.instrs = vec![
            Instr::AllocZeroed { buffer: b2 },
            prop(1, 2),
            Instr::AllocUndefined { buffer: b3 },
            prop(2, 3),
            Instr::MatrixAdd {
                dest: ViewId(4),
                src: ViewId(4),
            },
            Instr::MatrixCopy {
                dest: ViewId(3),
                src: ViewId(1),
            },
        ];
        p.endpoints.push(Endpoint {
            node: NodeId(0),
            role: EndpointRole::Input,
            value: b1,
            deriv: None,
        });
        let a = Analysis::build(&net, &p).unwrap();
        (p, a)
    }

    #[test]
    fn accessed_before_skips_allocation() {
        let (_, a) = fixture();
        // b2: accesses c0 (alloc) c1 c3 c4.
        assert!(!buffer_is_accessed_before(&a, BufferId(2), InstrIndex(0)));
        assert!(!buffer_is_accessed_before(&a, BufferId(2), InstrIndex(1)));
        assert!(buffer_is_accessed_before(&a, BufferId(2), InstrIndex(2)));
        // b1 is never allocated: its first access counts.
        assert!(!buffer_is_accessed_before(&a, BufferId(1), InstrIndex(1)));
        assert!(buffer_is_accessed_before(&a, BufferId(1), InstrIndex(2)));
        assert!(!buffer_is_accessed_before(&a, BufferId(9), InstrIndex(2)));
    }

    #[test]
    fn accessed_after_uses_last_access() {
        let (_, a) = fixture();
        assert!(buffer_is_accessed_after(&a, BufferId(2), InstrIndex(3)));
        assert!(!buffer_is_accessed_after(&a, BufferId(2), InstrIndex(4)));
        assert!(buffer_is_accessed_after(&a, BufferId(1), InstrIndex(4)));
        assert!(!buffer_is_accessed_after(&a, BufferId(0), InstrIndex(0)));
    }

    #[test]
    fn written_after_ignores_reads() {
        let (_, a) = fixture();
        // b2 after c1: c3 reads the whole view, c4 read-writes a column.
        assert!(buffer_is_written_after(&a, BufferId(2), InstrIndex(1)));
        assert!(!buffer_is_written_after(&a, BufferId(2), InstrIndex(4)));
        // b1 is only ever read.
        assert!(!buffer_is_written_after(&a, BufferId(1), InstrIndex(0)));
    }

    #[test]
    fn first_write_to_view_takes_minimum_over_variables() {
        let (_, a) = fixture();
        // v2 spans x on b2's two columns; only the left one is written at c4.
        assert_eq!(
            first_write_to_view_after(&a, ViewId(2), InstrIndex(1)),
            Some(InstrIndex(4))
        );
        assert_eq!(
            first_write_to_view_after(&a, ViewId(2), InstrIndex(0)),
            Some(InstrIndex(1))
        );
        assert_eq!(first_write_to_view_after(&a, ViewId(2), InstrIndex(4)), None);
        assert_eq!(
            first_write_to_view_after(&a, ViewId(3), InstrIndex(0)),
            Some(InstrIndex(3))
        );
        assert_eq!(first_write_to_view_after(&a, ViewId(42), InstrIndex(0)), None);
    }

    #[test]
    fn views_grouped_by_buffer() {
        let (p, _) = fixture();
        assert_eq!(
            views_by_buffer(&p),
            vec![
                vec![],
                vec![ViewId(1)],
                vec![ViewId(2), ViewId(4)],
                vec![ViewId(3)],
            ]
        );
    }
}
