// history.rs — Per-variable and per-buffer access histories
//
// Inverts the per-instruction attribute sets into chronological access logs
// and collects buffer lifecycle facts: the allocating and deallocating
// instruction, and whether the buffer is bound to an external input/output.
//
// Preconditions: `attributes` come from `classify_program` on the same program.
// Postconditions: every history is sorted by instruction index with at most
//                 one entry per instruction.
// Failure modes: buffer allocated/deallocated twice, endpoint flag set twice,
//                endpoint or allocation naming an unknown buffer.
// Side effects: none.

use serde::Serialize;

use crate::access::{Access, AccessKind, InstrAttributes};
use crate::diag::{codes, Diagnostic, Location};
use crate::id::{BufferId, InstrIndex, NodeId};
use crate::ir::{EndpointRole, Instr, Program};
use crate::partition::Variables;

/// Lifecycle and access log of one buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferAccesses {
    pub accesses: Vec<Access>,
    pub allocate: Option<InstrIndex>,
    pub deallocate: Option<InstrIndex>,
    pub is_input: bool,
    pub is_output: bool,
}

/// Merge two sorted, deduplicated id lists into one touch list, tagging each
/// id with the kind of touch.
fn merge_touches<T: Ord + Copy>(read: &[T], written: &[T]) -> Vec<(T, AccessKind)> {
    let mut out = Vec::with_capacity(read.len() + written.len());
    let (mut r, mut w) = (0, 0);
    while r < read.len() || w < written.len() {
        match (read.get(r), written.get(w)) {
            (Some(a), Some(b)) if a == b => {
                out.push((*a, AccessKind::ReadWrite));
                r += 1;
                w += 1;
            }
            (Some(a), Some(b)) if a < b => {
                out.push((*a, AccessKind::Read));
                r += 1;
            }
            (Some(a), None) => {
                out.push((*a, AccessKind::Read));
                r += 1;
            }
            (_, Some(b)) => {
                out.push((*b, AccessKind::Write));
                w += 1;
            }
            (None, None) => break,
        }
    }
    out
}

/// Per-variable access histories, indexed by variable.
pub fn variable_accesses(vars: &Variables, attributes: &[InstrAttributes]) -> Vec<Vec<Access>> {
    let mut histories = vec![Vec::new(); vars.num_variables()];
    for (c, attrs) in attributes.iter().enumerate() {
        let instr = InstrIndex::from_index(c);
        for (x, kind) in merge_touches(&attrs.variables_read, &attrs.variables_written) {
            if let Some(history) = histories.get_mut(x.index()) {
                history.push(Access { instr, kind });
            }
        }
    }
    histories
}

/// Per-buffer access records, indexed by buffer (entry 0 is the null buffer).
pub fn buffer_accesses(
    program: &Program,
    attributes: &[InstrAttributes],
) -> Result<Vec<BufferAccesses>, Diagnostic> {
    let num_buffers = program.num_buffers();
    let mut records = vec![BufferAccesses::default(); num_buffers];

    for (c, attrs) in attributes.iter().enumerate() {
        let instr = InstrIndex::from_index(c);
        for (b, kind) in merge_touches(&attrs.buffers_read, &attrs.buffers_written) {
            if let Some(record) = records.get_mut(b.index()) {
                record.accesses.push(Access { instr, kind });
            }
        }
    }

    for (c, instr) in program.instrs.iter().enumerate() {
        let at = InstrIndex::from_index(c);
        let (buffer, dealloc) = match *instr {
            Instr::AllocZeroed { buffer } | Instr::AllocUndefined { buffer } => (buffer, false),
            Instr::Dealloc { buffer } => (buffer, true),
            _ => continue,
        };
        let record = match records.get_mut(buffer.index()) {
            Some(record) if !buffer.is_null() => record,
            _ => {
                return Err(Diagnostic::error(
                    codes::E0305_BUFFER_RANGE,
                    Location::Instr(at),
                    format!("instruction {at} ({instr}) names an unknown buffer"),
                ))
            }
        };
        let (slot, code, what) = if dealloc {
            (&mut record.deallocate, codes::E0301_DEALLOCATED_TWICE, "deallocated")
        } else {
            (&mut record.allocate, codes::E0300_ALLOCATED_TWICE, "allocated")
        };
        if let Some(previous) = *slot {
            return Err(Diagnostic::error(
                code,
                Location::Instr(at),
                format!("buffer {buffer} is {what} twice, at {previous} and {at}"),
            ));
        }
        *slot = Some(at);
    }

    for endpoint in &program.endpoints {
        let (value_is_input, deriv_is_input) = match endpoint.role {
            EndpointRole::Input => (true, false),
            EndpointRole::Output => (false, true),
        };
        mark_endpoint(&mut records, endpoint.node, endpoint.value, value_is_input)?;
        if let Some(deriv) = endpoint.deriv {
            mark_endpoint(&mut records, endpoint.node, deriv, deriv_is_input)?;
        }
    }

    tracing::debug!(
        buffers = num_buffers - 1,
        accesses = records.iter().map(|r| r.accesses.len()).sum::<usize>(),
        "built buffer access records"
    );
    Ok(records)
}

fn mark_endpoint(
    records: &mut [BufferAccesses],
    node: NodeId,
    buffer: BufferId,
    input: bool,
) -> Result<(), Diagnostic> {
    let record = match records.get_mut(buffer.index()) {
        Some(record) if !buffer.is_null() => record,
        _ => {
            return Err(Diagnostic::error(
                codes::E0304_ENDPOINT_BUFFER,
                Location::Node(node),
                format!("endpoint {node} is bound to unknown buffer {buffer}"),
            ))
        }
    };
    let (flag, code, what) = if input {
        (&mut record.is_input, codes::E0302_DUPLICATE_INPUT, "input")
    } else {
        (&mut record.is_output, codes::E0303_DUPLICATE_OUTPUT, "output")
    };
    if *flag {
        return Err(Diagnostic::error(
            code,
            Location::Buffer(buffer),
            format!("buffer {buffer} is bound as an {what} more than once (again by {node})"),
        ));
    }
    *flag = true;
    Ok(())
}
