// dump.rs — Human-readable analysis dumps
//
// One line per buffer, instruction or partitioned buffer, made of
// space-separated tokens that use the listing sigils (`b`, `c`, `x`).
//
// Preconditions: `analysis` was built from the program being dumped.
// Postconditions: output is deterministic and ends with a newline when non-empty.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Display, Write};

use crate::access::InstrAttributes;
use crate::analysis::Analysis;
use crate::id::{BufferId, InstrIndex, VariableId};

/// `b3: alloc=c0 dealloc=c9 input=false output=false accesses=c0(w) c4(r)`
pub fn buffer_accesses(analysis: &Analysis) -> String {
    let mut buf = String::new();
    for (b, record) in analysis.buffer_accesses.iter().enumerate().skip(1) {
        let _ = write!(
            buf,
            "{}: alloc={} dealloc={} input={} output={} accesses=",
            BufferId::from_index(b),
            OrNone(record.allocate),
            OrNone(record.deallocate),
            record.is_input,
            record.is_output,
        );
        let accesses: Vec<String> = record
            .accesses
            .iter()
            .map(|a| format!("{}({})", a.instr, a.kind.letter()))
            .collect();
        let _ = writeln!(buf, "{}", accesses.join(" "));
    }
    buf
}

/// `c4: r(x0,x1) w(x2) r(b1) w(b2)`, with ` side-effects` appended when set.
/// Empty groups are left out.
pub fn instr_attributes(analysis: &Analysis) -> String {
    let mut buf = String::new();
    for (c, attrs) in analysis.attributes.iter().enumerate() {
        let _ = write!(buf, "{}:", InstrIndex::from_index(c));
        write_attributes(&mut buf, attrs);
        let _ = writeln!(buf);
    }
    buf
}

fn write_attributes(buf: &mut String, attrs: &InstrAttributes) {
    write_group(buf, "r", &attrs.variables_read);
    write_group(buf, "w", &attrs.variables_written);
    write_group(buf, "r", &attrs.buffers_read);
    write_group(buf, "w", &attrs.buffers_written);
    if attrs.has_side_effects {
        buf.push_str(" side-effects");
    }
}

fn write_group<T: Display>(buf: &mut String, letter: &str, ids: &[T]) {
    if ids.is_empty() {
        return;
    }
    let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
    let _ = write!(buf, " {letter}({})", ids.join(","));
}

/// `b1: x0[0,2) x1[2,4)`: each buffer's variables and their column ranges.
pub fn variables(analysis: &Analysis) -> String {
    let vars = &analysis.variables;
    let mut buf = String::new();
    for b in 1..vars.num_buffers() {
        let buffer = BufferId::from_index(b);
        let _ = write!(buf, "{buffer}:");
        for x in vars.variables_for_buffer(buffer).unwrap_or_default() {
            let variable = VariableId::from_index(x);
            if let Some((start, end)) = vars.variable_columns(variable) {
                let _ = write!(buf, " {variable}[{start},{end})");
            }
        }
        let _ = writeln!(buf);
    }
    buf
}

struct OrNone(Option<InstrIndex>);

impl Display for OrNone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(c) => write!(f, "{c}"),
            None => f.write_str("none"),
        }
    }
}
