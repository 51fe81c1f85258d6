// analysis.rs — Analysis result aggregate
//
// Runs partition → classification → histories over one program snapshot and
// keeps the results together. The aggregate is plain owned data: it can be
// compared, serialized, fingerprinted, and shared across threads for
// read-only queries.
//
// Preconditions: none; each stage validates what it consumes.
// Postconditions: `attributes.len() == program.instrs.len()`,
//                 `variable_accesses.len() == variables.num_variables()`,
//                 `buffer_accesses.len() == program.num_buffers()`.
// Failure modes: any stage's malformation diagnostic.
// Side effects: `tracing` debug events.

use serde::Serialize;

use crate::access::{classify_program, Access, InstrAttributes};
use crate::caps::CapabilityQuery;
use crate::diag::Diagnostic;
use crate::history::{buffer_accesses, variable_accesses, BufferAccesses};
use crate::id::{BufferId, InstrIndex, VariableId};
use crate::ir::Program;
use crate::partition::Variables;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub variables: Variables,
    /// Indexed by instruction.
    pub attributes: Vec<InstrAttributes>,
    /// Indexed by variable.
    pub variable_accesses: Vec<Vec<Access>>,
    /// Indexed by buffer; entry 0 is the null buffer.
    pub buffer_accesses: Vec<BufferAccesses>,
}

impl Analysis {
    pub fn build<C: CapabilityQuery + ?Sized>(
        caps: &C,
        program: &Program,
    ) -> Result<Self, Diagnostic> {
        let variables = Variables::build(program)?;
        let attributes = classify_program(caps, program, &variables)?;
        tracing::debug!(instrs = attributes.len(), "classified instructions");
        let variable_accesses = variable_accesses(&variables, &attributes);
        let buffer_accesses = buffer_accesses(program, &attributes)?;
        Ok(Analysis {
            variables,
            attributes,
            variable_accesses,
            buffer_accesses,
        })
    }

    pub fn attributes_of(&self, instr: InstrIndex) -> Option<&InstrAttributes> {
        self.attributes.get(instr.index())
    }

    pub fn accesses_of_variable(&self, variable: VariableId) -> &[Access] {
        self.variable_accesses
            .get(variable.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn accesses_of_buffer(&self, buffer: BufferId) -> Option<&BufferAccesses> {
        self.buffer_accesses.get(buffer.index())
    }

    /// Compact JSON, the canonical form hashed by `fingerprint`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// SHA-256 of the canonical JSON, as 64 lowercase hex characters.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        use sha2::{Digest, Sha256};

        let canonical = self.to_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(bytes_to_hex(&hasher.finalize()))
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}
