// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used by the listing front end, the analysis
// stages and the checker. Every stage fails fast with exactly one error
// `Diagnostic`; warnings are collected in a caller-owned `DiagSink`.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: `DiagSink::warn_once` emits a `tracing` event.

use std::collections::HashSet;
use std::fmt;

use chumsky::span::SimpleSpan;
use chumsky::span::Span as _;

use crate::id::{BufferId, InstrIndex, NodeId, VariableId, ViewId};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0601`, `W0600`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Listing (E00xx)
    pub const E0001_LISTING_SYNTAX: DiagCode = DiagCode("E0001");
    pub const E0002_DECL_ORDER: DiagCode = DiagCode("E0002");
    pub const E0003_BAD_VALUE: DiagCode = DiagCode("E0003");
    pub const E0004_LABEL_MISMATCH: DiagCode = DiagCode("E0004");
    pub const E0005_NODE_ROLE: DiagCode = DiagCode("E0005");

    // Partition (E01xx)
    pub const E0100_SPLIT_POINT: DiagCode = DiagCode("E0100");
    pub const E0101_BUFFER_WITHOUT_VIEWS: DiagCode = DiagCode("E0101");
    pub const E0102_VARIABLE_OWNER: DiagCode = DiagCode("E0102");
    pub const E0103_VIEW_BUFFER: DiagCode = DiagCode("E0103");
    pub const E0104_COLUMNS_UNCOVERED: DiagCode = DiagCode("E0104");

    // Classification (E02xx)
    pub const E0200_UNKNOWN_COMPONENT: DiagCode = DiagCode("E0200");
    pub const E0201_UNKNOWN_NODE: DiagCode = DiagCode("E0201");
    pub const E0202_VIEW_RANGE: DiagCode = DiagCode("E0202");
    pub const E0203_TABLE_RANGE: DiagCode = DiagCode("E0203");

    // History (E03xx)
    pub const E0300_ALLOCATED_TWICE: DiagCode = DiagCode("E0300");
    pub const E0301_DEALLOCATED_TWICE: DiagCode = DiagCode("E0301");
    pub const E0302_DUPLICATE_INPUT: DiagCode = DiagCode("E0302");
    pub const E0303_DUPLICATE_OUTPUT: DiagCode = DiagCode("E0303");
    pub const E0304_ENDPOINT_BUFFER: DiagCode = DiagCode("E0304");
    pub const E0305_BUFFER_RANGE: DiagCode = DiagCode("E0305");

    // Bounds / shape (E04xx)
    pub const E0400_INDEX_RANGE: DiagCode = DiagCode("E0400");
    pub const E0401_DIM_MISMATCH: DiagCode = DiagCode("E0401");
    pub const E0402_ROWS_MISMATCH: DiagCode = DiagCode("E0402");
    pub const E0403_IN_PLACE: DiagCode = DiagCode("E0403");
    pub const E0404_DUPLICATE_TARGET: DiagCode = DiagCode("E0404");
    pub const E0405_ROW_RANGE: DiagCode = DiagCode("E0405");
    pub const E0406_CAPABILITY: DiagCode = DiagCode("E0406");
    pub const E0407_NO_EFFECT: DiagCode = DiagCode("E0407");
    pub const E0408_PRECOMPUTED: DiagCode = DiagCode("E0408");
    pub const E0409_SENTINEL: DiagCode = DiagCode("E0409");

    // Ordering (E05xx)
    pub const E0500_MARKER_COUNT: DiagCode = DiagCode("E0500");
    pub const E0501_BACKPROP_BEFORE_MARKER: DiagCode = DiagCode("E0501");
    pub const E0502_PROPAGATE_AFTER_MARKER: DiagCode = DiagCode("E0502");
    pub const E0503_STORE_STATS_AFTER_MARKER: DiagCode = DiagCode("E0503");

    // Buffer lifecycle (E06xx / W06xx)
    pub const E0600_INPUT_ALLOCATED: DiagCode = DiagCode("E0600");
    pub const E0601_NOT_ALLOCATED: DiagCode = DiagCode("E0601");
    pub const E0602_NEVER_ACCESSED: DiagCode = DiagCode("E0602");
    pub const E0603_ACCESS_BEFORE_ALLOC: DiagCode = DiagCode("E0603");
    pub const E0604_OUTPUT_DEALLOCATED: DiagCode = DiagCode("E0604");
    pub const E0605_NOT_DEALLOCATED: DiagCode = DiagCode("E0605");
    pub const E0606_ACCESS_AFTER_DEALLOC: DiagCode = DiagCode("E0606");
    pub const W0600_UNUSED_INPUT: DiagCode = DiagCode("W0600");

    // Undefined use (E07xx)
    pub const E0700_VARIABLE_UNUSED: DiagCode = DiagCode("E0700");
    pub const E0701_READ_BEFORE_WRITE: DiagCode = DiagCode("E0701");

    // Rewrite safety (E08xx)
    pub const E0800_VARIABLE_UNUSED: DiagCode = DiagCode("E0800");
    pub const E0801_WRITE_AFTER_READ: DiagCode = DiagCode("E0801");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Location ─────────────────────────────────────────────────────────────

/// What a diagnostic points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Whole-program finding with no narrower location.
    Program,
    /// Byte range in a listing source.
    Source(SimpleSpan),
    Instr(InstrIndex),
    Buffer(BufferId),
    View(ViewId),
    Variable(VariableId),
    Node(NodeId),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Program => write!(f, "program"),
            Location::Source(span) => write!(f, "bytes {}..{}", span.start(), span.end()),
            Location::Instr(c) => write!(f, "{c}"),
            Location::Buffer(b) => write!(f, "{b}"),
            Location::View(v) => write!(f, "{v}"),
            Location::Variable(x) => write!(f, "{x}"),
            Location::Node(n) => write!(f, "{n}"),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, location: Location, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for a coded error, the common case in every stage.
    pub fn error(code: DiagCode, location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, location, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

// ── Sink ─────────────────────────────────────────────────────────────────

/// Caller-owned collector for non-fatal diagnostics.
///
/// Remembers which warning codes it has already recorded so a warning such
/// as the unused-input notice appears at most once per sink, however many
/// programs are checked through it.
///
/// Deduplication is scoped to the sink, not the process. To see each warning
/// once per process, keep one sink for the whole run and pass it to every
/// `Checker::check`; a fresh sink per program repeats the warning for each
/// program that triggers it.
#[derive(Debug, Default)]
pub struct DiagSink {
    diagnostics: Vec<Diagnostic>,
    warned: HashSet<DiagCode>,
}

impl DiagSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `diag` unless a diagnostic with the same code was already
    /// recorded. Returns whether it was recorded.
    pub fn warn_once(&mut self, diag: Diagnostic) -> bool {
        if let Some(code) = diag.code {
            if !self.warned.insert(code) {
                return false;
            }
        }
        tracing::warn!(code = ?diag.code, location = %diag.location, "{}", diag.message);
        self.diagnostics.push(diag);
        true
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, Location::Program, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_hint() {
        let d = Diagnostic::error(
            codes::E0601_NOT_ALLOCATED,
            Location::Buffer(BufferId(3)),
            "buffer b3 is never allocated",
        )
        .with_hint("add an alloc_zeroed or alloc_undefined instruction");
        assert_eq!(
            format!("{d}"),
            "error[E0601]: buffer b3 is never allocated\n  hint: add an alloc_zeroed or alloc_undefined instruction"
        );
        assert!(d.is_error());
    }

    #[test]
    fn sink_warns_once_per_code() {
        let mut sink = DiagSink::new();
        let warn = |b: u32| {
            Diagnostic::new(
                DiagLevel::Warning,
                Location::Buffer(BufferId(b)),
                format!("buffer b{b} is never accessed"),
            )
            .with_code(codes::W0600_UNUSED_INPUT)
        };
        assert!(sink.warn_once(warn(1)));
        assert!(!sink.warn_once(warn(2)));
        assert_eq!(sink.diagnostics().len(), 1);
        assert_eq!(sink.diagnostics()[0].location, Location::Buffer(BufferId(1)));
    }

    #[test]
    fn separate_sinks_do_not_share_state() {
        let warn = Diagnostic::new(DiagLevel::Warning, Location::Program, "unused")
            .with_code(codes::W0600_UNUSED_INPUT);
        let mut a = DiagSink::new();
        let mut b = DiagSink::new();
        assert!(a.warn_once(warn.clone()));
        assert!(b.warn_once(warn));
    }
}
