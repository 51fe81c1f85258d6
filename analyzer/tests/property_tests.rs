// Property-based tests for analysis invariants.
//
// Three categories:
// 1. Partition: variables are disjoint and exactly tile every view and buffer
// 2. Copy truth table: pure write iff the destination covers all rows
// 3. Determinism: rebuilding an analysis gives identical results and fingerprints
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use nncheck::access::{classify_instruction, AccessKind};
use nncheck::analysis::Analysis;
use nncheck::caps::Network;
use nncheck::history::variable_accesses;
use nncheck::id::{BufferId, InstrIndex, VariableId, ViewId};
use nncheck::ir::{Instr, Program};
use nncheck::partition::Variables;
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

/// A view inside a `rows × cols` buffer: (row_offset, num_rows, col_offset, num_cols).
fn arb_view(rows: u32, cols: u32) -> impl Strategy<Value = (u32, u32, u32, u32)> {
    (0..rows, 0..cols).prop_flat_map(move |(r0, c0)| {
        (Just(r0), 1..=rows - r0, Just(c0), 1..=cols - c0)
    })
}

/// One buffer with 1..=5 views over it.
fn arb_buffer() -> impl Strategy<Value = (u32, u32, Vec<(u32, u32, u32, u32)>)> {
    (1u32..=4, 1u32..=8).prop_flat_map(|(rows, cols)| {
        (
            Just(rows),
            Just(cols),
            prop::collection::vec(arb_view(rows, cols), 1..=5),
        )
    })
}

/// A program with 1..=3 buffers, each led by its whole-buffer view; views are
/// numbered in buffer order.
fn arb_program() -> impl Strategy<Value = Program> {
    prop::collection::vec(arb_buffer(), 1..=3).prop_map(|buffers| {
        let mut p = Program::new();
        for (rows, cols, views) in buffers {
            let b = p.add_buffer(rows, cols);
            p.add_view(b, 0, rows, 0, cols);
            for (r0, nr, c0, nc) in views {
                p.add_view(b, r0, nr, c0, nc);
            }
        }
        p
    })
}

/// Adds a chain of copies between consecutive views.
fn with_copies(mut p: Program) -> Program {
    let n = p.num_views() as u32;
    for v in 1..n.saturating_sub(1) {
        p.instrs.push(Instr::MatrixCopy {
            dest: ViewId(v + 1),
            src: ViewId(v),
        });
    }
    p
}

// ── 1. Partition ────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn variables_tile_every_view(p in arb_program()) {
        let vars = Variables::build(&p).unwrap();

        for (v, view) in p.views.iter().enumerate().skip(1) {
            let range = vars.variables_for_view(ViewId(v as u32)).unwrap();
            prop_assert!(!range.is_empty());
            let mut next = view.col_offset;
            for x in range {
                let x = VariableId(x as u32);
                prop_assert_eq!(vars.buffer_for_variable(x), Some(view.buffer));
                let (start, end) = vars.variable_columns(x).unwrap();
                prop_assert_eq!(start, next, "gap or overlap inside {}", view.buffer);
                prop_assert!(end > start);
                next = end;
            }
            prop_assert_eq!(next, view.col_end());
        }
    }

    #[test]
    fn variables_tile_every_buffer(p in arb_program()) {
        let vars = Variables::build(&p).unwrap();
        for b in 1..p.num_buffers() {
            let buffer = BufferId(b as u32);
            let mut next = 0;
            for x in vars.variables_for_buffer(buffer).unwrap() {
                let (start, end) = vars.variable_columns(VariableId(x as u32)).unwrap();
                prop_assert_eq!(start, next, "gap or overlap in {}", buffer);
                next = end;
            }
            prop_assert_eq!(next, p.buffers[b].num_cols);
        }
    }

    #[test]
    fn buffers_own_disjoint_variable_ranges(p in arb_program()) {
        let vars = Variables::build(&p).unwrap();
        let mut expected_start = 0;
        for b in 1..p.num_buffers() {
            let range = vars.variables_for_buffer(BufferId(b as u32)).unwrap();
            prop_assert_eq!(range.start, expected_start);
            expected_start = range.end;
        }
        prop_assert_eq!(expected_start, vars.num_variables());
    }

    // ── 2. Copy truth table ────────────────────────────────────────────────

    #[test]
    fn copy_writes_purely_only_through_full_row_views(p in arb_program()) {
        let p = with_copies(p);
        let vars = Variables::build(&p).unwrap();
        let net = Network::new();

        for (c, instr) in p.instrs.iter().enumerate() {
            let Instr::MatrixCopy { dest, src } = *instr else { continue };
            let attrs = classify_instruction(&net, &p, &vars, InstrIndex(c as u32)).unwrap();
            let dest_vars: Vec<VariableId> = vars
                .variables_for_view(dest)
                .unwrap()
                .map(|x| VariableId(x as u32))
                .collect();
            let src_vars: Vec<VariableId> = vars
                .variables_for_view(src)
                .unwrap()
                .map(|x| VariableId(x as u32))
                .collect();

            prop_assert!(attrs.views_written == vec![dest]);
            for x in &dest_vars {
                prop_assert!(attrs.variables_written.contains(x));
                let read = attrs.variables_read.contains(x);
                let expected = !vars.view_is_full_rows(dest) || src_vars.contains(x);
                prop_assert_eq!(read, expected, "variable {} of {}", x, dest);
            }
            for x in &src_vars {
                prop_assert!(attrs.variables_read.contains(x));
            }
            let dest_buffer = vars.view_buffer(dest).unwrap();
            let src_buffer = vars.view_buffer(src).unwrap();
            let buffer_read = attrs.buffers_read.contains(&dest_buffer);
            prop_assert_eq!(
                buffer_read,
                !vars.view_is_whole_buffer(dest) || dest_buffer == src_buffer
            );
        }
    }

    // ── 3. Determinism ─────────────────────────────────────────────────────

    #[test]
    fn analysis_is_deterministic(p in arb_program()) {
        let p = with_copies(p);
        let net = Network::new();
        let first = Analysis::build(&net, &p).unwrap();
        let second = Analysis::build(&net, &p).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
    }

    #[test]
    fn histories_mirror_instruction_attributes(p in arb_program()) {
        let p = with_copies(p);
        let net = Network::new();
        let analysis = Analysis::build(&net, &p).unwrap();
        let histories = variable_accesses(&analysis.variables, &analysis.attributes);
        prop_assert_eq!(&histories, &analysis.variable_accesses);

        for (x, history) in histories.iter().enumerate() {
            let x = VariableId(x as u32);
            for pair in history.windows(2) {
                prop_assert!(pair[0].instr < pair[1].instr);
            }
            for access in history {
                let attrs = &analysis.attributes[access.instr.index()];
                let expected = AccessKind::from_flags(
                    attrs.variables_read.contains(&x),
                    attrs.variables_written.contains(&x),
                );
                prop_assert_eq!(expected, access.kind);
            }
            // Every instruction touching x appears in its history.
            let touching = analysis
                .attributes
                .iter()
                .filter(|a| a.variables_read.contains(&x) || a.variables_written.contains(&x))
                .count();
            prop_assert_eq!(touching, history.len());
        }
    }
}
