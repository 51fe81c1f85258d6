// Integration tests: load .nnc listings and run the full check battery.
//
// Uses the library API (listing::load → Checker::check) on the listings under
// `listings/` and on small inline programs, one per failure class.

use std::path::{Path, PathBuf};

use nncheck::analysis::Analysis;
use nncheck::diag::{codes, DiagCode, DiagSink, Diagnostic, Location};
use nncheck::id::VariableId;
use nncheck::listing::{load, Listing};
use nncheck::verify::{CheckOptions, Checker};

fn listings_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("listings")
}

fn load_file(name: &str) -> Listing {
    let path = listings_dir().join(name);
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
    load(&source).unwrap_or_else(|diags| panic!("{name} failed to load: {diags:#?}"))
}

fn load_inline(source: &str) -> Listing {
    load(source).unwrap_or_else(|diags| panic!("listing failed to load: {diags:#?}\n{source}"))
}

fn check_with(
    listing: &Listing,
    options: CheckOptions,
    sink: &mut DiagSink,
) -> Result<Analysis, Diagnostic> {
    Checker::new(options, &listing.network, &listing.program).check(sink)
}

fn check(listing: &Listing) -> Result<Analysis, Diagnostic> {
    check_with(listing, CheckOptions::default(), &mut DiagSink::new())
}

fn error_code(listing: &Listing) -> DiagCode {
    match check(listing) {
        Ok(_) => panic!("expected the check to fail"),
        Err(d) => d.code.expect("diagnostic without code"),
    }
}

/// One simple component between an input (b1) and an output (b3); b2 is
/// scratch. Instructions are appended per test.
const PRELUDE: &str = "\
component k0 in=2 out=2 simple
node n0 input
node n1 k0
node n2 output
buffer b1 3 2
buffer b2 3 2
buffer b3 3 2
view v1 b1 0 3 0 2
view v2 b2 0 3 0 2
view v3 b3 0 3 0 2
input n0 b1
output n2 b3
";

fn program(body: &str) -> Listing {
    load_inline(&format!("{PRELUDE}{body}"))
}

// ── Listings on disk ────────────────────────────────────────────────────────

#[test]
fn forward_backward_passes() {
    let listing = load_file("forward_backward.nnc");
    let mut sink = DiagSink::new();
    let analysis = check_with(&listing, CheckOptions::default(), &mut sink).unwrap();
    assert!(sink.is_empty());
    assert_eq!(analysis.attributes.len(), 7);
    assert_eq!(analysis.variables.num_variables(), 4);
}

#[test]
fn gather_passes() {
    let analysis = check(&load_file("gather.nnc")).unwrap();
    let b2 = analysis.accesses_of_buffer(nncheck::id::BufferId(2)).unwrap();
    assert!(b2.is_output);
    assert_eq!(b2.accesses.len(), 2);
}

#[test]
fn split_columns_passes_with_two_variables_in_output() {
    let analysis = check(&load_file("split_columns.nnc")).unwrap();
    assert_eq!(
        analysis
            .variables
            .variables_for_buffer(nncheck::id::BufferId(2)),
        Some(1..3)
    );
}

#[test]
fn in_place_listing_needs_rewrite_check_disabled() {
    let listing = load_file("in_place.nnc");
    let err = check(&listing).unwrap_err();
    assert_eq!(err.code, Some(codes::E0801_WRITE_AFTER_READ));
    assert_eq!(err.location, Location::Variable(VariableId(1)));
    assert!(err.hint.is_some());

    let relaxed = CheckOptions {
        check_rewrite: false,
    };
    assert!(check_with(&listing, relaxed, &mut DiagSink::new()).is_ok());
}

#[test]
fn every_listing_loads() {
    let mut names: Vec<_> = std::fs::read_dir(listings_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "nnc"))
        .collect();
    names.sort();
    assert!(!names.is_empty());
    for path in names {
        let source = std::fs::read_to_string(&path).unwrap();
        assert!(load(&source).is_ok(), "{} failed to load", path.display());
    }
}

// ── Failure classes ─────────────────────────────────────────────────────────

#[test]
fn reading_undefined_scratch_is_rejected() {
    let listing = program(
        "alloc_undefined b2\nalloc_undefined b3\nadd v3 v2\nmarker\ndealloc b1\ndealloc b2\n",
    );
    assert_eq!(error_code(&listing), codes::E0701_READ_BEFORE_WRITE);
}

#[test]
fn unallocated_scratch_is_rejected() {
    let listing = program(
        "alloc_undefined b3\npropagate k0 a0 v1 v2\ncopy v3 v2\nmarker\ndealloc b1\ndealloc b2\n",
    );
    assert_eq!(error_code(&listing), codes::E0601_NOT_ALLOCATED);
}

#[test]
fn access_after_deallocation_is_rejected() {
    let listing = program(
        "alloc_undefined b2\nalloc_undefined b3\npropagate k0 a0 v1 v2\ndealloc b2\ncopy v3 v2\nmarker\ndealloc b1\n",
    );
    assert_eq!(error_code(&listing), codes::E0606_ACCESS_AFTER_DEALLOC);
}

#[test]
fn backprop_before_marker_is_rejected() {
    let listing = program("alloc_undefined b2\nbackprop n1 a0 v1 v0 v2 v3\nmarker\n");
    assert_eq!(error_code(&listing), codes::E0501_BACKPROP_BEFORE_MARKER);
}

#[test]
fn duplicate_scatter_target_is_rejected() {
    let listing = program(
        "pairs p0 [(v3, 0), (v3, 0), (-1, -1)]\nadd_to_rows_multi v2 p0\nmarker\n",
    );
    assert_eq!(error_code(&listing), codes::E0404_DUPLICATE_TARGET);
}

#[test]
fn unused_input_warns_once_per_sink() {
    let listing = program(
        "buffer b4 3 2\nview v4 b4 0 3 0 2\ninput n0 b4\n\
         alloc_undefined b3\npropagate k0 a0 v1 v3\nmarker\ndealloc b1\ndealloc b4\n",
    );
    let mut sink = DiagSink::new();
    check_with(&listing, CheckOptions::default(), &mut sink).unwrap();
    check_with(&listing, CheckOptions::default(), &mut sink).unwrap();
    assert_eq!(sink.diagnostics().len(), 1);
    let warning = &sink.diagnostics()[0];
    assert_eq!(warning.code, Some(codes::W0600_UNUSED_INPUT));
    assert!(!warning.is_error());

    // A fresh sink reports it again.
    let mut fresh = DiagSink::new();
    check_with(&listing, CheckOptions::default(), &mut fresh).unwrap();
    assert_eq!(fresh.diagnostics().len(), 1);
}

#[test]
fn buffer_with_uncovered_columns_is_rejected() {
    let listing = load_inline(
        "buffer b1 2 8\nview v1 b1 0 2 2 4\nalloc_zeroed b1\nmarker\ndealloc b1\n",
    );
    let err = check(&listing).unwrap_err();
    assert_eq!(err.code, Some(codes::E0104_COLUMNS_UNCOVERED));
    assert_eq!(err.location, Location::Buffer(nncheck::id::BufferId(1)));
}
