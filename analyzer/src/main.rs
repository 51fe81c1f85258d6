use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::exit;

use nncheck::diag::{DiagSink, Diagnostic, Location};
use nncheck::verify::{CheckOptions, Checker};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Run the checks and print a one-line summary
    Check,
    /// Per-instruction read/write sets
    Attributes,
    /// Per-buffer lifecycle and access history
    Accesses,
    /// Column partition of every buffer
    Variables,
    /// The full analysis as JSON
    Json,
    /// SHA-256 of the canonical JSON analysis
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "nncheck",
    version,
    about = "Checks .nnc network computation listings for access and lifecycle errors"
)]
struct Cli {
    /// Input .nnc listing
    listing: PathBuf,

    /// What to print once the checks pass
    #[arg(long, value_enum, default_value_t = EmitStage::Check)]
    emit: EmitStage,

    /// Skip the rewrite-safety check (for programs optimized to run in place)
    #[arg(long)]
    no_check_rewrite: bool,

    /// Log analysis stages to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // ── Read and load listing ──
    let source = match std::fs::read_to_string(&cli.listing) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("nncheck: error: {}: {}", cli.listing.display(), e);
            exit(2);
        }
    };

    let listing = match nncheck::listing::load(&source) {
        Ok(l) => l,
        Err(diags) => {
            for diag in &diags {
                eprintln!("{}", render(&cli.listing, &source, diag));
            }
            exit(1);
        }
    };

    // ── Check ──
    let options = CheckOptions {
        check_rewrite: !cli.no_check_rewrite,
    };
    let mut sink = DiagSink::new();
    let result = Checker::new(options, &listing.network, &listing.program).check(&mut sink);
    for diag in sink.diagnostics() {
        eprintln!("{}", render(&cli.listing, &source, diag));
    }
    let analysis = match result {
        Ok(a) => a,
        Err(diag) => {
            eprintln!("{}", render(&cli.listing, &source, &diag));
            exit(1);
        }
    };

    // ── Emit ──
    let output = match cli.emit {
        EmitStage::Check => Ok(format!(
            "{}: ok ({} instructions, {} variables)\n",
            cli.listing.display(),
            listing.program.instrs.len(),
            analysis.variables.num_variables()
        )),
        EmitStage::Attributes => Ok(nncheck::dump::instr_attributes(&analysis)),
        EmitStage::Accesses => Ok(nncheck::dump::buffer_accesses(&analysis)),
        EmitStage::Variables => Ok(nncheck::dump::variables(&analysis)),
        EmitStage::Json => analysis.to_json_pretty().map(|j| j + "\n"),
        EmitStage::Fingerprint => analysis.fingerprint().map(|f| f + "\n"),
    };
    match output {
        Ok(text) => print!("{text}"),
        Err(e) => {
            eprintln!("nncheck: error: cannot serialize analysis: {e}");
            exit(1);
        }
    }
}

/// `RUST_LOG` wins; otherwise `debug` under `--verbose` and `error` by default.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `path:line:col: error[E0001]: ...` for source locations, otherwise
/// `path: c4: error[E0601]: ...`.
fn render(path: &Path, source: &str, diag: &Diagnostic) -> String {
    match diag.location {
        Location::Source(span) => {
            let (line, col) = nncheck::listing::line_col(source, span.start);
            format!("{}:{line}:{col}: {diag}", path.display())
        }
        location => format!("{}: {location}: {diag}", path.display()),
    }
}
