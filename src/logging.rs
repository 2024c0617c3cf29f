// ABOUTME: tracing subscriber setup for the CLI binary
// ABOUTME: Writes to stderr so stdout stays clean for SQL/JSON/CSV output

use tracing_subscriber::EnvFilter;

/// Configures the global tracing subscriber.
///
/// - `verbose` enables DEBUG and below.
/// - `no_progress` (with `verbose` unset) raises the floor to WARN, matching
///   the CLI's `--no-progress` flag suppressing the INFO-level progress logs
///   traversal/fetch/emit stages report.
/// - `structured` switches the formatter to JSON lines, for log aggregation.
///
/// `RUST_LOG` always wins when set, same as the teacher's CLI.
pub fn init_logging(verbose: bool, no_progress: bool, structured: bool) {
    let default_level = if verbose {
        "debug"
    } else if no_progress {
        "warn"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dbslice={}", default_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if structured {
        builder.json().init();
    } else {
        builder.init();
    }
}
