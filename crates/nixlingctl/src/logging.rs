//! Logging setup.
//!
//! Logs go to stderr so `--json` output on stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "nixling_common=debug,nixlingctl=debug,warn",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `-v`.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .init();
}
