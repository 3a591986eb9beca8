//! Logging prelude module for convenient access to tracing macros.
//!
//! All diagnostics go to stderr: stdout carries the wire protocol, and a
//! stray log line there would corrupt the conversation with git-annex.

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// By default, logs at INFO level and above are displayed. Control the log
/// level with the `RUST_LOG` environment variable:
///
/// ```bash
/// RUST_LOG=debug git annex testremote myremote
/// RUST_LOG=annex_external=trace git annex get .
/// ```
///
/// Protocol traffic is logged at debug level, one line per wire line.
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
}

// vim: ts=4
