//! Logging prelude module for convenient access to tracing macros.
//!
//! # Usage
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("Cycle finished");
//! warn!("Skipping unreadable file");
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber, writing to stderr.
///
/// `default_level` applies when `RUST_LOG` is unset or unparsable:
///
/// ```bash
/// RUST_LOG=debug cloudmirror sync
/// RUST_LOG=cloudmirror::sync=trace cloudmirror sync notes
/// ```
pub fn init_tracing(default_level: &str) {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
		)
		.with_writer(std::io::stderr)
		.try_init();
}

// vim: ts=4
