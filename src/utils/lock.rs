//! Signal handlers for graceful termination

use tracing::{debug, warn};

use super::cancel::CancelToken;

/// Cancel `token` on the first SIGINT or SIGTERM so a running cycle stops
/// after its in-flight file units. A second signal exits immediately.
pub fn setup_signal_handlers(token: CancelToken) {
	tokio::spawn(async move {
		use tokio::signal;

		let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}. Process will not handle SIGTERM gracefully.", e);
				return;
			}
		};

		let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGINT handler: {}. Process will not handle SIGINT gracefully.", e);
				return;
			}
		};

		let code = tokio::select! {
			_ = sigterm.recv() => 143, // 128 + SIGTERM(15)
			_ = sigint.recv() => 130, // 128 + SIGINT(2)
		};
		debug!("Received termination signal, cancelling running cycles...");
		token.cancel();

		tokio::select! {
			_ = sigterm.recv() => {}
			_ = sigint.recv() => {}
		}
		warn!("Second termination signal, exiting");
		std::process::exit(code);
	});
}

// vim: ts=4
