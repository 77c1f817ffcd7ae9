//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGINT (Ctrl-C) and, on Unix, SIGTERM
//! - Translate the first signal into a graceful shutdown
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second signal forces the process to exit

use crate::lifecycle::Shutdown;

/// Exit status used when a second signal cuts draining short.
const FORCED_EXIT_CODE: i32 = 130;

/// Wait for the next termination signal.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                        }
                    }
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "SIGTERM handler unavailable"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        // Without a signal source, never resolve.
        std::future::pending::<()>().await;
    }
}

/// Spawn a task that triggers `shutdown` on the first signal and exits the
/// process on the second.
pub fn spawn_signal_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Signal received, draining");
        shutdown.trigger();

        wait_for_signal().await;
        tracing::warn!("Second signal received, exiting immediately");
        std::process::exit(FORCED_EXIT_CODE);
    });
}
