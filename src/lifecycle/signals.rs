//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGINT, SIGTERM, SIGABRT)
//! - Translate the first signal into a shutdown trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Later signals are ignored; shutdown is already under way

use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Trigger `shutdown` on the first termination signal.
///
/// The task also ends, without triggering, if shutdown starts for another
/// reason.
pub fn spawn_signal_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = tokio::select! {
            signal = wait_for_signal() => signal,
            _ = shutdown.triggered() => return,
        };
        tracing::info!(signal, "Shutdown signal received");
        shutdown.trigger();
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    const SIGABRT: i32 = 6;

    match (signal(SignalKind::terminate()), signal(SignalKind::from_raw(SIGABRT))) {
        (Ok(mut term), Ok(mut abort)) => tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
            _ = abort.recv() => "SIGABRT",
        },
        (Err(error), _) | (_, Err(error)) => {
            tracing::warn!(%error, "Cannot register SIGTERM/SIGABRT, listening for Ctrl+C only");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(error) => {
            tracing::warn!(%error, "Cannot register Ctrl+C handler");
            std::future::pending().await
        }
    }
}
