// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination with signal handling.
//!
//! `vigil serve` runs until a [`CancellationToken`] fires on SIGINT or
//! SIGTERM, then hands every collaborator a bounded shutdown window.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::Collaborator;

/// Spawn a task that cancels the returned token on the first SIGINT or SIGTERM.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal, "shutdown requested");
        cancel.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl+C"
}

/// Shuts down each collaborator, giving each up to `timeout`.
///
/// Failures and timeouts are logged; shutdown always proceeds to the next.
pub async fn shutdown_collaborators(collaborators: &[Arc<dyn Collaborator>], timeout: Duration) {
    for collaborator in collaborators {
        let name = collaborator.name().to_string();
        match tokio::time::timeout(timeout, collaborator.shutdown()).await {
            Ok(Ok(())) => debug!(collaborator = %name, "collaborator shut down"),
            Ok(Err(e)) => warn!(collaborator = %name, error = %e, "collaborator shutdown failed"),
            Err(_) => warn!(
                collaborator = %name,
                timeout_ms = timeout.as_millis() as u64,
                "collaborator shutdown timed out"
            ),
        }
    }
    info!(count = collaborators.len(), "collaborators shut down");
}
