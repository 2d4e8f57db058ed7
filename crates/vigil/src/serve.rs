// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `vigil serve` command implementation.
//!
//! Opens the SQLite store with an in-process change feed, starts a
//! supervision panel over it, and logs every change in the conversation list
//! until SIGINT or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use vigil_bus::ChangeFeed;
use vigil_config::VigilConfig;
use vigil_core::{ChangeStream, Collaborator, HealthStatus, SupervisionStore, VigilError};
use vigil_storage::SqliteStore;
use vigil_supervisor::shutdown;
use vigil_supervisor::{ListView, PanelDeps, PanelSettings, SupervisionPanel};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the `vigil serve` command.
pub async fn run_serve(config: VigilConfig) -> Result<(), VigilError> {
    info!(operator = %config.operator.id, "starting vigil serve");

    let feed = ChangeFeed::new(config.realtime.feed_capacity);
    let store = SqliteStore::new(config.storage.clone()).with_change_feed(feed.clone());
    store.initialize().await?;
    let store = Arc::new(store);
    let dispatcher = vigil_dispatch::from_config(&config.dispatch)?;

    let collaborators: Vec<Arc<dyn Collaborator>> = vec![store.clone(), Arc::new(feed.clone())];
    for collaborator in &collaborators {
        log_health(collaborator.as_ref()).await;
    }

    let store_dyn: Arc<dyn SupervisionStore> = store.clone();
    let stream: Arc<dyn ChangeStream> = Arc::new(feed.clone());
    let panel = SupervisionPanel::start(
        PanelSettings::from_config(&config),
        PanelDeps {
            store: store_dyn,
            stream,
            dispatcher: Arc::clone(&dispatcher),
        },
    )
    .await?;

    let cancel = shutdown::install_signal_handler();
    let mut list_rx = panel.watch_list();
    let mut last: Option<ListView> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = list_rx.changed() => {
                if changed.is_err() {
                    warn!("list view channel closed");
                    break;
                }
                let view = list_rx.borrow_and_update().clone();
                log_list(&view, last.as_ref());
                last = Some(view);
            }
        }
    }

    info!("shutting down");
    panel.close().await;
    shutdown::shutdown_collaborators(&collaborators, SHUTDOWN_TIMEOUT).await;
    if let Err(e) = dispatcher.shutdown().await {
        warn!(error = %e, "dispatcher shutdown failed");
    }
    info!("vigil serve stopped");
    Ok(())
}

async fn log_health(collaborator: &dyn Collaborator) {
    let name = collaborator.name();
    match collaborator.health_check().await {
        Ok(HealthStatus::Healthy) => info!(collaborator = name, "healthy"),
        Ok(HealthStatus::Degraded(reason)) => warn!(collaborator = name, %reason, "degraded"),
        Ok(HealthStatus::Unhealthy(reason)) => error!(collaborator = name, %reason, "unhealthy"),
        Err(e) => error!(collaborator = name, error = %e, "health check failed"),
    }
}

/// Log a list refresh when something an operator would notice changed.
fn log_list(view: &ListView, last: Option<&ListView>) {
    if view.loading {
        return;
    }
    if let Some(err) = &view.error {
        if last.and_then(|l| l.error.as_ref()) != Some(err) {
            warn!(error_kind = %err.kind, error = %err.message, "conversation list refresh failed");
        }
        return;
    }
    let unchanged = last.is_some_and(|l| {
        l.error.is_none()
            && l.stats == view.stats
            && l.source == view.source
            && l.conversations == view.conversations
    });
    if unchanged {
        return;
    }
    let s = &view.stats;
    info!(
        source = ?view.source,
        total = s.total,
        ai_active = s.ai_active,
        ai_paused = s.ai_paused,
        manual_takeover = s.manual_takeover,
        scheduled = s.scheduled,
        converted = s.converted,
        archived = s.archived,
        awaiting_response = s.awaiting_response,
        "conversation list updated"
    );
}

#[cfg(test)]
mod tests {
    use vigil_supervisor::ViewError;

    use super::*;

    #[tokio::test]
    async fn unhealthy_feed_is_logged_not_fatal() {
        let feed = ChangeFeed::new(4);
        feed.shutdown().await.unwrap();
        log_health(&feed).await;
    }

    #[test]
    fn loading_views_are_skipped() {
        let view = ListView::default();
        assert!(view.loading);
        log_list(&view, None);
    }

    #[test]
    fn repeated_errors_are_logged_once() {
        let view = ListView {
            loading: false,
            error: Some(ViewError {
                kind: vigil_core::ErrorKind::Transport,
                message: "reset".into(),
            }),
            ..ListView::default()
        };
        log_list(&view, Some(&view));
    }
}
