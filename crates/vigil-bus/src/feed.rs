// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast-backed change feed.
//!
//! Every published [`ChangeEvent`] goes to a single `broadcast` channel. Each
//! subscription runs a forwarder task that applies its [`EventMatcher`] and
//! pushes matches into a private `mpsc` channel. Slow subscriptions lag and
//! lose events; the polling fallback restores correctness.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use vigil_core::{
    AdapterType, ChangeEvent, ChangeStream, ChangeSubscription, Collaborator, EventMatcher,
    HealthStatus, VigilError,
};

/// Per-subscription buffer between the forwarder and the consumer.
const SUBSCRIPTION_BUFFER: usize = 256;

/// In-process change-data stream.
///
/// Cheap to clone; clones share the same channel.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    tx: broadcast::Sender<ChangeEvent>,
    /// Cancelled to drop every live subscription. Replaced after each drop so
    /// later subscriptions start on a fresh "connection".
    connection: Mutex<CancellationToken>,
    closed: CancellationToken,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(FeedInner {
                tx,
                connection: Mutex::new(CancellationToken::new()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Broadcast an event to every subscription. Dropped silently when nobody
    /// is listening.
    pub fn publish(&self, event: ChangeEvent) {
        debug!(
            table = %event.table,
            kind = %event.kind,
            receivers = self.inner.tx.receiver_count(),
            "change feed publish"
        );
        let _ = self.inner.tx.send(event);
    }

    /// End every live subscription as if the connection had dropped.
    ///
    /// Subscribers see `recv()` return `None` and are expected to resubscribe.
    pub fn disconnect_all(&self) {
        let mut connection = self
            .inner
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        connection.cancel();
        *connection = CancellationToken::new();
        debug!("change feed dropped all subscriptions");
    }

    /// Number of live forwarders.
    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    fn connection(&self) -> CancellationToken {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Collaborator for ChangeFeed {
    fn name(&self) -> &str {
        "change-feed"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::ChangeStream
    }

    async fn health_check(&self) -> Result<HealthStatus, VigilError> {
        if self.inner.closed.is_cancelled() {
            return Ok(HealthStatus::Unhealthy("change feed is shut down".into()));
        }
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), VigilError> {
        self.inner.closed.cancel();
        self.disconnect_all();
        Ok(())
    }
}

#[async_trait]
impl ChangeStream for ChangeFeed {
    async fn subscribe(&self, matcher: &EventMatcher) -> Result<ChangeSubscription, VigilError> {
        if self.inner.closed.is_cancelled() {
            return Err(VigilError::transport("change feed is shut down"));
        }

        // Receiver is created before returning so no event published after
        // `subscribe` completes can be missed.
        let mut rx = self.inner.tx.subscribe();
        let (out, sub_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let connection = self.connection();
        let matcher = matcher.clone();
        let id = Uuid::new_v4();

        debug!(subscription = %id, table = %matcher.table, "change feed subscribe");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = connection.cancelled() => break,
                    _ = out.closed() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            if matcher.matches(&event) && out.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(subscription = %id, missed, "change subscription lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(subscription = %id, "change subscription ended");
        });

        Ok(ChangeSubscription::new(sub_rx))
    }
}
