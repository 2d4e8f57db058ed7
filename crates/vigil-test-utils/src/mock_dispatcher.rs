// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock delivery collaborator for deterministic testing.
//!
//! `MockDispatcher` captures every outbound message and can be told to reject
//! or stall, so send-and-pause failure paths can be asserted without a
//! network.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use vigil_core::{
    AdapterType, Collaborator, DispatchReceipt, HealthStatus, MessageDispatcher,
    OutboundMessage, VigilError,
};

#[derive(Default)]
struct Inner {
    sent: Vec<OutboundMessage>,
    rejection: Option<(u16, String)>,
    delay: Option<Duration>,
}

/// A dispatcher that records messages instead of delivering them.
pub struct MockDispatcher {
    inner: Mutex<Inner>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages accepted so far, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.lock().sent.clone()
    }

    /// Refuse every message with `status` and `message` until [`accept`](Self::accept).
    pub fn reject_with(&self, status: u16, message: impl Into<String>) {
        self.lock().rejection = Some((status, message.into()));
    }

    /// Accept messages again.
    pub fn accept(&self) {
        self.lock().rejection = None;
    }

    /// Wait `delay` before answering each dispatch.
    pub fn delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collaborator for MockDispatcher {
    fn name(&self) -> &str {
        "mock-dispatcher"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Dispatcher
    }

    async fn health_check(&self) -> Result<HealthStatus, VigilError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), VigilError> {
        Ok(())
    }
}

#[async_trait]
impl MessageDispatcher for MockDispatcher {
    async fn dispatch(&self, message: &OutboundMessage) -> Result<DispatchReceipt, VigilError> {
        let delay = self.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if let Some((status, reason)) = &inner.rejection {
            return Err(VigilError::Dispatch {
                message: reason.clone(),
                status: Some(*status),
                payload: Some(serde_json::json!({ "message": reason })),
            });
        }
        inner.sent.push(message.clone());
        let external_id = format!("mock-{}", inner.sent.len());
        Ok(DispatchReceipt {
            external_id: Some(external_id),
            payload: None,
        })
    }
}
