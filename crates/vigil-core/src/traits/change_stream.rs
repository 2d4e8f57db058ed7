// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change-data stream collaborator trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::VigilError;
use crate::traits::adapter::Collaborator;
use crate::types::{ChangeEvent, EventMatcher};

/// A live feed of row-level change events matching one [`EventMatcher`].
///
/// The subscription ends (`recv` returns `None`) when the underlying
/// connection drops. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: mpsc::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next event. `None` means the connection is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

/// Source of change events for watched relations.
///
/// Delivery is at-least-once with no cross-row ordering guarantee; events may
/// be lost on disconnect.
#[async_trait]
pub trait ChangeStream: Collaborator {
    /// Opens a subscription for events selected by `matcher`.
    async fn subscribe(&self, matcher: &EventMatcher) -> Result<ChangeSubscription, VigilError>;
}
