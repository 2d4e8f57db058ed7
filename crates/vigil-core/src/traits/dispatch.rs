// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound message dispatch collaborator trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VigilError;
use crate::traits::adapter::Collaborator;
use crate::types::Channel;

/// A human-authored message handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub session_id: String,
    pub location_id: String,
    pub contact_id: Option<String>,
    pub message: String,
    pub channel: Channel,
    /// Operator id of the sender.
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement from the delivery collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    /// Provider-side message id, when one is returned.
    pub external_id: Option<String>,
    /// Raw response payload, when one is returned.
    pub payload: Option<serde_json::Value>,
}

/// Delivers operator messages to the contact's channel.
///
/// A refusal is reported as [`VigilError::Dispatch`]; connection failures as
/// [`VigilError::Transport`] or [`VigilError::Timeout`].
#[async_trait]
pub trait MessageDispatcher: Collaborator {
    async fn dispatch(&self, message: &OutboundMessage) -> Result<DispatchReceipt, VigilError>;
}
