// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Vigil supervision subsystem.
//!
//! Every [`VigilError`] classifies into exactly one [`ErrorKind`], which is the
//! taxonomy surfaced to callers and written into structured log fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::types::SupervisionStatus;

/// Caller-facing error classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input caught before any side effect.
    #[strum(serialize = "validation_error")]
    #[serde(rename = "validation_error")]
    Validation,
    /// A backing collaborator is not wired up at all.
    NotConfigured,
    /// An expected table or view is absent.
    RelationMissing,
    /// Network, timeout, or generic storage failure. Retryable.
    #[strum(serialize = "transport_error")]
    #[serde(rename = "transport_error")]
    Transport,
    /// Part of a multi-step operation failed but the operation proceeded.
    PartialFailure,
    /// The outbound delivery collaborator rejected a message.
    #[strum(serialize = "dispatch_error")]
    #[serde(rename = "dispatch_error")]
    Dispatch,
    /// Anything unexpected.
    #[strum(serialize = "unknown_error")]
    #[serde(rename = "unknown_error")]
    Unknown,
}

/// The primary error type used across all Vigil collaborator traits and operations.
#[derive(Debug, Error)]
pub enum VigilError {
    /// Input rejected before any side effect (e.g. an empty message).
    #[error("validation error: {0}")]
    Validation(String),

    /// A supervision transition that the state machine does not allow.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SupervisionStatus,
        to: SupervisionStatus,
    },

    /// A collaborator (store, change stream, dispatcher) is not configured.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// The named table or view does not exist in the backing store.
    #[error("relation `{relation}` does not exist")]
    RelationMissing { relation: String },

    /// Network or connection level failure.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Storage backend failure other than a missing relation.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The delivery collaborator answered but refused the message.
    #[error("dispatch rejected: {message}")]
    Dispatch {
        message: String,
        status: Option<u16>,
        payload: Option<serde_json::Value>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Configuration errors discovered at runtime.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VigilError {
    /// Classify this error into the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VigilError::Validation(_) | VigilError::InvalidTransition { .. } => {
                ErrorKind::Validation
            }
            VigilError::NotConfigured(_) | VigilError::Config(_) => ErrorKind::NotConfigured,
            VigilError::RelationMissing { .. } => ErrorKind::RelationMissing,
            VigilError::Transport { .. } | VigilError::Storage { .. } | VigilError::Timeout { .. } => {
                ErrorKind::Transport
            }
            VigilError::Dispatch { .. } => ErrorKind::Dispatch,
            VigilError::Internal(_) => ErrorKind::Unknown,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Shorthand for a transport error without an underlying cause.
    pub fn transport(message: impl Into<String>) -> Self {
        VigilError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a missing relation.
    pub fn relation_missing(relation: impl Into<String>) -> Self {
        VigilError::RelationMissing {
            relation: relation.into(),
        }
    }
}
