// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Send-and-pause: suppress the agent, deliver an operator message, record it.
//!
//! The steps touch two external systems and are not atomic. The policy:
//!
//! 1. Blank messages are rejected before anything happens.
//! 2. The agent is suppressed best-effort. A failure is logged as a partial
//!    failure and the send goes ahead; in that window the agent may still
//!    reply.
//! 3. Delivery failure aborts the send. Nothing is written to the transcript.
//! 4. After delivery the message is appended to the transcript as
//!    `role = human`. An append failure is logged as a partial failure; the
//!    message was delivered, so the send still succeeds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use vigil_core::{
    Channel, DispatchReceipt, ErrorKind, Message, MessageDispatcher, MessageRole, OutboundMessage,
    SupervisionStore, VigilError,
};

use crate::state_machine::{SupervisionMachine, TransitionOutcome};

/// An operator message to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub session_id: String,
    pub location_id: String,
    pub contact_id: Option<String>,
    pub message: String,
    pub channel: Channel,
}

/// Why a send failed.
#[derive(Debug, Error)]
pub enum SendError {
    /// Rejected locally; nothing was attempted.
    #[error("validation error: {0}")]
    Validation(String),

    /// The delivery collaborator refused the message or could not be reached.
    #[error("dispatch failed: {0}")]
    Dispatch(#[source] VigilError),

    /// Anything unexpected, including a panicked delivery task.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::Validation(_) => ErrorKind::Validation,
            SendError::Dispatch(_) => ErrorKind::Dispatch,
            SendError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether trying again may help (network failures and timeouts).
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Dispatch(e) if e.is_retryable())
    }
}

/// What a successful send did.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub receipt: DispatchReceipt,
    /// The transcript entry, whether or not the append landed.
    pub message: Message,
    /// `None` when suppressing the agent failed.
    pub pause: Option<TransitionOutcome>,
    pub appended: bool,
}

impl SendReport {
    /// True when a non-blocking step failed.
    pub fn is_partial(&self) -> bool {
        self.pause.is_none() || !self.appended
    }
}

/// Runs the send-and-pause sequence.
pub struct SendCoordinator {
    machine: Arc<SupervisionMachine>,
    store: Arc<dyn SupervisionStore>,
    dispatcher: Arc<dyn MessageDispatcher>,
    timeout: Duration,
}

impl SendCoordinator {
    pub fn new(
        machine: Arc<SupervisionMachine>,
        store: Arc<dyn SupervisionStore>,
        dispatcher: Arc<dyn MessageDispatcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            machine,
            store,
            dispatcher,
            timeout,
        }
    }

    pub async fn send(&self, request: SendRequest) -> Result<SendReport, SendError> {
        if request.message.trim().is_empty() {
            return Err(SendError::Validation("message must not be empty".into()));
        }
        if request.session_id.trim().is_empty() {
            return Err(SendError::Validation("session_id must not be empty".into()));
        }

        let session_id = request.session_id.as_str();
        let sender = self.machine.actor().to_string();

        let pause = match self
            .machine
            .suppress_ai(session_id, Some(&request.location_id))
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    session_id,
                    error = %e,
                    error_kind = %ErrorKind::PartialFailure,
                    cause_kind = %e.kind(),
                    "could not pause agent before send, sending anyway"
                );
                None
            }
        };

        let outbound = OutboundMessage {
            session_id: request.session_id.clone(),
            location_id: request.location_id.clone(),
            contact_id: request.contact_id.clone(),
            message: request.message.clone(),
            channel: request.channel,
            sender: sender.clone(),
            timestamp: Utc::now(),
        };
        let receipt = self.deliver(outbound.clone()).await?;

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: request.session_id.clone(),
            role: MessageRole::Human,
            content: request.message,
            channel: Some(request.channel),
            sender: Some(sender),
            created_at: outbound.timestamp,
        };
        let appended = match self.store.append_message(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    session_id,
                    message_id = %message.id,
                    error = %e,
                    error_kind = %ErrorKind::PartialFailure,
                    cause_kind = %e.kind(),
                    "message delivered but transcript append failed"
                );
                false
            }
        };

        info!(
            session_id,
            channel = %request.channel,
            external_id = receipt.external_id.as_deref().unwrap_or(""),
            paused = pause.is_some(),
            appended,
            "operator message sent"
        );
        Ok(SendReport {
            receipt,
            message,
            pause,
            appended,
        })
    }

    /// Deliver on a separate task so that dropping the caller's future does
    /// not abandon a request halfway through.
    async fn deliver(&self, outbound: OutboundMessage) -> Result<DispatchReceipt, SendError> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let session_id = outbound.session_id.clone();
        let task = tokio::spawn(async move { dispatcher.dispatch(&outbound).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(receipt))) => Ok(receipt),
            Ok(Ok(Err(VigilError::Internal(detail)))) => Err(SendError::Unknown(detail)),
            Ok(Ok(Err(e))) => {
                warn!(
                    session_id,
                    error = %e,
                    error_kind = %e.kind(),
                    "dispatch failed"
                );
                Err(SendError::Dispatch(e))
            }
            Ok(Err(join)) => Err(SendError::Unknown(format!("dispatch task failed: {join}"))),
            Err(_) => {
                debug!(
                    session_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "dispatch timed out"
                );
                Err(SendError::Dispatch(VigilError::Timeout {
                    duration: self.timeout,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use vigil_core::SupervisionStatus;
    use vigil_test_utils::{MockDispatcher, MockStore};

    use super::*;

    fn coordinator(store: &Arc<MockStore>, dispatcher: &Arc<MockDispatcher>) -> SendCoordinator {
        let s: Arc<dyn SupervisionStore> = store.clone();
        let d: Arc<dyn MessageDispatcher> = dispatcher.clone();
        let machine = Arc::new(SupervisionMachine::new(Arc::clone(&s), "ana"));
        SendCoordinator::new(machine, s, d, Duration::from_secs(5))
    }

    fn request(message: &str) -> SendRequest {
        SendRequest {
            session_id: "s1".into(),
            location_id: "loc-1".into(),
            contact_id: Some("contact-1".into()),
            message: message.into(),
            channel: Channel::Whatsapp,
        }
    }

    #[tokio::test]
    async fn happy_path_pauses_dispatches_and_appends() {
        let store = Arc::new(MockStore::new());
        let dispatcher = Arc::new(MockDispatcher::new());
        let report = coordinator(&store, &dispatcher)
            .send(request("Oi!"))
            .await
            .unwrap();

        assert!(!report.is_partial());
        let sent = dispatcher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender, "ana");
        assert_eq!(sent[0].contact_id.as_deref(), Some("contact-1"));

        let transcript = store.messages("s1");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, MessageRole::Human);
        assert_eq!(transcript[0].sender.as_deref(), Some("ana"));
        assert_eq!(
            store.state("s1").unwrap().status,
            SupervisionStatus::AiPaused
        );
    }

    #[tokio::test]
    async fn blank_message_has_no_side_effects() {
        let store = Arc::new(MockStore::new());
        let dispatcher = Arc::new(MockDispatcher::new());
        let err = coordinator(&store, &dispatcher)
            .send(request(" \n\t "))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(dispatcher.sent().is_empty());
        assert!(store.messages("s1").is_empty());
        assert!(store.state("s1").is_none());
    }

    #[tokio::test]
    async fn rejected_dispatch_writes_nothing_to_transcript() {
        let store = Arc::new(MockStore::new());
        let dispatcher = Arc::new(MockDispatcher::new());
        dispatcher.reject_with(422, "template required");

        let err = coordinator(&store, &dispatcher)
            .send(request("Oi!"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dispatch);
        assert!(!err.is_retryable());
        assert!(store.messages("s1").is_empty());
        // The pause already landed and is not rolled back.
        assert!(!store.state("s1").unwrap().ai_enabled);
    }

    #[tokio::test]
    async fn failed_pause_does_not_block_send() {
        let store = Arc::new(MockStore::new());
        store.fail_state_writes_with(|| VigilError::transport("timeout"));
        let dispatcher = Arc::new(MockDispatcher::new());

        let report = coordinator(&store, &dispatcher)
            .send(request("Oi!"))
            .await
            .unwrap();
        assert!(report.pause.is_none());
        assert!(report.is_partial());
        assert_eq!(dispatcher.sent().len(), 1);
        assert_eq!(store.messages("s1").len(), 1);
    }

    #[tokio::test]
    async fn failed_append_still_reports_success() {
        let store = Arc::new(MockStore::new());
        store.fail_appends_with(|| VigilError::transport("write failed"));
        let dispatcher = Arc::new(MockDispatcher::new());

        let report = coordinator(&store, &dispatcher)
            .send(request("Oi!"))
            .await
            .unwrap();
        assert!(!report.appended);
        assert_eq!(report.message.content, "Oi!");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dispatch_times_out_as_retryable() {
        let store = Arc::new(MockStore::new());
        let dispatcher = Arc::new(MockDispatcher::new());
        dispatcher.delay(Duration::from_secs(60));

        let err = coordinator(&store, &dispatcher)
            .send(request("Oi!"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::Dispatch(VigilError::Timeout { .. })
        ));
        assert!(err.is_retryable());
        assert!(store.messages("s1").is_empty());
    }
}
