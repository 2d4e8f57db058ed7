// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage/query collaborator trait.

use async_trait::async_trait;

use crate::error::VigilError;
use crate::filters::ConversationQuery;
use crate::traits::adapter::Collaborator;
use crate::types::{ContactInfo, Conversation, Message, SupervisionState};

/// Durable storage for conversations, supervision rows, and transcripts.
///
/// Implementations must report a missing table or view as
/// [`VigilError::RelationMissing`]; the aggregator and the state machine
/// branch on that distinction.
#[async_trait]
pub trait SupervisionStore: Collaborator {
    /// Reads one page of conversation rows from the named relation, ordered by
    /// `last_message_at` descending. Rows are returned as stored, duplicates
    /// included.
    async fn query_conversations(
        &self,
        relation: &str,
        query: &ConversationQuery,
    ) -> Result<Vec<Conversation>, VigilError>;

    /// Fetches the supervision row for a session.
    async fn get_supervision_state(
        &self,
        session_id: &str,
    ) -> Result<Option<SupervisionState>, VigilError>;

    /// Inserts a new supervision row.
    async fn insert_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError>;

    /// Overwrites an existing supervision row.
    async fn update_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError>;

    /// Whether [`upsert_supervision_state`](Self::upsert_supervision_state) is a
    /// single atomic insert-on-conflict-update.
    fn supports_native_upsert(&self) -> bool {
        false
    }

    /// Writes a supervision row, creating it if absent.
    ///
    /// The default is a check-then-write pair and is not atomic; callers that
    /// need atomicity either rely on a native override or serialize writers.
    async fn upsert_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError> {
        match self.get_supervision_state(&state.session_id).await? {
            Some(_) => self.update_supervision_state(state).await,
            None => self.insert_supervision_state(state).await,
        }
    }

    /// Returns the transcript of a session. Order is unspecified.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, VigilError>;

    /// Appends an entry to a session transcript.
    async fn append_message(&self, message: &Message) -> Result<(), VigilError>;

    /// Contact details for the conversation a session belongs to.
    async fn contact_info(&self, session_id: &str) -> Result<Option<ContactInfo>, VigilError>;
}
