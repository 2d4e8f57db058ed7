// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory storage collaborator for deterministic testing.
//!
//! `MockStore` implements `SupervisionStore` over plain collections, with
//! switches for missing relations and injected failures. Inspection methods
//! are synchronous so assertions read naturally.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use vigil_bus::ChangeFeed;
use vigil_core::{
    AdapterType, ChangeEvent, Collaborator, ContactInfo, Conversation, ConversationQuery,
    HealthStatus, Message, SupervisionState, SupervisionStatus, SupervisionStore, Table,
    VigilError,
};

pub const PRIMARY_VIEW: &str = "conversation_overview";
pub const LEGACY_VIEW: &str = "conversation_overview_legacy";
pub const STATE_TABLE: &str = "supervision_state";
pub const MESSAGES_TABLE: &str = "messages";

type Failure = Arc<dyn Fn() -> VigilError + Send + Sync>;

#[derive(Default)]
struct Inner {
    conversations: Vec<Conversation>,
    states: HashMap<String, SupervisionState>,
    messages: Vec<Message>,
    missing: HashSet<String>,
    query_failure: Option<Failure>,
    state_write_failure: Option<Failure>,
    append_failure: Option<Failure>,
    insert_conflicts: usize,
    query_count: usize,
}

/// A storage collaborator backed by in-memory collections.
///
/// `query_conversations` returns rows as pushed, duplicates included and
/// unfiltered, the way a loosely-joined view would. On the primary view the
/// status columns come from the supervision rows; the legacy view has none and
/// reports every conversation as `ai_active`.
pub struct MockStore {
    inner: Mutex<Inner>,
    native_upsert: bool,
    feed: Option<ChangeFeed>,
}

impl MockStore {
    /// An empty store with every relation present and native upsert.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            native_upsert: true,
            feed: None,
        }
    }

    /// Force the read-then-write path for supervision rows.
    pub fn without_native_upsert(mut self) -> Self {
        self.native_upsert = false;
        self
    }

    /// Publish a change event to `feed` for every successful write.
    pub fn with_change_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish<T: Serialize>(&self, table: Table, before: Option<&T>, after: &T) {
        let Some(feed) = &self.feed else { return };
        let Ok(after) = serde_json::to_value(after) else {
            return;
        };
        let event = match before.and_then(|b| serde_json::to_value(b).ok()) {
            Some(before) => ChangeEvent::update(table, Some(before), after),
            None => ChangeEvent::insert(table, after),
        };
        feed.publish(event);
    }

    /// Seed a conversation row. Emits a conversation insert event.
    pub fn push_conversation(&self, conversation: Conversation) {
        self.lock().conversations.push(conversation.clone());
        self.publish::<Conversation>(Table::Conversations, None, &conversation);
    }

    /// Seed a transcript entry, bypassing failure injection. Emits a message
    /// insert event, the way an inbound message from the contact would.
    pub fn push_message(&self, message: Message) {
        self.lock().messages.push(message.clone());
        self.publish::<Message>(Table::Messages, None, &message);
    }

    /// Make `relation` behave as if it was never provisioned.
    pub fn drop_relation(&self, relation: &str) {
        self.lock().missing.insert(relation.to_string());
    }

    /// Provision a previously dropped relation again.
    pub fn restore_relation(&self, relation: &str) {
        self.lock().missing.remove(relation);
    }

    /// Fail every conversation query with the error `make` produces.
    pub fn fail_queries_with(&self, make: impl Fn() -> VigilError + Send + Sync + 'static) {
        self.lock().query_failure = Some(Arc::new(make));
    }

    /// Fail every supervision row insert, update, and upsert.
    pub fn fail_state_writes_with(&self, make: impl Fn() -> VigilError + Send + Sync + 'static) {
        self.lock().state_write_failure = Some(Arc::new(make));
    }

    /// Fail every transcript append.
    pub fn fail_appends_with(&self, make: impl Fn() -> VigilError + Send + Sync + 'static) {
        self.lock().append_failure = Some(Arc::new(make));
    }

    /// Remove all injected failures.
    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.query_failure = None;
        inner.state_write_failure = None;
        inner.append_failure = None;
    }

    pub fn state(&self, session_id: &str) -> Option<SupervisionState> {
        self.lock().states.get(session_id).cloned()
    }

    pub fn state_count(&self) -> usize {
        self.lock().states.len()
    }

    /// Transcript entries for `session_id` in insertion order.
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Inserts that hit an existing supervision row.
    pub fn insert_conflicts(&self) -> usize {
        self.lock().insert_conflicts
    }

    /// Calls to `query_conversations`, failed ones included.
    pub fn query_count(&self) -> usize {
        self.lock().query_count
    }

    fn check(inner: &Inner, relation: &str) -> Result<(), VigilError> {
        if inner.missing.contains(relation) {
            return Err(VigilError::relation_missing(relation));
        }
        Ok(())
    }

    fn check_state_write(inner: &Inner) -> Result<(), VigilError> {
        Self::check(inner, STATE_TABLE)?;
        match &inner.state_write_failure {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collaborator for MockStore {
    fn name(&self) -> &str {
        "mock-store"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, VigilError> {
        let inner = self.lock();
        if inner.missing.is_empty() {
            Ok(HealthStatus::Healthy)
        } else {
            let mut missing: Vec<_> = inner.missing.iter().cloned().collect();
            missing.sort();
            Ok(HealthStatus::Degraded(format!(
                "missing relations: {}",
                missing.join(", ")
            )))
        }
    }

    async fn shutdown(&self) -> Result<(), VigilError> {
        Ok(())
    }
}

#[async_trait]
impl SupervisionStore for MockStore {
    async fn query_conversations(
        &self,
        relation: &str,
        _query: &ConversationQuery,
    ) -> Result<Vec<Conversation>, VigilError> {
        let mut inner = self.lock();
        inner.query_count += 1;
        Self::check(&inner, relation)?;
        if let Some(make) = &inner.query_failure {
            return Err(make());
        }
        match relation {
            PRIMARY_VIEW => Ok(inner
                .conversations
                .iter()
                .cloned()
                .map(|mut c| {
                    if let Some(state) = inner.states.get(&c.session_id) {
                        c.status = state.status;
                        c.ai_enabled = state.ai_enabled;
                    }
                    c
                })
                .collect()),
            LEGACY_VIEW => Ok(inner
                .conversations
                .iter()
                .cloned()
                .map(|mut c| {
                    c.status = SupervisionStatus::AiActive;
                    c.ai_enabled = true;
                    c
                })
                .collect()),
            other => Err(VigilError::relation_missing(other)),
        }
    }

    async fn get_supervision_state(
        &self,
        session_id: &str,
    ) -> Result<Option<SupervisionState>, VigilError> {
        let inner = self.lock();
        Self::check(&inner, STATE_TABLE)?;
        Ok(inner.states.get(session_id).cloned())
    }

    async fn insert_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError> {
        {
            let mut inner = self.lock();
            Self::check_state_write(&inner)?;
            if inner.states.contains_key(&state.session_id) {
                inner.insert_conflicts += 1;
                return Err(VigilError::Storage {
                    source: format!(
                        "duplicate key value violates unique constraint on session_id `{}`",
                        state.session_id
                    )
                    .into(),
                });
            }
            inner
                .states
                .insert(state.session_id.clone(), state.clone());
        }
        self.publish::<SupervisionState>(Table::SupervisionState, None, state);
        Ok(())
    }

    async fn update_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError> {
        let before = {
            let mut inner = self.lock();
            Self::check_state_write(&inner)?;
            match inner.states.get_mut(&state.session_id) {
                Some(row) => std::mem::replace(row, state.clone()),
                None => return Ok(()),
            }
        };
        self.publish(Table::SupervisionState, Some(&before), state);
        Ok(())
    }

    fn supports_native_upsert(&self) -> bool {
        self.native_upsert
    }

    async fn upsert_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError> {
        let before = {
            let mut inner = self.lock();
            Self::check_state_write(&inner)?;
            inner
                .states
                .insert(state.session_id.clone(), state.clone())
        };
        self.publish(Table::SupervisionState, before.as_ref(), state);
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, VigilError> {
        let inner = self.lock();
        Self::check(&inner, MESSAGES_TABLE)?;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn append_message(&self, message: &Message) -> Result<(), VigilError> {
        {
            let mut inner = self.lock();
            Self::check(&inner, MESSAGES_TABLE)?;
            if let Some(make) = &inner.append_failure {
                return Err(make());
            }
            inner.messages.push(message.clone());
        }
        self.publish::<Message>(Table::Messages, None, message);
        Ok(())
    }

    async fn contact_info(&self, session_id: &str) -> Result<Option<ContactInfo>, VigilError> {
        let inner = self.lock();
        Self::check(&inner, PRIMARY_VIEW)?;
        Ok(inner
            .conversations
            .iter()
            .rev()
            .find(|c| c.session_id == session_id)
            .map(|c| ContactInfo {
                conversation_id: c.conversation_id.clone(),
                session_id: c.session_id.clone(),
                location_id: c.location_id.clone(),
                contact_name: c.contact_name.clone(),
                contact_phone: c.contact_phone.clone(),
                channel: c.channel,
            }))
    }
}
