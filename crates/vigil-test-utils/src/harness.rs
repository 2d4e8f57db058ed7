// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end supervision scenarios.
//!
//! `TestHarness` assembles a [`SupervisionPanel`] over a [`MockStore`] and a
//! [`MockDispatcher`], with an in-process [`ChangeFeed`] that the store
//! publishes to. Tests drive the panel and simulate inbound traffic through
//! the harness.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use vigil_bus::ChangeFeed;
use vigil_core::{
    Channel, ChangeStream, Conversation, Message, MessageDispatcher, MessageRole,
    SupervisionStatus, SupervisionStore, VigilError,
};
use vigil_supervisor::bridge::Backoff;
use vigil_supervisor::{PanelDeps, PanelSettings, SupervisionPanel};

use crate::mock_dispatcher::MockDispatcher;
use crate::mock_store::{LEGACY_VIEW, MockStore, PRIMARY_VIEW};

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    settings: PanelSettings,
    conversations: Vec<Conversation>,
    native_upsert: bool,
    feed_capacity: usize,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            settings: PanelSettings {
                operator_id: "operator-1".into(),
                conversation_view: PRIMARY_VIEW.into(),
                legacy_view: LEGACY_VIEW.into(),
                page_size: 50,
                list_debounce: Duration::from_millis(500),
                search_debounce: Duration::from_millis(300),
                poll_interval: Duration::from_secs(60),
                backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(80)),
                dispatch_timeout: Duration::from_secs(5),
            },
            conversations: Vec::new(),
            native_upsert: true,
            feed_capacity: 256,
        }
    }

    /// Override the panel settings wholesale.
    pub fn with_settings(mut self, settings: PanelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_operator(mut self, operator_id: impl Into<String>) -> Self {
        self.settings.operator_id = operator_id.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.settings.page_size = page_size;
        self
    }

    /// Seed conversations before the panel starts.
    pub fn with_conversations(mut self, conversations: Vec<Conversation>) -> Self {
        self.conversations = conversations;
        self
    }

    /// Make the store use the read-then-write path for supervision rows.
    pub fn without_native_upsert(mut self) -> Self {
        self.native_upsert = false;
        self
    }

    /// Per-subscriber buffer of the change feed. Small values make the feed
    /// drop subscribers that fall behind.
    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity;
        self
    }

    /// Build the harness and start the panel.
    pub async fn build(self) -> Result<TestHarness, VigilError> {
        let feed = ChangeFeed::new(self.feed_capacity);
        let mut store = MockStore::new().with_change_feed(feed.clone());
        if !self.native_upsert {
            store = store.without_native_upsert();
        }
        let store = Arc::new(store);
        for conversation in self.conversations {
            store.push_conversation(conversation);
        }
        let dispatcher = Arc::new(MockDispatcher::new());

        let store_dyn: Arc<dyn SupervisionStore> = store.clone();
        let stream: Arc<dyn ChangeStream> = Arc::new(feed.clone());
        let dispatcher_dyn: Arc<dyn MessageDispatcher> = dispatcher.clone();
        let panel = SupervisionPanel::start(
            self.settings.clone(),
            PanelDeps {
                store: store_dyn,
                stream,
                dispatcher: dispatcher_dyn,
            },
        )
        .await?;

        Ok(TestHarness {
            store,
            dispatcher,
            feed,
            panel,
            settings: self.settings,
        })
    }
}

/// A complete supervision environment with mock collaborators.
pub struct TestHarness {
    /// In-memory store; publishes every write to `feed`.
    pub store: Arc<MockStore>,
    /// Captures operator messages instead of delivering them.
    pub dispatcher: Arc<MockDispatcher>,
    /// The change stream the panel subscribes to.
    pub feed: ChangeFeed,
    pub panel: SupervisionPanel,
    pub settings: PanelSettings,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Simulate the contact writing into `session_id`.
    pub fn inbound(&self, session_id: &str, content: &str) -> Message {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role: MessageRole::User,
            content: content.to_string(),
            channel: Some(Channel::Whatsapp),
            sender: None,
            created_at: Utc::now(),
        };
        self.store.push_message(message.clone());
        message
    }

    /// Simulate a change-stream outage: every open subscription ends.
    pub fn disconnect_stream(&self) {
        self.feed.disconnect_all();
    }

    pub async fn close(&self) {
        self.panel.close().await;
    }
}

/// A conversation row on WhatsApp with the contact speaking last at
/// `minute` past 10:00 on 2026-03-01.
pub fn conversation(id: &str, session_id: &str, minute: u32) -> Conversation {
    Conversation {
        conversation_id: id.to_string(),
        session_id: session_id.to_string(),
        location_id: "loc-1".to_string(),
        contact_name: format!("Contact {id}"),
        contact_phone: Some(format!("+55119{minute:08}")),
        channel: Channel::Whatsapp,
        last_message: Some(format!("hello from {id}")),
        last_message_role: Some(MessageRole::User),
        last_message_at: Some(at_minute(minute)),
        message_count: 1,
        status: SupervisionStatus::AiActive,
        ai_enabled: true,
        assignee: None,
    }
}

/// A transcript entry at `minute` past 10:00 on 2026-03-01.
pub fn message(id: &str, session_id: &str, role: MessageRole, minute: u32) -> Message {
    Message {
        id: id.to_string(),
        session_id: session_id.to_string(),
        role,
        content: format!("message {id}"),
        channel: Some(Channel::Whatsapp),
        sender: None,
        created_at: at_minute(minute),
    }
}

fn at_minute(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
        + chrono::Duration::minutes(i64::from(minute))
}
