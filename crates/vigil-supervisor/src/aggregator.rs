// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation list assembly.
//!
//! Reads one page from the primary conversation view, falling back to the
//! legacy view when the primary is not provisioned, and to a labelled
//! placeholder page when neither can be read. Rows are filtered again in
//! memory, collapsed to one per `conversation_id`, and ordered by
//! `last_message_at` descending on every call.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vigil_core::types::sort_transcript;
use vigil_core::{
    Channel, ContactInfo, Conversation, ConversationFilters, ConversationQuery, ErrorKind, Message,
    MessageRole, SupervisionStatus, SupervisionStore, VigilError,
};

/// Where a page of conversations came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DataSource {
    Primary,
    Legacy,
    /// Neither view could be read; the rows are labelled samples, not data.
    Placeholder {
        reason: ErrorKind,
        detail: String,
    },
}

impl DataSource {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, DataSource::Placeholder { .. })
    }
}

/// Per-status counts over the returned page only.
///
/// These are windowed figures: conversations beyond the page are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total: usize,
    pub ai_active: usize,
    pub ai_paused: usize,
    pub scheduled: usize,
    pub converted: usize,
    pub archived: usize,
    pub manual_takeover: usize,
    /// Conversations where the lead spoke last.
    pub awaiting_response: usize,
}

impl ConversationStats {
    pub fn from_page(conversations: &[Conversation]) -> Self {
        let mut stats = Self::default();
        for c in conversations {
            stats.total += 1;
            *stats.slot(c.status) += 1;
            if c.awaiting_response() {
                stats.awaiting_response += 1;
            }
        }
        stats
    }

    pub fn count(&self, status: SupervisionStatus) -> usize {
        match status {
            SupervisionStatus::AiActive => self.ai_active,
            SupervisionStatus::AiPaused => self.ai_paused,
            SupervisionStatus::Scheduled => self.scheduled,
            SupervisionStatus::Converted => self.converted,
            SupervisionStatus::Archived => self.archived,
            SupervisionStatus::ManualTakeover => self.manual_takeover,
        }
    }

    fn slot(&mut self, status: SupervisionStatus) -> &mut usize {
        match status {
            SupervisionStatus::AiActive => &mut self.ai_active,
            SupervisionStatus::AiPaused => &mut self.ai_paused,
            SupervisionStatus::Scheduled => &mut self.scheduled,
            SupervisionStatus::Converted => &mut self.converted,
            SupervisionStatus::Archived => &mut self.archived,
            SupervisionStatus::ManualTakeover => &mut self.manual_takeover,
        }
    }
}

/// One materialized list page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPage {
    pub conversations: Vec<Conversation>,
    pub stats: ConversationStats,
    pub source: DataSource,
}

/// A session transcript plus the contact it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Ascending by `created_at`.
    pub messages: Vec<Message>,
    pub contact: Option<ContactInfo>,
}

/// Builds list pages and transcripts from a [`SupervisionStore`].
pub struct ConversationAggregator {
    store: Arc<dyn SupervisionStore>,
    primary_view: String,
    legacy_view: String,
    page_size: usize,
}

impl ConversationAggregator {
    pub fn new(
        store: Arc<dyn SupervisionStore>,
        primary_view: impl Into<String>,
        legacy_view: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            primary_view: primary_view.into(),
            legacy_view: legacy_view.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch the current page under `filters`.
    ///
    /// Transport and storage failures are returned to the caller; a missing
    /// view or an unconfigured store degrades instead.
    pub async fn list(
        &self,
        filters: &ConversationFilters,
    ) -> Result<ConversationPage, VigilError> {
        let query = ConversationQuery {
            filters: filters.clone(),
            limit: self.page_size,
        };

        let (rows, source) = match self
            .store
            .query_conversations(&self.primary_view, &query)
            .await
        {
            Ok(rows) => (rows, DataSource::Primary),
            Err(VigilError::RelationMissing { relation }) => {
                warn!(
                    relation = %relation,
                    fallback = %self.legacy_view,
                    error_kind = %ErrorKind::RelationMissing,
                    "conversation view missing, using legacy view"
                );
                match self
                    .store
                    .query_conversations(&self.legacy_view, &query)
                    .await
                {
                    Ok(rows) => (rows, DataSource::Legacy),
                    Err(e) => {
                        warn!(
                            relation = %self.legacy_view,
                            error = %e,
                            error_kind = %e.kind(),
                            "legacy view unavailable, serving placeholder page"
                        );
                        return Ok(placeholder_page(e.kind(), e.to_string()));
                    }
                }
            }
            Err(e @ VigilError::NotConfigured(_)) => {
                warn!(error = %e, error_kind = %e.kind(), "store not configured, serving placeholder page");
                return Ok(placeholder_page(e.kind(), e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let fetched = rows.len();
        let conversations = materialize(rows, filters, self.page_size);
        debug!(
            fetched,
            kept = conversations.len(),
            source = ?source,
            "conversation page assembled"
        );
        Ok(ConversationPage {
            stats: ConversationStats::from_page(&conversations),
            conversations,
            source,
        })
    }

    /// Messages for a session in `created_at` order, with contact details.
    pub async fn transcript(&self, session_id: &str) -> Result<Transcript, VigilError> {
        let mut messages = self.store.list_messages(session_id).await?;
        sort_transcript(&mut messages);
        let contact = match self.store.contact_info(session_id).await {
            Ok(contact) => contact,
            Err(e) if e.kind() == ErrorKind::RelationMissing => None,
            Err(e) => return Err(e),
        };
        Ok(Transcript { messages, contact })
    }
}

/// Filter, collapse duplicates, and order a fetched page.
///
/// For duplicated `conversation_id`s the last occurrence in fetch order wins.
pub fn materialize(
    rows: Vec<Conversation>,
    filters: &ConversationFilters,
    limit: usize,
) -> Vec<Conversation> {
    let mut seen = HashSet::new();
    let mut kept: Vec<Conversation> = rows
        .into_iter()
        .rev()
        .filter(|c| seen.insert(c.conversation_id.clone()))
        .filter(|c| filters.matches(c))
        .collect();
    kept.reverse();

    // Stable: ties keep fetch order. Rows without activity sink to the end.
    kept.sort_by(|a, b| match (a.last_message_at, b.last_message_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    kept.truncate(limit);
    kept
}

fn placeholder_page(reason: ErrorKind, detail: String) -> ConversationPage {
    let sample = |n: u32, status: SupervisionStatus| Conversation {
        conversation_id: format!("placeholder-{n}"),
        session_id: format!("placeholder-{n}"),
        location_id: "placeholder".to_string(),
        contact_name: format!("[placeholder] sample conversation {n}"),
        contact_phone: None,
        channel: Channel::Whatsapp,
        last_message: Some("[placeholder] data source unavailable".to_string()),
        last_message_role: Some(MessageRole::Assistant),
        last_message_at: None,
        message_count: 0,
        status,
        ai_enabled: status.ai_enabled(),
        assignee: None,
    };
    let conversations = vec![
        sample(1, SupervisionStatus::AiActive),
        sample(2, SupervisionStatus::AiPaused),
    ];
    ConversationPage {
        stats: ConversationStats::from_page(&conversations),
        conversations,
        source: DataSource::Placeholder { reason, detail },
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use vigil_core::StatusFilter;
    use vigil_test_utils::MockStore;

    use super::*;

    fn row(id: &str, minute: u32, status: SupervisionStatus) -> Conversation {
        Conversation {
            conversation_id: id.to_string(),
            session_id: format!("s-{id}"),
            location_id: "loc-1".to_string(),
            contact_name: format!("Contact {id}"),
            contact_phone: None,
            channel: Channel::Whatsapp,
            last_message: Some(format!("msg {id}")),
            last_message_role: Some(MessageRole::User),
            last_message_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap()),
            message_count: 1,
            status,
            ai_enabled: status.ai_enabled(),
            assignee: None,
        }
    }

    fn aggregator(store: &Arc<MockStore>) -> ConversationAggregator {
        let store: Arc<dyn SupervisionStore> = store.clone();
        ConversationAggregator::new(
            store,
            "conversation_overview",
            "conversation_overview_legacy",
            50,
        )
    }

    #[test]
    fn last_duplicate_wins() {
        let mut stale = row("A", 1, SupervisionStatus::AiActive);
        stale.contact_name = "stale".into();
        let fresh = row("A", 2, SupervisionStatus::AiPaused);
        let rows = vec![stale, row("B", 3, SupervisionStatus::AiActive), fresh];

        let out = materialize(rows, &ConversationFilters::default(), 50);
        assert_eq!(out.len(), 2);
        let a = out.iter().find(|c| c.conversation_id == "A").unwrap();
        assert_eq!(a.status, SupervisionStatus::AiPaused);
        assert_ne!(a.contact_name, "stale");
    }

    #[test]
    fn ordering_is_recomputed_newest_first() {
        let mut quiet = row("Q", 0, SupervisionStatus::AiActive);
        quiet.last_message_at = None;
        let rows = vec![
            quiet,
            row("A", 5, SupervisionStatus::AiActive),
            row("B", 9, SupervisionStatus::AiActive),
        ];
        let ids: Vec<_> = materialize(rows, &ConversationFilters::default(), 50)
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(ids, ["B", "A", "Q"]);
    }

    #[test]
    fn stats_are_counted_over_the_page() {
        let page = vec![
            row("A", 1, SupervisionStatus::AiActive),
            row("B", 2, SupervisionStatus::AiPaused),
            row("C", 3, SupervisionStatus::AiPaused),
        ];
        let stats = ConversationStats::from_page(&page);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count(SupervisionStatus::AiPaused), 2);
        assert_eq!(stats.awaiting_response, 3);
        assert_eq!(stats.count(SupervisionStatus::Archived), 0);
    }

    #[tokio::test]
    async fn filters_are_reapplied_in_memory() {
        let store = Arc::new(MockStore::new());
        store.push_conversation(row("A", 1, SupervisionStatus::AiActive));
        store.push_conversation(row("B", 2, SupervisionStatus::Archived));

        let filters = ConversationFilters {
            status: StatusFilter::Only(SupervisionStatus::Archived),
            ..Default::default()
        };
        let page = aggregator(&store).list(&filters).await.unwrap();
        assert_eq!(page.conversations.len(), 1);
        assert_eq!(page.conversations[0].conversation_id, "B");
        assert_eq!(page.source, DataSource::Primary);
    }

    #[tokio::test]
    async fn missing_primary_view_falls_back_to_legacy() {
        let store = Arc::new(MockStore::new());
        store.push_conversation(row("A", 1, SupervisionStatus::AiActive));
        store.drop_relation("conversation_overview");

        let page = aggregator(&store)
            .list(&ConversationFilters::default())
            .await
            .unwrap();
        assert_eq!(page.source, DataSource::Legacy);
        assert_eq!(page.conversations.len(), 1);
    }

    #[tokio::test]
    async fn both_views_missing_yields_labelled_placeholder() {
        let store = Arc::new(MockStore::new());
        store.drop_relation("conversation_overview");
        store.drop_relation("conversation_overview_legacy");

        let page = aggregator(&store)
            .list(&ConversationFilters::default())
            .await
            .unwrap();
        assert!(page.source.is_placeholder());
        assert!(!page.conversations.is_empty());
        assert!(
            page.conversations
                .iter()
                .all(|c| c.contact_name.starts_with("[placeholder]"))
        );
    }

    #[tokio::test]
    async fn transport_errors_are_surfaced() {
        let store = Arc::new(MockStore::new());
        store.fail_queries_with(|| VigilError::transport("connection reset"));

        let err = aggregator(&store)
            .list(&ConversationFilters::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn transcript_is_sorted_by_created_at() {
        let store = Arc::new(MockStore::new());
        for (id, minute) in [("m3", 3), ("m1", 1), ("m2", 2)] {
            store.push_message(Message {
                id: id.to_string(),
                session_id: "s1".to_string(),
                role: MessageRole::User,
                content: id.to_string(),
                channel: Some(Channel::Whatsapp),
                sender: None,
                created_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap(),
            });
        }
        let transcript = aggregator(&store).transcript("s1").await.unwrap();
        let ids: Vec<_> = transcript.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
    }
}
