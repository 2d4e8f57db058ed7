// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`SupervisionStore`] trait.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use vigil_bus::ChangeFeed;
use vigil_config::model::StorageConfig;
use vigil_config::validation::is_sql_identifier;
use vigil_core::{
    AdapterType, Collaborator, ContactInfo, Conversation, ConversationQuery, HealthStatus, Message,
    SupervisionState, SupervisionStore, Table, VigilError,
};

use crate::database::{Database, map_tr_err};
use crate::models::{ConversationRecord, InboundMessage};
use crate::queries;
use crate::writer::ChangePublisher;

/// SQLite-backed supervision store.
///
/// The database is opened lazily by [`initialize`](Self::initialize). Every
/// call is bounded by `storage.query_timeout_secs`, and every committed write
/// is published to the attached [`ChangeFeed`].
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
    publisher: ChangePublisher,
    timeout: Duration,
}

impl SqliteStore {
    /// Create a store for `config`. Nothing is opened until [`initialize`](Self::initialize).
    pub fn new(config: StorageConfig) -> Self {
        let timeout = config.query_timeout();
        Self {
            config,
            db: OnceCell::new(),
            publisher: ChangePublisher::default(),
            timeout,
        }
    }

    /// Wrap an already opened database.
    pub fn with_database(config: StorageConfig, db: Database) -> Self {
        let store = Self::new(config);
        // A fresh OnceCell cannot already be set.
        let _ = store.db.set(db);
        store
    }

    /// Publish an event for every committed write to `feed`.
    pub fn with_change_feed(mut self, feed: ChangeFeed) -> Self {
        self.publisher = ChangePublisher::new(Some(feed));
        self
    }

    pub fn change_feed(&self) -> Option<&ChangeFeed> {
        self.publisher.feed()
    }

    /// Open the database and run migrations.
    pub async fn initialize(&self) -> Result<(), VigilError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| VigilError::Internal("storage already initialized".into()))?;
        debug!(path = %self.config.database_path, "SQLite store initialized");
        Ok(())
    }

    fn db(&self) -> Result<&Database, VigilError> {
        self.db
            .get()
            .ok_or_else(|| VigilError::NotConfigured("storage not initialized".into()))
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, VigilError>>,
    ) -> Result<T, VigilError> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| VigilError::Timeout {
                duration: self.timeout,
            })?
    }

    /// Store a message from the contact or the agent, creating the
    /// conversation the first time a session is seen.
    pub async fn record_inbound(&self, inbound: &InboundMessage) -> Result<Message, VigilError> {
        let (message, created) = self
            .bounded(queries::messages::ingest_message(self.db()?, inbound))
            .await?;
        if let Some(record) = &created {
            self.publisher.inserted(Table::Conversations, record);
        }
        self.publisher.inserted(Table::Messages, &message);
        Ok(message)
    }

    /// Insert a raw conversation row, duplicates allowed.
    pub async fn insert_conversation(&self, record: &ConversationRecord) -> Result<(), VigilError> {
        self.bounded(queries::conversations::insert_conversation(self.db()?, record))
            .await?;
        self.publisher.inserted(Table::Conversations, record);
        Ok(())
    }

    /// Whether a table or view exists.
    pub async fn relation_exists(&self, name: &str) -> Result<bool, VigilError> {
        self.bounded(queries::conversations::relation_exists(self.db()?, name))
            .await
    }
}

#[async_trait]
impl Collaborator for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, VigilError> {
        let db = self.db()?;
        self.bounded(async {
            db.connection()
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.execute_batch("SELECT 1;")?;
                    Ok(())
                })
                .await
                .map_err(map_tr_err)
        })
        .await?;

        for relation in [&self.config.conversation_view, &self.config.legacy_view] {
            if !self.relation_exists(relation).await? {
                return Ok(HealthStatus::Degraded(format!(
                    "relation `{relation}` does not exist"
                )));
            }
        }
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), VigilError> {
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    Ok(())
                })
                .await
                .map_err(map_tr_err)?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl SupervisionStore for SqliteStore {
    async fn query_conversations(
        &self,
        relation: &str,
        query: &ConversationQuery,
    ) -> Result<Vec<Conversation>, VigilError> {
        if !is_sql_identifier(relation) {
            return Err(VigilError::Validation(format!(
                "`{relation}` is not a valid relation name"
            )));
        }
        self.bounded(queries::conversations::query_conversations(
            self.db()?,
            relation,
            query,
        ))
        .await
    }

    async fn get_supervision_state(
        &self,
        session_id: &str,
    ) -> Result<Option<SupervisionState>, VigilError> {
        self.bounded(queries::supervision::get_state(self.db()?, session_id))
            .await
    }

    async fn insert_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError> {
        self.bounded(queries::supervision::insert_state(self.db()?, state))
            .await?;
        self.publisher.inserted(Table::SupervisionState, state);
        Ok(())
    }

    async fn update_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError> {
        let changed = self
            .bounded(queries::supervision::update_state(self.db()?, state))
            .await?;
        if changed {
            self.publisher
                .updated::<SupervisionState>(Table::SupervisionState, None, state);
        } else {
            debug!(session_id = %state.session_id, "update matched no supervision row");
        }
        Ok(())
    }

    fn supports_native_upsert(&self) -> bool {
        true
    }

    async fn upsert_supervision_state(&self, state: &SupervisionState) -> Result<(), VigilError> {
        let before = self
            .bounded(queries::supervision::upsert_state(self.db()?, state))
            .await?;
        match &before {
            None => self.publisher.inserted(Table::SupervisionState, state),
            Some(previous) => {
                self.publisher
                    .updated(Table::SupervisionState, Some(previous), state)
            }
        }
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, VigilError> {
        self.bounded(queries::messages::get_messages_for_session(
            self.db()?,
            session_id,
        ))
        .await
    }

    async fn append_message(&self, message: &Message) -> Result<(), VigilError> {
        self.bounded(queries::messages::insert_message(self.db()?, message))
            .await?;
        self.publisher.inserted(Table::Messages, message);
        Ok(())
    }

    async fn contact_info(&self, session_id: &str) -> Result<Option<ContactInfo>, VigilError> {
        self.bounded(queries::conversations::contact_info(self.db()?, session_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;
    use vigil_core::{
        ChangeKind, ChangeStream, Channel, EventMatcher, MessageRole, SupervisionStatus,
    };

    use super::*;

    fn test_config(path: &std::path::Path) -> StorageConfig {
        StorageConfig {
            database_path: path.join("vigil.db").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        }
    }

    fn inbound(session_id: &str, content: &str) -> InboundMessage {
        InboundMessage {
            session_id: session_id.to_string(),
            conversation_id: None,
            location_id: "loc-1".to_string(),
            contact_id: None,
            contact_name: "Dora".to_string(),
            contact_phone: Some("+5511900001111".to_string()),
            channel: Channel::Whatsapp,
            role: MessageRole::User,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn uninitialized_store_is_not_configured() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(test_config(dir.path()));
        let err = store.list_messages("s1").await.unwrap_err();
        assert!(matches!(err, VigilError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn initialize_twice_fails() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(test_config(dir.path()));
        store.initialize().await.unwrap();
        assert!(store.initialize().await.is_err());
        assert_eq!(store.health_check().await.unwrap(), HealthStatus::Healthy);
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_non_identifier_relation() {
        let store = SqliteStore::with_database(
            StorageConfig::default(),
            Database::open_in_memory().await.unwrap(),
        );
        let query = ConversationQuery {
            filters: Default::default(),
            limit: 10,
        };
        let err = store
            .query_conversations("overview; DROP TABLE messages", &query)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));
    }

    #[tokio::test]
    async fn inbound_messages_flow_into_overview() {
        let store = SqliteStore::with_database(
            StorageConfig::default(),
            Database::open_in_memory().await.unwrap(),
        );
        store.record_inbound(&inbound("s1", "oi")).await.unwrap();
        store
            .record_inbound(&inbound("s1", "tem horario amanha?"))
            .await
            .unwrap();

        let rows = store
            .query_conversations(
                "conversation_overview",
                &ConversationQuery {
                    filters: Default::default(),
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message_count, 2);
        assert_eq!(rows[0].last_message_role, Some(MessageRole::User));
        assert!(rows[0].awaiting_response());

        let contact = store.contact_info("s1").await.unwrap().unwrap();
        assert_eq!(contact.contact_name, "Dora");
    }

    #[tokio::test]
    async fn writes_publish_change_events() {
        let feed = ChangeFeed::new(32);
        let store = SqliteStore::with_database(
            StorageConfig::default(),
            Database::open_in_memory().await.unwrap(),
        )
        .with_change_feed(feed.clone());
        let mut sub = feed
            .subscribe(&EventMatcher::table(Table::SupervisionState).filter_eq("session_id", "s1"))
            .await
            .unwrap();

        let mut state = SupervisionState::new("s1", None, "ana", Utc::now());
        store.upsert_supervision_state(&state).await.unwrap();
        state.status = SupervisionStatus::AiPaused;
        state.ai_enabled = false;
        store.upsert_supervision_state(&state).await.unwrap();

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(second.kind, ChangeKind::Update);
        assert_eq!(second.column("status").as_deref(), Some("ai_paused"));
    }

    #[tokio::test]
    async fn health_is_degraded_without_views() {
        let db = Database::open_in_memory().await.unwrap();
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("DROP VIEW conversation_overview_legacy;")
            })
            .await
            .unwrap();
        let store = SqliteStore::with_database(StorageConfig::default(), db);
        assert!(matches!(
            store.health_check().await.unwrap(),
            HealthStatus::Degraded(_)
        ));
    }
}
