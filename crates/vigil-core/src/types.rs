// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across collaborator traits and the supervision engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Messaging channel a conversation runs on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Instagram,
    Sms,
    Email,
}

/// Author of a transcript entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The contact (lead) on the other side.
    User,
    /// The automated agent.
    Assistant,
    /// A human operator sending through the supervision panel.
    Human,
}

/// Operator-controlled supervision status of a conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SupervisionStatus {
    AiActive,
    AiPaused,
    Scheduled,
    Converted,
    Archived,
    ManualTakeover,
}

impl SupervisionStatus {
    pub const ALL: [SupervisionStatus; 6] = [
        SupervisionStatus::AiActive,
        SupervisionStatus::AiPaused,
        SupervisionStatus::Scheduled,
        SupervisionStatus::Converted,
        SupervisionStatus::Archived,
        SupervisionStatus::ManualTakeover,
    ];

    /// The `ai_enabled` flag every row in this status must carry.
    ///
    /// `scheduled` keeps the agent running until the appointment.
    pub fn ai_enabled(self) -> bool {
        matches!(self, SupervisionStatus::AiActive | SupervisionStatus::Scheduled)
    }

    /// Archived conversations accept no further status transitions.
    pub fn is_terminal(self) -> bool {
        self == SupervisionStatus::Archived
    }

    /// Whether a human is handling the conversation instead of the agent.
    pub fn is_paused(self) -> bool {
        matches!(
            self,
            SupervisionStatus::AiPaused | SupervisionStatus::ManualTakeover
        )
    }

    /// Whether moving from `self` to `next` is an allowed transition.
    ///
    /// Self-transitions are always allowed so every operation is idempotent,
    /// except that nothing leaves `archived`.
    pub fn can_transition_to(self, next: SupervisionStatus) -> bool {
        use SupervisionStatus::*;

        if self == next {
            return true;
        }
        if next == Archived {
            return !self.is_terminal();
        }
        match self {
            AiActive => matches!(next, AiPaused | ManualTakeover | Scheduled | Converted),
            AiPaused | ManualTakeover => matches!(next, AiActive | AiPaused | ManualTakeover),
            Scheduled => matches!(next, Converted | AiActive),
            Converted | Archived => false,
        }
    }
}

/// A contact-level thread, the unit of supervision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Stable identity used for deduplication.
    pub conversation_id: String,
    /// Message-stream correlation key. May differ from `conversation_id`.
    pub session_id: String,
    pub location_id: String,
    pub contact_name: String,
    pub contact_phone: Option<String>,
    pub channel: Channel,
    pub last_message: Option<String>,
    pub last_message_role: Option<MessageRole>,
    /// Sort key for list ordering.
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u32,
    pub status: SupervisionStatus,
    pub ai_enabled: bool,
    pub assignee: Option<String>,
}

impl Conversation {
    /// True when the lead spoke last and is waiting on a reply.
    pub fn awaiting_response(&self) -> bool {
        self.last_message_role == Some(MessageRole::User)
    }
}

/// Mutable supervision row, 1:1 with `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionState {
    pub session_id: String,
    pub location_id: Option<String>,
    pub status: SupervisionStatus,
    pub ai_enabled: bool,
    pub notes: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl SupervisionState {
    /// The row inserted when a session is supervised for the first time.
    pub fn new(
        session_id: impl Into<String>,
        location_id: Option<String>,
        updated_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = SupervisionStatus::AiActive;
        Self {
            session_id: session_id.into(),
            location_id,
            status,
            ai_enabled: status.ai_enabled(),
            notes: None,
            scheduled_at: None,
            converted_at: None,
            updated_by: updated_by.into(),
            updated_at: now,
        }
    }

    /// Whether `ai_enabled` agrees with `status`.
    pub fn is_consistent(&self) -> bool {
        self.ai_enabled == self.status.ai_enabled()
    }
}

/// An immutable transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub channel: Option<Channel>,
    /// Operator id for `human` messages.
    #[serde(default)]
    pub sender: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sort a transcript ascending by `created_at`, breaking ties by id.
///
/// Arrival order is never trusted.
pub fn sort_transcript(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Contact details shown next to a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub conversation_id: String,
    pub session_id: String,
    pub location_id: String,
    pub contact_name: String,
    pub contact_phone: Option<String>,
    pub channel: Channel,
}

/// Relations that emit change events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Conversations,
    Messages,
    SupervisionState,
}

/// Row-level change kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A transient row-level change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn insert(table: Table, row: serde_json::Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            before: None,
            after: Some(row),
        }
    }

    pub fn update(
        table: Table,
        before: Option<serde_json::Value>,
        after: serde_json::Value,
    ) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            before,
            after: Some(after),
        }
    }

    /// The most recent image of the row: `after`, or `before` for deletes.
    pub fn row(&self) -> Option<&serde_json::Value> {
        self.after.as_ref().or(self.before.as_ref())
    }

    /// String value of a column in the most recent row image.
    pub fn column(&self, name: &str) -> Option<String> {
        match self.row()?.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Equality filter on a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub value: String,
}

/// Selects the change events a subscription is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMatcher {
    pub table: Table,
    /// `None` matches every kind.
    pub kind: Option<ChangeKind>,
    pub filter: Option<ColumnFilter>,
}

impl EventMatcher {
    /// Every change on `table`.
    pub fn table(table: Table) -> Self {
        Self {
            table,
            kind: None,
            filter: None,
        }
    }

    pub fn kind(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn filter_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some(ColumnFilter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != event.kind) {
            return false;
        }
        match &self.filter {
            Some(filter) => event.column(&filter.column).as_deref() == Some(filter.value.as_str()),
            None => true,
        }
    }
}

/// Health status reported by collaborator health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Collaborator is fully operational.
    Healthy,
    /// Collaborator is operational but experiencing issues.
    Degraded(String),
    /// Collaborator is not operational.
    Unhealthy(String),
}

/// Identifies which external collaborator an adapter stands in for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Store,
    ChangeStream,
    Dispatcher,
}
