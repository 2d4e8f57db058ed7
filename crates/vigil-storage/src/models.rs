// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage-side records and the column conversions shared by the query modules.
//!
//! Timestamps are stored as fixed-width UTC text (`2026-01-01T00:00:00.000Z`)
//! so that lexical order matches chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use vigil_core::{Channel, MessageRole};

pub use vigil_core::types::{ContactInfo, Conversation, Message, SupervisionState};

/// A raw row of the `conversations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub session_id: String,
    pub location_id: String,
    pub contact_id: Option<String>,
    pub contact_name: String,
    pub contact_phone: Option<String>,
    pub channel: Channel,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A message arriving from the contact or the agent, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_id: String,
    /// Defaults to `session_id` when the conversation is created.
    pub conversation_id: Option<String>,
    pub location_id: String,
    pub contact_id: Option<String>,
    pub contact_name: String,
    pub contact_phone: Option<String>,
    pub channel: Channel,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Format a timestamp for storage.
pub fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_time(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_time(
    idx: usize,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    raw.map(|s| parse_time(idx, &s)).transpose()
}

/// Parse a snake_case enum column.
pub(crate) fn parse_enum<T>(idx: usize, raw: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
