// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation list reads and conversation row writes.

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};
use vigil_core::{ContactInfo, Conversation, ConversationQuery, StatusFilter, VigilError};

use crate::database::{Database, map_tr_err};
use crate::models::{
    ConversationRecord, parse_enum, parse_opt_time, to_db_time,
};

const OVERVIEW_COLUMNS: &str = "conversation_id, session_id, location_id, contact_name, \
     contact_phone, channel, assignee, last_message, last_message_role, last_message_at, \
     message_count, status, ai_enabled";

/// Build the SELECT for one page of `relation`.
///
/// `relation` must already be a validated identifier; it is interpolated.
fn build_query(relation: &str, query: &ConversationQuery) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let filters = &query.filters;

    let mut bind = |clause: &str, value: Value, clauses: &mut Vec<String>| {
        values.push(value);
        clauses.push(clause.replace('?', &format!("?{}", values.len())));
    };

    if let StatusFilter::Only(status) = filters.status {
        bind("status = ?", Value::Text(status.to_string()), &mut clauses);
    }
    if let Some(location) = &filters.location_id {
        bind("location_id = ?", Value::Text(location.clone()), &mut clauses);
    }
    if let Some(channel) = filters.channel {
        bind("channel = ?", Value::Text(channel.to_string()), &mut clauses);
    }
    if let Some(assignee) = &filters.assignee {
        bind("assignee = ?", Value::Text(assignee.clone()), &mut clauses);
    }
    if filters.no_response {
        clauses.push("last_message_role = 'user'".to_string());
    }
    if let Some(from) = filters.date_range.from {
        bind("last_message_at >= ?", Value::Text(to_db_time(from)), &mut clauses);
    }
    if let Some(to) = filters.date_range.to {
        bind("last_message_at <= ?", Value::Text(to_db_time(to)), &mut clauses);
    }
    // `term` is already Unicode-lowercased; `vigil_lower` folds the columns
    // the same way so accented names match.
    if let Some(term) = filters.search_term() {
        let pattern = format!("%{}%", escape_like(&term));
        bind(
            "(vigil_lower(contact_name) LIKE ? ESCAPE '\\' \
             OR vigil_lower(COALESCE(contact_phone, '')) LIKE ? ESCAPE '\\' \
             OR vigil_lower(COALESCE(last_message, '')) LIKE ? ESCAPE '\\')",
            Value::Text(pattern),
            &mut clauses,
        );
    }

    let mut sql = format!("SELECT {OVERVIEW_COLUMNS} FROM {relation}");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    values.push(Value::Integer(i64::try_from(query.limit).unwrap_or(i64::MAX)));
    sql.push_str(&format!(
        " ORDER BY last_message_at IS NULL, last_message_at DESC LIMIT ?{}",
        values.len()
    ));
    (sql, values)
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> Result<Conversation, rusqlite::Error> {
    let channel: String = row.get(5)?;
    let role: Option<String> = row.get(8)?;
    let status: String = row.get(11)?;
    let message_count: i64 = row.get(10)?;
    Ok(Conversation {
        conversation_id: row.get(0)?,
        session_id: row.get(1)?,
        location_id: row.get(2)?,
        contact_name: row.get(3)?,
        contact_phone: row.get(4)?,
        channel: parse_enum(5, &channel)?,
        assignee: row.get(6)?,
        last_message: row.get(7)?,
        last_message_role: role.map(|r| parse_enum(8, &r)).transpose()?,
        last_message_at: parse_opt_time(9, row.get(9)?)?,
        message_count: u32::try_from(message_count).unwrap_or(u32::MAX),
        status: parse_enum(11, &status)?,
        ai_enabled: row.get(12)?,
    })
}

/// Read one page of conversation rows from `relation`, duplicates included.
pub async fn query_conversations(
    db: &Database,
    relation: &str,
    query: &ConversationQuery,
) -> Result<Vec<Conversation>, VigilError> {
    let (sql, values) = build_query(relation, query);
    db.connection()
        .call(move |conn| -> Result<Vec<Conversation>, rusqlite::Error> {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), conversation_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Insert a raw `conversations` row. Does not check for an existing one.
pub async fn insert_conversation(db: &Database, record: &ConversationRecord) -> Result<(), VigilError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            insert_conversation_sync(conn, &record)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub(crate) fn insert_conversation_sync(
    conn: &rusqlite::Connection,
    record: &ConversationRecord,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "INSERT INTO conversations (conversation_id, session_id, location_id, contact_id, \
         contact_name, contact_phone, channel, assignee, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.conversation_id,
            record.session_id,
            record.location_id,
            record.contact_id,
            record.contact_name,
            record.contact_phone,
            record.channel.to_string(),
            record.assignee,
            to_db_time(record.created_at),
        ],
    )
}

pub(crate) fn conversation_exists_sync(
    conn: &rusqlite::Connection,
    session_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE session_id = ?1)",
        params![session_id],
        |row| row.get(0),
    )
}

/// Contact details from the most recent conversation row for a session.
pub async fn contact_info(db: &Database, session_id: &str) -> Result<Option<ContactInfo>, VigilError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ContactInfo>, rusqlite::Error> {
            conn.query_row(
                "SELECT conversation_id, session_id, location_id, contact_name, contact_phone, channel
                 FROM conversations WHERE session_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![session_id],
                |row| {
                    let channel: String = row.get(5)?;
                    Ok(ContactInfo {
                        conversation_id: row.get(0)?,
                        session_id: row.get(1)?,
                        location_id: row.get(2)?,
                        contact_name: row.get(3)?,
                        contact_phone: row.get(4)?,
                        channel: parse_enum(5, &channel)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Whether a table or view named `name` exists.
pub async fn relation_exists(db: &Database, name: &str) -> Result<bool, VigilError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1)",
                params![name],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}
