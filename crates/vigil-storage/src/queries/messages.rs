// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transcript operations.

use rusqlite::params;
use vigil_core::{Message, VigilError};

use crate::database::{Database, map_tr_err};
use crate::models::{ConversationRecord, InboundMessage, parse_enum, parse_time, to_db_time};
use crate::queries::conversations::{conversation_exists_sync, insert_conversation_sync};

pub(crate) fn insert_sync(conn: &rusqlite::Connection, msg: &Message) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO messages (id, session_id, role, content, channel, sender, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            msg.id,
            msg.session_id,
            msg.role.to_string(),
            msg.content,
            msg.channel.map(|c| c.to_string()),
            msg.sender,
            to_db_time(msg.created_at),
        ],
    )?;
    Ok(())
}

/// Append a message to its session transcript.
pub async fn insert_message(db: &Database, msg: &Message) -> Result<(), VigilError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> { insert_sync(conn, &msg) })
        .await
        .map_err(map_tr_err)
}

/// Store an inbound contact or agent message, creating the conversation on
/// the first message of a session.
///
/// Returns the stored message and, when one was created, the new
/// conversation row.
pub async fn ingest_message(
    db: &Database,
    inbound: &InboundMessage,
) -> Result<(Message, Option<ConversationRecord>), VigilError> {
    let inbound = inbound.clone();
    db.connection()
        .call(move |conn| -> Result<(Message, Option<ConversationRecord>), rusqlite::Error> {
            let tx = conn.transaction()?;
            let created = if conversation_exists_sync(&tx, &inbound.session_id)? {
                None
            } else {
                let record = ConversationRecord {
                    conversation_id: inbound
                        .conversation_id
                        .clone()
                        .unwrap_or_else(|| inbound.session_id.clone()),
                    session_id: inbound.session_id.clone(),
                    location_id: inbound.location_id.clone(),
                    contact_id: inbound.contact_id.clone(),
                    contact_name: inbound.contact_name.clone(),
                    contact_phone: inbound.contact_phone.clone(),
                    channel: inbound.channel,
                    assignee: None,
                    created_at: inbound.created_at,
                };
                insert_conversation_sync(&tx, &record)?;
                Some(record)
            };
            let message = Message {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: inbound.session_id,
                role: inbound.role,
                content: inbound.content,
                channel: Some(inbound.channel),
                sender: None,
                created_at: inbound.created_at,
            };
            insert_sync(&tx, &message)?;
            tx.commit()?;
            Ok((message, created))
        })
        .await
        .map_err(map_tr_err)
}

/// Messages for a session, oldest first.
pub async fn get_messages_for_session(
    db: &Database,
    session_id: &str,
) -> Result<Vec<Message>, VigilError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, channel, sender, created_at
                 FROM messages WHERE session_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                let role: String = row.get(2)?;
                let channel: Option<String> = row.get(4)?;
                let created_at: String = row.get(6)?;
                Ok(Message {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: parse_enum(2, &role)?,
                    content: row.get(3)?,
                    channel: channel.map(|c| parse_enum(4, &c)).transpose()?,
                    sender: row.get(5)?,
                    created_at: parse_time(6, &created_at)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
