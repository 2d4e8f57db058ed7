// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supervision state reads and writes, keyed by `session_id`.

use rusqlite::{OptionalExtension, params};
use vigil_core::{SupervisionState, VigilError};

use crate::database::{Database, map_tr_err};
use crate::models::{parse_enum, parse_opt_time, parse_time, to_db_time};

const COLUMNS: &str = "session_id, location_id, status, ai_enabled, notes, scheduled_at, \
     converted_at, updated_by, updated_at";

fn state_from_row(row: &rusqlite::Row<'_>) -> Result<SupervisionState, rusqlite::Error> {
    let status: String = row.get(2)?;
    let updated_at: String = row.get(8)?;
    Ok(SupervisionState {
        session_id: row.get(0)?,
        location_id: row.get(1)?,
        status: parse_enum(2, &status)?,
        ai_enabled: row.get(3)?,
        notes: row.get(4)?,
        scheduled_at: parse_opt_time(5, row.get(5)?)?,
        converted_at: parse_opt_time(6, row.get(6)?)?,
        updated_by: row.get(7)?,
        updated_at: parse_time(8, &updated_at)?,
    })
}

pub(crate) fn get_sync(
    conn: &rusqlite::Connection,
    session_id: &str,
) -> Result<Option<SupervisionState>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM supervision_state WHERE session_id = ?1"),
        params![session_id],
        state_from_row,
    )
    .optional()
}

/// Fetch the supervision row for a session.
pub async fn get_state(db: &Database, session_id: &str) -> Result<Option<SupervisionState>, VigilError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<SupervisionState>, rusqlite::Error> {
            get_sync(conn, &session_id)
        })
        .await
        .map_err(map_tr_err)
}

/// Insert a new row. Fails if one already exists for the session.
pub async fn insert_state(db: &Database, state: &SupervisionState) -> Result<(), VigilError> {
    let state = state.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                &format!(
                    "INSERT INTO supervision_state ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    state.session_id,
                    state.location_id,
                    state.status.to_string(),
                    state.ai_enabled,
                    state.notes,
                    state.scheduled_at.map(to_db_time),
                    state.converted_at.map(to_db_time),
                    state.updated_by,
                    to_db_time(state.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Overwrite an existing row. Returns whether a row was updated.
pub async fn update_state(db: &Database, state: &SupervisionState) -> Result<bool, VigilError> {
    let state = state.clone();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute(
                "UPDATE supervision_state
                 SET location_id = ?2, status = ?3, ai_enabled = ?4, notes = ?5,
                     scheduled_at = ?6, converted_at = ?7, updated_by = ?8, updated_at = ?9
                 WHERE session_id = ?1",
                params![
                    state.session_id,
                    state.location_id,
                    state.status.to_string(),
                    state.ai_enabled,
                    state.notes,
                    state.scheduled_at.map(to_db_time),
                    state.converted_at.map(to_db_time),
                    state.updated_by,
                    to_db_time(state.updated_at),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Insert-or-update in one transaction. Returns the row as it was before the
/// write, `None` when the row was created.
pub async fn upsert_state(
    db: &Database,
    state: &SupervisionState,
) -> Result<Option<SupervisionState>, VigilError> {
    let state = state.clone();
    db.connection()
        .call(move |conn| -> Result<Option<SupervisionState>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let before = get_sync(&tx, &state.session_id)?;
            tx.execute(
                &format!(
                    "INSERT INTO supervision_state ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(session_id) DO UPDATE SET
                        location_id = COALESCE(excluded.location_id, supervision_state.location_id),
                        status = excluded.status,
                        ai_enabled = excluded.ai_enabled,
                        notes = excluded.notes,
                        scheduled_at = excluded.scheduled_at,
                        converted_at = excluded.converted_at,
                        updated_by = excluded.updated_by,
                        updated_at = excluded.updated_at"
                ),
                params![
                    state.session_id,
                    state.location_id,
                    state.status.to_string(),
                    state.ai_enabled,
                    state.notes,
                    state.scheduled_at.map(to_db_time),
                    state.converted_at.map(to_db_time),
                    state.updated_by,
                    to_db_time(state.updated_at),
                ],
            )?;
            tx.commit()?;
            Ok(before)
        })
        .await
        .map_err(map_tr_err)
}
