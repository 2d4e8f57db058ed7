// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use rusqlite::functions::FunctionFlags;
use tracing::{debug, info};
use vigil_core::VigilError;

use crate::migrations;

/// Handle to the supervision database.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

/// `vigil_lower(text)`: Unicode lowercase. SQLite's `lower()` folds ASCII only.
fn register_functions(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.create_scalar_function(
        "vigil_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|s| s.to_lowercase()))
        },
    )
}

impl Database {
    /// Open (creating if needed) the database at `path` in WAL mode and run
    /// pending migrations.
    pub async fn open(path: &str) -> Result<Self, VigilError> {
        Self::open_with(path, true).await
    }

    /// Like [`open`](Self::open) with explicit journal mode.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, VigilError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| VigilError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| VigilError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn };
        db.prepare(wal_mode).await?;
        info!(path, wal_mode, "database opened");
        Ok(db)
    }

    /// Fresh in-memory database with the full schema, for tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, VigilError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| VigilError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn };
        db.prepare(false).await?;
        Ok(db)
    }

    async fn prepare(&self, wal_mode: bool) -> Result<(), VigilError> {
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                if wal_mode {
                    conn.pragma_update(None, "journal_mode", "WAL")?;
                }
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                conn.busy_timeout(std::time::Duration::from_secs(5))?;
                register_functions(conn)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;

        let report = self
            .conn
            .call(migrations::run_migrations)
            .await
            .map_err(|e| VigilError::Storage {
                source: Box::new(e),
            })?;
        debug!(applied = report.applied_migrations().len(), "migrations complete");
        Ok(())
    }

    /// The underlying async connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), VigilError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(|e| VigilError::Storage {
            source: Box::new(e),
        })?;
        debug!("database closed");
        Ok(())
    }
}

/// Map a tokio-rusqlite error into the Vigil taxonomy.
///
/// SQLite reports a missing table or view as `no such table: <name>`; that
/// becomes [`VigilError::RelationMissing`] so callers can fall back.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> VigilError {
    match missing_relation(&e.to_string()) {
        Some(relation) => VigilError::relation_missing(relation),
        None => VigilError::Storage {
            source: Box::new(e),
        },
    }
}

fn missing_relation(message: &str) -> Option<String> {
    let (_, rest) = message.split_once("no such table: ")?;
    let name = rest
        .split(|c: char| c.is_whitespace() || c == ')')
        .next()
        .unwrap_or(rest);
    // Qualified names come back as `main.foo`.
    let name = name.rsplit('.').next().unwrap_or(name);
    Some(name.to_string())
}
