// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded schema migrations.
//!
//! SQL files under `migrations/` are compiled in with `embed_migrations!` and
//! applied whenever a [`Database`](crate::Database) is opened. Refinery keeps
//! its bookkeeping in `refinery_schema_history`.

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Apply every pending migration.
pub fn run_migrations(
    conn: &mut rusqlite::Connection,
) -> Result<refinery::Report, refinery::Error> {
    embedded::migrations::runner().run(conn)
}
