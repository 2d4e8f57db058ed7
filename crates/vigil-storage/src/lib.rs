// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite storage collaborator for the Vigil supervision subsystem.
//!
//! WAL-mode SQLite with embedded migrations and a single-writer connection via
//! `tokio-rusqlite`. Holds conversations, transcripts, and supervision state,
//! exposes the conversation overview views, and publishes a change event for
//! each of its own writes.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod writer;

pub use adapter::SqliteStore;
pub use database::Database;
pub use models::{ConversationRecord, InboundMessage};
pub use writer::ChangePublisher;
