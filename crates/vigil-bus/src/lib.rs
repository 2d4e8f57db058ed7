// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process change-data stream.
//!
//! [`ChangeFeed`] is the change-stream collaborator used when storage lives in
//! the same process: the SQLite store publishes an event for each write and
//! the supervision engine subscribes through the [`vigil_core::ChangeStream`]
//! trait.

pub mod feed;

pub use feed::ChangeFeed;
