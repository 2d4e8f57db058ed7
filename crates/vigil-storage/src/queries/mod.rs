// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules. Each takes a [`Database`](crate::Database) and goes
//! through its single background connection.

pub mod conversations;
pub mod messages;
pub mod supervision;
