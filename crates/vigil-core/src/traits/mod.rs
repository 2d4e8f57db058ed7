// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator trait definitions.
//!
//! All collaborators extend the [`Collaborator`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod change_stream;
pub mod dispatch;
pub mod store;

pub use adapter::Collaborator;
pub use change_stream::{ChangeStream, ChangeSubscription};
pub use dispatch::{DispatchReceipt, MessageDispatcher, OutboundMessage};
pub use store::SupervisionStore;
