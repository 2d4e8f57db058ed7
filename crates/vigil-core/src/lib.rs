// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Vigil live supervision subsystem.
//!
//! This crate provides the domain types, the error taxonomy, and the traits
//! for the three external collaborators the supervision engine talks to:
//! storage, the change-data stream, and outbound message dispatch.

pub mod error;
pub mod filters;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{ErrorKind, VigilError};
pub use filters::{ConversationFilters, ConversationQuery, DateRange, StatusFilter};
pub use types::{
    AdapterType, ChangeEvent, ChangeKind, Channel, ColumnFilter, ContactInfo, Conversation,
    EventMatcher, HealthStatus, Message, MessageRole, SupervisionState, SupervisionStatus, Table,
};

// Re-export all collaborator traits at crate root.
pub use traits::{
    ChangeStream, ChangeSubscription, Collaborator, DispatchReceipt, MessageDispatcher,
    OutboundMessage, SupervisionStore,
};
