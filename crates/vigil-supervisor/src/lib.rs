// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live supervision engine for the Vigil subsystem.
//!
//! The [`SupervisionPanel`] is the entry point. It combines:
//! - [`ConversationAggregator`]: the filtered, deduplicated conversation list
//!   with windowed statistics and view fallback
//! - [`EventBridge`]: reference-counted change-stream topics with listener
//!   deduplication and reconnect backoff
//! - [`Coalescer`] and [`PollingFallback`]: debounced and periodic refreshes
//! - [`SupervisionMachine`]: validated, idempotent supervision transitions
//! - [`SendCoordinator`]: the send-and-pause sequence for operator messages

pub mod aggregator;
pub mod bridge;
pub mod coalescer;
pub mod coordinator;
pub mod panel;
pub mod poller;
pub mod shutdown;
pub mod state_machine;

pub use aggregator::{
    ConversationAggregator, ConversationPage, ConversationStats, DataSource, Transcript,
};
pub use bridge::{Backoff, EventBridge, Listener, ReconnectListener, TopicHandle, TopicSpec};
pub use coalescer::Coalescer;
pub use coordinator::{SendCoordinator, SendError, SendReport, SendRequest};
pub use panel::{
    HandlerRegistration, ListView, MessagesView, PanelContext, PanelDeps, PanelHandler,
    PanelHandlers, PanelSettings, SupervisionPanel, ViewError,
};
pub use poller::PollingFallback;
pub use state_machine::{SupervisionMachine, TransitionOutcome};
