// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Vigil integration tests.
//!
//! Provides mock collaborators and a panel harness for fast, deterministic,
//! CI-runnable tests without a database or network.
//!
//! # Components
//!
//! - [`MockStore`] - In-memory store with missing-relation and failure injection
//! - [`MockDispatcher`] - Captures outbound messages; can reject or stall
//! - [`TestHarness`] - A running supervision panel wired to both mocks

pub mod harness;
pub mod mock_dispatcher;
pub mod mock_store;

pub use harness::{TestHarness, TestHarnessBuilder, conversation, message};
pub use mock_dispatcher::MockDispatcher;
pub use mock_store::MockStore;
