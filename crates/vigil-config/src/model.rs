// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Vigil supervision subsystem.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Vigil configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VigilConfig {
    /// Operator identity and logging.
    #[serde(default)]
    pub operator: OperatorConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Change stream, debounce, and polling settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Conversation list settings.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Outbound message delivery settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Who is acting and how loudly to log.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    /// Actor id written to `updated_by` and used as the sender of manual messages.
    #[serde(default = "default_operator_id")]
    pub id: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            id: default_operator_id(),
            log_level: default_log_level(),
        }
    }
}

fn default_operator_id() -> String {
    "operator".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// Primary conversation relation read by the list.
    #[serde(default = "default_conversation_view")]
    pub conversation_view: String,

    /// Relation read when the primary one does not exist.
    #[serde(default = "default_legacy_view")]
    pub legacy_view: String,

    /// Upper bound on every storage call, in seconds.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl StorageConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            conversation_view: default_conversation_view(),
            legacy_view: default_legacy_view(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("vigil").join("vigil.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("vigil.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

fn default_conversation_view() -> String {
    "conversation_overview".to_string()
}

fn default_legacy_view() -> String {
    "conversation_overview_legacy".to_string()
}

fn default_query_timeout_secs() -> u64 {
    10
}

/// Realtime refresh configuration.
///
/// Debounce windows collapse event bursts; the poll interval bounds staleness
/// when the change stream is silent or disconnected.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeConfig {
    /// Trailing window for cross-conversation list refreshes.
    #[serde(default = "default_list_debounce_ms")]
    pub list_debounce_ms: u64,

    /// Trailing window applied to search text before refetching.
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,

    /// Full list refresh period, independent of the change stream.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// First resubscribe delay after a dropped subscription.
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Cap for the exponential resubscribe delay.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Capacity of the in-process change feed.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

impl RealtimeConfig {
    pub fn list_debounce(&self) -> Duration {
        Duration::from_millis(self.list_debounce_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            list_debounce_ms: default_list_debounce_ms(),
            search_debounce_ms: default_search_debounce_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            feed_capacity: default_feed_capacity(),
        }
    }
}

fn default_list_debounce_ms() -> u64 {
    500
}

fn default_search_debounce_ms() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_reconnect_initial_ms() -> u64 {
    250
}

fn default_reconnect_max_ms() -> u64 {
    10_000
}

fn default_feed_capacity() -> usize {
    1024
}

/// Conversation list configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Rows fetched per list refresh. Stats are computed over this page only.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    50
}

/// Outbound delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Webhook URL. `None` leaves sending unconfigured.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub timeout_secs: u64,
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

fn default_dispatch_timeout_secs() -> u64 {
    15
}
