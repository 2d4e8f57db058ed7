// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Collects every failure rather than stopping at the first one.

use crate::diagnostic::ConfigError;
use crate::model::VigilConfig;

/// Largest page a single list refresh may request.
pub const MAX_PAGE_SIZE: usize = 200;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &VigilConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.operator.id.trim().is_empty() {
        errors.push(ConfigError::invalid("operator.id", "must not be empty"));
    }
    if !LOG_LEVELS.contains(&config.operator.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ConfigError::invalid(
            "operator.log_level",
            format!(
                "`{}` is not one of {}",
                config.operator.log_level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }

    let storage = &config.storage;
    if storage.database_path.trim().is_empty() {
        errors.push(ConfigError::invalid("storage.database_path", "must not be empty"));
    }
    for (key, relation) in [
        ("storage.conversation_view", &storage.conversation_view),
        ("storage.legacy_view", &storage.legacy_view),
    ] {
        if !is_sql_identifier(relation) {
            errors.push(ConfigError::invalid(
                key,
                format!("`{relation}` is not a plain SQL identifier"),
            ));
        }
    }
    if storage.query_timeout_secs == 0 {
        errors.push(ConfigError::invalid("storage.query_timeout_secs", "must be positive"));
    }

    let realtime = &config.realtime;
    for (key, value) in [
        ("realtime.list_debounce_ms", realtime.list_debounce_ms),
        ("realtime.search_debounce_ms", realtime.search_debounce_ms),
        ("realtime.poll_interval_secs", realtime.poll_interval_secs),
        ("realtime.reconnect_initial_ms", realtime.reconnect_initial_ms),
    ] {
        if value == 0 {
            errors.push(ConfigError::invalid(key, "must be positive"));
        }
    }
    if realtime.reconnect_initial_ms > realtime.reconnect_max_ms {
        errors.push(ConfigError::invalid(
            "realtime.reconnect_max_ms",
            format!(
                "must be at least reconnect_initial_ms ({}), got {}",
                realtime.reconnect_initial_ms, realtime.reconnect_max_ms
            ),
        ));
    }
    if realtime.feed_capacity == 0 {
        errors.push(ConfigError::invalid("realtime.feed_capacity", "must be positive"));
    }

    let page_size = config.aggregator.page_size;
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        errors.push(ConfigError::invalid(
            "aggregator.page_size",
            format!("must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"),
        ));
    }

    if let Some(endpoint) = &config.dispatch.endpoint
        && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
    {
        errors.push(ConfigError::invalid(
            "dispatch.endpoint",
            format!("`{endpoint}` must be an http:// or https:// URL"),
        ));
    }
    if config.dispatch.timeout_secs == 0 {
        errors.push(ConfigError::invalid("dispatch.timeout_secs", "must be positive"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Relation names are interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*`
/// is accepted.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(errors: &[ConfigError]) -> Vec<&str> {
        errors
            .iter()
            .filter_map(|e| match e {
                ConfigError::Validation { key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&VigilConfig::default()).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = VigilConfig::default();
        config.storage.database_path = "  ".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(keys(&errors), ["storage.database_path"]);
    }

    #[test]
    fn relation_names_must_be_identifiers() {
        assert!(is_sql_identifier("conversation_overview"));
        assert!(is_sql_identifier("_v2"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("2fast"));
        assert!(!is_sql_identifier("view; DROP TABLE messages"));

        let mut config = VigilConfig::default();
        config.storage.legacy_view = "legacy-view".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(keys(&errors), ["storage.legacy_view"]);
    }

    #[test]
    fn collects_every_failure() {
        let mut config = VigilConfig::default();
        config.operator.id = String::new();
        config.realtime.list_debounce_ms = 0;
        config.realtime.reconnect_initial_ms = 20_000;
        config.aggregator.page_size = 500;
        config.dispatch.endpoint = Some("ftp://hooks.local".to_string());

        let errors = validate_config(&config).unwrap_err();
        let keys = keys(&errors);
        for expected in [
            "operator.id",
            "realtime.list_debounce_ms",
            "realtime.reconnect_max_ms",
            "aggregator.page_size",
            "dispatch.endpoint",
        ] {
            assert!(keys.contains(&expected), "missing {expected} in {keys:?}");
        }
    }

    #[test]
    fn page_size_bounds_are_inclusive() {
        let mut config = VigilConfig::default();
        config.aggregator.page_size = 1;
        assert!(validate_config(&config).is_ok());
        config.aggregator.page_size = MAX_PAGE_SIZE;
        assert!(validate_config(&config).is_ok());
        config.aggregator.page_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = VigilConfig::default();
        config.operator.log_level = "loud".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(keys(&errors), ["operator.log_level"]);
    }
}
