// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Vigil configuration system.

use vigil_config::diagnostic::{ConfigError, suggest_key};
use vigil_config::model::VigilConfig;
use vigil_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_vigil_config() {
    let toml = r#"
[operator]
id = "ana"
log_level = "debug"

[storage]
database_path = "/tmp/vigil-test.db"
wal_mode = false
conversation_view = "overview_v2"
legacy_view = "overview_v1"
query_timeout_secs = 3

[realtime]
list_debounce_ms = 800
search_debounce_ms = 250
poll_interval_secs = 30
reconnect_initial_ms = 100
reconnect_max_ms = 5000
feed_capacity = 64

[aggregator]
page_size = 20

[dispatch]
endpoint = "https://hooks.example.test/send"
api_key = "secret"
timeout_secs = 5
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.operator.id, "ana");
    assert_eq!(config.operator.log_level, "debug");
    assert_eq!(config.storage.database_path, "/tmp/vigil-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.storage.conversation_view, "overview_v2");
    assert_eq!(config.storage.legacy_view, "overview_v1");
    assert_eq!(config.storage.query_timeout_secs, 3);
    assert_eq!(config.realtime.list_debounce_ms, 800);
    assert_eq!(config.realtime.search_debounce_ms, 250);
    assert_eq!(config.realtime.poll_interval_secs, 30);
    assert_eq!(config.realtime.reconnect_initial_ms, 100);
    assert_eq!(config.realtime.reconnect_max_ms, 5000);
    assert_eq!(config.realtime.feed_capacity, 64);
    assert_eq!(config.aggregator.page_size, 20);
    assert_eq!(
        config.dispatch.endpoint.as_deref(),
        Some("https://hooks.example.test/send")
    );
    assert_eq!(config.dispatch.api_key.as_deref(), Some("secret"));
    assert_eq!(config.dispatch.timeout_secs, 5);
}

#[test]
fn missing_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty config is valid");
    assert_eq!(config.operator.id, "operator");
    assert_eq!(config.realtime.list_debounce_ms, 500);
    assert_eq!(config.realtime.search_debounce_ms, 300);
    assert_eq!(config.realtime.poll_interval_secs, 60);
    assert_eq!(config.aggregator.page_size, 50);
    assert!(config.dispatch.endpoint.is_none());
}

#[test]
fn unknown_field_in_storage_produces_error() {
    let toml = r#"
[storage]
databse_path = "/tmp/x.db"
"#;

    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("databse_path"),
        "error should mention unknown field or the bad key, got: {err_str}"
    );
}

#[test]
fn deny_unknown_fields_at_top_level() {
    let toml = r#"
[telemetry]
enabled = true
"#;

    let err = load_config_from_str(toml).expect_err("unknown top-level section should be rejected");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("telemetry"),
        "error should mention unknown field, got: {err_str}"
    );
}

#[test]
fn dot_key_override_reaches_nested_field() {
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    let config: VigilConfig = Figment::new()
        .merge(Serialized::defaults(VigilConfig::default()))
        .merge(Toml::string("[dispatch]\ntimeout_secs = 9\n"))
        .merge(("dispatch.api_key", "from-env"))
        .extract()
        .expect("should merge override");

    assert_eq!(config.dispatch.api_key.as_deref(), Some("from-env"));
    assert_eq!(config.dispatch.timeout_secs, 9);
}

#[test]
fn diagnostic_suggests_list_debounce_ms() {
    let valid_keys = &[
        "list_debounce_ms",
        "search_debounce_ms",
        "poll_interval_secs",
    ];
    assert_eq!(
        suggest_key("list_debounse_ms", valid_keys),
        Some("list_debounce_ms".to_string())
    );
}

#[test]
fn diagnostic_error_includes_unknown_key_and_suggestion() {
    let toml = r#"
[dispatch]
endpont = "https://hooks.example.test"
"#;

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    let found = errors.iter().any(|e| {
        matches!(e, ConfigError::UnknownKey { key, suggestion, valid_keys, .. } if {
            key == "endpont"
                && suggestion.as_deref() == Some("endpoint")
                && valid_keys.contains("api_key")
                && valid_keys.contains("timeout_secs")
        })
    });
    assert!(found, "expected UnknownKey for `endpont`, got: {errors:?}");
}

#[test]
fn diagnostic_invalid_type_message() {
    let toml = r#"
[aggregator]
page_size = "fifty"
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject invalid type");
    assert!(
        errors.iter().any(|e| matches!(
            e,
            ConfigError::InvalidType { key, .. } if key.contains("page_size")
        )),
        "expected InvalidType for page_size, got: {errors:?}"
    );
}

#[test]
fn config_error_renders_with_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let error = ConfigError::UnknownKey {
        key: "endpont".to_string(),
        suggestion: Some("endpoint".to_string()),
        valid_keys: "endpoint, api_key, timeout_secs".to_string(),
        span: None,
        src: None,
    };
    assert!(error.code().is_some());
    let help = error.help().expect("help text").to_string();
    assert!(help.contains("did you mean `endpoint`"), "got: {help}");

    let mut buf = String::new();
    GraphicalReportHandler::new()
        .render_report(&mut buf, &error)
        .expect("should render without error");
    assert!(buf.contains("endpont"));
}

#[test]
fn validation_runs_after_successful_parse() {
    let toml = r#"
[realtime]
reconnect_initial_ms = 9000
reconnect_max_ms = 1000

[aggregator]
page_size = 0
"#;

    let errors = load_and_validate_str(toml).expect_err("semantic errors expected");
    let keys: Vec<_> = errors
        .iter()
        .filter_map(|e| match e {
            ConfigError::Validation { key, .. } => Some(key.as_str()),
            _ => None,
        })
        .collect();
    assert!(keys.contains(&"realtime.reconnect_max_ms"));
    assert!(keys.contains(&"aggregator.page_size"));
}

#[test]
fn load_from_file_reports_unknown_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vigil.toml");
    let content = "[operator]\nidd = \"ana\"\n";
    std::fs::write(&path, content).expect("write config");

    let errors = load_and_validate_path(&path).expect_err("unknown key");
    let unknown = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::UnknownKey { key, span, .. } if key == "idd" => Some(*span),
            _ => None,
        })
        .expect("UnknownKey for `idd`");
    if let Some(span) = unknown {
        assert_eq!(&content[span.offset()..span.offset() + span.len()], "idd");
    }
}

#[test]
fn load_from_file_accepts_valid_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vigil.toml");
    std::fs::write(&path, "[aggregator]\npage_size = 10\n").expect("write config");

    let config = load_and_validate_path(&path).expect("valid file");
    assert_eq!(config.aggregator.page_size, 10);
}
