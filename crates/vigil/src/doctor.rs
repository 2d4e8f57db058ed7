// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `vigil doctor` command implementation.
//!
//! Runs diagnostic checks against the configured database and dispatch
//! endpoint so an operator can tell why the panel is showing legacy or
//! placeholder data.

use std::io::IsTerminal;
use std::path::Path;
use std::time::{Duration, Instant};

use vigil_config::VigilConfig;
use vigil_core::VigilError;
use vigil_storage::SqliteStore;

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of a single diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration: start.elapsed(),
        }
    }
}

/// Run the `vigil doctor` command.
pub async fn run_doctor(
    config: &VigilConfig,
    config_path: Option<&Path>,
    plain: bool,
) -> Result<(), VigilError> {
    let use_color = !plain && std::io::stdout().is_terminal();
    let mut results = vec![check_config(config_path).await];

    let (db_result, store) = check_database(config).await;
    results.push(db_result);
    if let Some(store) = &store {
        results.extend(check_relations(store, config).await);
    }
    results.push(check_dispatch(config).await);

    println!();
    println!("  vigil doctor");
    println!("  {}", "-".repeat(50));

    let mut issues = 0;
    for result in &results {
        if result.status != CheckStatus::Pass {
            issues += 1;
        }
        println!("{}", render(result, use_color));
    }

    println!();
    if issues > 0 {
        let issue_word = if issues == 1 { "issue" } else { "issues" };
        println!("  {issues} {issue_word} found.");
    } else {
        println!("  All checks passed.");
    }
    println!();

    Ok(())
}

fn render(result: &CheckResult, use_color: bool) -> String {
    let duration_ms = result.duration.as_millis();
    if !use_color {
        let tag = match result.status {
            CheckStatus::Pass => "[OK]  ",
            CheckStatus::Warn => "[WARN]",
            CheckStatus::Fail => "[FAIL]",
        };
        return format!(
            "    {tag} {:<20} {} ({duration_ms}ms)",
            result.name, result.message
        );
    }

    use colored::Colorize;
    let (symbol, message) = match result.status {
        CheckStatus::Pass => ("✓".green(), result.message.normal()),
        CheckStatus::Warn => ("!".yellow(), result.message.yellow()),
        CheckStatus::Fail => ("✗".red(), result.message.red()),
    };
    format!("    {symbol} {:<20} {message} ({duration_ms}ms)", result.name)
}

/// Check configuration loads without errors.
async fn check_config(path: Option<&Path>) -> CheckResult {
    let start = Instant::now();
    let loaded = match path {
        Some(path) => vigil_config::load_and_validate_path(path),
        None => vigil_config::load_and_validate(),
    };
    match loaded {
        Ok(_) => CheckResult::new("Configuration", CheckStatus::Pass, "valid", start),
        Err(errors) => CheckResult::new(
            "Configuration",
            CheckStatus::Fail,
            format!("{} error(s)", errors.len()),
            start,
        ),
    }
}

/// Check the database file exists and passes a health check.
///
/// Returns the opened store so the relation checks can reuse it.
async fn check_database(config: &VigilConfig) -> (CheckResult, Option<SqliteStore>) {
    use vigil_core::{Collaborator, HealthStatus};

    let start = Instant::now();
    let db_path = &config.storage.database_path;
    if !Path::new(db_path).exists() {
        return (
            CheckResult::new(
                "Database",
                CheckStatus::Warn,
                format!("not found: {db_path} (created on first run)"),
                start,
            ),
            None,
        );
    }

    let store = SqliteStore::new(config.storage.clone());
    if let Err(e) = store.initialize().await {
        return (
            CheckResult::new("Database", CheckStatus::Fail, format!("open failed: {e}"), start),
            None,
        );
    }
    let result = match store.health_check().await {
        Ok(HealthStatus::Healthy) => {
            CheckResult::new("Database", CheckStatus::Pass, "connected", start)
        }
        Ok(HealthStatus::Degraded(reason)) => {
            CheckResult::new("Database", CheckStatus::Warn, reason, start)
        }
        Ok(HealthStatus::Unhealthy(reason)) => {
            CheckResult::new("Database", CheckStatus::Fail, reason, start)
        }
        Err(e) => CheckResult::new("Database", CheckStatus::Fail, format!("query failed: {e}"), start),
    };
    (result, Some(store))
}

/// Check each relation the panel reads or writes.
///
/// A missing overview view only degrades the panel, so it warns. A missing
/// `messages` table breaks transcripts and sending, so it fails.
async fn check_relations(store: &SqliteStore, config: &VigilConfig) -> Vec<CheckResult> {
    let relations = [
        (config.storage.conversation_view.as_str(), CheckStatus::Warn, "legacy view will be used"),
        (config.storage.legacy_view.as_str(), CheckStatus::Warn, "no fallback listing"),
        ("supervision_state", CheckStatus::Warn, "actions will not be saved"),
        ("messages", CheckStatus::Fail, "transcripts unavailable"),
    ];

    let mut results = Vec::with_capacity(relations.len());
    for (name, missing_status, consequence) in relations {
        let start = Instant::now();
        let result = match store.relation_exists(name).await {
            Ok(true) => CheckResult::new(name, CheckStatus::Pass, "present", start),
            Ok(false) => CheckResult::new(
                name,
                missing_status,
                format!("missing ({consequence})"),
                start,
            ),
            Err(e) => CheckResult::new(name, CheckStatus::Fail, format!("lookup failed: {e}"), start),
        };
        results.push(result);
    }
    results
}

/// Check the dispatch endpoint answers a HEAD request.
async fn check_dispatch(config: &VigilConfig) -> CheckResult {
    let start = Instant::now();
    let Some(endpoint) = config.dispatch.endpoint.as_deref() else {
        return CheckResult::new(
            "Dispatch",
            CheckStatus::Warn,
            "no endpoint configured (sending disabled)",
            start,
        );
    };

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            return CheckResult::new(
                "Dispatch",
                CheckStatus::Fail,
                format!("HTTP client error: {e}"),
                start,
            );
        }
    };

    match client.head(endpoint).send().await {
        Ok(resp) if resp.status().is_server_error() => CheckResult::new(
            "Dispatch",
            CheckStatus::Warn,
            format!("status {}", resp.status()),
            start,
        ),
        Ok(_) => CheckResult::new("Dispatch", CheckStatus::Pass, "reachable", start),
        Err(e) => {
            let msg = if e.is_timeout() {
                "timeout (5s)".to_string()
            } else if e.is_connect() {
                "connection refused".to_string()
            } else {
                format!("error: {e}")
            };
            CheckResult::new("Dispatch", CheckStatus::Fail, msg, start)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> VigilConfig {
        let mut config = VigilConfig::default();
        config.storage.database_path = dir.path().join("vigil.db").to_string_lossy().into_owned();
        config
    }

    #[test]
    fn plain_render_uses_tags() {
        let result = CheckResult {
            name: "Database".to_string(),
            status: CheckStatus::Warn,
            message: "not found".to_string(),
            duration: Duration::from_millis(3),
        };
        let line = render(&result, false);
        assert!(line.contains("[WARN]"));
        assert!(line.contains("not found (3ms)"));
    }

    #[tokio::test]
    async fn config_check_passes_for_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "[operator]\nid = \"ana\"\n").unwrap();
        let result = check_config(Some(&path)).await;
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn missing_database_warns_without_creating_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let (result, store) = check_database(&config).await;
        assert_eq!(result.status, CheckStatus::Warn);
        assert!(result.message.contains("not found"));
        assert!(store.is_none());
        assert!(!Path::new(&config.storage.database_path).exists());
    }

    #[tokio::test]
    async fn migrated_database_has_every_relation() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        crate::commands::open_store(&config).await.unwrap();

        let (result, store) = check_database(&config).await;
        assert_eq!(result.status, CheckStatus::Pass);
        let relations = check_relations(&store.unwrap(), &config).await;
        assert_eq!(relations.len(), 4);
        assert!(relations.iter().all(|r| r.status == CheckStatus::Pass), "{relations:?}");
    }

    #[tokio::test]
    async fn missing_view_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir);
        crate::commands::open_store(&config).await.unwrap();
        config.storage.conversation_view = "conversation_overview_v9".into();

        let (_, store) = check_database(&config).await;
        let relations = check_relations(&store.unwrap(), &config).await;
        assert_eq!(relations[0].status, CheckStatus::Warn);
        assert!(relations[0].message.contains("legacy view"));
    }

    #[tokio::test]
    async fn unconfigured_dispatch_warns() {
        let result = check_dispatch(&VigilConfig::default()).await;
        assert_eq!(result.status, CheckStatus::Warn);
    }
}
