// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot operator commands: `list`, `messages`, the supervision actions,
//! `send`, and `ingest`.
//!
//! Each command opens the store, runs one operation through the supervision
//! engine, prints the result, and exits. No change-stream subscription is
//! opened.

use std::io::IsTerminal;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_config::VigilConfig;
use vigil_core::{
    ConversationFilters, DateRange, MessageRole, StatusFilter, SupervisionStatus,
    SupervisionStore, VigilError,
};
use vigil_storage::{InboundMessage, SqliteStore};
use vigil_supervisor::{
    ConversationAggregator, ConversationPage, DataSource, SendCoordinator, SendError,
    SendRequest, SupervisionMachine, Transcript, TransitionOutcome,
};

use crate::{IngestArgs, ListArgs, SendArgs};

/// Open and migrate the configured database.
pub async fn open_store(config: &VigilConfig) -> Result<Arc<SqliteStore>, VigilError> {
    let store = SqliteStore::new(config.storage.clone());
    store.initialize().await?;
    Ok(Arc::new(store))
}

fn aggregator(config: &VigilConfig, store: Arc<SqliteStore>) -> ConversationAggregator {
    ConversationAggregator::new(
        store,
        config.storage.conversation_view.clone(),
        config.storage.legacy_view.clone(),
        config.aggregator.page_size,
    )
}

fn filters_from(args: &ListArgs) -> ConversationFilters {
    ConversationFilters {
        status: args.status.map_or(StatusFilter::All, StatusFilter::Only),
        search: args.search.clone(),
        date_range: DateRange {
            from: args.since,
            to: None,
        },
        location_id: args.location.clone(),
        channel: args.channel,
        assignee: args.assignee.clone(),
        no_response: args.no_response,
    }
}

fn use_color(plain: bool) -> bool {
    !plain && std::io::stdout().is_terminal()
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn status_label(status: SupervisionStatus, color: bool) -> String {
    let label = format!("{:<15}", status.to_string());
    if !color {
        return label;
    }
    use colored::Colorize;
    match status {
        SupervisionStatus::AiActive => label.green().to_string(),
        SupervisionStatus::AiPaused | SupervisionStatus::ManualTakeover => {
            label.yellow().to_string()
        }
        SupervisionStatus::Scheduled | SupervisionStatus::Converted => label.cyan().to_string(),
        SupervisionStatus::Archived => label.dimmed().to_string(),
    }
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or_else(|| "-".to_string(), |ts| ts.format("%Y-%m-%d %H:%M").to_string())
}

fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        return line.to_string();
    }
    let cut: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// Run `vigil list`.
pub async fn run_list(config: &VigilConfig, args: &ListArgs) -> Result<(), VigilError> {
    let store = open_store(config).await?;
    let page = aggregator(config, store).list(&filters_from(args)).await?;

    if args.json {
        print_json(&page);
    } else {
        print_page(&page, use_color(args.plain));
    }
    Ok(())
}

fn print_page(page: &ConversationPage, color: bool) {
    println!();
    println!("  vigil conversations");
    println!("  {}", "-".repeat(90));

    if let DataSource::Placeholder { reason, detail } = &page.source {
        println!("    [{reason}] {detail}");
        println!("    The rows below are placeholders, not data.");
    } else if page.source == DataSource::Legacy {
        println!("    (legacy view: supervision status not available)");
    }

    for c in &page.conversations {
        println!(
            "    {} {:<10} {:<24} {:<16} {}",
            status_label(c.status, color),
            c.channel.to_string(),
            preview(&c.contact_name, 24),
            format_time(c.last_message_at),
            preview(c.last_message.as_deref().unwrap_or_default(), 40),
        );
        println!("      session: {}", c.session_id);
    }
    if page.conversations.is_empty() {
        println!("    no conversations match");
    }

    let s = &page.stats;
    println!();
    println!(
        "  {} shown: {} active, {} paused, {} takeover, {} scheduled, {} converted, {} archived, {} awaiting reply",
        s.total,
        s.ai_active,
        s.ai_paused,
        s.manual_takeover,
        s.scheduled,
        s.converted,
        s.archived,
        s.awaiting_response
    );
    println!();
}

/// Run `vigil messages`.
pub async fn run_messages(
    config: &VigilConfig,
    session_id: &str,
    json: bool,
) -> Result<(), VigilError> {
    let store = open_store(config).await?;
    let state = store.get_supervision_state(session_id).await.ok().flatten();
    let transcript = aggregator(config, store).transcript(session_id).await?;

    if json {
        #[derive(Serialize)]
        struct Output<'a> {
            session_id: &'a str,
            status: Option<SupervisionStatus>,
            #[serde(flatten)]
            transcript: &'a Transcript,
        }
        print_json(&Output {
            session_id,
            status: state.map(|s| s.status),
            transcript: &transcript,
        });
        return Ok(());
    }

    println!();
    match &transcript.contact {
        Some(contact) => println!(
            "  {} ({}) on {}",
            contact.contact_name,
            contact.contact_phone.as_deref().unwrap_or("no phone"),
            contact.channel
        ),
        None => println!("  session {session_id}"),
    }
    if let Some(state) = &state {
        println!("  status: {}", state.status);
        if let Some(notes) = &state.notes {
            println!("  notes:  {notes}");
        }
    }
    println!("  {}", "-".repeat(60));
    for m in &transcript.messages {
        let who = match (m.role, m.sender.as_deref()) {
            (MessageRole::Human, Some(sender)) => format!("human:{sender}"),
            (role, _) => role.to_string(),
        };
        println!("    [{}] {who:<16} {}", format_time(Some(m.created_at)), m.content);
    }
    if transcript.messages.is_empty() {
        println!("    no messages");
    }
    println!();
    Ok(())
}

/// A supervision action requested from the command line.
#[derive(Debug, Clone)]
pub enum Action {
    Pause { location: Option<String> },
    Resume,
    Takeover { location: Option<String> },
    Archive,
    Schedule { at: DateTime<Utc>, notes: Option<String> },
    Convert { notes: Option<String> },
    Note { text: String },
}

pub async fn apply_action(
    machine: &SupervisionMachine,
    action: Action,
    session_id: &str,
) -> Result<TransitionOutcome, VigilError> {
    match action {
        Action::Pause { location } => machine.pause_ai(session_id, location.as_deref()).await,
        Action::Resume => machine.resume_ai(session_id).await,
        Action::Takeover { location } => machine.take_over(session_id, location.as_deref()).await,
        Action::Archive => machine.archive(session_id).await,
        Action::Schedule { at, notes } => machine.mark_scheduled(session_id, at, notes).await,
        Action::Convert { notes } => machine.mark_converted(session_id, notes).await,
        Action::Note { text } => machine.add_note(session_id, &text).await,
    }
}

/// Run one of the supervision actions.
pub async fn run_action(
    config: &VigilConfig,
    action: Action,
    session_id: &str,
) -> Result<(), VigilError> {
    let store = open_store(config).await?;
    let machine = SupervisionMachine::new(store, config.operator.id.clone());
    let outcome = apply_action(&machine, action, session_id).await?;

    let from = outcome
        .previous
        .map_or_else(|| "new".to_string(), |s| s.to_string());
    println!("{session_id}: {from} -> {}", outcome.state.status);
    if outcome.is_degraded() {
        println!("  warning: supervision_state is not provisioned; nothing was saved");
    }
    Ok(())
}

fn send_error(e: SendError) -> VigilError {
    match e {
        SendError::Validation(msg) => VigilError::Validation(msg),
        SendError::Dispatch(inner) => inner,
        SendError::Unknown(msg) => VigilError::Internal(msg),
    }
}

/// Run `vigil send`.
pub async fn run_send(config: &VigilConfig, args: &SendArgs) -> Result<(), VigilError> {
    let store = open_store(config).await?;
    let dispatcher = vigil_dispatch::from_config(&config.dispatch)?;
    let machine = Arc::new(SupervisionMachine::new(
        store.clone(),
        config.operator.id.clone(),
    ));
    let coordinator =
        SendCoordinator::new(machine, store, dispatcher, config.dispatch.timeout());

    let report = coordinator
        .send(SendRequest {
            session_id: args.session_id.clone(),
            location_id: args.location.clone(),
            contact_id: args.contact.clone(),
            message: args.message.clone(),
            channel: args.channel,
        })
        .await
        .map_err(send_error)?;

    println!(
        "sent to {} (external id: {})",
        args.session_id,
        report.receipt.external_id.as_deref().unwrap_or("none")
    );
    if report.pause.is_none() {
        println!("  warning: the agent could not be paused and may still reply");
    }
    if !report.appended {
        println!("  warning: delivered, but not recorded in the transcript");
    }
    Ok(())
}

/// Run `vigil ingest`.
pub async fn run_ingest(config: &VigilConfig, args: &IngestArgs) -> Result<(), VigilError> {
    if args.content.trim().is_empty() {
        return Err(VigilError::Validation("content must not be empty".into()));
    }
    let store = open_store(config).await?;
    let message = store
        .record_inbound(&InboundMessage {
            session_id: args.session_id.clone(),
            conversation_id: None,
            location_id: args.location.clone(),
            contact_id: None,
            contact_name: args.name.clone(),
            contact_phone: args.phone.clone(),
            channel: args.channel,
            role: args.role,
            content: args.content.clone(),
            created_at: Utc::now(),
        })
        .await?;
    println!("recorded {} in {}", message.id, message.session_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use vigil_core::Channel;

    use super::*;

    #[test]
    fn list_args_map_onto_filters() {
        let args = ListArgs {
            status: Some(SupervisionStatus::Scheduled),
            search: Some("maria".into()),
            channel: Some(Channel::Sms),
            no_response: true,
            ..Default::default()
        };
        let filters = filters_from(&args);
        assert_eq!(filters.status, StatusFilter::Only(SupervisionStatus::Scheduled));
        assert_eq!(filters.search.as_deref(), Some("maria"));
        assert_eq!(filters.channel, Some(Channel::Sms));
        assert!(filters.no_response);
        assert!(filters.date_range.is_unbounded());
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(preview("olá, tudo bem?", 40), "olá, tudo bem?");
        assert_eq!(preview("ááááááááááá", 6), "ááá...");
        assert_eq!(preview("first\nsecond", 40), "first");
    }

    #[test]
    fn send_errors_keep_their_kind() {
        let e = send_error(SendError::Validation("empty".into()));
        assert_eq!(e.kind(), vigil_core::ErrorKind::Validation);
        let e = send_error(SendError::Dispatch(VigilError::transport("down")));
        assert!(e.is_retryable());
    }

    #[tokio::test]
    async fn actions_run_against_a_real_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = VigilConfig::default();
        config.storage.database_path = dir.path().join("vigil.db").to_string_lossy().into_owned();

        let store = open_store(&config).await.unwrap();
        let machine = SupervisionMachine::new(store.clone(), "ana");
        let out = apply_action(&machine, Action::Takeover { location: None }, "s1")
            .await
            .unwrap();
        assert_eq!(out.state.status, SupervisionStatus::ManualTakeover);
        assert!(!out.is_degraded());

        let stored = store.get_supervision_state("s1").await.unwrap().unwrap();
        assert_eq!(stored.updated_by, "ana");
    }
}
