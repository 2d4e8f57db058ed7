// SPDX-FileCopyrightText: 2026 Vigil Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vigil - live supervision and intervention for automated conversations.
//!
//! This is the binary entry point for the operator CLI.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod commands;
mod doctor;
mod serve;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use vigil_config::VigilConfig;
use vigil_core::{Channel, MessageRole, SupervisionStatus};

/// Vigil - live supervision and intervention for automated conversations.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live supervision panel until interrupted.
    Serve,
    /// List conversations.
    List(ListArgs),
    /// Show the transcript of a conversation.
    Messages {
        session_id: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Pause the automated agent on a conversation.
    Pause {
        session_id: String,
        #[arg(long)]
        location: Option<String>,
    },
    /// Hand a conversation back to the automated agent.
    Resume { session_id: String },
    /// Take a conversation over manually.
    Takeover {
        session_id: String,
        #[arg(long)]
        location: Option<String>,
    },
    /// Archive a conversation.
    Archive { session_id: String },
    /// Record a scheduled appointment.
    Schedule {
        session_id: String,
        /// Appointment time (RFC 3339).
        #[arg(long)]
        at: DateTime<Utc>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Mark a conversation as converted.
    Convert {
        session_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Replace the operator notes on a conversation. An empty text clears them.
    Note { session_id: String, text: String },
    /// Send a message as the operator, pausing the agent first.
    Send(SendArgs),
    /// Record a message from a contact or the agent.
    Ingest(IngestArgs),
    /// Run diagnostic checks.
    Doctor {
        /// Disable colored output.
        #[arg(long)]
        plain: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<SupervisionStatus>,
    /// Match contact name, phone, or last message.
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub channel: Option<Channel>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub assignee: Option<String>,
    /// Only conversations where the contact spoke last.
    #[arg(long)]
    pub no_response: bool,
    /// Only conversations active at or after this time (RFC 3339).
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
    /// Disable colored output.
    #[arg(long)]
    pub plain: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    pub session_id: String,
    #[arg(long)]
    pub location: String,
    #[arg(long)]
    pub contact: Option<String>,
    #[arg(long, default_value = "whatsapp")]
    pub channel: Channel,
    pub message: String,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    pub session_id: String,
    #[arg(long)]
    pub location: String,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long, default_value = "whatsapp")]
    pub channel: Channel,
    #[arg(long, default_value = "user")]
    pub role: MessageRole,
    pub content: String,
}

fn load_config(path: Option<&std::path::Path>) -> VigilConfig {
    let loaded = match path {
        Some(path) => vigil_config::load_and_validate_path(path),
        None => vigil_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            vigil_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vigil={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing(&config.operator.log_level);

    let Some(command) = cli.command else {
        println!("vigil: use --help for available commands");
        return;
    };

    let result = match command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::List(args) => commands::run_list(&config, &args).await,
        Commands::Messages { session_id, json } => {
            commands::run_messages(&config, &session_id, json).await
        }
        Commands::Pause {
            session_id,
            location,
        } => commands::run_action(&config, commands::Action::Pause { location }, &session_id).await,
        Commands::Resume { session_id } => {
            commands::run_action(&config, commands::Action::Resume, &session_id).await
        }
        Commands::Takeover {
            session_id,
            location,
        } => {
            commands::run_action(&config, commands::Action::Takeover { location }, &session_id)
                .await
        }
        Commands::Archive { session_id } => {
            commands::run_action(&config, commands::Action::Archive, &session_id).await
        }
        Commands::Schedule {
            session_id,
            at,
            notes,
        } => {
            commands::run_action(&config, commands::Action::Schedule { at, notes }, &session_id)
                .await
        }
        Commands::Convert { session_id, notes } => {
            commands::run_action(&config, commands::Action::Convert { notes }, &session_id).await
        }
        Commands::Note { session_id, text } => {
            commands::run_action(&config, commands::Action::Note { text }, &session_id).await
        }
        Commands::Send(args) => commands::run_send(&config, &args).await,
        Commands::Ingest(args) => commands::run_ingest(&config, &args).await,
        Commands::Doctor { plain } => doctor::run_doctor(&config, cli.config.as_deref(), plain).await,
    };

    if let Err(e) = result {
        eprintln!("error [{}]: {e}", e.kind());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_schedule_with_rfc3339_time() {
        let cli = Cli::parse_from([
            "vigil",
            "schedule",
            "s1",
            "--at",
            "2026-03-05T14:00:00Z",
            "--notes",
            "first visit",
        ]);
        match cli.command {
            Some(Commands::Schedule { session_id, at, notes }) => {
                assert_eq!(session_id, "s1");
                assert_eq!(at.to_rfc3339(), "2026-03-05T14:00:00+00:00");
                assert_eq!(notes.as_deref(), Some("first visit"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_list_filters() {
        let cli = Cli::parse_from([
            "vigil",
            "list",
            "--status",
            "ai_paused",
            "--channel",
            "instagram",
            "--no-response",
        ]);
        let Some(Commands::List(args)) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.status, Some(SupervisionStatus::AiPaused));
        assert_eq!(args.channel, Some(Channel::Instagram));
        assert!(args.no_response);
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = vigil_config::load_and_validate_str("").expect("default config should be valid");
        assert_eq!(config.operator.id, "operator");
    }
}
