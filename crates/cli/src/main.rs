//! cairn CLI — the main entry point.
//!
//! Commands:
//! - `ask`     — Answer one message through the verifying loop
//! - `check`   — Run the verification rules over a piece of text
//! - `config`  — Show the effective configuration

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cairn",
    about = "cairn — answers that are checked and cited before you see them",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single message
    Ask {
        /// The user message
        message: String,

        /// Prior conversation as a JSON array of {role, content}
        #[arg(long)]
        history: Option<PathBuf>,

        /// Knowledge entries as a JSON array of hits
        #[arg(long)]
        knowledge: Option<PathBuf>,

        /// Conversation identifier used in logs and events
        #[arg(long, env = "CAIRN_CONVERSATION_ID")]
        conversation: Option<String>,
    },

    /// Verify a draft without calling a provider
    Check {
        /// The draft text
        text: String,

        /// The question the draft answers
        #[arg(short, long)]
        question: String,

        /// Evidence references that were available (repeatable)
        #[arg(short, long = "evidence")]
        evidence: Vec<String>,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            message,
            history,
            knowledge,
            conversation,
        } => {
            commands::ask::run(&message, history.as_deref(), knowledge.as_deref(), conversation)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            text,
            question,
            evidence,
        } => {
            let passed = commands::check::run(&text, &question, &evidence)?;
            Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config => {
            commands::config_cmd::show()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
