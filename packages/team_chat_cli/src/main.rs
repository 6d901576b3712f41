use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::config::ChatConfig;

#[derive(Parser)]
#[command(name = "team-chat")]
#[command(about = "Chat with a team of AI agents from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.team-chat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive chat (the default)
    Chat(ChatArgs),

    /// List stored sessions
    Sessions(SessionsArgs),

    /// Show or change the stored theme
    Theme(ThemeArgs),
}

#[derive(Parser)]
struct ChatArgs {
    /// Backend WebSocket URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Access token appended to the URL (overrides config)
    #[arg(long)]
    token: Option<String>,
}

#[derive(Parser)]
struct SessionsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct ThemeArgs {
    #[command(subcommand)]
    action: Option<cli::theme::ThemeAction>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ChatConfig::new(cli.data_dir.clone())?;
    init_logging(&config, cli.debug)?;
    info!(version = env!("CARGO_PKG_VERSION"), "team-chat starting");

    match cli.command {
        None => cli::chat::chat_command(&config, None, None).await,
        Some(Commands::Chat(args)) => cli::chat::chat_command(&config, args.url, args.token).await,
        Some(Commands::Sessions(args)) => cli::sessions::sessions_command(&config, args.json),
        Some(Commands::Theme(args)) => cli::theme::theme_command(&config, args.action),
    }
}

/// Log to `<data_dir>/logs/team-chat.log` so output never interleaves with the prompt.
fn init_logging(config: &ChatConfig, debug: bool) -> Result<()> {
    let default_directive = if debug {
        "team_chat=debug,team_chat_cli=debug,info"
    } else {
        "team_chat=info,team_chat_cli=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let log_path = config.log_path();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(env_filter)
        .init();
    Ok(())
}
