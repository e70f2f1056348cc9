// stepsync: terminal client for collaborative step-sequencer sessions
//
// Joins a session over WebSocket, keeps a local grid in sync and accepts
// edit commands on stdin.

mod commands;
mod config;
mod grid;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use commands::Command;
use grid::Grid;
use stepsync_core::{ConnectionState, ConnectionStatus, SyncError, SyncHandle, SyncRuntime};
use tokio::io::AsyncBufReadExt;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "stepsync")]
#[command(about = "Collaborative step sequencer, in the terminal", long_about = None)]
#[command(version)]
struct Cli {
    /// Write logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join an existing session
    Join {
        session: String,
        /// Override the configured server URL
        #[arg(short, long)]
        server: Option<String>,
    },
    /// Start a new session with a fresh id
    New {
        #[arg(short, long)]
        server: Option<String>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Join { session, server } => cmd_join(session, server, cli.json).await,
        Commands::New { server } => {
            let session = uuid::Uuid::new_v4().to_string();
            println!("{} New session: {}", "✓".green(), session.bright_cyan());
            cmd_join(session, server, cli.json).await
        }
        Commands::Config { action } => cmd_config(action),
    }
}

/// Logs go to a daily file so they never interleave with the prompt
fn init_logging(json: bool) -> Result<WorkerGuard> {
    let log_dir = config::Config::data_dir()?.join("logs");
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "stepsync.log"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(stepsync_core::logging::env_filter("info"))
        .with_writer(writer)
        .with_ansi(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;
    Ok(guard)
}

fn prompt() {
    print!("> ");
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

async fn cmd_join(session: String, server: Option<String>, json: bool) -> Result<()> {
    let _guard = init_logging(json)?;
    let config = config::Config::load()?;
    let server_url = server.unwrap_or_else(|| config.server_url.clone());

    let grid = Grid::new();
    let handle = SyncRuntime::new(server_url.clone())
        .with_config(config.sync.clone())
        .with_state_source(Box::new(grid.clone()))
        .spawn(grid.clone())
        .context("Failed to start sync engine")?;

    println!(
        "Joining {} on {} as {}",
        session.bright_cyan(),
        server_url.dimmed(),
        config.display_name.as_deref().unwrap_or("guest")
    );
    tracing::info!("Joining session {} at {}", session, server_url);
    handle.connect(session.clone()).await?;

    let status_task = tokio::spawn(watch_status(handle.clone()));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    prompt();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            prompt();
            continue;
        }

        match commands::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => {
                if let Err(e) = run_command(&handle, &grid, command).await {
                    println!("{} {}", "✗".red(), e);
                }
            }
            Err(e) => println!("{} {}", "✗".red(), e),
        }
        prompt();
    }

    println!("Leaving session...");
    tracing::info!("Leaving session {}", session);
    handle.shutdown().await?;
    status_task.abort();
    Ok(())
}

async fn run_command(handle: &SyncHandle, grid: &Grid, command: Command) -> Result<()> {
    match command {
        Command::Edit(action) => {
            grid.apply(&action);
            match handle.send_action(action).await {
                Ok(()) => {}
                Err(SyncError::MessageTooLarge { size, max }) => {
                    anyhow::bail!("Edit too large to send ({} > {} bytes)", size, max)
                }
                Err(e) => return Err(e.into()),
            }
            print!("{}", grid.render());
        }
        Command::Show => print!("{}", grid.render()),
        Command::Players => {
            let players = grid.players();
            if players.is_empty() {
                println!("{}", "No players.".dimmed());
            }
            for player in players {
                println!("  {} {} ({})", "•".bright_green(), player.name.bright_cyan(), player.id.dimmed());
            }
        }
        Command::Status => print_status(&handle.status().await?),
        Command::Retry => {
            handle.retry_connection().await?;
            println!("{} Reconnecting", "✓".green());
        }
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => {}
    }
    Ok(())
}

/// Announce connection state changes as they happen
async fn watch_status(handle: SyncHandle) {
    let Ok(mut updates) = handle.subscribe().await else {
        return;
    };
    let mut last: Option<(ConnectionState, Option<String>)> = None;
    while let Some(status) = updates.recv().await {
        let key = (status.state, status.error.clone());
        if last.as_ref() == Some(&key) {
            continue;
        }
        last = Some(key);

        let label = match status.state {
            ConnectionState::Connected => "connected".green(),
            ConnectionState::Connecting => "connecting".yellow(),
            ConnectionState::Disconnected => "disconnected".dimmed(),
            ConnectionState::Degraded => "offline (single-user, type retry)".red(),
        };
        match &status.error {
            Some(error) => println!("\n[{}] {}", label, error),
            None => println!("\n[{}]", label),
        }
        prompt();
    }
}

fn print_status(status: &ConnectionStatus) {
    println!("{}", "Sync status".bold());
    println!("  State:       {}", status.state);
    if let Some(player) = &status.player_id {
        println!("  Player:      {}", player.bright_cyan());
    }
    if let Some(error) = &status.error {
        println!("  Error:       {}", error.red());
    }
    println!("  Reconnects:  {}", status.reconnect_attempts);
    println!("  Queued:      {}", status.queued_messages);
    println!(
        "  Clock:       rtt {:.0}ms, offset {}ms",
        status.rtt_ms, status.clock_offset_ms
    );
    println!(
        "  Mutations:   {} pending, {} confirmed, {} superseded, {} lost",
        status.mutations.pending,
        status.mutations.total_confirmed,
        status.mutations.total_superseded,
        status.mutations.total_lost
    );
    println!(
        "  Health:      {} missed, {} out of order, {} hash mismatches",
        status.health.missed_count,
        status.health.out_of_order_count,
        status.health.total_hash_mismatches
    );
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::Show => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<36} {}", key.bright_cyan(), value);
            }
            println!();
            println!("  {}", config::Config::config_file()?.display().to_string().dimmed());
        }
    }

    Ok(())
}
