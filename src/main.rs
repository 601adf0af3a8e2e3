mod cli;
mod commands;
mod output;

use beads_dolt::config::find_project_root;
use beads_dolt::server::StatePaths;
use beads_dolt::Error as BdError;
use clap::{CommandFactory, Parser};
use cli::{BreakerCommands, Cli, Commands, CompactCommands, ServerCommands};
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(bd_error) = e.downcast_ref::<BdError>() {
            eprintln!("Error: {}", bd_error);
            if let Some(suggestion) = bd_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        return Ok(());
    }

    let root = resolve_root(cli.root.as_deref())?;

    // The idle monitor is detached from any terminal and logs to a file
    let log_file = match &cli.command {
        Commands::Server(ServerCommands::IdleMonitor { .. }) => {
            Some(StatePaths::new(&root).monitor_log)
        }
        _ => None,
    };
    init_tracing(log_file.as_deref())?;

    let out = output::CliOutput;
    match cli.command {
        Commands::Server(ServerCommands::Start) => commands::run_server_start(&root, &out).await,
        Commands::Server(ServerCommands::Stop) => commands::run_server_stop(&root, &out).await,
        Commands::Server(ServerCommands::Status { json }) => {
            commands::run_server_status(&root, json, &out).await
        }
        Commands::Server(ServerCommands::Ensure) => commands::run_server_ensure(&root, &out).await,
        Commands::Server(ServerCommands::IdleMonitor { timeout }) => {
            commands::run_idle_monitor(&root, timeout).await
        }
        Commands::Breaker(BreakerCommands::Status { port, json }) => {
            commands::run_breaker_status(&root, port, json, &out)
        }
        Commands::Breaker(BreakerCommands::Reset { port }) => {
            commands::run_breaker_reset(&root, port, &out)
        }
        Commands::Promote { id, actor } => {
            commands::run_promote(&root, &id, actor.as_deref(), &out).await
        }
        Commands::Compact(CompactCommands::Stats { json }) => {
            commands::run_compact_stats(&root, json, &out).await
        }
        Commands::Compact(CompactCommands::Candidates { tier, json }) => {
            commands::run_compact_candidates(&root, tier, json, &out).await
        }
        Commands::Compact(CompactCommands::Check { id, tier }) => {
            commands::run_compact_check(&root, &id, tier, &out).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}

/// `--root` as given, else the nearest ancestor of the working directory
/// containing `.beads/`.
fn resolve_root(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(root) => Ok(root.canonicalize().unwrap_or_else(|_| root.to_path_buf())),
        None => Ok(find_project_root(&std::env::current_dir()?)?),
    }
}

/// Log to stderr, or to `log_file` for the detached idle monitor.
fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = |default: &str| {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
    };

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter("info"))
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter("info"))
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}
