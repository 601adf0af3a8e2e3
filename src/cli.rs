use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bd")]
#[command(about = "beads - issue tracking backed by an auto-managed dolt server")]
#[command(version)]
pub struct Cli {
    /// Project root (defaults to the nearest directory containing .beads/)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the project's dolt sql-server
    #[command(subcommand)]
    Server(ServerCommands),

    /// Inspect or reset the connection circuit breaker
    #[command(subcommand)]
    Breaker(BreakerCommands),

    /// Promote a wisp to a durable issue
    Promote {
        /// Wisp id
        id: String,

        /// Who is promoting (defaults to $USER)
        #[arg(long)]
        actor: Option<String>,
    },

    /// Inspect compaction of closed issues
    #[command(subcommand)]
    Compact(CompactCommands),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ServerCommands {
    /// Start the server if it is not running
    Start,
    /// Stop the server
    Stop,
    /// Show server state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Make sure a server is reachable and print its port
    Ensure,
    /// Supervise the server and stop it once idle (launched automatically)
    #[command(hide = true)]
    IdleMonitor {
        /// Idle timeout in seconds (0 disables)
        #[arg(long)]
        timeout: u64,
    },
}

#[derive(Subcommand)]
pub enum BreakerCommands {
    /// Show breaker state for the server port
    Status {
        /// Port to inspect (defaults to this project's server port)
        #[arg(long)]
        port: Option<u16>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Close the breaker, discarding recorded failures
    Reset {
        /// Port to reset (defaults to this project's server port)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
pub enum CompactCommands {
    /// Count closed issues per compaction level
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List issues eligible for a compaction tier
    Candidates {
        /// Compaction tier (1 or 2)
        #[arg(long, default_value_t = 1)]
        tier: u8,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Explain whether one issue may be compacted now
    Check {
        /// Issue id
        id: String,

        /// Compaction tier (1 or 2)
        #[arg(long, default_value_t = 1)]
        tier: u8,
    },
}
