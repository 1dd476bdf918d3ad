use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cmdwatch",
    about = "Liveness-aware terminal server: runs shell commands over MCP and classifies whether they are running, waiting, stuck, or done",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the JSON-RPC protocol over stdio (the default when no
    /// subcommand is given).
    Serve {
        /// Run commands under a pseudo-terminal.
        #[arg(long)]
        use_pty: bool,

        /// Shell binary to use instead of the platform default.
        #[arg(long)]
        default_shell: Option<String>,

        /// Soft cap on concurrently live sessions.
        #[arg(long)]
        max_sessions: Option<usize>,

        /// Log verbosity: error, warn, info, or debug.
        #[arg(long)]
        log_level: Option<String>,

        /// Append completed-session records to this JSONL file.
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Print the tool catalog as JSON and exit.
    Tools,
}
