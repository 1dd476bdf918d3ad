use anyhow::Result;
use clap::Parser;

mod cli;
mod mcp_server;

use cli::{Cli, Commands};
use cw_config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    let command = cli.command.unwrap_or(Commands::Serve {
        use_pty: false,
        default_shell: None,
        max_sessions: None,
        log_level: None,
        journal: None,
    });

    if let Commands::Serve {
        use_pty,
        ref default_shell,
        max_sessions,
        ref log_level,
        ref journal,
    } = command
    {
        if use_pty {
            config.use_pty = true;
        }
        if let Some(shell) = default_shell {
            config.default_shell = Some(shell.clone());
        }
        if let Some(max) = max_sessions {
            config.max_sessions = max;
        }
        if let Some(level) = log_level {
            // Flags reuse the env-var parsing, including its validation.
            config.apply_env_overrides(|name| {
                (name == "LOG_LEVEL").then(|| level.clone())
            });
        }
        if let Some(path) = journal {
            config.journal_path = Some(path.clone());
        }
    }

    // Logs go to stderr; stdout carries JSON-RPC frames only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(config.log_level.as_filter_str())
                }),
        )
        .try_init()
        .ok();

    match command {
        Commands::Serve { .. } => mcp_server::serve(config).await,
        Commands::Tools => {
            println!(
                "{}",
                serde_json::to_string_pretty(&mcp_server::tool_catalog())?
            );
            Ok(())
        }
    }
}
