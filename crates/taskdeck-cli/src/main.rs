//! taskdeck CLI
//!
//! Command-line interface for taskdeck - a live-synced task list.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskdeck_core::{Config, TaskFilter};

mod backend;
mod commands;
mod output;
mod prompt;

use backend::Backend;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(about = "taskdeck - A task list that stays in sync across clients")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks, newest first
    #[command(alias = "ls")]
    List {
        /// Which tasks to show (all, active, completed)
        #[arg(short, long, default_value = "all")]
        filter: TaskFilter,
    },
    /// Show task details
    Show {
        /// Task ID (full or prefix)
        id: String,
    },
    /// Create a task
    Add {
        /// Task title
        title: String,
        /// Task description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Edit a task's title or description
    Edit {
        /// Task ID (full or prefix)
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New description
        #[arg(long)]
        description: Option<String>,
    },
    /// Flip a task between active and completed
    #[command(alias = "done")]
    Toggle {
        /// Task ID (full or prefix)
        id: String,
    },
    /// Delete a task
    #[command(alias = "rm")]
    Delete {
        /// Task ID (full or prefix)
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Interactive session that follows the list live (default)
    Watch,
    /// Serve the local collection to other clients over WebSocket
    Serve {
        /// Address to listen on (overrides bind_addr)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show backend, connection and task counts
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_url, collection, bind_addr,
        /// reconnect_initial_ms, reconnect_max_ms, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands must work even when the config is broken
    if let Some(Commands::Config { command }) = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config)?;

    let command = cli.command.unwrap_or(Commands::Watch);

    // Serving hosts the local file directly
    if let Commands::Serve { bind } = command {
        return commands::serve::serve(&config, bind, &output).await;
    }

    let backend = Backend::open(&config).await?;
    let repo = backend.repository(&config);

    match command {
        Commands::List { filter } => commands::task::list(&repo, filter, &output).await,
        Commands::Show { id } => commands::task::show(&repo, id, &output).await,
        Commands::Add { title, description } => {
            commands::task::add(&repo, title, description, &output).await
        }
        Commands::Edit {
            id,
            title,
            description,
        } => commands::task::edit(&repo, id, title, description, &output).await,
        Commands::Toggle { id } => commands::task::toggle(&repo, id, &output).await,
        Commands::Delete { id, yes } => commands::task::delete(&repo, id, yes, &output).await,
        Commands::Watch => commands::session::run(repo, &output).await,
        Commands::Status => commands::status::show(&backend, &config, &output).await,
        Commands::Serve { .. } | Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` selects the level (default `warn`). Logs go to `log_file` when
/// configured so they don't interleave with command output.
fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
    Ok(())
}
