//! Status command handler

use anyhow::{Context, Result};

use taskdeck_core::{Config, ConnectionStatus, TaskCounts};

use crate::backend::Backend;
use crate::output::{Output, OutputFormat};

/// Show backend, collection and task counts
pub async fn show(backend: &Backend, config: &Config, output: &Output) -> Result<()> {
    let repo = backend.repository(config);
    let tasks = repo.fetch_all().await.context("Failed to load tasks")?;
    let counts = TaskCounts::from_tasks(&tasks);
    let connection = backend.connection_status().map(status_label);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "backend": backend.describe(),
                    "connection": connection,
                    "collection": repo.collection(),
                    "counts": counts,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", counts.total);
        }
        OutputFormat::Human => {
            println!("taskdeck Status");
            println!("===============");
            println!();
            println!("Backend:");
            println!("  Source:     {}", backend.describe());
            if let Some(connection) = connection {
                println!("  Connection: {}", connection);
            }
            println!("  Collection: {}", repo.collection());
            println!();
            println!("Tasks:");
            println!("  Total:     {}", counts.total);
            println!("  Active:    {}", counts.active);
            println!("  Completed: {}", counts.completed);
        }
    }

    Ok(())
}

fn status_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Reconnecting => "reconnecting",
        ConnectionStatus::Closed => "closed",
    }
}
