//! Live task session
//!
//! Opens a task store, re-renders on every snapshot, and reads intents from
//! stdin one line at a time:
//!
//! ```text
//! add <title> [| <description>]
//! edit <id> <title> [| <description>]
//! toggle <id>
//! rm <id>
//! filter <all|active|completed>
//! quit
//! ```
//!
//! Intents run on their own tasks, so the view keeps updating while a write
//! is in flight. Their outcome shows up as a notification line.

use std::io::BufRead;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::debug;

use taskdeck_core::{TaskFilter, TaskIntents, TaskPatch, TaskRepository, TaskStore};

use crate::commands::task::find_task;
use crate::output::{Output, OutputFormat};

/// One line of session input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Add {
        title: String,
        description: String,
    },
    Edit {
        id: String,
        title: Option<String>,
        description: Option<String>,
    },
    Toggle {
        id: String,
    },
    Remove {
        id: String,
    },
    Filter(TaskFilter),
    Help,
    Quit,
}

const USAGE: &str = "\
Commands:
  add <title> [| <description>]        create a task
  edit <id> <title> [| <description>]  change a task
  toggle <id>                          mark done / not done
  rm <id>                              delete a task
  filter <all|active|completed>        change the view
  quit                                 leave the session";

/// Parse a line of input; blank lines yield `None`
pub fn parse(line: &str) -> Result<Option<SessionCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "add" | "new" => {
            let (title, description) = split_description(rest);
            SessionCommand::Add {
                title: title.to_string(),
                description: description.unwrap_or_default().to_string(),
            }
        }
        "edit" => {
            let (id, rest) = match rest.split_once(char::is_whitespace) {
                Some((id, rest)) => (id, rest.trim()),
                None => (rest, ""),
            };
            if id.is_empty() || id.starts_with('|') {
                return Err("usage: edit <id> <title> [| <description>]".to_string());
            }
            let (title, description) = split_description(rest);
            SessionCommand::Edit {
                id: id.to_string(),
                title: (!title.is_empty()).then(|| title.to_string()),
                description: description.map(str::to_string),
            }
        }
        "toggle" | "done" => SessionCommand::Toggle {
            id: require_id(rest, "toggle")?,
        },
        "rm" | "delete" => SessionCommand::Remove {
            id: require_id(rest, "rm")?,
        },
        "filter" => SessionCommand::Filter(rest.parse().map_err(|e| format!("{}", e))?),
        "help" | "?" => SessionCommand::Help,
        "quit" | "exit" | "q" => SessionCommand::Quit,
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(Some(command))
}

fn split_description(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('|') {
        Some((title, description)) => (title.trim(), Some(description.trim())),
        None => (rest.trim(), None),
    }
}

fn require_id(rest: &str, verb: &str) -> Result<String, String> {
    match rest.split_whitespace().next() {
        Some(id) => Ok(id.to_string()),
        None => Err(format!("usage: {} <id>", verb)),
    }
}

/// Run the live session until `quit`, end of input, or Ctrl-C
pub async fn run(repository: TaskRepository, output: &Output) -> Result<()> {
    let mut store = TaskStore::open(repository)
        .await
        .context("Failed to subscribe to tasks")?;
    let mut notifications = store
        .take_notifications()
        .context("Notifications already taken")?;
    let mut state_rx = store.subscribe_state();
    let intents = store.intents();
    let mut lines = spawn_stdin_reader();
    let mut filter = TaskFilter::All;

    if output.format == OutputFormat::Human {
        println!("{}", USAGE);
    }
    let initial = state_rx.borrow_and_update().clone();
    output.print_state(&initial, filter)?;

    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                output.print_state(&state, filter)?;
            }
            Some(notification) = notifications.recv() => output.notification(&notification),
            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("End of input");
                    break;
                };
                match parse(&line) {
                    Ok(None) => {}
                    Ok(Some(SessionCommand::Quit)) => break,
                    Ok(Some(SessionCommand::Help)) => println!("{}", USAGE),
                    Ok(Some(SessionCommand::Filter(f))) => {
                        filter = f;
                        output.print_state(&store.state(), filter)?;
                    }
                    Ok(Some(command)) => {
                        if let Err(e) = dispatch(command, &store, &intents) {
                            eprintln!("✗ {:#}", e);
                        }
                    }
                    Err(usage) => eprintln!("{}", usage),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    store.dispose();
    Ok(())
}

/// Resolve ids against the current list and start the intent
fn dispatch(command: SessionCommand, store: &TaskStore, intents: &TaskIntents) -> Result<()> {
    let intents = intents.clone();
    match command {
        SessionCommand::Add { title, description } => {
            tokio::spawn(async move {
                let _ = intents.create(&title, &description).await;
            });
        }
        SessionCommand::Edit {
            id,
            title,
            description,
        } => {
            let id = find_task(&store.tasks(), &id)?.id.clone();
            let mut patch = TaskPatch::new();
            patch.title = title;
            patch.description = description;
            tokio::spawn(async move {
                let _ = intents.update(&id, patch).await;
            });
        }
        SessionCommand::Toggle { id } => {
            let tasks = store.tasks();
            let task = find_task(&tasks, &id)?;
            let (id, completed) = (task.id.clone(), task.completed);
            tokio::spawn(async move {
                let _ = intents.toggle_complete(&id, completed).await;
            });
        }
        SessionCommand::Remove { id } => {
            let id = find_task(&store.tasks(), &id)?.id.clone();
            tokio::spawn(async move {
                let _ = intents.delete(&id).await;
            });
        }
        SessionCommand::Filter(_) | SessionCommand::Help | SessionCommand::Quit => {}
    }
    Ok(())
}

/// Read stdin on a plain thread so a pending read never blocks runtime shutdown
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(line: &str) -> SessionCommand {
        parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_add() {
        assert_eq!(
            parsed("add Buy milk | 2 litres"),
            SessionCommand::Add {
                title: "Buy milk".to_string(),
                description: "2 litres".to_string(),
            }
        );
        assert_eq!(
            parsed("add Walk dog"),
            SessionCommand::Add {
                title: "Walk dog".to_string(),
                description: String::new(),
            }
        );
        // Blank titles are left for the store to reject
        assert_eq!(
            parsed("add"),
            SessionCommand::Add {
                title: String::new(),
                description: String::new(),
            }
        );
    }

    #[test]
    fn test_parse_edit() {
        assert_eq!(
            parsed("edit 4Nd3 New title | new description"),
            SessionCommand::Edit {
                id: "4Nd3".to_string(),
                title: Some("New title".to_string()),
                description: Some("new description".to_string()),
            }
        );
        assert_eq!(
            parsed("edit 4Nd3 | only the description"),
            SessionCommand::Edit {
                id: "4Nd3".to_string(),
                title: None,
                description: Some("only the description".to_string()),
            }
        );
        assert!(parse("edit").is_err());
        assert!(parse("edit | x").is_err());
    }

    #[test]
    fn test_parse_id_commands() {
        assert_eq!(
            parsed("toggle abc"),
            SessionCommand::Toggle {
                id: "abc".to_string()
            }
        );
        assert_eq!(
            parsed("done abc"),
            SessionCommand::Toggle {
                id: "abc".to_string()
            }
        );
        assert_eq!(
            parsed("RM abc"),
            SessionCommand::Remove {
                id: "abc".to_string()
            }
        );
        assert!(parse("toggle").is_err());
        assert!(parse("rm  ").is_err());
    }

    #[test]
    fn test_parse_filter_and_control() {
        assert_eq!(
            parsed("filter active"),
            SessionCommand::Filter(TaskFilter::Active)
        );
        assert_eq!(
            parsed("filter done"),
            SessionCommand::Filter(TaskFilter::Completed)
        );
        assert!(parse("filter someday").is_err());
        assert_eq!(parsed("quit"), SessionCommand::Quit);
        assert_eq!(parsed("?"), SessionCommand::Help);
        assert!(parse("frobnicate").is_err());
    }
}
