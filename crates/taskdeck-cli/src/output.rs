//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::{Context, Result};
use serde::Serialize;

use taskdeck_core::{Notification, StoreState, Task, TaskCounts, TaskFilter};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Check if output is JSON
    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single task
    pub fn print_task(&self, task: &Task) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", task.id);
                println!("Title:       {}", task.title);
                if !task.description.is_empty() {
                    println!("Description: {}", task.description);
                }
                println!(
                    "Status:      {}",
                    if task.completed { "completed" } else { "active" }
                );
                println!("Created:     {}", task.created_at.format("%Y-%m-%d %H:%M"));
                println!("Updated:     {}", task.updated_at.format("%Y-%m-%d %H:%M"));
            }
            OutputFormat::Json => print_json(task)?,
            OutputFormat::Quiet => println!("{}", task.id),
        }
        Ok(())
    }

    /// Print a filtered task list with per-filter counts
    pub fn print_tasks(&self, all: &[Task], filter: TaskFilter) -> Result<()> {
        let tasks = filter.apply(all);
        match self.format {
            OutputFormat::Human => {
                if tasks.is_empty() {
                    match filter {
                        TaskFilter::All => println!("No tasks."),
                        other => println!("No {} tasks.", other),
                    }
                } else {
                    for task in &tasks {
                        println!("{}", task_line(task));
                    }
                }
                println!();
                println!("{}", counts_line(&TaskCounts::from_tasks(all), filter));
            }
            OutputFormat::Json => print_json(&tasks)?,
            OutputFormat::Quiet => {
                for task in &tasks {
                    println!("{}", task.id);
                }
            }
        }
        Ok(())
    }

    /// Render the live session view
    pub fn print_state(&self, state: &StoreState, filter: TaskFilter) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!();
                if state.loading {
                    println!("Loading tasks...");
                    return Ok(());
                }
                if let Some(ref error) = state.error {
                    println!("! {}", error);
                }
                self.print_tasks(&state.tasks, filter)?;
            }
            OutputFormat::Json => {
                let tasks = filter.apply(&state.tasks);
                println!(
                    "{}",
                    serde_json::json!({
                        "loading": state.loading,
                        "error": state.error,
                        "filter": filter,
                        "counts": TaskCounts::from_tasks(&state.tasks),
                        "tasks": tasks,
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
        Ok(())
    }

    /// Print a store notification
    pub fn notification(&self, notification: &Notification) {
        match self.format {
            OutputFormat::Human => {
                if notification.is_error() {
                    eprintln!("✗ {}", notification);
                } else {
                    println!("✓ {}", notification.message);
                }
            }
            OutputFormat::Json => println!("{}", serde_json::json!({ "notification": notification })),
            OutputFormat::Quiet => {
                if notification.is_error() {
                    eprintln!("{}", notification);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

/// One line per task: checkbox, short id, title, description preview
fn task_line(task: &Task) -> String {
    let check = if task.completed { "[x]" } else { "[ ]" };
    let mut line = format!("{} {} | {}", check, task.short_id(), truncate(&task.title, 40));
    if !task.description.is_empty() {
        line.push_str(" | ");
        line.push_str(&truncate_line(&task.description, 40));
    }
    line
}

fn counts_line(counts: &TaskCounts, filter: TaskFilter) -> String {
    let mark = |f: TaskFilter| if f == filter { "*" } else { "" };
    format!(
        "{}all {} | {}active {} | {}completed {}",
        mark(TaskFilter::All),
        counts.total,
        mark(TaskFilter::Active),
        counts.active,
        mark(TaskFilter::Completed),
        counts.completed
    )
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(title: &str, description: &str, completed: bool) -> Task {
        let now = Utc::now();
        Task {
            id: "4Nd3kQx9Zr2PwLm".to_string(),
            title: title.to_string(),
            description: description.to_string(),
            completed,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        // Multi-byte characters are not split
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("single line", 20), "single line");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
        assert_eq!(
            truncate_line("very long single line here", 10),
            "very lo..."
        );
    }

    #[test]
    fn test_task_line() {
        assert_eq!(task_line(&task("Buy milk", "", false)), "[ ] 4Nd3kQx9 | Buy milk");
        assert_eq!(
            task_line(&task("Buy milk", "2 litres\nsemi-skimmed", true)),
            "[x] 4Nd3kQx9 | Buy milk | 2 litres"
        );
    }

    #[test]
    fn test_counts_line_marks_active_filter() {
        let tasks = vec![task("a", "", false), task("b", "", true), task("c", "", false)];
        let counts = TaskCounts::from_tasks(&tasks);
        assert_eq!(
            counts_line(&counts, TaskFilter::Active),
            "all 3 | *active 2 | completed 1"
        );
    }
}
