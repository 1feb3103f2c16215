//! Task command handlers

use anyhow::{bail, Context, Result};

use taskdeck_core::{NewTask, Task, TaskFilter, TaskPatch, TaskRepository};

use crate::output::{Output, OutputFormat};
use crate::prompt::confirm;

/// List tasks, newest first
pub async fn list(repo: &TaskRepository, filter: TaskFilter, output: &Output) -> Result<()> {
    let tasks = repo.fetch_all().await.context("Failed to list tasks")?;
    output.print_tasks(&tasks, filter)
}

/// Show a single task
pub async fn show(repo: &TaskRepository, id: String, output: &Output) -> Result<()> {
    let tasks = repo.fetch_all().await.context("Failed to load tasks")?;
    let task = find_task(&tasks, &id)?;
    output.print_task(task)
}

/// Create a new task
pub async fn add(
    repo: &TaskRepository,
    title: String,
    description: Option<String>,
    output: &Output,
) -> Result<()> {
    let task = NewTask::new(title, description.unwrap_or_default())?;
    let id = repo.create(task).await.context("Failed to create task")?;

    match output.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "id": id })),
        OutputFormat::Quiet => println!("{}", id),
        OutputFormat::Human => output.success(&format!("Created task: {}", id)),
    }
    Ok(())
}

/// Change a task's title and/or description
pub async fn edit(
    repo: &TaskRepository,
    id: String,
    title: Option<String>,
    description: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut patch = TaskPatch::new();
    patch.title = title;
    patch.description = description;
    if patch.is_empty() {
        bail!("Nothing to change. Pass --title and/or --description.");
    }
    patch.validate()?;

    let tasks = repo.fetch_all().await.context("Failed to load tasks")?;
    let task = find_task(&tasks, &id)?;

    repo.update(&task.id, patch)
        .await
        .context("Failed to update task")?;
    output.success(&format!("Updated task: {}", task.id));
    Ok(())
}

/// Flip a task between active and completed
pub async fn toggle(repo: &TaskRepository, id: String, output: &Output) -> Result<()> {
    let tasks = repo.fetch_all().await.context("Failed to load tasks")?;
    let task = find_task(&tasks, &id)?;

    repo.update(&task.id, TaskPatch::completed(!task.completed))
        .await
        .context("Failed to update task")?;

    let state = if task.completed { "active" } else { "completed" };
    output.success(&format!("Marked {} as {}", task.short_id(), state));
    Ok(())
}

/// Delete a task
pub async fn delete(repo: &TaskRepository, id: String, yes: bool, output: &Output) -> Result<()> {
    let tasks = repo.fetch_all().await.context("Failed to load tasks")?;
    let task = find_task(&tasks, &id)?;

    // Confirm deletion
    if output.should_prompt() && !yes {
        println!("Delete task: {} - {}", task.short_id(), task.title);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    repo.delete(&task.id)
        .await
        .context("Failed to delete task")?;
    output.success(&format!("Deleted task: {}", task.id));
    Ok(())
}

/// Find a task by full id or unique prefix
pub fn find_task<'a>(tasks: &'a [Task], id: &str) -> Result<&'a Task> {
    let id = id.trim();
    if id.is_empty() {
        bail!("Task ID must not be empty");
    }

    // Exact match first
    if let Some(task) = tasks.iter().find(|t| t.id == id) {
        return Ok(task);
    }

    // Try prefix match
    let matches: Vec<_> = tasks.iter().filter(|t| t.id.starts_with(id)).collect();

    match matches.as_slice() {
        [] => bail!("No task found matching: {}", id),
        [task] => Ok(*task),
        _ => {
            eprintln!("Multiple tasks match '{}':", id);
            for task in &matches {
                eprintln!("  {} - {}", task.id, task.title);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
