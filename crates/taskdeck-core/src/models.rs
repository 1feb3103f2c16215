//! Data models for taskdeck
//!
//! Defines the task entity and the typed inputs used to create and change
//! tasks. Ids and timestamps are always assigned by the remote collection;
//! nothing in this module reads the local clock for a task that exists
//! remotely.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};

/// A task as last reported by the remote collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Opaque identifier assigned by the collection
    pub id: String,
    /// Task title, never empty for tasks created through taskdeck
    pub title: String,
    /// Free-form description, may be empty
    pub description: String,
    /// Whether the task is done
    pub completed: bool,
    /// When the task was created (remote clock)
    pub created_at: DateTime<Utc>,
    /// When the task was last written (remote clock)
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Short form of the id for display
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

/// Input for creating a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
}

impl NewTask {
    /// Build a new task input, rejecting a blank title
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> TaskResult<Self> {
        let title = validate_title(title.into())?;
        Ok(Self {
            title,
            description: description.into(),
        })
    }
}

/// A partial update to a task
///
/// Any subset of fields may be present. An empty patch is still a valid
/// write: the collection stamps `updatedAt` regardless.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that only sets the completion flag
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the patch before it is sent anywhere
    pub fn validate(&self) -> TaskResult<()> {
        if let Some(ref title) = self.title {
            validate_title(title.clone())?;
        }
        Ok(())
    }

    /// True if no field is set
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.completed.is_none()
    }
}

fn validate_title(title: String) -> TaskResult<String> {
    if title.trim().is_empty() {
        return Err(TaskError::Validation("task title must not be empty".to_string()));
    }
    Ok(title)
}

/// Which tasks a view shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl TaskFilter {
    /// Check whether a task passes this filter
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Active => !task.completed,
            TaskFilter::Completed => task.completed,
        }
    }

    /// Apply the filter, keeping the input order
    pub fn apply<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t)).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskFilter::All => "all",
            TaskFilter::Active => "active",
            TaskFilter::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskFilter {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(TaskFilter::All),
            "active" => Ok(TaskFilter::Active),
            "completed" | "done" => Ok(TaskFilter::Completed),
            other => Err(TaskError::Validation(format!(
                "unknown filter '{}', expected all, active or completed",
                other
            ))),
        }
    }
}

/// Per-filter task counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

impl TaskCounts {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let completed = tasks.iter().filter(|t| t.completed).count();
        Self {
            total: tasks.len(),
            active: tasks.len() - completed,
            completed,
        }
    }

    /// Count for a given filter
    pub fn for_filter(&self, filter: TaskFilter) -> usize {
        match filter {
            TaskFilter::All => self.total,
            TaskFilter::Active => self.active,
            TaskFilter::Completed => self.completed,
        }
    }
}
