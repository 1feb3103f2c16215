//! Task store
//!
//! The view-model over one live subscription. The store holds the latest
//! snapshot plus loading and error flags, and turns user intents into
//! repository writes with one notification per outcome.
//!
//! Writes never touch the local task list. The new state arrives with the
//! next snapshot from the collection, so there is a short window where a
//! write has resolved but the list does not show it yet.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = TaskStore::open(repository).await?;
//! let mut notifications = store.take_notifications().unwrap();
//!
//! store.create("Buy milk", "").await?;
//! let mut state = store.subscribe_state();
//! state.changed().await?;
//!
//! store.dispose();
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::TaskResult;
use crate::models::{NewTask, Task, TaskPatch};
use crate::repository::{Subscription, TaskRepository};

/// State exposed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreState {
    /// Latest snapshot, newest first
    pub tasks: Vec<Task>,
    /// True until the first snapshot arrives
    pub loading: bool,
    /// Last watch failure, cleared by the next snapshot
    pub error: Option<String>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            loading: true,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// Outcome of an intent, meant to be shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    /// Underlying error, for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
            detail: None,
        }
    }

    pub fn error(message: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
            detail: Some(detail.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == NotificationLevel::Error
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail {
            Some(ref detail) => write!(f, "{} ({})", self.message, detail),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    fn success_message(self) -> &'static str {
        match self {
            Operation::Create => "Task created successfully!",
            Operation::Update => "Task updated successfully!",
            Operation::Delete => "Task deleted successfully!",
        }
    }

    fn failure_message(self) -> &'static str {
        match self {
            Operation::Create => "Failed to create task. Please try again.",
            Operation::Update => "Failed to update task. Please try again.",
            Operation::Delete => "Failed to delete task. Please try again.",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(verb)
    }
}

/// Cloneable handle for issuing intents
///
/// Holds no reference to store state, so an intent that completes after the
/// store is disposed only emits its notification.
#[derive(Clone)]
pub struct TaskIntents {
    repository: TaskRepository,
    notify: mpsc::UnboundedSender<Notification>,
}

impl TaskIntents {
    /// Create a task; a blank title fails before anything is sent
    pub async fn create(&self, title: &str, description: &str) -> TaskResult<()> {
        let result = match NewTask::new(title, description) {
            Ok(task) => self.repository.create(task).await.map(|_| ()),
            Err(e) => Err(e),
        };
        self.report(Operation::Create, result)
    }

    pub async fn update(&self, id: &str, patch: TaskPatch) -> TaskResult<()> {
        let result = match patch.validate() {
            Ok(()) => self.repository.update(id, patch).await,
            Err(e) => Err(e),
        };
        self.report(Operation::Update, result)
    }

    pub async fn delete(&self, id: &str) -> TaskResult<()> {
        let result = self.repository.delete(id).await;
        self.report(Operation::Delete, result)
    }

    /// Flip the completion flag from the value the caller last saw
    pub async fn toggle_complete(&self, id: &str, current_completed: bool) -> TaskResult<()> {
        self.update(id, TaskPatch::completed(!current_completed))
            .await
    }

    fn report(&self, operation: Operation, result: TaskResult<()>) -> TaskResult<()> {
        let notification = match result {
            Ok(()) => {
                debug!("{} succeeded", operation);
                Notification::success(operation.success_message())
            }
            Err(ref e) => {
                warn!("Failed to {} task: {}", operation, e);
                Notification::error(operation.failure_message(), e)
            }
        };
        // Nobody listening is fine
        let _ = self.notify.send(notification);
        result
    }
}

/// Live view-model over the task collection
pub struct TaskStore {
    state: Arc<watch::Sender<StoreState>>,
    intents: TaskIntents,
    notifications: Option<mpsc::UnboundedReceiver<Notification>>,
    subscription: Option<Subscription>,
}

impl TaskStore {
    /// Open the store and subscribe to the collection
    ///
    /// Fails if the live watch cannot be established.
    pub async fn open(repository: TaskRepository) -> TaskResult<Self> {
        let (state_tx, _) = watch::channel(StoreState::default());
        let state = Arc::new(state_tx);
        let (notify, notifications) = mpsc::unbounded_channel();

        let on_snapshot = {
            let state = state.clone();
            move |tasks: Vec<Task>| {
                debug!("Snapshot with {} task(s)", tasks.len());
                state.send_modify(|s| {
                    s.tasks = tasks;
                    s.loading = false;
                    s.error = None;
                });
            }
        };
        let on_error = {
            let state = state.clone();
            move |e: crate::error::TaskError| {
                state.send_modify(|s| {
                    s.loading = false;
                    s.error = Some(e.to_string());
                });
            }
        };

        let subscription = repository
            .subscribe_with_errors(on_snapshot, on_error)
            .await?;
        info!("Task store opened on {}", repository.collection());

        Ok(Self {
            state,
            intents: TaskIntents { repository, notify },
            notifications: Some(notifications),
            subscription: Some(subscription),
        })
    }

    /// Copy of the current state
    pub fn state(&self) -> StoreState {
        self.state.borrow().clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.borrow().tasks.clone()
    }

    pub fn loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Receiver that wakes on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    /// Take the notification receiver; only the first call returns it
    pub fn take_notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notifications.take()
    }

    /// Handle for issuing intents from other tasks
    pub fn intents(&self) -> TaskIntents {
        self.intents.clone()
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.intents.repository
    }

    pub async fn create(&self, title: &str, description: &str) -> TaskResult<()> {
        self.intents.create(title, description).await
    }

    pub async fn update(&self, id: &str, patch: TaskPatch) -> TaskResult<()> {
        self.intents.update(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> TaskResult<()> {
        self.intents.delete(id).await
    }

    pub async fn toggle_complete(&self, id: &str, current_completed: bool) -> TaskResult<()> {
        self.intents.toggle_complete(id, current_completed).await
    }

    /// Stop receiving snapshots; state stays at its last value
    pub fn dispose(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            info!("Task store disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.subscription.is_none()
    }
}

impl Drop for TaskStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::remote::{
        CollectionClient, Direction, Document, Fields, MemoryCollection, RemoteError,
        RemoteResult, Watch, WatchEvent, WatchId,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn open_store() -> (Arc<MemoryCollection>, TaskStore) {
        let backend = Arc::new(MemoryCollection::new());
        let store = TaskStore::open(TaskRepository::new(backend.clone()))
            .await
            .unwrap();
        (backend, store)
    }

    async fn wait_for(store: &TaskStore, f: impl FnMut(&StoreState) -> bool) -> StoreState {
        let mut rx = store.subscribe_state();
        let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(f))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed")
            .clone();
        state
    }

    async fn next_notification(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_initial_state_is_loading() {
        let state = StoreState::default();
        assert!(state.loading);
        assert!(state.tasks.is_empty());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_first_snapshot_clears_loading() {
        let (_backend, store) = open_store().await;
        let state = wait_for(&store, |s| !s.loading).await;
        assert!(state.tasks.is_empty());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_create_notifies_and_arrives_by_snapshot() {
        let (_backend, mut store) = open_store().await;
        let mut notes = store.take_notifications().unwrap();
        assert!(store.take_notifications().is_none());

        store.create("Buy milk", "2 litres").await.unwrap();
        let note = next_notification(&mut notes).await;
        assert_eq!(note, Notification::success("Task created successfully!"));

        let state = wait_for(&store, |s| s.tasks.len() == 1).await;
        assert_eq!(state.tasks[0].title, "Buy milk");
        assert!(!state.tasks[0].completed);
    }

    #[tokio::test]
    async fn test_blank_title_never_reaches_collection() {
        let (backend, mut store) = open_store().await;
        let mut notes = store.take_notifications().unwrap();

        let err = store.create("   ", "").await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(backend.len("tasks"), 0);

        let note = next_notification(&mut notes).await;
        assert!(note.is_error());
        assert_eq!(note.message, "Failed to create task. Please try again.");
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_update_leaves_state_alone() {
        let (_backend, mut store) = open_store().await;
        let mut notes = store.take_notifications().unwrap();
        let before = wait_for(&store, |s| !s.loading).await;

        let err = store
            .update("missing", TaskPatch::completed(true))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            next_notification(&mut notes).await.message,
            "Failed to update task. Please try again."
        );
        assert_eq!(store.state(), before);
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_tasks_unchanged() {
        let (_backend, mut store) = open_store().await;
        let mut notes = store.take_notifications().unwrap();

        store.create("A", "").await.unwrap();
        store.create("B", "").await.unwrap();
        next_notification(&mut notes).await;
        next_notification(&mut notes).await;
        let before = wait_for(&store, |s| s.tasks.len() == 2).await;

        let err = store.delete("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            next_notification(&mut notes).await.message,
            "Failed to delete task. Please try again."
        );

        // No snapshot follows a rejected write
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.state(), before);
    }

    #[tokio::test]
    async fn test_toggle_and_delete() {
        let (_backend, mut store) = open_store().await;
        let mut notes = store.take_notifications().unwrap();

        store.create("A", "").await.unwrap();
        next_notification(&mut notes).await;
        let task = wait_for(&store, |s| s.tasks.len() == 1).await.tasks.remove(0);

        store.toggle_complete(&task.id, task.completed).await.unwrap();
        assert_eq!(
            next_notification(&mut notes).await.message,
            "Task updated successfully!"
        );
        let state = wait_for(&store, |s| s.tasks.first().map_or(false, |t| t.completed)).await;
        assert!(state.tasks[0].updated_at > task.updated_at);

        store.delete(&task.id).await.unwrap();
        assert_eq!(
            next_notification(&mut notes).await.message,
            "Task deleted successfully!"
        );
        wait_for(&store, |s| s.tasks.is_empty()).await;

        // Second delete of the same id is an error
        assert!(store.delete(&task.id).await.is_err());
        assert!(next_notification(&mut notes).await.is_error());
    }

    #[tokio::test]
    async fn test_dispose_freezes_state_but_intents_still_run() {
        let (backend, mut store) = open_store().await;
        let mut notes = store.take_notifications().unwrap();
        wait_for(&store, |s| !s.loading).await;

        store.dispose();
        store.dispose();
        assert!(store.is_disposed());
        assert_eq!(backend.watcher_count(), 0);

        let intents = store.intents();
        intents.create("after dispose", "").await.unwrap();
        assert!(!next_notification(&mut notes).await.is_error());
        assert_eq!(backend.len("tasks"), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_intents_outlive_store() {
        let (backend, mut store) = open_store().await;
        let mut notes = store.take_notifications().unwrap();
        let intents = store.intents();
        drop(store);
        assert_eq!(backend.watcher_count(), 0);

        intents.create("late", "").await.unwrap();
        assert!(!next_notification(&mut notes).await.is_error());
    }

    /// Client whose watch events are pushed by the test
    #[derive(Default)]
    struct ScriptedClient {
        events: Mutex<Option<mpsc::UnboundedSender<WatchEvent>>>,
    }

    impl ScriptedClient {
        fn push(&self, event: WatchEvent) {
            if let Some(tx) = self.events.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    #[async_trait]
    impl CollectionClient for ScriptedClient {
        async fn add_document(&self, _: &str, _: Fields) -> RemoteResult<String> {
            Err(RemoteError::Transport("offline".to_string()))
        }

        async fn update_document(&self, _: &str, _: &str, _: Fields) -> RemoteResult<()> {
            Err(RemoteError::Transport("offline".to_string()))
        }

        async fn delete_document(&self, _: &str, _: &str) -> RemoteResult<()> {
            Err(RemoteError::Transport("offline".to_string()))
        }

        async fn query_ordered(&self, _: &str, _: &str, _: Direction) -> RemoteResult<Vec<Document>> {
            Ok(Vec::new())
        }

        async fn watch_ordered(&self, _: &str, _: &str, _: Direction) -> RemoteResult<Watch> {
            let (tx, events) = mpsc::unbounded_channel();
            *self.events.lock().unwrap() = Some(tx);
            Ok(Watch {
                id: WatchId(1),
                events,
            })
        }

        fn unwatch(&self, _: WatchId) {
            self.events.lock().unwrap().take();
        }
    }

    fn titled(id: &str) -> Document {
        let mut fields = Fields::new();
        fields.insert("title".to_string(), id.into());
        fields.insert("createdAt".to_string(), chrono::Utc::now().into());
        fields.insert("updatedAt".to_string(), chrono::Utc::now().into());
        Document::new(id, fields)
    }

    #[tokio::test]
    async fn test_watch_error_sets_error_until_next_snapshot() {
        let client = Arc::new(ScriptedClient::default());
        let store = TaskStore::open(TaskRepository::new(client.clone()))
            .await
            .unwrap();
        assert!(store.loading());

        client.push(WatchEvent::Error(RemoteError::Transport("connection lost".to_string())));
        let state = wait_for(&store, |s| s.error.is_some()).await;
        assert!(!state.loading);
        assert!(state.error.unwrap().contains("connection lost"));

        client.push(WatchEvent::Snapshot(vec![titled("a")]));
        let state = wait_for(&store, |s| s.error.is_none()).await;
        assert_eq!(state.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_last_snapshot_wins() {
        let client = Arc::new(ScriptedClient::default());
        let store = TaskStore::open(TaskRepository::new(client.clone()))
            .await
            .unwrap();

        client.push(WatchEvent::Snapshot(vec![titled("a"), titled("b")]));
        client.push(WatchEvent::Snapshot(vec![]));
        client.push(WatchEvent::Snapshot(vec![titled("c")]));

        let state = wait_for(&store, |s| s.tasks.len() == 1 && s.tasks[0].id == "c").await;
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_transport_failure_notifies() {
        let client = Arc::new(ScriptedClient::default());
        let mut store = TaskStore::open(TaskRepository::new(client))
            .await
            .unwrap();
        let mut notes = store.take_notifications().unwrap();

        let err = store.create("A", "").await.unwrap_err();
        assert!(matches!(err, TaskError::RemoteWrite(RemoteError::Transport(_))));
        let note = next_notification(&mut notes).await;
        assert!(note.to_string().contains("offline"));
        assert!(store.tasks().is_empty());
    }
}
