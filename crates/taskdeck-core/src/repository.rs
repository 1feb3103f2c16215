//! Task repository
//!
//! Maps documents of one collection to [`Task`]s and back. Writes go straight
//! to the collection; reads are either a one-shot ordered query or a live
//! subscription.
//!
//! ## Snapshots
//!
//! Every change to the collection delivers the full task list, newest first,
//! rather than a delta. Each change therefore costs O(collection size) to
//! transfer and normalize. Task lists are small, and replacing the list
//! wholesale means a subscriber's state depends only on the last snapshot it
//! saw.
//!
//! ## Timestamps
//!
//! `createdAt` and `updatedAt` are always written as
//! [`FieldValue::ServerTimestamp`], so ordering follows the collection's
//! clock. A document that arrives without a timestamp is given the local
//! time instead of being rejected.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{TaskError, TaskResult};
use crate::models::{NewTask, Task, TaskPatch};
use crate::remote::{
    CollectionClient, Direction, Document, FieldValue, Fields, WatchEvent, WatchId,
};

/// Document field names
pub mod fields {
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const COMPLETED: &str = "completed";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Collection used when none is configured
pub const DEFAULT_COLLECTION: &str = "tasks";

/// Typed access to the task collection
#[derive(Clone)]
pub struct TaskRepository {
    client: Arc<dyn CollectionClient>,
    collection: String,
}

impl TaskRepository {
    /// Repository over the default `tasks` collection
    pub fn new(client: Arc<dyn CollectionClient>) -> Self {
        Self::with_collection(client, DEFAULT_COLLECTION)
    }

    pub fn with_collection(client: Arc<dyn CollectionClient>, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Read every task, newest first
    pub async fn fetch_all(&self) -> TaskResult<Vec<Task>> {
        let documents = self
            .client
            .query_ordered(&self.collection, fields::CREATED_AT, Direction::Descending)
            .await
            .map_err(TaskError::RemoteRead)?;
        Ok(normalize(documents))
    }

    /// Watch the collection, calling `on_snapshot` with the full list on every change
    ///
    /// The first call carries the current contents. Watch errors are logged
    /// and otherwise ignored; use [`subscribe_with_errors`](Self::subscribe_with_errors)
    /// to observe them.
    pub async fn subscribe<F>(&self, on_snapshot: F) -> TaskResult<Subscription>
    where
        F: FnMut(Vec<Task>) + Send + 'static,
    {
        self.start_subscription(Listener {
            on_snapshot: Box::new(on_snapshot),
            on_error: None,
        })
        .await
    }

    /// Like [`subscribe`](Self::subscribe), also reporting watch errors
    pub async fn subscribe_with_errors<F, E>(
        &self,
        on_snapshot: F,
        on_error: E,
    ) -> TaskResult<Subscription>
    where
        F: FnMut(Vec<Task>) + Send + 'static,
        E: FnMut(TaskError) + Send + 'static,
    {
        self.start_subscription(Listener {
            on_snapshot: Box::new(on_snapshot),
            on_error: Some(Box::new(on_error)),
        })
        .await
    }

    async fn start_subscription(&self, listener: Listener) -> TaskResult<Subscription> {
        let watch = self
            .client
            .watch_ordered(&self.collection, fields::CREATED_AT, Direction::Descending)
            .await
            .map_err(TaskError::RemoteRead)?;

        let watch_id = watch.id;
        let mut events = watch.events;
        let listener = Arc::new(Mutex::new(Some(listener)));
        let shared = listener.clone();
        let collection = self.collection.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let event = match event {
                    WatchEvent::Snapshot(documents) => Ok(normalize(documents)),
                    WatchEvent::Error(e) => {
                        warn!("Watch on {} reported an error: {}", collection, e);
                        Err(TaskError::RemoteRead(e))
                    }
                };

                let mut guard = shared.lock().unwrap_or_else(|p| p.into_inner());
                let Some(listener) = guard.as_mut() else {
                    break;
                };
                match event {
                    Ok(tasks) => (listener.on_snapshot)(tasks),
                    Err(e) => {
                        if let Some(on_error) = listener.on_error.as_mut() {
                            on_error(e);
                        }
                    }
                }
            }
            debug!("Watch stream for {} ended", collection);
        });

        debug!("Subscribed to {} ({})", self.collection, watch_id);
        Ok(Subscription {
            listener,
            task,
            client: self.client.clone(),
            watch_id,
        })
    }

    /// Create a task, returning its id
    ///
    /// The input is not re-validated; [`NewTask::new`] already did that.
    pub async fn create(&self, task: NewTask) -> TaskResult<String> {
        let mut doc = Fields::new();
        doc.insert(fields::TITLE.to_string(), task.title.into());
        doc.insert(fields::DESCRIPTION.to_string(), task.description.into());
        doc.insert(fields::COMPLETED.to_string(), false.into());
        doc.insert(fields::CREATED_AT.to_string(), FieldValue::ServerTimestamp);
        doc.insert(fields::UPDATED_AT.to_string(), FieldValue::ServerTimestamp);

        let id = self
            .client
            .add_document(&self.collection, doc)
            .await
            .map_err(TaskError::RemoteWrite)?;
        debug!("Created task {}", id);
        Ok(id)
    }

    /// Apply a patch; `updatedAt` is stamped even if the patch is empty
    pub async fn update(&self, id: &str, patch: TaskPatch) -> TaskResult<()> {
        let mut doc = Fields::new();
        if let Some(title) = patch.title {
            doc.insert(fields::TITLE.to_string(), title.into());
        }
        if let Some(description) = patch.description {
            doc.insert(fields::DESCRIPTION.to_string(), description.into());
        }
        if let Some(completed) = patch.completed {
            doc.insert(fields::COMPLETED.to_string(), completed.into());
        }
        doc.insert(fields::UPDATED_AT.to_string(), FieldValue::ServerTimestamp);

        self.client
            .update_document(&self.collection, id, doc)
            .await
            .map_err(TaskError::RemoteWrite)?;
        debug!("Updated task {}", id);
        Ok(())
    }

    /// Delete a task
    ///
    /// Deleting an id that no longer exists is an error.
    pub async fn delete(&self, id: &str) -> TaskResult<()> {
        self.client
            .delete_document(&self.collection, id)
            .await
            .map_err(TaskError::RemoteWrite)?;
        debug!("Deleted task {}", id);
        Ok(())
    }
}

type SnapshotFn = Box<dyn FnMut(Vec<Task>) + Send>;
type ErrorFn = Box<dyn FnMut(TaskError) + Send>;

struct Listener {
    on_snapshot: SnapshotFn,
    on_error: Option<ErrorFn>,
}

/// Handle to a live subscription
///
/// Callbacks run on a tokio task while holding a lock shared with
/// [`cancel`](Self::cancel): once `cancel` returns, no callback is running
/// and none will run again. Callbacks must not cancel their own
/// subscription. Dropping the handle cancels it.
pub struct Subscription {
    listener: Arc<Mutex<Option<Listener>>>,
    task: JoinHandle<()>,
    client: Arc<dyn CollectionClient>,
    watch_id: WatchId,
}

impl Subscription {
    /// Stop the subscription; later calls do nothing
    pub fn cancel(&self) {
        let detached = self
            .listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if detached.is_some() {
            self.task.abort();
            self.client.unwatch(self.watch_id);
            debug!("Cancelled subscription {}", self.watch_id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.listener
            .lock()
            .map(|l| l.is_some())
            .unwrap_or(false)
    }

    pub fn watch_id(&self) -> WatchId {
        self.watch_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Turn a snapshot into tasks, newest first
///
/// Missing fields get defaults: empty strings, `false`, and the local time
/// for timestamps. The sort is stable, so tasks created at the same instant
/// keep the collection's order.
pub fn normalize(documents: Vec<Document>) -> Vec<Task> {
    let mut tasks: Vec<Task> = documents.into_iter().map(task_from_document).collect();
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    tasks
}

fn task_from_document(doc: Document) -> Task {
    let timestamp = |key: &str| {
        doc.get_timestamp(key).unwrap_or_else(|| {
            warn!("Task {} has no {}; using local time", doc.id, key);
            Utc::now()
        })
    };
    let created_at = timestamp(fields::CREATED_AT);
    let updated_at = timestamp(fields::UPDATED_AT);

    Task {
        title: doc.get_str(fields::TITLE).unwrap_or_default().to_string(),
        description: doc
            .get_str(fields::DESCRIPTION)
            .unwrap_or_default()
            .to_string(),
        completed: doc.get_bool(fields::COMPLETED).unwrap_or(false),
        created_at,
        updated_at,
        id: doc.id,
    }
}
