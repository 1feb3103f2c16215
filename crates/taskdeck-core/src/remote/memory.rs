//! In-process collection store
//!
//! Holds every collection in memory and pushes a fresh ordered snapshot to
//! each matching watcher after every successful write.
//!
//! When opened with a path, the store takes an exclusive lock on a sibling
//! `.lock` file for as long as it lives, so only one process ever writes the
//! collection file. Writes run one at a time: the change is applied to a
//! staged copy, the copy is written atomically (temp file, then rename) on the
//! blocking pool, and only then does it replace the visible state. A failed
//! persist leaves the visible state untouched.
//!
//! Timestamps come from a clock owned by the collection that never repeats
//! and never runs backwards, so `updatedAt` strictly increases across writes
//! even when the system clock is coarse.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::document::{sort_documents, Direction, Document, FieldValue, Fields};
use super::error::{RemoteError, RemoteResult};
use super::{CollectionClient, Watch, WatchEvent, WatchId};

/// Documents of one collection keyed by id
type DocumentMap = BTreeMap<String, Fields>;

/// Every collection by name
type Collections = HashMap<String, DocumentMap>;

struct Watcher {
    collection: String,
    order_by: String,
    direction: Direction,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct Inner {
    collections: Collections,
    watchers: HashMap<WatchId, Watcher>,
    next_watch_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Read the collection clock
    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn snapshot(&self, collection: &str, order_by: &str, direction: Direction) -> Vec<Document> {
        let mut documents: Vec<Document> = self
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();
        sort_documents(&mut documents, order_by, direction);
        documents
    }

    /// Push the current state of `collection` to its watchers
    ///
    /// Watchers whose receiver is gone are dropped.
    fn notify(&mut self, collection: &str) {
        let mut closed = Vec::new();
        for (id, watcher) in &self.watchers {
            if watcher.collection != collection {
                continue;
            }
            let snapshot = self.snapshot(collection, &watcher.order_by, watcher.direction);
            if watcher.tx.send(WatchEvent::Snapshot(snapshot)).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            debug!("Dropping closed {}", id);
            self.watchers.remove(&id);
        }
    }
}

/// In-memory implementation of [`CollectionClient`]
pub struct MemoryCollection {
    inner: Mutex<Inner>,
    /// Serializes writers across the persist await
    writer: tokio::sync::Mutex<()>,
    path: Option<PathBuf>,
    /// Held open to keep the advisory lock; released on drop
    _lock: Option<File>,
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCollection {
    /// Create an empty, non-persistent collection store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            writer: tokio::sync::Mutex::new(()),
            path: None,
            _lock: None,
        }
    }

    /// Open a collection store backed by a JSON file
    ///
    /// The file is created on the first write if it doesn't exist. Fails with
    /// [`RemoteError::InUse`] while another store has the same file open.
    pub fn open(path: impl Into<PathBuf>) -> RemoteResult<Self> {
        let path = path.into();
        let lock = lock_collection_file(&path)?;
        let mut inner = Inner::default();

        if path.exists() {
            let json =
                fs::read_to_string(&path).map_err(|e| RemoteError::from_io(e, path.clone()))?;
            inner.collections =
                serde_json::from_str(&json).map_err(|e| RemoteError::Storage {
                    path: path.clone(),
                    details: format!("invalid collection file: {}", e),
                })?;
            inner.last_timestamp = latest_timestamp(&inner.collections);
            debug!(
                "Loaded {} collection(s) from {:?}",
                inner.collections.len(),
                path
            );
        }

        Ok(Self {
            inner: Mutex::new(inner),
            writer: tokio::sync::Mutex::new(()),
            path: Some(path),
            _lock: Some(lock),
        })
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Number of live watches
    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the maps consistent; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `change` to a staged copy, persist it, then make it visible
    ///
    /// Readers see the previous state until the write is on disk. The
    /// collection lock is never held while the file is written.
    async fn commit<T, F>(&self, collection: &str, change: F) -> RemoteResult<T>
    where
        F: FnOnce(&mut Collections, DateTime<Utc>) -> RemoteResult<T> + Send,
        T: Send,
    {
        check_collection(collection)?;
        let _writer = self.writer.lock().await;

        let (staged, value) = {
            let mut inner = self.lock();
            let now = inner.now();
            let mut staged = inner.collections.clone();
            let value = change(&mut staged, now)?;
            (staged, value)
        };

        if let Some(ref path) = self.path {
            persist(path.clone(), &staged).await?;
        }

        let mut inner = self.lock();
        inner.collections = staged;
        inner.notify(collection);
        Ok(value)
    }
}

#[async_trait]
impl CollectionClient for MemoryCollection {
    async fn add_document(&self, collection: &str, fields: Fields) -> RemoteResult<String> {
        let id = self
            .commit(collection, |collections, now| {
                let id = new_document_id();
                collections
                    .entry(collection.to_string())
                    .or_default()
                    .insert(id.clone(), resolve_server_timestamps(fields, now));
                Ok(id)
            })
            .await?;
        debug!("Added document {} to {}", id, collection);
        Ok(id)
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> RemoteResult<()> {
        self.commit(collection, |collections, now| {
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| RemoteError::not_found(collection, id))?;
            doc.extend(resolve_server_timestamps(fields, now));
            Ok(())
        })
        .await?;
        debug!("Updated document {} in {}", id, collection);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.commit(collection, |collections, _| {
            collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id))
                .map(|_| ())
                .ok_or_else(|| RemoteError::not_found(collection, id))
        })
        .await?;
        debug!("Deleted document {} from {}", id, collection);
        Ok(())
    }

    async fn query_ordered(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> RemoteResult<Vec<Document>> {
        check_collection(collection)?;
        Ok(self.lock().snapshot(collection, order_by, direction))
    }

    async fn watch_ordered(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> RemoteResult<Watch> {
        check_collection(collection)?;
        let mut inner = self.lock();
        let (tx, events) = mpsc::unbounded_channel();

        inner.next_watch_id += 1;
        let id = WatchId(inner.next_watch_id);

        // The receiver is still in hand, so this send cannot fail.
        let _ = tx.send(WatchEvent::Snapshot(
            inner.snapshot(collection, order_by, direction),
        ));

        inner.watchers.insert(
            id,
            Watcher {
                collection: collection.to_string(),
                order_by: order_by.to_string(),
                direction,
                tx,
            },
        );
        debug!("Registered {} on {}", id, collection);

        Ok(Watch { id, events })
    }

    fn unwatch(&self, id: WatchId) {
        if self.lock().watchers.remove(&id).is_some() {
            debug!("Removed {}", id);
        }
    }
}

fn check_collection(collection: &str) -> RemoteResult<()> {
    if collection.trim().is_empty() {
        return Err(RemoteError::Invalid(
            "collection name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Generate an opaque document id
fn new_document_id() -> String {
    bs58::encode(Uuid::new_v4().as_bytes()).into_string()
}

fn resolve_server_timestamps(fields: Fields, now: DateTime<Utc>) -> Fields {
    fields
        .into_iter()
        .map(|(key, value)| match value {
            FieldValue::ServerTimestamp => (key, FieldValue::Timestamp(now)),
            other => (key, other),
        })
        .collect()
}

/// Newest timestamp stored anywhere, so the clock resumes past it after a reload
fn latest_timestamp(collections: &Collections) -> Option<DateTime<Utc>> {
    collections
        .values()
        .flat_map(|docs| docs.values())
        .flat_map(|fields| fields.values())
        .filter_map(FieldValue::as_timestamp)
        .max()
}

/// Take the exclusive lock that marks `path` as owned by this process
fn lock_collection_file(path: &Path) -> RemoteResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RemoteError::from_io(e, parent.to_path_buf()))?;
    }

    let lock_path = path.with_extension("lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| RemoteError::from_io(e, lock_path.clone()))?;
    file.try_lock_exclusive().map_err(|e| {
        debug!("Could not lock {:?}: {}", lock_path, e);
        RemoteError::InUse {
            path: path.to_path_buf(),
        }
    })?;
    Ok(file)
}

/// Serialize `collections` and write it to `path` on the blocking pool
async fn persist(path: PathBuf, collections: &Collections) -> RemoteResult<()> {
    let json = serde_json::to_vec_pretty(collections).map_err(|e| RemoteError::Storage {
        path: path.clone(),
        details: e.to_string(),
    })?;
    let target = path.clone();
    tokio::task::spawn_blocking(move || atomic_write(&target, &json))
        .await
        .map_err(|e| RemoteError::Storage {
            path,
            details: format!("write task failed: {}", e),
        })?
}

/// Write data atomically (write to temp file, then rename)
fn atomic_write(path: &Path, data: &[u8]) -> RemoteResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RemoteError::from_io(e, parent.to_path_buf()))?;
    }

    let temp_path = path.with_extension("tmp");
    let write_temp = || -> std::io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    };
    write_temp().map_err(|e| RemoteError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|e| {
        warn!("Failed to rename {:?} to {:?}: {}", temp_path, path, e);
        RemoteError::from_io(e, path.to_path_buf())
    })
}
