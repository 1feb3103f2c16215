//! Remote collection clients
//!
//! The task repository talks to its backing store through the
//! [`CollectionClient`] trait: add, update, delete, ordered query, and a
//! live ordered watch that pushes the full result set on every change.
//!
//! ## Implementations
//!
//! - [`MemoryCollection`]: in-process collection with an optional JSON file
//!   behind it. Also what `taskdeck serve` exposes over the network.
//! - [`WsCollection`]: WebSocket client for a collection server, with
//!   request correlation and automatic reconnection.
//!
//! ## Watches
//!
//! `watch_ordered` returns a [`Watch`]: an id plus a channel of
//! [`WatchEvent`]s. The first event is the current snapshot. Calling
//! `unwatch` (or dropping the receiver) detaches it.

mod client;
mod document;
mod error;
mod memory;
pub mod message;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use client::{ConnectionStatus, WsCollection, WsConfig};
pub use document::{sort_documents, Direction, Document, FieldValue, Fields};
pub use error::{RemoteError, RemoteResult};
pub use memory::MemoryCollection;

/// Identifier of a live watch, unique per client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Events delivered to a watcher
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Full ordered result set at one point in time
    Snapshot(Vec<Document>),
    /// The watch could not deliver; later snapshots may still follow
    Error(RemoteError),
}

/// A live watch registration
#[derive(Debug)]
pub struct Watch {
    pub id: WatchId,
    pub events: mpsc::UnboundedReceiver<WatchEvent>,
}

/// Document-oriented collection store
#[async_trait]
pub trait CollectionClient: Send + Sync {
    /// Insert a document, returning the id the collection assigned
    async fn add_document(&self, collection: &str, fields: Fields) -> RemoteResult<String>;

    /// Merge fields into an existing document
    async fn update_document(&self, collection: &str, id: &str, fields: Fields)
        -> RemoteResult<()>;

    /// Remove a document
    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// Read the whole collection ordered by one field
    async fn query_ordered(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> RemoteResult<Vec<Document>>;

    /// Start a live ordered watch over the collection
    async fn watch_ordered(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> RemoteResult<Watch>;

    /// Detach a watch; no events are sent for it afterwards
    fn unwatch(&self, id: WatchId);
}
