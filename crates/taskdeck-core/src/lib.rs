//! taskdeck Core Library
//!
//! This crate provides the core functionality for taskdeck, a task list
//! kept in a remote document collection and mirrored live into every client.
//!
//! # Architecture
//!
//! - **Collection**: source of truth. Reached through the `CollectionClient`
//!   trait, either in process (`MemoryCollection`) or over WebSocket
//!   (`WsCollection`).
//! - **Repository**: typed task reads and writes plus live subscriptions that
//!   deliver the full ordered list on every change.
//! - **Store**: view-model over one subscription with intents and
//!   notifications.
//!
//! # Quick Start
//!
//! ```text
//! let collection = Arc::new(MemoryCollection::new());
//! let mut store = TaskStore::open(TaskRepository::new(collection)).await?;
//!
//! store.create("Buy milk", "").await?;
//! store.subscribe_state().changed().await?;
//! let tasks = store.tasks();
//! ```
//!
//! # Modules
//!
//! - `store`: View-model over the live task list (main entry point)
//! - `repository`: Task reads, writes and subscriptions
//! - `models`: Task, inputs, filters
//! - `remote`: Collection client trait, implementations and wire protocol
//! - `server`: WebSocket collection server
//! - `config`: Application configuration
//! - `error`: Task error taxonomy

pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod repository;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{TaskError, TaskResult};
pub use models::{NewTask, Task, TaskCounts, TaskFilter, TaskPatch};
pub use remote::{
    CollectionClient, ConnectionStatus, MemoryCollection, RemoteError, WsCollection, WsConfig,
};
pub use repository::{Subscription, TaskRepository};
pub use server::CollectionServer;
pub use store::{Notification, NotificationLevel, StoreState, TaskIntents, TaskStore};
