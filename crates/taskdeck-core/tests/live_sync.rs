//! Integration tests for the task store over a real WebSocket server
//!
//! Each test starts a collection server on an ephemeral port backed by a
//! `MemoryCollection` and drives one or more stores through `WsCollection`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use taskdeck_core::{
    CollectionServer, ConnectionStatus, MemoryCollection, StoreState, TaskPatch, TaskRepository,
    TaskStore, WsCollection, WsConfig,
};

/// A running server that can be stopped
struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(addr: &str, backend: Arc<MemoryCollection>) -> Self {
        let server = CollectionServer::bind(addr, backend).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            stop: Some(stop),
            handle,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

fn fast_reconnect(url: String) -> WsConfig {
    let mut config = WsConfig::new(url);
    config.initial_reconnect_delay = Duration::from_millis(50);
    config.max_reconnect_delay = Duration::from_millis(200);
    config.request_timeout = Duration::from_secs(5);
    config
}

async fn open_store(url: String) -> (Arc<WsCollection>, TaskStore) {
    let client = Arc::new(WsCollection::connect(fast_reconnect(url)).await.unwrap());
    let store = TaskStore::open(TaskRepository::new(client.clone()))
        .await
        .unwrap();
    (client, store)
}

async fn wait_for(store: &TaskStore, f: impl FnMut(&StoreState) -> bool) -> StoreState {
    let mut rx = store.subscribe_state();
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
        .await
        .expect("timed out waiting for store state")
        .expect("store state channel closed")
        .clone();
    state
}

#[tokio::test]
async fn test_store_lifecycle_over_websocket() {
    let backend = Arc::new(MemoryCollection::new());
    let server = TestServer::start("127.0.0.1:0", backend.clone()).await;
    let (_client, mut store) = open_store(server.url()).await;
    let mut notes = store.take_notifications().unwrap();

    let state = wait_for(&store, |s| !s.loading).await;
    assert!(state.tasks.is_empty());

    store.create("Buy milk", "2 litres").await.unwrap();
    store.create("Walk dog", "").await.unwrap();
    let state = wait_for(&store, |s| s.tasks.len() == 2).await;
    // Newest first
    assert_eq!(state.tasks[0].title, "Walk dog");
    assert_eq!(state.tasks[1].title, "Buy milk");
    assert_eq!(state.tasks[1].description, "2 litres");

    let milk = state.tasks[1].clone();
    store
        .toggle_complete(&milk.id, milk.completed)
        .await
        .unwrap();
    let state = wait_for(&store, |s| s.tasks.iter().any(|t| t.completed)).await;
    let toggled = state.tasks.iter().find(|t| t.id == milk.id).unwrap();
    assert!(toggled.completed);
    assert_eq!(toggled.created_at, milk.created_at);
    assert!(toggled.updated_at > milk.updated_at);

    store.delete(&milk.id).await.unwrap();
    wait_for(&store, |s| s.tasks.len() == 1).await;

    // One notification per intent, all successes
    for _ in 0..4 {
        let note = notes.recv().await.unwrap();
        assert!(!note.is_error(), "unexpected failure: {}", note);
    }

    // Deleting twice fails with a not-found error from the server
    let err = store.delete(&milk.id).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(notes.recv().await.unwrap().is_error());

    store.dispose();
    server.stop().await;
}

#[tokio::test]
async fn test_clients_see_each_others_writes() {
    let backend = Arc::new(MemoryCollection::new());
    let server = TestServer::start("127.0.0.1:0", backend.clone()).await;
    let (_a_client, a) = open_store(server.url()).await;
    let (_b_client, b) = open_store(server.url()).await;

    a.create("from a", "").await.unwrap();
    let state = wait_for(&b, |s| s.tasks.len() == 1).await;
    let id = state.tasks[0].id.clone();

    b.update(&id, TaskPatch::new().with_title("edited by b"))
        .await
        .unwrap();
    let state = wait_for(&a, |s| s.tasks.first().map_or(false, |t| t.title == "edited by b")).await;
    assert_eq!(state.tasks.len(), 1);

    drop(a);
    drop(b);
    server.stop().await;
}

#[tokio::test]
async fn test_disposed_store_ignores_later_changes() {
    let backend = Arc::new(MemoryCollection::new());
    let server = TestServer::start("127.0.0.1:0", backend.clone()).await;
    let (_client, mut store) = open_store(server.url()).await;
    wait_for(&store, |s| !s.loading).await;

    let intents = store.intents();
    store.dispose();
    intents.create("after dispose", "").await.unwrap();
    assert_eq!(backend.len("tasks"), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.tasks().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_store_survives_server_restart() {
    let backend = Arc::new(MemoryCollection::new());
    let server = TestServer::start("127.0.0.1:0", backend.clone()).await;
    let addr = server.addr;
    let (client, store) = open_store(server.url()).await;

    store.create("before restart", "").await.unwrap();
    wait_for(&store, |s| s.tasks.len() == 1).await;

    server.stop().await;
    let state = wait_for(&store, |s| s.error.is_some()).await;
    assert!(!state.loading);
    // The list keeps its last known contents
    assert_eq!(state.tasks.len(), 1);

    // Writes fail while the server is gone
    assert!(store.create("while down", "").await.is_err());

    let server = TestServer::start(&addr.to_string(), backend.clone()).await;

    // The watch is re-registered and a fresh snapshot clears the error
    let state = wait_for(&store, |s| s.error.is_none()).await;
    assert_eq!(state.tasks.len(), 1);
    assert_eq!(client.status(), ConnectionStatus::Connected);

    store.create("after restart", "").await.unwrap();
    let state = wait_for(&store, |s| s.tasks.len() == 2).await;
    assert_eq!(state.tasks[0].title, "after restart");

    drop(store);
    server.stop().await;
}

#[tokio::test]
async fn test_fetch_all_over_websocket() {
    let backend = Arc::new(MemoryCollection::new());
    let server = TestServer::start("127.0.0.1:0", backend.clone()).await;
    let client = Arc::new(WsCollection::connect(fast_reconnect(server.url())).await.unwrap());
    let repo = TaskRepository::with_collection(client, "chores");

    assert!(repo.fetch_all().await.unwrap().is_empty());
    repo.create(taskdeck_core::NewTask::new("sweep", "").unwrap())
        .await
        .unwrap();
    let tasks = repo.fetch_all().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(backend.len("chores"), 1);
    assert_eq!(backend.len("tasks"), 0);

    server.stop().await;
}
