//! Collection server
//!
//! Serves any [`CollectionClient`] to [`WsCollection`](crate::remote::WsCollection)
//! clients over WebSocket. Each connection gets a writer task fed by an mpsc
//! channel; requests are handled in arrival order, and each watch runs a
//! forwarder task that turns backend watch events into pushed `snapshot`
//! messages. Watches die with their connection, and stopping the server
//! closes every connection so clients see the disconnect.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::remote::message::{ClientMessage, ServerMessage, WireError};
use crate::remote::{CollectionClient, WatchEvent, WatchId};

/// WebSocket front end for a collection backend
pub struct CollectionServer {
    listener: TcpListener,
    backend: Arc<dyn CollectionClient>,
}

impl CollectionServer {
    /// Bind to `addr` (use port 0 for an ephemeral port)
    pub async fn bind(addr: &str, backend: Arc<dyn CollectionClient>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self { listener, backend })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then close every connection
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!("Collection server listening on ws://{}", addr);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("Failed to accept connection")?;
                    let backend = self.backend.clone();
                    let stop = stop_rx.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, backend, stop).await {
                            warn!("Connection from {} failed: {:#}", peer, e);
                        }
                    });
                }
            }
        }

        let _ = stop_tx.send(true);
        while connections.join_next().await.is_some() {}
        info!("Collection server on {} stopped", addr);
        Ok(())
    }
}

/// Live watches of one connection: client watch id -> backend watch + forwarder
type ConnectionWatches = HashMap<u64, (WatchId, JoinHandle<()>)>;

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    backend: Arc<dyn CollectionClient>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let ws = accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    info!("Client connected from {}", peer);

    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Dropping unencodable reply: {}", e);
                    continue;
                }
            };
            if write.send(Message::Binary(bytes)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let mut watches = ConnectionWatches::new();

    loop {
        let frame = tokio::select! {
            frame = read.next() => frame,
            _ = stop.changed() => break,
        };
        let Some(frame) = frame else {
            break;
        };
        let data = match frame {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Read error from {}: {}", peer, e);
                break;
            }
        };

        match ClientMessage::decode(&data) {
            Ok(message) => {
                handle_message(message, backend.as_ref(), &out_tx, &mut watches).await
            }
            Err(e) => warn!("Ignoring undecodable frame from {}: {}", peer, e),
        }
    }

    for (_, (watch_id, forwarder)) in watches.drain() {
        backend.unwatch(watch_id);
        forwarder.abort();
    }
    drop(out_tx);
    let _ = writer.await;

    info!("Client {} disconnected", peer);
    Ok(())
}

async fn handle_message(
    message: ClientMessage,
    backend: &dyn CollectionClient,
    out: &mpsc::UnboundedSender<ServerMessage>,
    watches: &mut ConnectionWatches,
) {
    debug!("Request: {:?}", message);

    let reply = match message {
        ClientMessage::Add {
            request_id,
            collection,
            fields,
        } => match backend.add_document(&collection, fields).await {
            Ok(id) => ServerMessage::Ok {
                request_id,
                id: Some(id),
            },
            Err(e) => error_reply(request_id, &e),
        },

        ClientMessage::Update {
            request_id,
            collection,
            id,
            fields,
        } => match backend.update_document(&collection, &id, fields).await {
            Ok(()) => ServerMessage::Ok {
                request_id,
                id: None,
            },
            Err(e) => error_reply(request_id, &e),
        },

        ClientMessage::Delete {
            request_id,
            collection,
            id,
        } => match backend.delete_document(&collection, &id).await {
            Ok(()) => ServerMessage::Ok {
                request_id,
                id: None,
            },
            Err(e) => error_reply(request_id, &e),
        },

        ClientMessage::Query {
            request_id,
            collection,
            order_by,
            direction,
        } => match backend.query_ordered(&collection, &order_by, direction).await {
            Ok(documents) => ServerMessage::Documents {
                request_id,
                documents,
            },
            Err(e) => error_reply(request_id, &e),
        },

        ClientMessage::Watch {
            request_id,
            watch_id,
            collection,
            order_by,
            direction,
        } => {
            // Re-registering an id replaces the old watch
            if let Some((old, forwarder)) = watches.remove(&watch_id) {
                backend.unwatch(old);
                forwarder.abort();
            }

            match backend.watch_ordered(&collection, &order_by, direction).await {
                Ok(watch) => {
                    // The ok reply must precede the first snapshot
                    let _ = out.send(ServerMessage::Ok {
                        request_id,
                        id: None,
                    });
                    let forwarder = spawn_forwarder(watch_id, watch.events, out.clone());
                    watches.insert(watch_id, (watch.id, forwarder));
                    debug!("Client watch {} -> {}", watch_id, watch.id);
                    return;
                }
                Err(e) => error_reply(request_id, &e),
            }
        }

        ClientMessage::Unwatch { watch_id } => {
            if let Some((id, forwarder)) = watches.remove(&watch_id) {
                backend.unwatch(id);
                forwarder.abort();
            }
            return;
        }
    };

    let _ = out.send(reply);
}

fn error_reply(request_id: u64, error: &crate::remote::RemoteError) -> ServerMessage {
    ServerMessage::Error {
        request_id,
        error: WireError::from(error),
    }
}

fn spawn_forwarder(
    watch_id: u64,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    out: mpsc::UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = match event {
                WatchEvent::Snapshot(documents) => ServerMessage::Snapshot {
                    watch_id,
                    documents,
                },
                WatchEvent::Error(e) => ServerMessage::WatchError {
                    watch_id,
                    error: WireError::from(&e),
                },
            };
            if out.send(message).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{
        Direction, FieldValue, Fields, MemoryCollection, RemoteError, WsCollection, WsConfig,
    };
    use std::time::Duration;

    async fn start() -> (Arc<MemoryCollection>, WsCollection) {
        let backend = Arc::new(MemoryCollection::new());
        let server = CollectionServer::bind("127.0.0.1:0", backend.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let client = WsCollection::connect(WsConfig::new(format!("ws://{}", addr)))
            .await
            .unwrap();
        (backend, client)
    }

    fn titled(title: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("title".to_string(), title.into());
        fields.insert("createdAt".to_string(), FieldValue::ServerTimestamp);
        fields
    }

    #[tokio::test]
    async fn test_requests_round_trip() {
        let (backend, client) = start().await;

        let id = client.add_document("tasks", titled("A")).await.unwrap();
        assert_eq!(backend.len("tasks"), 1);

        let mut patch = Fields::new();
        patch.insert("completed".to_string(), true.into());
        client.update_document("tasks", &id, patch).await.unwrap();

        let docs = client
            .query_ordered("tasks", "createdAt", Direction::Descending)
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert_eq!(docs[0].get_bool("completed"), Some(true));
        assert!(docs[0].get_timestamp("createdAt").is_some());

        client.delete_document("tasks", &id).await.unwrap();
        assert_eq!(backend.len("tasks"), 0);
    }

    #[tokio::test]
    async fn test_errors_keep_their_kind() {
        let (_backend, client) = start().await;

        let err = client.delete_document("tasks", "missing").await.unwrap_err();
        assert_eq!(err, RemoteError::not_found("tasks", "missing"));

        let err = client.add_document("", titled("A")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_watch_pushes_snapshots_until_unwatched() {
        let (backend, client) = start().await;

        let mut watch = client
            .watch_ordered("tasks", "createdAt", Direction::Descending)
            .await
            .unwrap();
        match watch.events.recv().await {
            Some(WatchEvent::Snapshot(docs)) => assert!(docs.is_empty()),
            other => panic!("Expected initial snapshot, got {:?}", other),
        }

        client.add_document("tasks", titled("A")).await.unwrap();
        match watch.events.recv().await {
            Some(WatchEvent::Snapshot(docs)) => assert_eq!(docs.len(), 1),
            other => panic!("Expected snapshot, got {:?}", other),
        }
        assert_eq!(backend.watcher_count(), 1);

        client.unwatch(watch.id);
        // Unwatch is fire-and-forget; give the server a moment
        for _ in 0..50 {
            if backend.watcher_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(backend.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_watches() {
        let (backend, client) = start().await;
        let _watch = client
            .watch_ordered("tasks", "createdAt", Direction::Descending)
            .await
            .unwrap();
        assert_eq!(backend.watcher_count(), 1);

        drop(client);
        for _ in 0..50 {
            if backend.watcher_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(backend.watcher_count(), 0);
    }
}
