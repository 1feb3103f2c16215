//! WebSocket collection client
//!
//! [`WsCollection`] is a cheap handle in front of a single connection task.
//! Calls are sent to the task over an mpsc channel and answered on a oneshot,
//! matched to server replies by request id:
//!
//! ```text
//!   WsCollection            mpsc        connection task
//!   .add_document()   ───────────────▶  pending: request id -> reply
//!   .watch_ordered()                    watches: watch id -> event sender
//!                     ◀───────────────  reconnect with backoff
//!                         oneshot
//! ```
//!
//! When the connection drops, in-flight requests fail with a transport
//! error, every live watch gets a [`WatchEvent::Error`], and the task
//! reconnects with exponential backoff. After reconnecting it re-registers
//! each live watch under its original id, so the server resumes pushing
//! snapshots to the same receivers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::document::{Direction, Document, Fields};
use super::error::{RemoteError, RemoteResult};
use super::message::{ClientMessage, RequestId, ServerMessage};
use super::{CollectionClient, Watch, WatchEvent, WatchId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Connected and serving requests
    Connected,
    /// Connection lost, waiting to reconnect
    Reconnecting,
    /// Client shut down
    Closed,
}

/// Configuration for a WebSocket collection client
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket URL of the collection server
    pub url: String,
    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,
    /// How long a single request may wait for its reply
    ///
    /// A write that times out may still have been applied by the server;
    /// the caller only learns that no reply arrived in time.
    pub request_timeout: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Successful reply payloads
#[derive(Debug)]
enum Reply {
    Ok(Option<String>),
    Documents(Vec<Document>),
}

type ReplyTx = oneshot::Sender<RemoteResult<Reply>>;

/// Commands sent to the connection task
enum Command {
    Request {
        message: ClientMessage,
        reply: ReplyTx,
    },
    Watch {
        request_id: RequestId,
        watch_id: u64,
        entry: WatchEntry,
        reply: ReplyTx,
    },
    Unwatch {
        watch_id: u64,
    },
    /// The caller stopped waiting for this request
    Cancel {
        request_id: RequestId,
    },
    Shutdown,
}

struct WatchEntry {
    collection: String,
    order_by: String,
    direction: Direction,
    events: mpsc::UnboundedSender<WatchEvent>,
}

/// A request waiting for its reply
enum Pending {
    Caller(ReplyTx),
    Watch { watch_id: u64, reply: ReplyTx },
    /// Re-registration of an existing watch after a reconnect
    Rewatch(u64),
}

/// WebSocket implementation of [`CollectionClient`]
pub struct WsCollection {
    config: WsConfig,
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    ids: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
}

impl WsCollection {
    /// Connect to a collection server
    ///
    /// Fails if the first connection attempt fails. Later disconnections are
    /// handled in the background.
    pub async fn connect(config: WsConfig) -> RemoteResult<Self> {
        info!("Connecting to collection server at {}", config.url);
        let stream = open(&config.url).await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let ids = Arc::new(AtomicU64::new(1));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let task = ConnectionTask {
            config: config.clone(),
            ids: ids.clone(),
            in_flight: in_flight.clone(),
            command_rx,
            status_tx,
            watches: HashMap::new(),
        };
        tokio::spawn(task.run(stream));

        Ok(Self {
            config,
            command_tx,
            status_rx,
            ids,
            in_flight,
        })
    }

    /// Server URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Get the current status
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Requests sent on the current connection and still awaiting a reply
    pub fn pending_requests(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Stop the connection task
    ///
    /// Pending requests fail with [`RemoteError::Closed`]; watch channels close.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, build: impl FnOnce(RequestId) -> ClientMessage) -> RemoteResult<Reply> {
        let (reply, rx) = oneshot::channel();
        let request_id = self.next_id();
        let message = build(request_id);
        self.command_tx
            .send(Command::Request { message, reply })
            .map_err(|_| RemoteError::Closed)?;
        self.await_reply(request_id, rx).await
    }

    async fn await_reply(
        &self,
        request_id: RequestId,
        rx: oneshot::Receiver<RemoteResult<Reply>>,
    ) -> RemoteResult<Reply> {
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RemoteError::Closed),
            Err(_) => {
                // Forget the request so a reply that never comes doesn't pile up
                let _ = self.command_tx.send(Command::Cancel { request_id });
                Err(RemoteError::Transport(format!(
                    "no reply from {} within {:?}",
                    self.config.url, self.config.request_timeout
                )))
            }
        }
    }
}

impl Drop for WsCollection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl CollectionClient for WsCollection {
    async fn add_document(&self, collection: &str, fields: Fields) -> RemoteResult<String> {
        let reply = self
            .request(|request_id| ClientMessage::Add {
                request_id,
                collection: collection.to_string(),
                fields,
            })
            .await?;
        match reply {
            Reply::Ok(Some(id)) => Ok(id),
            other => Err(unexpected("add", &other)),
        }
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> RemoteResult<()> {
        let reply = self
            .request(|request_id| ClientMessage::Update {
                request_id,
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
            })
            .await?;
        match reply {
            Reply::Ok(_) => Ok(()),
            other => Err(unexpected("update", &other)),
        }
    }

    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()> {
        let reply = self
            .request(|request_id| ClientMessage::Delete {
                request_id,
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?;
        match reply {
            Reply::Ok(_) => Ok(()),
            other => Err(unexpected("delete", &other)),
        }
    }

    async fn query_ordered(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> RemoteResult<Vec<Document>> {
        let reply = self
            .request(|request_id| ClientMessage::Query {
                request_id,
                collection: collection.to_string(),
                order_by: order_by.to_string(),
                direction,
            })
            .await?;
        match reply {
            Reply::Documents(documents) => Ok(documents),
            other => Err(unexpected("query", &other)),
        }
    }

    async fn watch_ordered(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> RemoteResult<Watch> {
        let watch_id = self.next_id();
        let request_id = self.next_id();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();

        self.command_tx
            .send(Command::Watch {
                request_id,
                watch_id,
                entry: WatchEntry {
                    collection: collection.to_string(),
                    order_by: order_by.to_string(),
                    direction,
                    events: events_tx,
                },
                reply,
            })
            .map_err(|_| RemoteError::Closed)?;

        match self.await_reply(request_id, rx).await {
            Ok(_) => Ok(Watch {
                id: WatchId(watch_id),
                events,
            }),
            Err(e) => {
                self.unwatch(WatchId(watch_id));
                Err(e)
            }
        }
    }

    fn unwatch(&self, id: WatchId) {
        let _ = self.command_tx.send(Command::Unwatch { watch_id: id.0 });
    }
}

fn unexpected(operation: &str, reply: &Reply) -> RemoteError {
    RemoteError::Protocol(format!("unexpected reply to {}: {:?}", operation, reply))
}

async fn open(url: &str) -> RemoteResult<WsStream> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| RemoteError::Transport(format!("failed to connect to {}: {}", url, e)))?;
    Ok(stream)
}

/// Why a connection ended
enum Exit {
    Shutdown,
    Disconnected(String),
}

/// Owns the socket and all per-connection state
struct ConnectionTask {
    config: WsConfig,
    ids: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    watches: HashMap<u64, WatchEntry>,
}

impl ConnectionTask {
    /// Main loop with reconnection
    async fn run(mut self, first: WsStream) {
        let mut stream = Some(first);
        let mut reconnect_delay = self.config.initial_reconnect_delay;

        loop {
            let ws = match stream.take() {
                Some(ws) => ws,
                None => match open(&self.config.url).await {
                    Ok(ws) => {
                        info!("Reconnected to {}", self.config.url);
                        ws
                    }
                    Err(e) => {
                        warn!("Reconnect failed: {}", e);
                        if self.backoff(&mut reconnect_delay).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            let _ = self.status_tx.send(ConnectionStatus::Connected);
            // Connection established, reset backoff
            reconnect_delay = self.config.initial_reconnect_delay;

            let exit = self.serve(ws).await;
            self.in_flight.store(0, Ordering::Relaxed);
            match exit {
                Exit::Shutdown => break,
                Exit::Disconnected(reason) => {
                    warn!("Connection to {} lost: {}", self.config.url, reason);
                    let _ = self.status_tx.send(ConnectionStatus::Reconnecting);
                    let error = RemoteError::Transport(format!("connection lost: {}", reason));
                    for entry in self.watches.values() {
                        let _ = entry.events.send(WatchEvent::Error(error.clone()));
                    }
                }
            }

            if self.backoff(&mut reconnect_delay).await {
                break;
            }
        }

        debug!("Connection task for {} stopped", self.config.url);
        let _ = self.status_tx.send(ConnectionStatus::Closed);
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Wait before reconnecting, answering commands meanwhile
    ///
    /// Returns true if the client shut down during the wait.
    async fn backoff(&mut self, delay: &mut Duration) -> bool {
        let sleep = tokio::time::sleep(*delay);
        tokio::pin!(sleep);
        // Exponential backoff
        *delay = (*delay * 2).min(self.config.max_reconnect_delay);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = self.command_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => return true,
                    Some(Command::Request { reply, .. }) | Some(Command::Watch { reply, .. }) => {
                        let _ = reply.send(Err(RemoteError::Transport(format!(
                            "not connected to {}",
                            self.config.url
                        ))));
                    }
                    Some(Command::Unwatch { watch_id }) => {
                        self.watches.remove(&watch_id);
                    }
                    Some(Command::Cancel { .. }) => {}
                },
            }
        }
    }

    /// Serve one connection until it drops or the client shuts down
    async fn serve(&mut self, ws: WsStream) -> Exit {
        let (mut write, mut read) = ws.split();
        let mut pending: HashMap<RequestId, Pending> = HashMap::new();

        // Re-register watches that outlived the previous connection
        let rewatch: Vec<ClientMessage> = self
            .watches
            .iter()
            .map(|(watch_id, entry)| {
                let request_id = self.next_id();
                pending.insert(request_id, Pending::Rewatch(*watch_id));
                ClientMessage::Watch {
                    request_id,
                    watch_id: *watch_id,
                    collection: entry.collection.clone(),
                    order_by: entry.order_by.clone(),
                    direction: entry.direction,
                }
            })
            .collect();
        for message in &rewatch {
            if let Err(reason) = send_frame(&mut write, message).await {
                return self.disconnected(pending, reason);
            }
        }
        if !rewatch.is_empty() {
            debug!("Re-registered {} watch(es)", rewatch.len());
        }

        loop {
            self.in_flight.store(pending.len(), Ordering::Relaxed);

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let outgoing = match cmd {
                        None | Some(Command::Shutdown) => {
                            write.close().await.ok();
                            fail_all(pending, RemoteError::Closed);
                            return Exit::Shutdown;
                        }
                        Some(Command::Request { message, reply }) => {
                            match message.request_id() {
                                Some(request_id) => {
                                    pending.insert(request_id, Pending::Caller(reply));
                                    Some(message)
                                }
                                None => {
                                    let _ = reply.send(Err(RemoteError::Invalid(
                                        "request without request id".to_string(),
                                    )));
                                    None
                                }
                            }
                        }
                        Some(Command::Watch { request_id, watch_id, entry, reply }) => {
                            let message = ClientMessage::Watch {
                                request_id,
                                watch_id,
                                collection: entry.collection.clone(),
                                order_by: entry.order_by.clone(),
                                direction: entry.direction,
                            };
                            self.watches.insert(watch_id, entry);
                            pending.insert(request_id, Pending::Watch { watch_id, reply });
                            Some(message)
                        }
                        Some(Command::Unwatch { watch_id }) => self
                            .watches
                            .remove(&watch_id)
                            .map(|_| ClientMessage::Unwatch { watch_id }),
                        Some(Command::Cancel { request_id }) => match pending.remove(&request_id) {
                            // The server may still register it; make sure it goes away
                            Some(Pending::Watch { watch_id, .. }) => self
                                .watches
                                .remove(&watch_id)
                                .map(|_| ClientMessage::Unwatch { watch_id }),
                            _ => None,
                        },
                    };

                    if let Some(message) = outgoing {
                        if let Err(reason) = send_frame(&mut write, &message).await {
                            return self.disconnected(pending, reason);
                        }
                    }
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => match ServerMessage::decode(&data) {
                            Ok(message) => {
                                if let Some(reply) = self.dispatch(message, &mut pending) {
                                    if let Err(reason) = send_frame(&mut write, &reply).await {
                                        return self.disconnected(pending, reason);
                                    }
                                }
                            }
                            Err(e) => warn!("Dropping undecodable frame: {}", e),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            return self.disconnected(pending, "closed by server".to_string());
                        }
                        Some(Err(e)) => return self.disconnected(pending, e.to_string()),
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    /// Route one server message; may produce a message to send back
    fn dispatch(
        &mut self,
        message: ServerMessage,
        pending: &mut HashMap<RequestId, Pending>,
    ) -> Option<ClientMessage> {
        match message {
            ServerMessage::Ok { request_id, id } => {
                self.resolve(pending, request_id, Ok(Reply::Ok(id)))
            }
            ServerMessage::Documents {
                request_id,
                documents,
            } => self.resolve(pending, request_id, Ok(Reply::Documents(documents))),
            ServerMessage::Error { request_id, error } => {
                self.resolve(pending, request_id, Err(error.into()))
            }
            ServerMessage::Snapshot {
                watch_id,
                documents,
            } => self.deliver(watch_id, WatchEvent::Snapshot(documents)),
            ServerMessage::WatchError { watch_id, error } => {
                self.deliver(watch_id, WatchEvent::Error(error.into()))
            }
        }
    }

    fn resolve(
        &mut self,
        pending: &mut HashMap<RequestId, Pending>,
        request_id: RequestId,
        result: RemoteResult<Reply>,
    ) -> Option<ClientMessage> {
        match pending.remove(&request_id) {
            Some(Pending::Caller(reply)) => {
                let _ = reply.send(result);
                None
            }
            Some(Pending::Watch { watch_id, reply }) => {
                let failed = result.is_err();
                let delivered = reply.send(result).is_ok();
                if failed || !delivered {
                    // Caller gave up or the server refused: forget the watch
                    self.watches.remove(&watch_id);
                    if !failed {
                        return Some(ClientMessage::Unwatch { watch_id });
                    }
                }
                None
            }
            Some(Pending::Rewatch(watch_id)) => {
                if let Err(e) = result {
                    warn!("Failed to re-register watch {}: {}", watch_id, e);
                    if let Some(entry) = self.watches.get(&watch_id) {
                        let _ = entry.events.send(WatchEvent::Error(e));
                    }
                }
                None
            }
            None => {
                debug!("Reply for unknown request {}", request_id);
                None
            }
        }
    }

    fn deliver(&mut self, watch_id: u64, event: WatchEvent) -> Option<ClientMessage> {
        let entry = self.watches.get(&watch_id)?;
        if entry.events.send(event).is_err() {
            // Receiver dropped without an explicit unwatch
            self.watches.remove(&watch_id);
            return Some(ClientMessage::Unwatch { watch_id });
        }
        None
    }

    fn disconnected(&mut self, pending: HashMap<RequestId, Pending>, reason: String) -> Exit {
        for (_, entry) in pending {
            if let Pending::Watch { watch_id, .. } = &entry {
                self.watches.remove(watch_id);
            }
            fail_one(entry, RemoteError::Transport(format!("connection lost: {}", reason)));
        }
        Exit::Disconnected(reason)
    }
}

fn fail_all(pending: HashMap<RequestId, Pending>, error: RemoteError) {
    for (_, entry) in pending {
        fail_one(entry, error.clone());
    }
}

fn fail_one(entry: Pending, error: RemoteError) {
    match entry {
        Pending::Caller(reply) | Pending::Watch { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        Pending::Rewatch(_) => {}
    }
}

/// Encode and send one frame
///
/// An `Err` carries the reason the connection is no longer usable.
async fn send_frame(write: &mut WsWrite, message: &ClientMessage) -> Result<(), String> {
    let bytes = match message.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Dropping unencodable message: {}", e);
            return Ok(());
        }
    };
    write
        .send(Message::Binary(bytes))
        .await
        .map_err(|e| e.to_string())
}
