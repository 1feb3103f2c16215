//! Collection protocol message types
//!
//! Messages exchanged between [`WsCollection`](super::WsCollection) and the
//! collection server, CBOR-encoded in binary WebSocket frames.
//!
//! Every request carries a client-chosen `requestId` echoed in the reply.
//! Watch ids are also chosen by the client so a reconnecting client can
//! re-register its watches under the same ids.

use serde::{Deserialize, Serialize};

use super::document::{Direction, Document, Fields};
use super::error::{RemoteError, RemoteResult};

/// Request identifier, unique per connection
pub type RequestId = u64;

/// Messages sent to the collection server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Add {
        request_id: RequestId,
        collection: String,
        fields: Fields,
    },

    #[serde(rename_all = "camelCase")]
    Update {
        request_id: RequestId,
        collection: String,
        id: String,
        fields: Fields,
    },

    #[serde(rename_all = "camelCase")]
    Delete {
        request_id: RequestId,
        collection: String,
        id: String,
    },

    #[serde(rename_all = "camelCase")]
    Query {
        request_id: RequestId,
        collection: String,
        order_by: String,
        direction: Direction,
    },

    #[serde(rename_all = "camelCase")]
    Watch {
        request_id: RequestId,
        watch_id: u64,
        collection: String,
        order_by: String,
        direction: Direction,
    },

    /// Fire-and-forget; the server sends no reply
    #[serde(rename_all = "camelCase")]
    Unwatch { watch_id: u64 },
}

/// Messages received from the collection server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Request succeeded; `id` is set for `add`
    #[serde(rename_all = "camelCase")]
    Ok {
        request_id: RequestId,
        #[serde(default)]
        id: Option<String>,
    },

    /// Reply to `query`
    #[serde(rename_all = "camelCase")]
    Documents {
        request_id: RequestId,
        documents: Vec<Document>,
    },

    /// Request failed
    #[serde(rename_all = "camelCase")]
    Error {
        request_id: RequestId,
        error: WireError,
    },

    /// Pushed watch result
    #[serde(rename_all = "camelCase")]
    Snapshot {
        watch_id: u64,
        documents: Vec<Document>,
    },

    /// Pushed watch failure
    #[serde(rename_all = "camelCase")]
    WatchError { watch_id: u64, error: WireError },
}

/// Error carried on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WireError {
    NotFound { collection: String, id: String },
    Invalid { message: String },
    Internal { message: String },
}

impl From<&RemoteError> for WireError {
    fn from(err: &RemoteError) -> Self {
        match err {
            RemoteError::NotFound { collection, id } => WireError::NotFound {
                collection: collection.clone(),
                id: id.clone(),
            },
            RemoteError::Invalid(message) => WireError::Invalid {
                message: message.clone(),
            },
            other => WireError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl From<WireError> for RemoteError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::NotFound { collection, id } => RemoteError::NotFound { collection, id },
            WireError::Invalid { message } => RemoteError::Invalid(message),
            WireError::Internal { message } => RemoteError::Server(message),
        }
    }
}

impl ClientMessage {
    /// Request id, if this message expects a reply
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            ClientMessage::Add { request_id, .. }
            | ClientMessage::Update { request_id, .. }
            | ClientMessage::Delete { request_id, .. }
            | ClientMessage::Query { request_id, .. }
            | ClientMessage::Watch { request_id, .. } => Some(*request_id),
            ClientMessage::Unwatch { .. } => None,
        }
    }

    /// Encode message to CBOR bytes
    pub fn encode(&self) -> RemoteResult<Vec<u8>> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> RemoteResult<Self> {
        decode(bytes)
    }
}

impl ServerMessage {
    /// Encode message to CBOR bytes
    pub fn encode(&self) -> RemoteResult<Vec<u8>> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> RemoteResult<Self> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(message: &T) -> RemoteResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(message, &mut bytes)
        .map_err(|e| RemoteError::Protocol(format!("CBOR encoding failed: {}", e)))?;
    Ok(bytes)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> RemoteResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| RemoteError::Protocol(format!("CBOR decoding failed: {}", e)))
}
