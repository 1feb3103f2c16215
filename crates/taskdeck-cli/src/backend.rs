//! Collection backend selection
//!
//! With `remote_url` set, commands talk to a collection server over
//! WebSocket. Otherwise they use the local collection file in `data_dir`,
//! which one process at a time may hold open.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use taskdeck_core::{
    CollectionClient, Config, ConnectionStatus, MemoryCollection, RemoteError, TaskRepository,
    WsCollection,
};

/// An opened collection backend
pub enum Backend {
    Local(Arc<MemoryCollection>),
    Remote(Arc<WsCollection>),
}

impl Backend {
    /// Open the backend the configuration asks for
    pub async fn open(config: &Config) -> Result<Self> {
        match config.ws_config() {
            Some(ws) => {
                let url = ws.url.clone();
                let client = WsCollection::connect(ws)
                    .await
                    .with_context(|| format!("Failed to connect to {}", url))?;
                Ok(Backend::Remote(Arc::new(client)))
            }
            None => Ok(Backend::Local(Arc::new(Self::open_local(config)?))),
        }
    }

    /// Open the local collection file, creating the data directory if needed
    pub fn open_local(config: &Config) -> Result<MemoryCollection> {
        config.ensure_data_dir()?;
        let path = config.collection_path();
        debug!("Opening local collection at {:?}", path);
        MemoryCollection::open(&path).map_err(|e| match e {
            RemoteError::InUse { .. } => anyhow!(
                "{}. Set remote_url to the address of `taskdeck serve` to share it.",
                e
            ),
            other => anyhow::Error::new(other)
                .context(format!("Failed to open collection file {:?}", path)),
        })
    }

    pub fn client(&self) -> Arc<dyn CollectionClient> {
        match self {
            Backend::Local(collection) => collection.clone(),
            Backend::Remote(client) => client.clone(),
        }
    }

    /// Repository over the configured collection
    pub fn repository(&self, config: &Config) -> TaskRepository {
        TaskRepository::with_collection(self.client(), config.collection.clone())
    }

    /// Human-readable backend description
    pub fn describe(&self) -> String {
        match self {
            Backend::Local(collection) => match collection.path() {
                Some(path) => format!("local file {}", path.display()),
                None => "in-memory".to_string(),
            },
            Backend::Remote(client) => format!("server {}", client.url()),
        }
    }

    /// Connection status, for remote backends
    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        match self {
            Backend::Local(_) => None,
            Backend::Remote(client) => Some(client.status()),
        }
    }
}
