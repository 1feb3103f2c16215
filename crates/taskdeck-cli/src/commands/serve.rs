//! Serve command handler

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use taskdeck_core::{CollectionServer, Config};

use crate::backend::Backend;
use crate::output::Output;

/// Host the local collection file over WebSocket until Ctrl-C
pub async fn serve(config: &Config, bind: Option<String>, output: &Output) -> Result<()> {
    let collection = Arc::new(Backend::open_local(config)?);
    let bind = bind.unwrap_or_else(|| config.bind_addr.clone());

    let server = CollectionServer::bind(&bind, collection)
        .await
        .context("Failed to start collection server")?;
    let addr = server.local_addr()?;

    output.message(&format!("Serving {} on ws://{}", config.collection_path().display(), addr));
    output.message(&format!(
        "Point clients at it with: taskdeck config set remote_url ws://{}",
        addr
    ));

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Interrupted, shutting down");
        })
        .await?;

    output.message("Server stopped.");
    Ok(())
}
