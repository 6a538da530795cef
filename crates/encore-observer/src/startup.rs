//! Observer server startup helper for embedding in the service binary.
//!
//! [`spawn_observer`] binds the socket up front, so a port conflict is
//! reported to the caller, and then serves on a background Tokio task.
//!
//! # Usage
//!
//! ```rust,ignore
//! use encore_observer::startup::spawn_observer;
//!
//! let (addr, handle) = spawn_observer(&server_config, state, shutdown).await?;
//! // ... later
//! handle.await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{self, ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the Observer server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Bind and spawn the Observer HTTP server on a background task.
///
/// Returns the bound address (useful with port `0`) and the task handle.
/// The task ends after `shutdown` resolves and in-flight requests drain.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the server cannot bind to the
/// requested address.
pub async fn spawn_observer<F>(
    config: &ServerConfig,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(SocketAddr, JoinHandle<()>), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = server::bind(config).await?;
    let addr = listener.local_addr().map_err(ServerError::Serve)?;

    let handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, state, shutdown).await {
            tracing::error!(error = %e, "Observer server exited with error");
        }
    });

    tracing::info!(%addr, "Observer server spawned on background task");

    Ok((addr, handle))
}
