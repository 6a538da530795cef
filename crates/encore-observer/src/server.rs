//! Observer HTTP server lifecycle management.
//!
//! [`bind`] claims the listening socket and [`serve`] runs the Axum
//! server on it until the shutdown future resolves. [`start_server`]
//! does both.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Configuration for the Observer server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// The host address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// The TCP port to listen on. `0` picks a free port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&encore_core::config::ServerConfig::default())
    }
}

impl From<&encore_core::config::ServerConfig> for ServerConfig {
    fn from(config: &encore_core::config::ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
        }
    }
}

/// Bind the listening socket described by `config`.
///
/// # Errors
///
/// [`ServerError::InvalidAddress`] if host and port do not form a socket
/// address, [`ServerError::Bind`] if the port is taken.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let text = format!("{}:{}", config.host, config.port);
    let addr: SocketAddr = text
        .parse()
        .map_err(|e| ServerError::InvalidAddress(format!("{text}: {e}")))?;

    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serve the Observer router on `listener` until `shutdown` resolves.
///
/// Open `WebSocket` and SSE connections end when the server stops; their
/// observers are deregistered as the connections drop.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] on a fatal I/O error.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Observer server listening");
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)?;

    info!("Observer server stopped");
    Ok(())
}

/// Start the Observer HTTP server and run it until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind or the server
/// encounters a fatal I/O error.
pub async fn start_server<F>(
    config: &ServerConfig,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = bind(config).await?;
    serve(listener, state, shutdown).await
}

/// Failures starting or running the Observer server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Host and port do not parse as a socket address.
    #[error("invalid listen address {0}")]
    InvalidAddress(String),

    /// The socket could not be bound.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Accepting connections failed.
    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
}
