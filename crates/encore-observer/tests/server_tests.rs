//! Lifecycle tests for the Observer server over a real TCP socket.
//!
//! Requests are written as raw HTTP/1.1 so no client crate is needed.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use encore_core::{AllowAll, BroadcastHub, EngineSettings, QueueEngine};
use encore_db::InMemoryRepository;
use encore_ingest::{IngestError, IngestionAdapter, MetadataSource, VideoLink};
use encore_observer::server::ServerError;
use encore_observer::state::{AppState, ObserverOptions};
use encore_observer::{ServerConfig, StartupError, spawn_observer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct NoMetadata;

#[async_trait::async_trait]
impl MetadataSource for NoMetadata {
    async fn lookup(&self, _video: &VideoLink) -> Result<encore_db::VideoMetadata, IngestError> {
        Err(IngestError::Metadata(String::from("offline")))
    }
}

async fn app_state() -> Arc<AppState> {
    let hub = Arc::new(BroadcastHub::new(16, 50));
    let engine = QueueEngine::load(
        Arc::new(InMemoryRepository::new()),
        Arc::clone(&hub),
        Box::new(AllowAll),
        EngineSettings::default(),
    )
    .await
    .unwrap();
    let (handle, _task) = engine.spawn();
    let ingest = IngestionAdapter::new(handle.clone(), Arc::new(NoMetadata));
    Arc::new(AppState::new(hub, handle, ingest, ObserverOptions::default()))
}

fn loopback() -> ServerConfig {
    ServerConfig {
        host: String::from("127.0.0.1"),
        port: 0,
    }
}

#[tokio::test]
async fn serves_state_and_stops_on_shutdown() {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (addr, handle) = spawn_observer(&loopback(), app_state().await, async move {
        let _ = stop_rx.await;
    })
    .await
    .unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/state HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"activeSong\":null"));

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn port_conflict_is_reported_before_spawning() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        host: String::from("127.0.0.1"),
        port: taken.local_addr().unwrap().port(),
    };

    let result = spawn_observer(&config, app_state().await, std::future::pending()).await;
    assert!(matches!(
        result,
        Err(StartupError::Server(ServerError::Bind { .. }))
    ));
}

#[tokio::test]
async fn bad_host_is_rejected() {
    let config = ServerConfig {
        host: String::from("not a host"),
        port: 8080,
    };

    let result = spawn_observer(&config, app_state().await, std::future::pending()).await;
    assert!(matches!(
        result,
        Err(StartupError::Server(ServerError::InvalidAddress(_)))
    ));
}
