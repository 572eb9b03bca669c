//! HTTP/WebSocket surface of the relay.
//!
//! - `GET /ws` - subscription channel; one `anomaly-data` text message per record
//! - `GET /artifacts/{name}` - artifact retrieval by bare file name
//! - `GET /status` - producer state and subscriber count as JSON
//!
//! Each WebSocket connection registers with the [`BroadcastHub`] for as long
//! as it is open. Client messages are ignored; a close frame, a transport
//! error or server shutdown ends the subscription.

pub mod artifacts;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use artifacts::{Artifact, ArtifactError, ArtifactStore};

use crate::constants::ARTIFACT_ROUTE_PREFIX;
use crate::hub::BroadcastHub;
use crate::record::RecordUpdate;
use crate::supervisor::ProducerState;

/// Shared state of all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Subscriber registry.
    pub hub: BroadcastHub,
    /// Artifact directory.
    pub artifacts: Arc<ArtifactStore>,
    /// Cancelled on server shutdown; ends open subscriptions.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Bundle handler state.
    #[must_use]
    pub fn new(hub: BroadcastHub, artifacts: ArtifactStore, shutdown: CancellationToken) -> Self {
        Self {
            hub,
            artifacts: Arc::new(artifacts),
            shutdown,
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Producer lifecycle state.
    pub producer: ProducerState,
    /// Connected subscribers.
    pub subscribers: usize,
    /// Producer launch attempts so far.
    pub launches: u64,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(subscribe_handler))
        .route(&format!("{ARTIFACT_ROUTE_PREFIX}/{{name}}"), get(artifact_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Bind the listener.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    Ok(listener)
}

/// Serve until `state.shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    let shutdown = state.shutdown.clone();
    log::info!("[Server] Listening on {}", local.map_or_else(|| "?".to_string(), |a| a.to_string()));

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Server error")?;

    log::info!("[Server] Stopped");
    Ok(())
}

async fn subscribe_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state))
}

async fn handle_subscriber(socket: WebSocket, state: AppState) {
    // Registered only once the upgrade succeeded; dropped on every exit path.
    let mut subscription = state.hub.on_connect();
    let id = subscription.id().to_string();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            record = subscription.recv() => {
                let Some(record) = record else { break };
                let text = match serde_json::to_string(&RecordUpdate::new(record)) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("[Server] Failed to serialize record for {id}: {e}");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(text.into())).await {
                    log::debug!("[Server] Send to {id} failed: {e}");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    log::debug!("[Server] Subscriber {id} transport error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            },
            () = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn artifact_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.artifacts.read(&name).await {
        Ok(artifact) => artifact.into_response(),
        Err(e) => {
            log::debug!("[Server] Artifact request failed: {e}");
            e.into_response()
        }
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    let supervisor = state.hub.supervisor();
    Json(StatusReport {
        producer: supervisor.state(),
        subscribers: state.hub.subscriber_count(),
        launches: supervisor.launches(),
    })
}
