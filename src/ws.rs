//! WebSocket client transport for viewers.
//!
//! Thin wrapper around `tokio-tungstenite` that hides the stream types and
//! reduces incoming traffic to the few message kinds a viewer cares about.
//! [`connect`] returns split ([`WsWriter`], [`WsReader`]) halves ready for a
//! `tokio::select!` loop.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

/// Path of the subscription endpoint on a spillwatch server.
pub const SUBSCRIBE_PATH: &str = "/ws";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Received WebSocket message.
#[derive(Debug, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame (not used by the relay; reported for logging).
    Binary(usize),
    /// Ping frame with payload, to be answered with a pong.
    Ping(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Answer a ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket send_pong failed")
    }

    /// Send a close frame and flush.
    pub async fn close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("WebSocket send_close failed")?;
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Pongs and raw frames are skipped.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            };
            let message = match message {
                tungstenite::Message::Text(text) => WsMessage::Text(text.to_string()),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data.len()),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data.to_vec()),
                tungstenite::Message::Close(frame) => {
                    let (code, reason) = frame
                        .map_or((1005, String::new()), |cf| (cf.code.into(), cf.reason.to_string()));
                    WsMessage::Close { code, reason }
                }
                tungstenite::Message::Pong(_) | tungstenite::Message::Frame(_) => continue,
            };
            return Some(Ok(message));
        }
    }
}

/// Connect to a WebSocket URL.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Subscription URL for a server address.
///
/// Accepts `http(s)://` or `ws(s)://` URLs, or a bare `host:port`. The
/// subscription path is appended unless the URL already has a path.
#[must_use]
pub fn subscription_url(server: &str) -> String {
    let server = server.trim_end_matches('/');
    let url = if server.starts_with("wss://") || server.starts_with("ws://") {
        server.to_string()
    } else if let Some(rest) = server.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{server}")
    };

    let has_path = url
        .split_once("://")
        .is_some_and(|(_, rest)| rest.contains('/'));
    if has_path {
        url
    } else {
        format!("{url}{SUBSCRIBE_PATH}")
    }
}
