//! WebSocket listener using Axum.
//!
//! Accepts WebSocket upgrades on `/ws`, hands every socket to a
//! [`TransportBinding`], and exposes a `/health` endpoint. Page routes are
//! supplied by the caller as an ordinary `axum::Router` and merged in.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use futures_util::{Sink, Stream};
use pagestream_protocol::{FrameCodec, JsonCodec};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::binding::{MessageHandler, TransportBinding};
use crate::broadcast::BroadcastStream;
use crate::connection::ConnectionTable;
use crate::events::EventBus;
use crate::mux::MuxConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid listen address {0}")]
    InvalidAddress(String),

    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Per-connection multiplexer settings
    pub mux: MuxConfig,
    /// Enable verbose connection logging
    pub verbose_logging: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 7080,
            hostname: "127.0.0.1".into(),
            max_connections: Some(256),
            mux: MuxConfig::default(),
            verbose_logging: false,
        }
    }
}

/// Shared state for the listener.
struct AppState<H: MessageHandler> {
    handler: Arc<H>,
    config: TransportConfig,
    broadcast: BroadcastStream,
    events: EventBus,
    connections: ConnectionTable,
    codec: Arc<dyn FrameCodec>,
}

/// The listener: accepts WebSocket connections and binds each one.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
    connections: ConnectionTable,
}

impl TransportServer {
    /// Start listening with the default JSON frame codec.
    pub async fn start<H: MessageHandler>(
        config: TransportConfig,
        handler: Arc<H>,
        broadcast: BroadcastStream,
        events: EventBus,
        pages: Router,
    ) -> Result<Self, TransportError> {
        Self::start_with_codec(config, handler, broadcast, events, pages, Arc::new(JsonCodec)).await
    }

    pub async fn start_with_codec<H: MessageHandler>(
        config: TransportConfig,
        handler: Arc<H>,
        broadcast: BroadcastStream,
        events: EventBus,
        pages: Router,
        codec: Arc<dyn FrameCodec>,
    ) -> Result<Self, TransportError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let connections = ConnectionTable::new();

        let state = Arc::new(AppState {
            handler,
            config: config.clone(),
            broadcast,
            events,
            connections: connections.clone(),
            codec,
        });

        let app = Router::new()
            .route("/ws", get(ws_upgrade_handler::<H>))
            .route("/health", get(health_handler::<H>))
            .with_state(state)
            .merge(pages);

        let raw_addr = format!("{}:{}", config.hostname, config.port);
        let addr: SocketAddr = raw_addr
            .parse()
            .map_err(|_| TransportError::InvalidAddress(raw_addr.clone()))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!("Pagestream listening on http://{}:{} (ws: /ws)", config.hostname, actual_port);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
            connections,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Live connections.
    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Pagestream listener stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: MessageHandler>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    if let Some(max) = state.config.max_connections {
        let current = state.connections.len();
        if current >= max {
            warn!("Connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    ws.on_upgrade(move |socket| async move {
        let binding = TransportBinding::new(
            state.handler.clone(),
            state.broadcast.clone(),
            state.events.clone(),
            state.connections.clone(),
        )
        .with_config(state.config.mux.clone())
        .with_codec(state.codec.clone());

        let summary = binding.run(WsText::new(socket)).await;
        if state.config.verbose_logging {
            debug!(?summary, "connection summary");
        }
    })
    .into_response()
}

async fn health_handler<H: MessageHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.connections.len(),
        "broadcastReceivers": state.broadcast.receiver_count(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket text adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Presents a WebSocket as a duplex stream of text messages.
///
/// Binary messages are dropped with a warning since every frame is text;
/// pings are answered by the socket itself.
pub struct WsText {
    inner: WebSocket,
}

impl WsText {
    pub fn new(inner: WebSocket) -> Self {
        Self { inner }
    }
}

impl Stream for WsText {
    type Item = Result<String, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(Message::Text(text))) => return Poll::Ready(Some(Ok(text.as_str().to_owned()))),
                Some(Ok(Message::Close(_))) | None => return Poll::Ready(None),
                Some(Ok(Message::Binary(data))) => {
                    warn!("Dropping binary WebSocket message ({} bytes)", data.len());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
            }
        }
    }
}

impl Sink<String> for WsText {
    type Error = axum::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner).start_send(Message::Text(item.into()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}
