//! Per-connection wiring.
//!
//! A [`TransportBinding`] owns one physical duplex stream for its whole life:
//!
//! ```text
//! physical in  ─▶ codec ─▶ ChannelMultiplexer ─▶ per-channel pump ─▶ MessageHandler
//! broadcast    ─▶ ChannelMultiplexer (lazy open) ─┐
//! ChannelWriter (responder replies) ──────────────┴▶ outbound queue ─▶ writer task ─▶ physical out
//! ```
//!
//! Each channel gets its own pump task so a slow responder on one channel
//! does not hold up the others, while messages within a channel are
//! dispatched strictly in arrival order.
//!
//! A handler that panics is contained to the message it was handling: the
//! panic is reported as `responderFailed` and the pump moves on.
//!
//! Broadcast delivery is drop-oldest whatever the [`OverflowPolicy`]: a
//! connection that falls behind the broadcast stream loses the oldest
//! publications and a `broadcastLagged` event says how many.
//!
//! Close order: detach from the broadcast stream, end every channel, stop
//! the pumps, then stop the writer and discard whatever was still queued.
//!
//! [`OverflowPolicy`]: crate::OverflowPolicy

use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use pagestream_protocol::{Frame, FrameCodec, JsonCodec, RoutedMessage, SystemEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastStream, Publication};
use crate::connection::{Connection, ConnectionTable};
use crate::events::EventBus;
use crate::mux::{Channel, ChannelMultiplexer, ChannelWriter, Demuxed, MuxConfig};

/// Implemented by whatever processes demultiplexed inbound messages.
///
/// One handler is shared by every connection, so implementations must
/// swallow their own failures rather than surface them to the transport.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message. `reply` writes back onto the channel it came from.
    fn dispatch(
        &self,
        message: RoutedMessage,
        reply: ChannelWriter,
    ) -> impl std::future::Future<Output = ()> + Send;
}

/// What happened on a connection, returned once it is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub connection_id: String,
    /// Channels still open at close time
    pub channels_ended: usize,
    /// Frames written to the physical stream
    pub frames_written: u64,
    /// Frames queued but discarded at close
    pub frames_discarded: u64,
    /// Inbound frames that were dropped as malformed
    pub malformed_frames: u64,
}

#[derive(Debug, Default)]
struct WriterStats {
    written: u64,
    discarded: u64,
}

pub struct TransportBinding<H: MessageHandler> {
    connection: Connection,
    handler: Arc<H>,
    broadcast: BroadcastStream,
    events: EventBus,
    connections: ConnectionTable,
    codec: Arc<dyn FrameCodec>,
    config: MuxConfig,
}

impl<H: MessageHandler> TransportBinding<H> {
    pub fn new(
        handler: Arc<H>,
        broadcast: BroadcastStream,
        events: EventBus,
        connections: ConnectionTable,
    ) -> Self {
        Self {
            connection: Connection::new(uuid::Uuid::new_v4().to_string()),
            handler,
            broadcast,
            events,
            connections,
            codec: Arc::new(JsonCodec),
            config: MuxConfig::default(),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_config(mut self, config: MuxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connection_id(&self) -> &str {
        &self.connection.id
    }

    /// Drive the connection until the peer goes away.
    pub async fn run<S, E>(mut self, physical: S) -> ConnectionSummary
    where
        S: Stream<Item = Result<String, E>> + Sink<String, Error = E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = self.connection.id.clone();
        let (mut mux, outbound_rx) = ChannelMultiplexer::new(id.clone(), self.config.clone());

        // Attach before the connection is announced so nothing published
        // after `ConnectionOpened` is missed.
        let mut broadcast_rx = Some(self.broadcast.subscribe());
        self.connections.insert(self.connection.clone());
        self.events.emit(SystemEvent::ConnectionOpened { connection_id: id.clone() });
        info!("Connection opened: {id}");

        let (sink, mut stream) = physical.split();
        let (stop_tx, stop_rx) = oneshot::channel();
        let writer = tokio::spawn(write_frames(
            id.clone(),
            sink,
            outbound_rx,
            self.codec.clone(),
            stop_rx,
        ));

        let mut pumps = JoinSet::new();
        let mut malformed = 0u64;

        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(text)) => {
                        self.connection.touch();
                        if !self.on_text(&mut mux, &text, &mut pumps).await {
                            malformed += 1;
                        }
                        self.connections.update(&id, mux.channel_count());
                    }
                    Some(Err(e)) => {
                        warn!("Transport error on {id}: {e}");
                        break;
                    }
                    None => {
                        debug!("Peer closed {id}");
                        break;
                    }
                },

                publication = next_publication(&mut broadcast_rx) => match publication {
                    Ok(publication) => self.forward(&mut mux, publication, &mut pumps).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Connection {id} lagged behind broadcast, {skipped} publications lost");
                        self.events.emit(SystemEvent::BroadcastLagged { connection_id: id.clone(), skipped });
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast stream closed");
                        broadcast_rx = None;
                    }
                },

                Some(_) = pumps.join_next(), if !pumps.is_empty() => {}
            }
        }

        // Detach first: no publish can reach this connection from here on.
        drop(broadcast_rx);
        self.connection.close();
        let channels_ended = mux.close();
        drop(stream);
        pumps.shutdown().await;

        let _ = stop_tx.send(());
        let stats = writer.await.unwrap_or_default();

        self.connections.remove(&id);
        self.events.emit(SystemEvent::ConnectionClosed { connection_id: id.clone() });
        info!(
            "Connection closed: {id} (written: {}, discarded: {}, remaining: {})",
            stats.written,
            stats.discarded,
            self.connections.len()
        );

        ConnectionSummary {
            connection_id: id,
            channels_ended,
            frames_written: stats.written,
            frames_discarded: stats.discarded,
            malformed_frames: malformed,
        }
    }

    /// Demultiplex one raw inbound message. Returns false if it was dropped
    /// as malformed.
    async fn on_text(&self, mux: &mut ChannelMultiplexer, text: &str, pumps: &mut JoinSet<()>) -> bool {
        match mux.demux(self.codec.as_ref(), text).await {
            Ok(Demuxed::Opened(channel)) => {
                self.spawn_pump(channel, pumps);
                true
            }
            Ok(Demuxed::Ended { channel }) => {
                debug!("Channel {channel} ended on {}", self.connection.id);
                true
            }
            Ok(
                Demuxed::Delivered { .. }
                | Demuxed::AlreadyOpen { .. }
                | Demuxed::Overflowed { .. }
                | Demuxed::Abandoned { .. },
            ) => true,
            Err(e) => {
                warn!("Dropping malformed frame on {}: {e}", self.connection.id);
                self.events.emit(SystemEvent::MalformedFrame {
                    connection_id: self.connection.id.clone(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    async fn forward(&self, mux: &mut ChannelMultiplexer, publication: Publication, pumps: &mut JoinSet<()>) {
        let channel = publication.channel.clone();
        match mux.send(&publication.channel, publication.payload).await {
            Ok(Some(created)) => self.spawn_pump(created, pumps),
            Ok(None) => {}
            Err(e) => debug!("Broadcast on {channel} not delivered to {}: {e}", self.connection.id),
        }
    }

    fn spawn_pump(&self, channel: Channel, pumps: &mut JoinSet<()>) {
        pumps.spawn(pump(
            channel,
            self.handler.clone(),
            self.events.clone(),
            self.connection.id.clone(),
        ));
    }
}

/// Feed one channel's inbound sequence to the handler, in order.
///
/// The pump holds the only handle to the channel's inbound sequence, so if
/// it ever stops the multiplexer discards further payloads for the channel.
async fn pump<H: MessageHandler>(channel: Channel, handler: Arc<H>, events: EventBus, connection_id: String) {
    let reply = channel.writer();
    while let Some(payload) = channel.recv().await {
        match RoutedMessage::from_payload(&connection_id, channel.name(), payload) {
            Ok(message) => {
                let responder = message.responder.clone();
                let dispatched = AssertUnwindSafe(handler.dispatch(message, reply.clone())).catch_unwind().await;
                if let Err(panic) = dispatched {
                    let reason = format!("panicked: {}", panic_message(panic.as_ref()));
                    warn!("Responder {responder:?} on {connection_id}/{} {reason}", channel.name());
                    events.emit(SystemEvent::ResponderFailed {
                        responder,
                        connection_id: connection_id.clone(),
                        reason,
                    });
                }
            }
            Err(e) => {
                warn!("Dropping message on {connection_id}/{}: {e}", channel.name());
                events.emit(SystemEvent::MalformedFrame {
                    connection_id: connection_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    debug!("Channel pump finished: {connection_id}/{}", channel.name());
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

async fn write_frames<W, E>(
    connection_id: String,
    mut sink: W,
    mut outbound_rx: mpsc::Receiver<Frame>,
    codec: Arc<dyn FrameCodec>,
    mut stop_rx: oneshot::Receiver<()>,
) -> WriterStats
where
    W: Sink<String, Error = E> + Unpin,
    E: Display,
{
    let mut stats = WriterStats::default();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                let text = match codec.encode(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode frame for {connection_id}: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(text).await {
                    warn!("Failed to write to {connection_id}: {e}");
                    break;
                }
                stats.written += 1;
            }
        }
    }

    outbound_rx.close();
    while outbound_rx.try_recv().is_ok() {
        stats.discarded += 1;
    }
    let _ = sink.close().await;
    stats
}

async fn next_publication(rx: &mut Option<broadcast::Receiver<Publication>>) -> Result<Publication, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
