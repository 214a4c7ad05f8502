//! Channel multiplexer.
//!
//! Splits one physical duplex stream into named logical channels and merges
//! what those channels write back into a single outbound frame queue.
//!
//! - Inbound: each `data` frame is delivered only to the inbound sequence of
//!   the channel it names. Data for a channel that was never opened is
//!   rejected so the caller can drop it.
//! - Outbound: every [`ChannelWriter`] of a connection feeds the same bounded
//!   queue. A single writer's frames stay in the order they were sent, which
//!   is what gives per-channel ordering; frames of different channels
//!   interleave freely.
//! - Opening a channel is idempotent per connection.
//! - The multiplexer never keeps a channel's inbound sequence alive on its
//!   own: once every [`Channel`] handle is dropped, payloads for that channel
//!   are discarded instead of queued.
//! - [`ChannelMultiplexer::close`] ends every open channel.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use pagestream_protocol::{ChannelError, Frame, FrameCodec, ProtocolError};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// What to do when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for room (backpressure on the producer).
    #[default]
    Block,
    /// Drop the new item and report it.
    Drop,
}

/// Multiplexer configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Capacity of each channel's inbound queue
    pub channel_buffer: usize,
    /// Capacity of the merged outbound queue
    pub outbound_buffer: usize,
    /// Overflow policy for both inbound and outbound queues
    pub overflow: OverflowPolicy,
    /// Maximum channels per connection (`None` = unlimited)
    pub max_channels: Option<usize>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 64,
            outbound_buffer: 256,
            overflow: OverflowPolicy::Block,
            max_channels: Some(64),
        }
    }
}

/// Write half of a logical channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    channel: Arc<str>,
    tx: mpsc::Sender<Frame>,
    overflow: OverflowPolicy,
}

impl ChannelWriter {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Queue a payload for this channel on the connection's outbound stream.
    pub async fn send(&self, payload: Value) -> Result<(), ChannelError> {
        let frame = Frame::data(&*self.channel, payload);
        enqueue(&self.tx, frame, self.overflow).await
    }

    /// True once the owning connection has stopped writing.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A logical channel: an inbound sequence plus a writer.
///
/// Clones refer to the same logical channel and share its inbound sequence.
/// The channel stays consumable only while at least one handle is alive.
#[derive(Debug, Clone)]
pub struct Channel {
    name: Arc<str>,
    inbound: Arc<Mutex<mpsc::Receiver<Value>>>,
    writer: ChannelWriter,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next inbound payload, or `None` once the channel has ended.
    pub async fn recv(&self) -> Option<Value> {
        self.inbound.lock().await.recv().await
    }

    pub async fn send(&self, payload: Value) -> Result<(), ChannelError> {
        self.writer.send(payload).await
    }

    pub fn writer(&self) -> ChannelWriter {
        self.writer.clone()
    }

    /// Whether two handles refer to the same logical channel.
    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inbound, &other.inbound)
    }
}

/// Outcome of feeding one inbound frame to the multiplexer.
#[derive(Debug)]
pub enum Demuxed {
    /// The peer opened a channel this side had not seen yet.
    Opened(Channel),
    /// The peer re-announced a channel that is already open.
    AlreadyOpen { channel: String },
    /// A payload was queued on its channel.
    Delivered { channel: String },
    /// The channel's inbound queue was full and the payload was dropped.
    Overflowed { channel: String },
    /// Nothing consumes the channel any more; the payload was dropped and
    /// the channel removed.
    Abandoned { channel: String },
    /// The peer ended a channel.
    Ended { channel: String },
}

struct ChannelEntry {
    inbound: Weak<Mutex<mpsc::Receiver<Value>>>,
    inbound_tx: mpsc::Sender<Value>,
    writer: ChannelWriter,
}

impl ChannelEntry {
    fn handle(&self, name: &str) -> Option<Channel> {
        let inbound = self.inbound.upgrade()?;
        Some(Channel { name: Arc::from(name), inbound, writer: self.writer.clone() })
    }

    fn abandoned(&self) -> bool {
        self.inbound_tx.is_closed()
    }
}

pub struct ChannelMultiplexer {
    connection_id: String,
    config: MuxConfig,
    channels: HashMap<String, ChannelEntry>,
    /// `None` once closed.
    outbound_tx: Option<mpsc::Sender<Frame>>,
}

impl ChannelMultiplexer {
    /// Create a multiplexer and the receiving end of its merged outbound queue.
    pub fn new(connection_id: impl Into<String>, config: MuxConfig) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        let mux = Self {
            connection_id: connection_id.into(),
            config,
            channels: HashMap::new(),
            outbound_tx: Some(outbound_tx),
        };
        (mux, outbound_rx)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn is_closed(&self) -> bool {
        self.outbound_tx.is_none()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Look up an open channel without creating it. `None` also when the
    /// channel exists but every handle to it has been dropped.
    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.channels.get(name).and_then(|e| e.handle(name))
    }

    /// Open a channel from this side, announcing it to the peer if it is new.
    ///
    /// Returns the channel and whether it was created by this call. An
    /// abandoned channel is replaced by a fresh one.
    pub async fn open_channel(&mut self, name: &str) -> Result<(Channel, bool), ChannelError> {
        if let Some(channel) = self.channel(name) {
            return Ok((channel, false));
        }
        self.channels.remove(name);

        let outbound = self.outbound_tx.clone().ok_or(ChannelError::Closed)?;
        let channel = self.insert(name).map_err(|_| ChannelError::LimitReached)?;

        if let Err(e) = enqueue(&outbound, Frame::open(name), self.config.overflow).await {
            self.channels.remove(name);
            return Err(e);
        }

        debug!(connection = %self.connection_id, channel = name, "channel opened locally");
        Ok((channel, true))
    }

    /// Write a payload to a channel, opening it first if needed.
    ///
    /// Returns the channel when this call created it.
    pub async fn send(&mut self, name: &str, payload: Value) -> Result<Option<Channel>, ChannelError> {
        if let Some(entry) = self.channels.get(name).filter(|e| !e.abandoned()) {
            let writer = entry.writer.clone();
            writer.send(payload).await?;
            return Ok(None);
        }

        let (channel, _) = self.open_channel(name).await?;
        channel.send(payload).await?;
        Ok(Some(channel))
    }

    /// Decode one raw inbound message and demultiplex it.
    pub async fn demux(&mut self, codec: &dyn FrameCodec, raw: &str) -> Result<Demuxed, ProtocolError> {
        let frame = codec.decode(raw)?;
        self.ingest(frame).await
    }

    /// Demultiplex one inbound frame.
    pub async fn ingest(&mut self, frame: Frame) -> Result<Demuxed, ProtocolError> {
        match frame {
            Frame::Open { channel } => {
                match self.channels.get(&channel).map(ChannelEntry::abandoned) {
                    Some(false) => return Ok(Demuxed::AlreadyOpen { channel }),
                    // The old consumer is gone; the peer gets a fresh channel.
                    Some(true) => {
                        self.channels.remove(&channel);
                    }
                    None => {}
                }
                let opened = self.insert(&channel)?;
                debug!(connection = %self.connection_id, channel = %channel, "channel opened by peer");
                Ok(Demuxed::Opened(opened))
            }

            Frame::Data { channel, payload } => {
                let entry = self
                    .channels
                    .get(&channel)
                    .ok_or_else(|| ProtocolError::UnknownChannel(channel.clone()))?;

                // A dropped receiver makes `send` fail at once, so a dead
                // consumer can never block the connection.
                let outcome = match self.config.overflow {
                    OverflowPolicy::Block => entry.inbound_tx.send(payload).await.map_err(|_| ChannelError::Closed),
                    OverflowPolicy::Drop => entry.inbound_tx.try_send(payload).map_err(|e| match e {
                        mpsc::error::TrySendError::Full(_) => ChannelError::Full,
                        mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
                    }),
                };

                match outcome {
                    Ok(()) => Ok(Demuxed::Delivered { channel }),
                    Err(ChannelError::Closed) => {
                        warn!(connection = %self.connection_id, channel = %channel, "channel has no consumer, payload dropped");
                        self.channels.remove(&channel);
                        Ok(Demuxed::Abandoned { channel })
                    }
                    Err(_) => {
                        warn!(connection = %self.connection_id, channel = %channel, "inbound queue full, payload dropped");
                        Ok(Demuxed::Overflowed { channel })
                    }
                }
            }

            Frame::End { channel } => {
                if self.channels.remove(&channel).is_none() {
                    return Err(ProtocolError::UnknownChannel(channel));
                }
                debug!(connection = %self.connection_id, channel = %channel, "channel ended by peer");
                Ok(Demuxed::Ended { channel })
            }
        }
    }

    /// Close the connection side: every open channel sees end-of-stream and
    /// no further frames are accepted for the outbound queue from here.
    ///
    /// Returns the number of channels that were open.
    pub fn close(&mut self) -> usize {
        self.outbound_tx = None;
        let ended = self.channels.len();
        self.channels.clear();
        ended
    }

    fn insert(&mut self, name: &str) -> Result<Channel, ProtocolError> {
        if let Some(max) = self.config.max_channels {
            if self.channels.len() >= max {
                return Err(ProtocolError::TooManyChannels(max));
            }
        }

        let outbound = self
            .outbound_tx
            .clone()
            .ok_or_else(|| ProtocolError::UnknownChannel(name.to_string()))?;

        let name: Arc<str> = Arc::from(name);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.channel_buffer.max(1));
        let channel = Channel {
            name: name.clone(),
            inbound: Arc::new(Mutex::new(inbound_rx)),
            writer: ChannelWriter {
                channel: name.clone(),
                tx: outbound,
                overflow: self.config.overflow,
            },
        };

        self.channels.insert(
            name.to_string(),
            ChannelEntry {
                inbound: Arc::downgrade(&channel.inbound),
                inbound_tx,
                writer: channel.writer.clone(),
            },
        );
        Ok(channel)
    }
}

async fn enqueue(tx: &mpsc::Sender<Frame>, frame: Frame, overflow: OverflowPolicy) -> Result<(), ChannelError> {
    match overflow {
        OverflowPolicy::Block => tx.send(frame).await.map_err(|_| ChannelError::Closed),
        OverflowPolicy::Drop => tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagestream_protocol::JsonCodec;
    use serde_json::json;

    fn mux() -> (ChannelMultiplexer, mpsc::Receiver<Frame>) {
        ChannelMultiplexer::new("test-conn", MuxConfig::default())
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let (mut mux, mut out) = mux();
        let (a, created_a) = mux.open_channel("rpc").await.unwrap();
        let (b, created_b) = mux.open_channel("rpc").await.unwrap();

        assert!(created_a);
        assert!(!created_b);
        assert!(a.same_channel(&b));
        assert_eq!(mux.channel_count(), 1);

        // Only one announcement goes out.
        assert_eq!(out.recv().await.unwrap(), Frame::open("rpc"));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn peer_open_is_idempotent() {
        let (mut mux, _out) = mux();
        let first = mux.ingest(Frame::open("rpc")).await.unwrap();
        let second = mux.ingest(Frame::open("rpc")).await.unwrap();

        let Demuxed::Opened(channel) = first else { panic!("expected Opened") };
        assert!(matches!(second, Demuxed::AlreadyOpen { .. }));
        assert!(channel.same_channel(&mux.channel("rpc").unwrap()));
    }

    async fn peer_open(mux: &mut ChannelMultiplexer, name: &str) -> Channel {
        match mux.ingest(Frame::open(name)).await.unwrap() {
            Demuxed::Opened(channel) => channel,
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn data_goes_only_to_its_channel() {
        let (mut mux, _out) = mux();
        let a = peer_open(&mut mux, "a").await;
        let b = peer_open(&mut mux, "b").await;

        mux.ingest(Frame::data("a", json!("for a"))).await.unwrap();

        assert_eq!(a.recv().await, Some(json!("for a")));

        mux.close();
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn unknown_channel_is_rejected_and_others_keep_working() {
        let (mut mux, _out) = mux();
        let known = peer_open(&mut mux, "known").await;

        let err = mux.ingest(Frame::data("ghost", json!(1))).await.unwrap_err();
        assert_eq!(err, ProtocolError::UnknownChannel("ghost".into()));

        mux.ingest(Frame::data("known", json!(2))).await.unwrap();
        assert_eq!(known.recv().await, Some(json!(2)));
    }

    #[tokio::test]
    async fn malformed_raw_frames_are_rejected() {
        let (mut mux, _out) = mux();
        assert!(matches!(
            mux.demux(&JsonCodec, "garbage").await,
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            mux.demux(&JsonCodec, r#"{"type":"data","payload":1}"#).await,
            Err(ProtocolError::MissingChannel)
        ));
        assert_eq!(mux.channel_count(), 0);
    }

    #[tokio::test]
    async fn close_ends_every_channel() {
        let (mut mux, _out) = mux();
        let (a, _) = mux.open_channel("a").await.unwrap();
        let b = peer_open(&mut mux, "b").await;

        mux.ingest(Frame::data("b", json!("queued"))).await.unwrap();
        assert_eq!(mux.close(), 2);
        assert!(mux.is_closed());

        assert_eq!(a.recv().await, None);
        // Already-queued payloads drain before end-of-stream.
        assert_eq!(b.recv().await, Some(json!("queued")));
        assert_eq!(b.recv().await, None);

        assert_eq!(mux.open_channel("c").await.unwrap_err(), ChannelError::Closed);
    }

    #[tokio::test]
    async fn end_frame_closes_one_channel() {
        let (mut mux, _out) = mux();
        let a = peer_open(&mut mux, "a").await;
        let _b = peer_open(&mut mux, "b").await;

        assert!(matches!(mux.ingest(Frame::end("a")).await.unwrap(), Demuxed::Ended { .. }));
        assert_eq!(a.recv().await, None);
        assert!(mux.channel("b").is_some());

        let err = mux.ingest(Frame::data("a", json!(1))).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownChannel(_)));
    }

    #[tokio::test]
    async fn channel_limit() {
        let config = MuxConfig { max_channels: Some(1), ..MuxConfig::default() };
        let (mut mux, _out) = ChannelMultiplexer::new("c", config);
        mux.ingest(Frame::open("a")).await.unwrap();

        let err = mux.ingest(Frame::open("b")).await.unwrap_err();
        assert_eq!(err, ProtocolError::TooManyChannels(1));
        assert_eq!(mux.open_channel("b").await.unwrap_err(), ChannelError::LimitReached);
    }

    #[tokio::test]
    async fn drop_policy_reports_full_queues() {
        let config = MuxConfig {
            channel_buffer: 1,
            outbound_buffer: 2,
            overflow: OverflowPolicy::Drop,
            max_channels: None,
        };
        let (mut mux, _out) = ChannelMultiplexer::new("c", config);
        let _a = peer_open(&mut mux, "a").await;

        assert!(matches!(mux.ingest(Frame::data("a", json!(1))).await.unwrap(), Demuxed::Delivered { .. }));
        assert!(matches!(mux.ingest(Frame::data("a", json!(2))).await.unwrap(), Demuxed::Overflowed { .. }));

        // Outbound: open frame + one data frame fill the queue.
        let (chan, _) = mux.open_channel("out").await.unwrap();
        chan.send(json!("x")).await.unwrap();
        assert_eq!(chan.send(json!("y")).await.unwrap_err(), ChannelError::Full);
    }

    #[tokio::test]
    async fn writers_fail_after_outbound_queue_is_gone() {
        let (mut mux, out) = mux();
        let (chan, _) = mux.open_channel("a").await.unwrap();
        drop(out);
        assert!(chan.writer().is_closed());
        assert_eq!(chan.send(json!(1)).await.unwrap_err(), ChannelError::Closed);
    }

    #[tokio::test]
    async fn send_opens_lazily() {
        let (mut mux, mut out) = mux();
        let created = mux.send("news", json!(1)).await.unwrap();
        assert!(created.is_some());
        assert!(mux.send("news", json!(2)).await.unwrap().is_none());

        assert_eq!(out.recv().await.unwrap(), Frame::open("news"));
        assert_eq!(out.recv().await.unwrap(), Frame::data("news", json!(1)));
        assert_eq!(out.recv().await.unwrap(), Frame::data("news", json!(2)));
    }

    #[tokio::test]
    async fn interleaved_channels_keep_their_own_order() {
        let (mut server, mut out) = mux();
        let (a, _) = server.open_channel("a").await.unwrap();
        let (b, _) = server.open_channel("b").await.unwrap();

        let wa = a.writer();
        let wb = b.writer();
        let ta = tokio::spawn(async move {
            for i in 0..50 {
                wa.send(json!(i)).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        let tb = tokio::spawn(async move {
            for i in 0..50 {
                wb.send(json!(i)).await.unwrap();
            }
        });
        ta.await.unwrap();
        tb.await.unwrap();
        server.close();
        drop((a, b));

        // Feed the merged stream into a peer multiplexer.
        let (mut peer, _peer_out) = ChannelMultiplexer::new(
            "peer",
            MuxConfig { channel_buffer: 128, ..MuxConfig::default() },
        );
        let mut channels = Vec::new();
        while let Some(frame) = out.recv().await {
            if let Demuxed::Opened(channel) = peer.ingest(frame).await.unwrap() {
                channels.push(channel);
            }
        }
        assert_eq!(channels.len(), 2);
        peer.close();

        for channel in channels {
            let name = channel.name().to_string();
            let mut received = Vec::new();
            while let Some(v) = channel.recv().await {
                received.push(v.as_i64().unwrap());
            }
            assert_eq!(received, (0..50).collect::<Vec<_>>(), "channel {name}");
        }
    }

    #[tokio::test]
    async fn dropped_consumer_does_not_block_ingest() {
        let config = MuxConfig { channel_buffer: 1, ..MuxConfig::default() };
        let (mut mux, _out) = ChannelMultiplexer::new("c", config);
        let a = peer_open(&mut mux, "a").await;
        let b = peer_open(&mut mux, "b").await;

        mux.ingest(Frame::data("a", json!(1))).await.unwrap();
        drop(a);

        // The queue for `a` is full, but with no consumer left the payload
        // is discarded rather than waited on.
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            mux.ingest(Frame::data("a", json!(2))),
        )
        .await
        .expect("ingest blocked on a channel nobody reads");
        assert!(matches!(outcome.unwrap(), Demuxed::Abandoned { .. }));
        assert!(mux.channel("a").is_none());

        mux.ingest(Frame::data("b", json!("still flowing"))).await.unwrap();
        assert_eq!(b.recv().await, Some(json!("still flowing")));
    }

    #[tokio::test]
    async fn reopening_an_abandoned_channel_gives_a_fresh_one() {
        let (mut mux, _out) = mux();
        drop(peer_open(&mut mux, "a").await);

        let a = peer_open(&mut mux, "a").await;
        mux.ingest(Frame::data("a", json!("again"))).await.unwrap();
        assert_eq!(a.recv().await, Some(json!("again")));
    }
}
