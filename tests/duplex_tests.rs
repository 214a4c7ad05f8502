//! Transport binding over an in-memory duplex pipe with newline-delimited
//! frames. No sockets involved.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pagestream_protocol::{Frame, RoutedMessage};
use pagestream_server::{AppOptions, Application, ClientBuilder, EchoResponder};
use pagestream_transport::{
    BroadcastStream, ChannelWriter, ConnectionTable, EventBus, MessageHandler, TransportBinding,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

type Peer = Framed<DuplexStream, LinesCodec>;

/// Records every message it sees, in dispatch order.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Value)>>,
}

impl MessageHandler for Recorder {
    async fn dispatch(&self, message: RoutedMessage, _reply: ChannelWriter) {
        self.seen.lock().push((message.channel, message.body));
    }
}

fn pipe() -> (Peer, Peer) {
    let (a, b) = duplex(64 * 1024);
    (Framed::new(a, LinesCodec::new()), Framed::new(b, LinesCodec::new()))
}

async fn send(peer: &mut Peer, frame: Frame) {
    peer.send(serde_json::to_string(&frame).unwrap()).await.unwrap();
}

async fn recv(peer: &mut Peer) -> Frame {
    let line = timeout(Duration::from_secs(5), peer.next())
        .await
        .expect("Timeout waiting for frame")
        .expect("Stream ended")
        .expect("Codec error");
    serde_json::from_str(&line).unwrap()
}

fn routed(responder: &str, body: Value) -> Value {
    json!({ "responder": responder, "body": body })
}

#[tokio::test]
async fn interleaved_channels_keep_their_own_order() {
    let recorder = Arc::new(Recorder::default());
    let binding = TransportBinding::new(
        recorder.clone(),
        BroadcastStream::default(),
        EventBus::default(),
        ConnectionTable::new(),
    );
    let (server_side, mut peer) = pipe();
    let task = tokio::spawn(binding.run(server_side));

    send(&mut peer, Frame::open("a")).await;
    send(&mut peer, Frame::open("b")).await;
    for i in 0..25 {
        send(&mut peer, Frame::data("a", routed("x", json!(i)))).await;
        send(&mut peer, Frame::data("b", routed("x", json!(i)))).await;
    }
    timeout(Duration::from_secs(5), async {
        while recorder.seen.lock().len() < 50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("not every message was dispatched");
    drop(peer);

    let summary = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(summary.malformed_frames, 0);

    let seen = recorder.seen.lock().clone();
    for channel in ["a", "b"] {
        let order: Vec<_> = seen
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, body)| body.as_i64().unwrap())
            .collect();
        assert_eq!(order, (0..25).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn router_replies_over_line_frames() {
    let mut app = Application::new(AppOptions::default()).unwrap();
    let main = app.client(ClientBuilder::new("main")).unwrap();
    app.route("/", main).unwrap();
    app.responder("echo", EchoResponder);
    let serving = app.start().unwrap();

    let binding = TransportBinding::new(
        serving.router(),
        serving.broadcast_stream().clone(),
        serving.events().clone(),
        ConnectionTable::new(),
    );
    let (server_side, mut peer) = pipe();
    tokio::spawn(binding.run(server_side));

    send(&mut peer, Frame::open("rpc")).await;
    send(&mut peer, Frame::data("rpc", routed("echo", json!("hello")))).await;
    assert_eq!(recv(&mut peer).await, Frame::data("rpc", json!("hello")));
}

#[tokio::test]
async fn no_publication_reaches_a_closed_connection() {
    let broadcast = BroadcastStream::default();
    let connections = ConnectionTable::new();
    let binding = TransportBinding::new(
        Arc::new(Recorder::default()),
        broadcast.clone(),
        EventBus::default(),
        connections.clone(),
    );
    let (server_side, mut peer) = pipe();
    let task = tokio::spawn(binding.run(server_side));

    while connections.is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(broadcast.publish("news", json!(1)), 1);
    assert_eq!(recv(&mut peer).await, Frame::open("news"));
    assert_eq!(recv(&mut peer).await, Frame::data("news", json!(1)));

    // Shutting down our write direction ends the connection.
    let mut io = peer.into_inner();
    io.shutdown().await.unwrap();
    let summary = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(summary.channels_ended, 1);
    assert_eq!(broadcast.receiver_count(), 0);

    assert_eq!(broadcast.publish("news", json!(2)), 0);
    let mut rest = String::new();
    timeout(Duration::from_secs(1), io.read_to_string(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());
}
