//! End-to-end call scenarios: a line-JSON signaling server on a real socket,
//! the loopback transport standing in for the peer, and the template
//! classifier loaded from disk.

use signcast::agent::{AgentSupervisor, StandardSessionFactory};
use signcast::defaults::SAMPLE_LEN;
use signcast::frame::VideoFrame;
use signcast::pipeline::{PipelineConfig, TemplateClassifier};
use signcast::pose::{AttachedLandmarks, HandPose};
use signcast::session::{DATA_CHANNEL_PROBE, SessionConfig};
use signcast::transport::TrackKind;
use signcast::transport::loopback::{LoopbackFactory, LoopbackRemote};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::watch;

const OFFER: &str = r#"{"event":"offerOrAnswer","data":{"sdp":"v=0\r\no=client 1 2 IN IP4 10.0.0.2\r\n","type":"offer","from":"client"}}"#;

fn ramp() -> Vec<f32> {
    (0..SAMPLE_LEN).map(|i| i as f32 / SAMPLE_LEN as f32).collect()
}

fn write_model() -> tempfile::NamedTempFile {
    let hello = ramp();
    let bye: Vec<f32> = hello.iter().rev().copied().collect();
    let json = serde_json::json!({
        "labels": ["HELLO", "BYE"],
        "templates": [hello, bye],
    });
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.to_string().as_bytes()).unwrap();
    file
}

fn hello_frame(pts: i64) -> VideoFrame {
    let hand = HandPose::from_flat(&ramp()).unwrap();
    VideoFrame::solid(4, 4, [128; 3], pts).with_hands(vec![hand])
}

fn empty_frame(pts: i64) -> VideoFrame {
    VideoFrame::solid(4, 4, [128; 3], pts)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// One accepted signaling connection, seen from the server side.
struct Peer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(10), listener.accept())
            .await
            .expect("agent never connected")
            .unwrap();
        let (reader, writer) = stream.into_split();
        let mut peer = Self {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        peer.send(r#"{"event":"connection-success","data":{"success":"1"}}"#)
            .await;
        peer
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> serde_json::Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
            .await
            .expect("no message from agent")
            .unwrap()
            .expect("agent closed the connection");
        serde_json::from_str(&line).unwrap()
    }
}

fn factory(endpoint: String, transports: LoopbackFactory) -> StandardSessionFactory {
    let model = write_model();
    let classifier = TemplateClassifier::load(model.path()).unwrap();
    StandardSessionFactory {
        config: SessionConfig {
            pipeline: PipelineConfig {
                window_capacity: 3,
                ..PipelineConfig::default()
            },
            target_fps: 0,
            ..SessionConfig::default()
        },
        endpoint,
        connect_timeout: Duration::from_secs(5),
        ice_servers: vec!["stun:stun.example.org:3478".to_string()],
        transports: Arc::new(transports),
        landmarks: Arc::new(AttachedLandmarks),
        classifier: Arc::new(classifier),
    }
}

async fn negotiate(peer: &mut Peer) -> String {
    let register = peer.recv().await;
    assert_eq!(register["event"], "register");
    assert_eq!(register["data"]["role"], "server");
    let server_id = register["data"]["serverID"].as_str().unwrap().to_string();
    assert_eq!(server_id.len(), 12);

    peer.send(OFFER).await;
    let answer = peer.recv().await;
    assert_eq!(answer["event"], "offerOrAnswer");
    assert_eq!(answer["data"]["type"], "answer");
    assert_eq!(answer["data"]["to"], "client");
    assert!(answer["data"]["sdp"].as_str().unwrap().starts_with("v=0"));
    server_id
}

async fn stream_sign(remote: &LoopbackRemote) {
    remote.connect();
    remote.open_data_channel("chat");
    let frames = remote.add_track(TrackKind::Video, 32);
    frames.send(empty_frame(0)).await.unwrap();
    for pts in 1..=3 {
        frames.send(hello_frame(pts)).await.unwrap();
    }
}

#[tokio::test]
async fn test_agent_recognizes_sign_and_restarts_after_call() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    let transports = LoopbackFactory::recording();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent = AgentSupervisor::new(Arc::new(factory(endpoint, transports.clone())));
    let agent_task = tokio::spawn(async move { agent.run(shutdown_rx).await });

    // First call.
    let mut peer = Peer::accept(&listener).await;
    let first_id = negotiate(&mut peer).await;
    let remote = transports.latest().unwrap();
    assert_eq!(remote.ice_servers(), vec!["stun:stun.example.org:3478"]);
    stream_sign(&remote).await;

    wait_for(|| remote.received_messages().len() >= 2).await;
    assert_eq!(
        remote.received_messages(),
        vec![DATA_CHANNEL_PROBE.to_string(), "HELLO|HELLO".to_string()]
    );
    // Every frame is echoed on the outgoing track, recognized or not.
    wait_for(|| remote.forwarded_frames().len() == 4).await;

    peer.send(r#"{"event":"endCall","data":{}}"#).await;
    wait_for(|| remote.is_closed()).await;

    // The agent comes back with a fresh identity and a fresh transport.
    let mut peer = Peer::accept(&listener).await;
    let second_id = negotiate(&mut peer).await;
    assert_ne!(first_id, second_id);
    assert_eq!(transports.remotes().len(), 2);

    shutdown_tx.send(true).unwrap();
    let stats = agent_task.await.unwrap();
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.calls_ended, 1);
    assert_eq!(stats.failures, 0);
    assert!(transports.latest().unwrap().is_closed());
}

#[tokio::test]
async fn test_server_disconnect_counts_as_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    let transports = LoopbackFactory::recording();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent = AgentSupervisor::new(Arc::new(factory(endpoint, transports.clone())));
    let agent_task = tokio::spawn(async move { agent.run(shutdown_rx).await });

    let mut peer = Peer::accept(&listener).await;
    negotiate(&mut peer).await;
    drop(peer);

    // Reconnects after the drop.
    let mut peer = Peer::accept(&listener).await;
    let register = peer.recv().await;
    assert_eq!(register["event"], "register");

    shutdown_tx.send(true).unwrap();
    let stats = agent_task.await.unwrap();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.consecutive_failures, 1);
    assert!(transports.remotes().iter().all(|r| r.is_closed()));
}

#[tokio::test]
async fn test_peer_messages_do_not_disturb_recognition() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    let transports = LoopbackFactory::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent = AgentSupervisor::new(Arc::new(factory(endpoint, transports.clone())));
    let agent_task = tokio::spawn(async move { agent.run(shutdown_rx).await });

    let mut peer = Peer::accept(&listener).await;
    negotiate(&mut peer).await;
    peer.send(r#"{"event":"no-available-servers","data":{}}"#).await;
    let remote = transports.latest().unwrap();
    stream_sign(&remote).await;
    remote.send_message("hi from the browser");

    wait_for(|| remote.received_messages().len() >= 2).await;
    assert_eq!(remote.received_messages()[1], "HELLO|HELLO");

    shutdown_tx.send(true).unwrap();
    let stats = agent_task.await.unwrap();
    assert_eq!(stats.attempts, 1);
}
