//! Test utilities: a simulated radio on the far side of an in-memory stream.
//!
//! The radio speaks the same framed protobuf protocol as real hardware, so sessions under test
//! run their production read loop, ack table and event publishing unchanged.
#![allow(dead_code)]

use bytes::Bytes;
use meshbot::meshtastic::framing::{self, FrameError, FrameReader};
use meshbot::meshtastic::{ConnectedNode, Events, Message, SessionOptions, Topic};
use meshbot::protobuf::meshtastic_generated as proto;
use prost::Message as _;
use std::sync::Arc;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

pub const LOCAL: u32 = 0x0bee_f001;
pub const ALICE: u32 = 0x0a11_ce00;
pub const BOB: u32 = 0x0b0b_0b0b;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub use proto::from_radio::PayloadVariant as FR;
pub use proto::to_radio::PayloadVariant as TR;

/// Await `fut` or fail the test after [`WAIT`].
pub async fn within<F: std::future::Future>(what: &str, fut: F) -> F::Output {
    match timeout(WAIT, fut).await {
        Ok(v) => v,
        Err(_) => panic!("Timed out waiting for {}", what),
    }
}

pub struct Radio {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Radio {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, variant: FR) {
        let packet = proto::FromRadio {
            id: 0,
            payload_variant: Some(variant),
        };
        framing::write_packet(&mut self.writer, &packet)
            .await
            .expect("radio write");
    }

    pub async fn send_packet(&mut self, packet: proto::MeshPacket) {
        self.send(FR::Packet(packet)).await;
    }

    /// Next `ToRadio` the session wrote, or `None` once it hung up.
    pub async fn try_recv(&mut self) -> Option<TR> {
        match within("a frame from the session", self.reader.read_payload()).await {
            Ok(payload) => {
                let packet = proto::ToRadio::decode(payload).expect("ToRadio decode");
                Some(packet.payload_variant.expect("ToRadio without payload"))
            }
            Err(FrameError::Eof) => None,
            Err(e) => panic!("Radio read failed: {}", e),
        }
    }

    pub async fn recv(&mut self) -> TR {
        self.try_recv().await.expect("session hung up")
    }

    /// Next outgoing mesh packet, skipping heartbeats.
    pub async fn recv_packet(&mut self) -> proto::MeshPacket {
        loop {
            match self.recv().await {
                TR::Packet(p) => return p,
                TR::Heartbeat(_) => continue,
                other => panic!("Expected mesh packet, got {:?}", other),
            }
        }
    }

    pub async fn expect_want_config(&mut self) -> u32 {
        match self.recv().await {
            TR::WantConfigId(id) => id,
            other => panic!("Expected want_config_id, got {:?}", other),
        }
    }

    /// Play back a small node database: ourselves, Alice, Bob and one primary channel.
    pub async fn send_config(&mut self, config_id: u32) {
        self.send(FR::MyInfo(proto::MyNodeInfo {
            my_node_num: LOCAL,
            ..Default::default()
        }))
        .await;
        self.send(FR::Metadata(proto::DeviceMetadata {
            firmware_version: "2.5.6.test".to_string(),
            ..Default::default()
        }))
        .await;
        self.send(FR::NodeInfo(node_info(LOCAL, "BOT", "Meshbot"))).await;
        self.send(FR::NodeInfo(node_info(ALICE, "ALC", "Alice"))).await;
        self.send(FR::NodeInfo(node_info(BOB, "BOB", "Bob"))).await;
        self.send(FR::Channel(proto::Channel {
            index: 0,
            settings: Some(proto::ChannelSettings {
                name: String::new(),
                psk: Bytes::from_static(&[1]),
                ..Default::default()
            }),
            role: proto::channel::Role::Primary as i32,
        }))
        .await;
        self.send(FR::ConfigCompleteId(config_id)).await;
    }

    /// Routing status for `request_id`, as the destination's firmware would send it.
    pub async fn ack(&mut self, from: u32, request_id: u32, error: proto::routing::Error) {
        let routing = proto::Routing {
            variant: Some(proto::routing::Variant::ErrorReason(error as i32)),
        };
        let mut packet = data_packet(from, LOCAL, proto::PortNum::RoutingApp, routing.encode_to_vec());
        if let Some(proto::mesh_packet::PayloadVariant::Decoded(data)) = packet.payload_variant.as_mut() {
            data.request_id = request_id;
        }
        self.send_packet(packet).await;
    }
}

pub fn node_info(num: u32, short: &str, long: &str) -> proto::NodeInfo {
    proto::NodeInfo {
        num,
        user: Some(proto::User {
            id: format!("!{:08x}", num),
            short_name: short.to_string(),
            long_name: long.to_string(),
            ..Default::default()
        }),
        snr: 4.0,
        ..Default::default()
    }
}

/// A decoded packet heard directly (no hops) with an SNR of 6.5.
pub fn data_packet(from: u32, to: u32, port: proto::PortNum, payload: Vec<u8>) -> proto::MeshPacket {
    proto::MeshPacket {
        from,
        to,
        id: rand::random::<u32>() | 1,
        rx_snr: 6.5,
        hop_start: 3,
        hop_limit: 3,
        payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(proto::Data {
            portnum: port as i32,
            payload: Bytes::from(payload),
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn text_packet(from: u32, to: u32, text: &str) -> proto::MeshPacket {
    data_packet(from, to, proto::PortNum::TextMessageApp, text.as_bytes().to_vec())
}

pub fn reply_text(packet: &proto::MeshPacket) -> String {
    match &packet.payload_variant {
        Some(proto::mesh_packet::PayloadVariant::Decoded(d)) => String::from_utf8_lossy(&d.payload).into_owned(),
        other => panic!("Expected decoded packet, got {:?}", other),
    }
}

/// Forward every message published on `topic` into a channel.
pub fn collect_messages(events: &Events, topic: Topic) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    events.messages.subscribe(topic, move |m: Message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(m);
        }
    });
    rx
}

pub fn collect_connection(events: &Events, topic: Topic) -> mpsc::UnboundedReceiver<ConnectedNode> {
    let (tx, rx) = mpsc::unbounded_channel();
    events.connection.subscribe(topic, move |n: ConnectedNode| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(n);
        }
    });
    rx
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    within("an event", rx.recv()).await.expect("event channel closed")
}

pub fn quiet_options() -> SessionOptions {
    SessionOptions {
        wake: false,
        heartbeat_interval: None,
        frame_log: None,
    }
}

pub struct Harness {
    pub session: ConnectedNode,
    pub radio: Radio,
    pub events: Arc<Events>,
    pub texts: mpsc::UnboundedReceiver<Message>,
    pub connected: mpsc::UnboundedReceiver<ConnectedNode>,
    pub disconnected: mpsc::UnboundedReceiver<ConnectedNode>,
}

impl Harness {
    /// Open a session against a fresh radio; the config request has been consumed.
    pub async fn open_with(events: Arc<Events>, options: SessionOptions) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let (client, far) = tokio::io::duplex(64 * 1024);
        let texts = collect_messages(&events, Topic::TextMessage);
        let connected = collect_connection(&events, Topic::Connected);
        let disconnected = collect_connection(&events, Topic::Disconnected);
        let session = ConnectedNode::open(client, events.clone(), options)
            .await
            .expect("open session");
        let mut radio = Radio::new(far);
        let id = radio.expect_want_config().await;
        assert_eq!(id, session.config_id());
        Self {
            session,
            radio,
            events,
            texts,
            connected,
            disconnected,
        }
    }

    pub async fn open() -> Self {
        Self::open_with(Events::new(), quiet_options()).await
    }

    /// Open and finish the handshake.
    pub async fn connected_with(events: Arc<Events>) -> Self {
        let mut h = Self::open_with(events, quiet_options()).await;
        let config_id = h.session.config_id();
        h.radio.send_config(config_id).await;
        next(&mut h.connected).await;
        h
    }

    pub async fn connected() -> Self {
        Self::connected_with(Events::new()).await
    }

    /// Have `from` send `text` and return the message the session published for it.
    pub async fn hear_text(&mut self, from: u32, to: u32, text: &str) -> Message {
        self.radio.send_packet(text_packet(from, to, text)).await;
        next(&mut self.texts).await
    }
}
