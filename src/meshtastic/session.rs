//! A live connection to one Meshtastic radio.
//!
//! [`ConnectedNode::open`] wakes the radio, requests its configuration and spawns a read loop
//! that owns all model mutation. The handshake is finished when [`Topic::Connected`] fires,
//! not when `open` returns.
//!
//! Outgoing replies can be correlated with the routing acknowledgment the mesh sends back:
//! [`ConnectedNode::reply_blocking`] registers the packet id in an ack table that is resolved
//! by whichever comes first, the ack or the timeout.

use crate::logutil::escape_log;
use crate::meshtastic::channel::Channel;
use crate::meshtastic::events::{Events, Topic};
use crate::meshtastic::framing::{self, Direction, FrameError, FrameLog, FrameReader};
use crate::meshtastic::message::{Message, MessageType, Payload};
use crate::meshtastic::node::{epoch, DeviceMetrics, MessageRecord, NodeHandle, Position};
use crate::meshtastic::node_list::NodeList;
use crate::metrics;
use crate::protobuf::meshtastic_generated as proto;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use prost::Message as _;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Largest text the firmware will carry in one packet (`DATA_PAYLOAD_LEN`).
pub const MAX_TEXT_LEN: usize = 233;
pub const REPLY_HOP_LIMIT: u32 = 3;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("session is closed")]
    Closed,
    #[error("message is not attached to a connected session")]
    Detached,
    #[error("text of {0} bytes exceeds the 233 byte packet limit")]
    TextTooLong(usize),
    #[error("local node id not yet known")]
    NoLocalNode,
}

/// Final outcome of a blocking reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// The mesh reported a routing error (`Routing.Error` value).
    Failed(i32),
    TimedOut,
}

impl DeliveryStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Delivered => f.write_str("delivered"),
            DeliveryStatus::TimedOut => f.write_str("timed out"),
            DeliveryStatus::Failed(reason) => {
                let name = proto::routing::Error::try_from(*reason)
                    .map(|e| e.as_str_name())
                    .unwrap_or("UNKNOWN");
                write!(f, "failed ({})", name)
            }
        }
    }
}

/// Handle on an outstanding blocking reply.
#[derive(Debug)]
pub struct PendingDelivery {
    id: u32,
    rx: oneshot::Receiver<DeliveryStatus>,
}

impl PendingDelivery {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub async fn wait(self) -> DeliveryStatus {
        // A dropped sender means the entry was discarded without an answer.
        self.rx.await.unwrap_or(DeliveryStatus::TimedOut)
    }
}

#[derive(Clone)]
pub struct SessionOptions {
    /// Send the wake preamble before the handshake.
    pub wake: bool,
    pub heartbeat_interval: Option<Duration>,
    pub frame_log: Option<Arc<FrameLog>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            wake: true,
            heartbeat_interval: Some(Duration::from_secs(300)),
            frame_log: None,
        }
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct SessionInner {
    writer: tokio::sync::Mutex<Writer>,
    events: Arc<Events>,
    nodes: NodeList,
    channels: RwLock<Vec<Channel>>,
    local: RwLock<Option<NodeHandle>>,
    firmware_version: RwLock<Option<String>>,
    connected: AtomicBool,
    closed: AtomicBool,
    acks: Mutex<HashMap<u32, oneshot::Sender<DeliveryStatus>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    config_id: u32,
    frame_log: Option<Arc<FrameLog>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn nonzero_random() -> u32 {
    loop {
        let id: u32 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// Cheaply cloneable session handle.
#[derive(Clone)]
pub struct ConnectedNode(Arc<SessionInner>);

impl ConnectedNode {
    /// Wake the radio, start the read loop and request the configuration download.
    pub async fn open<S>(
        stream: S,
        events: Arc<Events>,
        options: SessionOptions,
    ) -> Result<Self, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut writer: Writer = Box::new(writer);
        if options.wake {
            framing::wake_device(&mut writer).await?;
        }

        let session = ConnectedNode(Arc::new(SessionInner {
            writer: tokio::sync::Mutex::new(writer),
            events,
            nodes: NodeList::new(),
            channels: RwLock::new(Vec::new()),
            local: RwLock::new(None),
            firmware_version: RwLock::new(None),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            acks: Mutex::new(HashMap::new()),
            reader_task: Mutex::new(None),
            heartbeat_task: Mutex::new(None),
            config_id: nonzero_random(),
            frame_log: options.frame_log,
        }));

        let reader_task = tokio::spawn(read_loop(session.clone(), FrameReader::new(reader)));
        *lock(&session.0.reader_task) = Some(reader_task);

        debug!("Requesting config with want_config_id=0x{:08x}", session.0.config_id);
        session
            .send_to_radio(&proto::ToRadio {
                payload_variant: Some(proto::to_radio::PayloadVariant::WantConfigId(
                    session.0.config_id,
                )),
            })
            .await?;

        if let Some(interval) = options.heartbeat_interval {
            let task = tokio::spawn(heartbeat_loop(session.clone(), interval));
            *lock(&session.0.heartbeat_task) = Some(task);
        }
        Ok(session)
    }

    /// Stop the session and publish [`Topic::Disconnected`]. Later calls do nothing.
    pub async fn close(&self) {
        self.shutdown(true).await;
    }

    async fn shutdown(&self, from_api: bool) {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.0.connected.store(false, Ordering::SeqCst);
        if let Some(task) = lock(&self.0.heartbeat_task).take() {
            task.abort();
        }
        // When the read loop itself hit EOF it is already on its way out.
        let reader = lock(&self.0.reader_task).take();
        if from_api {
            if let Some(task) = reader {
                task.abort();
            }
            let bye = proto::ToRadio {
                payload_variant: Some(proto::to_radio::PayloadVariant::Disconnect(true)),
            };
            if let Err(e) = self.write_to_radio(&bye).await {
                debug!("Disconnect notice not sent: {}", e);
            }
        }
        if let Err(e) = self.0.writer.lock().await.shutdown().await {
            debug!("Transport shutdown: {}", e);
        }
        info!("Session closed");
        debug!("Link metrics at close: {:?}", metrics::snapshot());
        self.0
            .events
            .connection
            .publish(Topic::Disconnected, self.clone());
    }

    pub fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &Arc<Events> {
        &self.0.events
    }

    pub fn node_list(&self) -> &NodeList {
        &self.0.nodes
    }

    pub fn local_node(&self) -> Option<NodeHandle> {
        self.0.local.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn local_id(&self) -> Option<u32> {
        self.local_node().map(|n| n.id())
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.0
            .firmware_version
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.0.channels.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn config_id(&self) -> u32 {
        self.0.config_id
    }

    /// Number of blocking replies still waiting for an outcome.
    pub fn pending_acks(&self) -> usize {
        lock(&self.0.acks).len()
    }

    /// Wrap a mesh packet in `ToRadio` and send it.
    pub async fn send_message(&self, packet: proto::MeshPacket) -> Result<(), SessionError> {
        self.send_to_radio(&proto::ToRadio {
            payload_variant: Some(proto::to_radio::PayloadVariant::Packet(packet)),
        })
        .await
    }

    async fn send_to_radio(&self, packet: &proto::ToRadio) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.write_to_radio(packet).await
    }

    async fn write_to_radio(&self, packet: &proto::ToRadio) -> Result<(), SessionError> {
        let payload = packet.encode_to_vec();
        if let Some(log) = &self.0.frame_log {
            log.record(Direction::Tx, &payload);
        }
        let mut writer = self.0.writer.lock().await;
        framing::write_frame(&mut *writer, &payload).await?;
        Ok(())
    }

    fn reply_packet(&self, message: &Message, text: &str, id: u32) -> Result<proto::MeshPacket, SessionError> {
        if text.len() > MAX_TEXT_LEN {
            return Err(SessionError::TextTooLong(text.len()));
        }
        let local = self.local_id().ok_or(SessionError::NoLocalNode)?;
        Ok(proto::MeshPacket {
            from: local,
            to: message.from.id(),
            channel: message.channel,
            id,
            hop_limit: REPLY_HOP_LIMIT,
            want_ack: true,
            priority: proto::mesh_packet::Priority::Reliable as i32,
            payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(proto::Data {
                portnum: proto::PortNum::TextMessageApp as i32,
                payload: Bytes::copy_from_slice(text.as_bytes()),
                ..Default::default()
            })),
            ..Default::default()
        })
    }

    /// A random nonzero id that is not awaiting an ack.
    fn unused_id(acks: &HashMap<u32, oneshot::Sender<DeliveryStatus>>) -> u32 {
        loop {
            let id = nonzero_random();
            if !acks.contains_key(&id) {
                return id;
            }
        }
    }

    /// Send `text` to the sender of `message` and return the packet id without waiting.
    pub async fn reply(&self, message: &Message, text: &str) -> Result<u32, SessionError> {
        let id = Self::unused_id(&lock(&self.0.acks));
        let packet = self.reply_packet(message, text, id)?;
        self.send_message(packet).await?;
        debug!(
            "Reply 0x{:08x} to !{:08x}: {}",
            id,
            message.from.id(),
            escape_log(text)
        );
        Ok(id)
    }

    /// Send `text` to the sender of `message` and register for its delivery ack.
    pub async fn reply_blocking(
        &self,
        message: &Message,
        text: &str,
        timeout: Duration,
    ) -> Result<PendingDelivery, SessionError> {
        let (tx, rx) = oneshot::channel();
        // Register before sending so an ack that beats us back is not lost.
        let id = {
            let mut acks = lock(&self.0.acks);
            let id = Self::unused_id(&acks);
            acks.insert(id, tx);
            id
        };
        let sent = match self.reply_packet(message, text, id) {
            Ok(packet) => self.send_message(packet).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            lock(&self.0.acks).remove(&id);
            return Err(e);
        }
        debug!(
            "Reply 0x{:08x} to !{:08x} awaiting ack ({:?}): {}",
            id,
            message.from.id(),
            timeout,
            escape_log(text)
        );

        let session = self.clone();
        tokio::spawn(async move {
            sleep(timeout).await;
            if session.resolve_pending(id, DeliveryStatus::TimedOut) {
                debug!("No ack for 0x{:08x} within {:?}", id, timeout);
            }
        });
        Ok(PendingDelivery { id, rx })
    }

    /// Complete and remove an ack table entry. False if it was already resolved.
    fn resolve_pending(&self, id: u32, status: DeliveryStatus) -> bool {
        let Some(tx) = lock(&self.0.acks).remove(&id) else {
            return false;
        };
        match status {
            DeliveryStatus::Delivered => metrics::inc_acks_delivered(),
            DeliveryStatus::Failed(_) => metrics::inc_acks_failed(),
            DeliveryStatus::TimedOut => metrics::inc_acks_timed_out(),
        }
        // The waiter may have given up; that is fine.
        let _ = tx.send(status);
        true
    }

    fn handle_from_radio(&self, packet: proto::FromRadio) {
        use proto::from_radio::PayloadVariant as FR;
        match packet.payload_variant {
            Some(FR::ConfigCompleteId(id)) => {
                if id != self.0.config_id {
                    debug!(
                        "config_complete_id 0x{:08x} does not match request 0x{:08x}",
                        id, self.0.config_id
                    );
                }
                self.0.connected.store(true, Ordering::SeqCst);
                info!(
                    "Radio configuration complete: {} nodes, {} channels",
                    self.0.nodes.sorted().len(),
                    self.channels().len()
                );
                self.0.events.connection.publish(Topic::Connected, self.clone());
            }
            Some(FR::MyInfo(info)) => {
                let node = self.0.nodes.adopt_local(info.my_node_num);
                info!("Local node id !{:08x}", info.my_node_num);
                *self.0.local.write().unwrap_or_else(|p| p.into_inner()) = Some(node);
            }
            Some(FR::Metadata(meta)) => {
                info!("Radio firmware {}", meta.firmware_version);
                if let Some(local) = self.local_node() {
                    let mut n = local.write();
                    if meta.hw_model != 0 {
                        n.hw_model = meta.hw_model;
                    }
                    if meta.role != 0 {
                        n.role = meta.role;
                    }
                }
                *self
                    .0
                    .firmware_version
                    .write()
                    .unwrap_or_else(|p| p.into_inner()) = Some(meta.firmware_version);
            }
            Some(FR::NodeInfo(info)) => {
                let (node, created) = self.0.nodes.update_node(&info);
                trace!("Node info for {} (new={})", node, created);
                let topic = if created {
                    Topic::NodeDiscovered
                } else {
                    Topic::NodeUpdated
                };
                self.0.events.nodes.publish(topic, node);
            }
            Some(FR::Channel(channel)) => {
                let channel = Channel::from_proto(&channel);
                debug!("Channel {}", channel);
                self.0
                    .channels
                    .write()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(channel);
            }
            Some(FR::Packet(packet)) => self.handle_mesh_packet(packet),
            Some(FR::QueueStatus(q)) => {
                trace!(
                    "Queue status res={} free={}/{} id=0x{:08x}",
                    q.res,
                    q.free,
                    q.maxlen,
                    q.mesh_packet_id
                );
            }
            Some(FR::Config(_)) => debug!("Ignoring radio config section"),
            Some(FR::ModuleConfig(_)) => debug!("Ignoring module config section"),
            Some(FR::FileInfo(f)) => debug!("Ignoring file info {} ({} bytes)", f.file_name, f.size_bytes),
            Some(FR::LogRecord(record)) => {
                use proto::log_record::Level;
                let level = match Level::try_from(record.level) {
                    Ok(Level::Critical) | Ok(Level::Error) => log::Level::Error,
                    Ok(Level::Warning) => log::Level::Warn,
                    Ok(Level::Info) => log::Level::Info,
                    Ok(Level::Trace) => log::Level::Trace,
                    _ => log::Level::Debug,
                };
                log::log!(target: "device", level, "{}: {}", record.source, escape_log(&record.message));
            }
            Some(FR::Rebooted(_)) => info!("Radio reports it has rebooted"),
            None => debug!("Unhandled FromRadio packet id={}", packet.id),
        }
    }

    fn handle_mesh_packet(&self, packet: proto::MeshPacket) {
        let data = match &packet.payload_variant {
            Some(proto::mesh_packet::PayloadVariant::Decoded(data)) => data,
            _ => {
                trace!("Ignoring encrypted packet 0x{:08x} from !{:08x}", packet.id, packet.from);
                return;
            }
        };
        if data.payload.is_empty() {
            trace!("Ignoring empty packet 0x{:08x} from !{:08x}", packet.id, packet.from);
            return;
        }

        let hops = if packet.hop_start == 0 {
            0
        } else {
            packet.hop_start.saturating_sub(packet.hop_limit)
        };
        let (from, _) = self.0.nodes.get_or_create(packet.from);
        let (to, _) = self.0.nodes.get_or_create(packet.to);
        {
            let mut n = from.write();
            n.hops_away = hops;
            // A relayed packet's SNR describes the last hop, not the origin.
            if hops == 0 {
                n.snr = packet.rx_snr;
            }
            if let Some(heard) = epoch(packet.rx_time) {
                n.last_heard = Some(heard);
            }
        }
        let received_at = epoch(packet.rx_time).unwrap_or_else(Utc::now);

        let payload = match self.decode_payload(data, &from, received_at) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::inc_decode_errors();
                warn!(
                    "Dropping packet 0x{:08x} from !{:08x} on port {}: {}",
                    packet.id, packet.from, data.portnum, e
                );
                return;
            }
        };

        let message = Message {
            from: from.clone(),
            to,
            receiving: Some(self.clone()),
            timestamp: received_at,
            snr: packet.rx_snr,
            hops_away: hops,
            channel: packet.channel,
            packet_id: packet.id,
            payload,
        };
        from.write().messages.push(MessageRecord {
            timestamp: received_at,
            to: packet.to,
            message_type: message.message_type(),
            summary: message.payload.summary(),
        });
        if let Payload::Text(text) = &message.payload {
            info!("Text from {}: {}", message.from, escape_log(text));
        } else {
            debug!("{}", escape_log(&message.to_string()));
        }
        self.publish_message(message);
    }

    /// Decode the inner payload by port and apply it to the model.
    fn decode_payload(
        &self,
        data: &proto::Data,
        from: &NodeHandle,
        at: DateTime<Utc>,
    ) -> Result<Payload, prost::DecodeError> {
        use proto::PortNum;
        let raw = data.payload.clone();
        let payload = match PortNum::try_from(data.portnum) {
            Ok(PortNum::TextMessageApp) => Payload::Text(String::from_utf8_lossy(&raw).into_owned()),
            Ok(PortNum::NodeinfoApp) => {
                let user = proto::User::decode(raw)?;
                from.write().apply_user(&user);
                Payload::NodeInfo(user)
            }
            Ok(PortNum::PositionApp) => {
                let position = Position::from_proto(&proto::Position::decode(raw)?);
                from.write().push_position(position.clone());
                Payload::Position(position)
            }
            Ok(PortNum::NeighborinfoApp) => {
                let info = proto::NeighborInfo::decode(raw)?;
                self.0.nodes.replace_neighbors(from, Some(at), &info.neighbors);
                Payload::NeighborInfo(info)
            }
            Ok(PortNum::TelemetryApp) => {
                let telemetry = proto::Telemetry::decode(raw)?;
                self.telemetry_payload(telemetry, data, from, at)
            }
            Ok(PortNum::RoutingApp) => {
                let routing = proto::Routing::decode(raw)?;
                self.resolve_ack(data, &routing);
                Payload::Routing(routing)
            }
            Ok(PortNum::TracerouteApp) => Payload::Traceroute(proto::RouteDiscovery::decode(raw)?),
            _ => Payload::Other {
                port: data.portnum,
                raw,
            },
        };
        Ok(payload)
    }

    fn telemetry_payload(
        &self,
        telemetry: proto::Telemetry,
        data: &proto::Data,
        from: &NodeHandle,
        at: DateTime<Utc>,
    ) -> Payload {
        use proto::telemetry::Variant;
        match telemetry.variant {
            Some(Variant::DeviceMetrics(m)) => {
                let metrics = DeviceMetrics::from_proto(&m, epoch(telemetry.time).unwrap_or(at));
                from.write().device_metrics.push(metrics.clone());
                Payload::DeviceTelemetry(metrics)
            }
            Some(Variant::EnvironmentMetrics(m)) => Payload::EnvironmentTelemetry(m),
            Some(Variant::HealthMetrics(m)) => Payload::HealthTelemetry(m),
            Some(Variant::AirQualityMetrics(m)) => Payload::AirQualityTelemetry(m),
            Some(Variant::PowerMetrics(m)) => Payload::PowerTelemetry(m),
            Some(Variant::LocalStats(m)) => Payload::LocalStatsTelemetry(m),
            None => {
                debug!("Telemetry from {} with an unknown variant", from);
                Payload::Other {
                    port: data.portnum,
                    raw: data.payload.clone(),
                }
            }
        }
    }

    fn resolve_ack(&self, data: &proto::Data, routing: &proto::Routing) {
        use proto::routing::{Error as RErr, Variant as RVar};
        let id = if data.request_id != 0 {
            data.request_id
        } else {
            data.reply_id
        };
        let Some(RVar::ErrorReason(reason)) = routing.variant.as_ref() else {
            return;
        };
        let reason = *reason;
        if id == 0 {
            return;
        }
        let status = if reason == RErr::None as i32 {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Failed(reason)
        };
        if self.resolve_pending(id, status) {
            debug!("Packet 0x{:08x} {}", id, status);
        } else {
            trace!("Routing status for untracked id 0x{:08x}: {}", id, status);
        }
    }

    fn publish_message(&self, message: Message) {
        let bus = &self.0.events.messages;
        let kind = message.message_type();
        if let Some(topic) = Topic::for_message(kind) {
            bus.publish(topic, message.clone());
        }
        if kind.is_telemetry() {
            bus.publish(Topic::Telemetry, message.clone());
        }
        // Routing traffic is link plumbing, not conversation.
        if kind != MessageType::Routing {
            bus.publish(Topic::AnyMessage, message);
        }
        metrics::inc_messages_published();
    }
}

async fn read_loop<R>(session: ConnectedNode, mut reader: FrameReader<R>)
where
    R: AsyncRead + Unpin,
{
    while !session.is_closed() {
        match reader.read_payload().await {
            Ok(payload) => {
                if let Some(log) = &session.0.frame_log {
                    log.record(Direction::Rx, &payload);
                }
                match proto::FromRadio::decode(payload) {
                    Ok(packet) => session.handle_from_radio(packet),
                    Err(e) => {
                        metrics::inc_decode_errors();
                        warn!("Failed to decode FromRadio frame: {}", e);
                    }
                }
            }
            Err(FrameError::Eof) => {
                info!("Radio closed the connection");
                session.shutdown(false).await;
                break;
            }
            Err(e) => {
                warn!("Read error from radio: {}", e);
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn heartbeat_loop(session: ConnectedNode, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; the handshake already proved the link.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let beat = proto::ToRadio {
            payload_variant: Some(proto::to_radio::PayloadVariant::Heartbeat(proto::Heartbeat {
                nonce: rand::random(),
            })),
        };
        match session.send_to_radio(&beat).await {
            Ok(()) => trace!("Sent heartbeat"),
            Err(SessionError::Closed) => break,
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }
}

impl fmt::Display for ConnectedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_node() {
            Some(node) => write!(f, "{}", node)?,
            None => f.write_str("(local node unknown)")?,
        }
        if let Some(version) = self.firmware_version() {
            write!(f, " firmware {}", version)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedNode")
            .field("local", &self.local_id().map(|id| format!("!{:08x}", id)))
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .field("pending_acks", &self.pending_acks())
            .finish()
    }
}
