//! Sparkplug edge-node session.
//!
//! [`EdgeNode`] manages the complete message lifecycle of a Sparkplug B
//! edge node: the NDEATH Last Will armed at connect time, NBIRTH/NDATA and
//! the device-scoped DBIRTH/DDATA/DDEATH, the monotonic `bdSeq` session
//! counter, the rolling 0-255 `seq` counter shared by every message the
//! node emits, NCMD intake, and rebirth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use prost::Message as _;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::observer::CommandCallback;
use crate::payload::{now_millis, Payload, PayloadBuilder};
use crate::proto;
use crate::topic::{MessageType, Topic};
use crate::transport::{
    ConnectOptions, Credentials, LastWill, MqttConnection, MqttTransport, TlsOptions,
    TransportHandler, DISCONNECT_TIMEOUT,
};
use crate::types::DataType;

/// Connection lifecycle states of an edge-node session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No MQTT connection.
    Disconnected = 0,
    /// A connect attempt is in flight.
    Connecting = 1,
    /// Connected; publishing is allowed.
    Connected = 2,
    /// A rebirth cycle (disconnect, reconnect, replay NBIRTH) is in flight.
    Rebirthing = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Rebirthing,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Configuration for an edge-node session.
#[derive(Clone)]
pub struct EdgeNodeConfig {
    /// MQTT broker URL (`tcp://host:port` or `ssl://host:port`).
    pub broker_url: String,
    /// Unique MQTT client identifier.
    pub client_id: String,
    /// Sparkplug group ID.
    pub group_id: String,
    /// Edge node identifier within the group.
    pub edge_node_id: String,
    /// MQTT QoS for metric messages (NBIRTH/NDATA/DBIRTH/DDATA/DDEATH).
    pub data_qos: u8,
    /// MQTT QoS for the NDEATH will message.
    pub death_qos: u8,
    /// MQTT clean session flag.
    pub clean_session: bool,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// TLS material, required for `ssl://` broker URLs.
    pub tls: Option<TlsOptions>,
    /// MQTT username/password.
    pub credentials: Option<Credentials>,
    /// Callback for inbound NCMD messages. When set, the session subscribes
    /// to its NCMD topic at QoS 1 during connect. The callback runs on the
    /// transport thread and must not call back into blocking session
    /// operations (connect/disconnect/rebirth); record the request and
    /// trigger [`EdgeNode::rebirth`] from an application thread instead.
    pub command_callback: Option<CommandCallback>,
}

impl EdgeNodeConfig {
    /// Creates a configuration with Sparkplug-recommended defaults:
    /// data QoS 0, death QoS 1, clean session, 60 s keep-alive.
    pub fn new(
        broker_url: impl Into<String>,
        client_id: impl Into<String>,
        group_id: impl Into<String>,
        edge_node_id: impl Into<String>,
    ) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: client_id.into(),
            group_id: group_id.into(),
            edge_node_id: edge_node_id.into(),
            data_qos: 0,
            death_qos: 1,
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            tls: None,
            credentials: None,
            command_callback: None,
        }
    }

    /// Sets MQTT username/password credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Sets TLS options for `ssl://` brokers.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Registers the NCMD command callback.
    pub fn with_command_callback(
        mut self,
        callback: impl Fn(&Topic, &Payload) + Send + Sync + 'static,
    ) -> Self {
        self.command_callback = Some(Arc::new(callback));
        self
    }

    /// Overrides the metric-message QoS (default 0).
    pub fn with_data_qos(mut self, qos: u8) -> Self {
        self.data_qos = qos;
        self
    }

    /// Overrides the MQTT keep-alive interval (default 60 s).
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Overrides the clean-session flag (default true).
    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }
}

/// Publisher-side record of a device attached to this edge node.
struct DeviceState {
    last_birth: Vec<u8>,
    online: bool,
}

struct SessionState {
    transport: Box<dyn MqttTransport>,
    /// Rolling 0-255 counter shared by every message after NBIRTH.
    seq: u8,
    /// Monotonic birth/death session counter.
    bd_seq: u64,
    birth_sent: bool,
    last_birth: Vec<u8>,
    /// NDEATH topic and bytes, kept alive for the transport's will slot.
    death_topic: String,
    death_payload: Vec<u8>,
    devices: HashMap<String, DeviceState>,
}

struct EdgeInner {
    config: EdgeNodeConfig,
    state: AtomicU8,
    session: Mutex<SessionState>,
}

impl EdgeInner {
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.connection_state(),
            ConnectionState::Connected | ConnectionState::Rebirthing
        )
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransportHandler for EdgeInner {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        let parsed = match Topic::parse(topic) {
            Ok(parsed) => parsed,
            Err(_) => return,
        };
        if parsed.message_type != MessageType::NCmd
            || parsed.edge_node_id != self.config.edge_node_id
        {
            return;
        }
        // Snapshot the callback, then run it without any session lock held
        // so the handler may schedule work that publishes.
        let Some(callback) = self.config.command_callback.clone() else {
            return;
        };
        match Payload::parse(payload) {
            Ok(payload) => callback(&parsed, &payload),
            Err(err) => warn!(topic, %err, "dropping undecodable NCMD payload"),
        }
    }

    fn on_connection_lost(&self, cause: &str) {
        self.set_state(ConnectionState::Disconnected);
        warn!(
            edge_node_id = %self.config.edge_node_id,
            cause,
            "connection lost; broker will deliver the NDEATH will"
        );
    }
}


/// A Sparkplug B edge node session.
///
/// All methods take `&self`; a single internal mutex serializes session
/// state, so an `EdgeNode` can be shared across threads. `connect`,
/// `disconnect` and `rebirth` block up to their configured timeouts; the
/// `publish_*` family only enqueues into the transport.
///
/// # Example
///
/// ```no_run
/// use sparkplug_b::{EdgeNode, EdgeNodeConfig, PayloadBuilder};
///
/// # fn main() -> sparkplug_b::Result<()> {
/// let config = EdgeNodeConfig::new(
///     "tcp://localhost:1883",
///     "my_edge_node",
///     "Energy",
///     "Gateway01",
/// );
///
/// let node = EdgeNode::new(config)?;
/// node.connect()?;
///
/// let mut birth = PayloadBuilder::new();
/// birth
///     .add_metric_with_alias("Temperature", 1, 20.5)
///     .add_metric_with_alias("Active", 2, true);
/// node.publish_birth(&mut birth)?;
///
/// let mut data = PayloadBuilder::new();
/// data.add_metric_by_alias(1, 21.0);
/// node.publish_data(&mut data)?;
///
/// node.disconnect()?;
/// # Ok(())
/// # }
/// ```
pub struct EdgeNode {
    inner: Arc<EdgeInner>,
}

impl EdgeNode {
    /// Creates an edge node that talks MQTT through the built-in
    /// [`MqttConnection`] transport.
    pub fn new(config: EdgeNodeConfig) -> Result<Self> {
        let transport = MqttConnection::new(&config.broker_url, config.client_id.clone())?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Creates an edge node over a caller-supplied transport.
    pub fn with_transport(config: EdgeNodeConfig, transport: Box<dyn MqttTransport>) -> Self {
        Self {
            inner: Arc::new(EdgeInner {
                config,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                session: Mutex::new(SessionState {
                    transport,
                    seq: 0,
                    bd_seq: 0,
                    birth_sent: false,
                    last_birth: Vec::new(),
                    death_topic: String::new(),
                    death_payload: Vec::new(),
                    devices: HashMap::new(),
                }),
            }),
        }
    }

    /// Connects to the MQTT broker and establishes a new Sparkplug session.
    ///
    /// Advances `bdSeq`, arms the NDEATH Last Will with it, and — if a
    /// command callback is configured — subscribes to this node's NCMD
    /// topic at QoS 1 before returning. Blocks up to the connect timeout.
    pub fn connect(&self) -> Result<()> {
        if self.inner.is_connected() {
            return Err(Error::PreconditionViolated(
                "already connected; disconnect first".to_string(),
            ));
        }
        self.inner.set_state(ConnectionState::Connecting);
        match self.connect_core() {
            Ok(()) => {
                self.inner.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                self.inner.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Establishes the transport session: new bdSeq, fresh NDEATH will,
    /// blocking connect, NCMD subscription. Does not touch the public
    /// connection state.
    fn connect_core(&self) -> Result<()> {
        let config = &self.inner.config;
        let mut session = self.inner.lock();

        // Every connection is a new session.
        session.bd_seq += 1;
        session.birth_sent = false;

        let mut death = PayloadBuilder::new();
        death.set_timestamp(now_millis());
        death.add_metric("bdSeq", session.bd_seq);
        session.death_payload = death.build();
        session.death_topic =
            Topic::node(&config.group_id, MessageType::NDeath, &config.edge_node_id).to_string();

        let handler: Arc<dyn TransportHandler> = self.inner.clone();

        let SessionState {
            transport,
            death_topic,
            death_payload,
            ..
        } = &mut *session;

        let options = ConnectOptions {
            clean_session: config.clean_session,
            keep_alive: config.keep_alive,
            credentials: config.credentials.as_ref(),
            tls: config.tls.as_ref(),
            last_will: Some(LastWill {
                topic: death_topic,
                payload: death_payload,
                qos: config.death_qos,
                retain: false,
            }),
        };

        transport.connect(options, handler)?;
        debug!(
            edge_node_id = %config.edge_node_id,
            bd_seq = session.bd_seq,
            "session established"
        );

        if config.command_callback.is_some() {
            let ncmd_topic =
                Topic::node(&config.group_id, MessageType::NCmd, &config.edge_node_id).to_string();
            session.transport.subscribe(&ncmd_topic, 1)?;
        }

        Ok(())
    }

    /// Gracefully disconnects.
    ///
    /// The broker withholds the NDEATH will on a graceful disconnect; call
    /// [`EdgeNode::publish_death`] first if consumers must see the node go
    /// offline.
    pub fn disconnect(&self) -> Result<()> {
        let result = {
            let mut session = self.inner.lock();
            session.transport.disconnect(DISCONNECT_TIMEOUT)
        };
        // Timeouts and transport failures are terminal for the session
        // either way.
        self.inner.set_state(ConnectionState::Disconnected);
        result
    }

    /// Publishes an NBIRTH (Node Birth) message.
    ///
    /// Forces `seq = 0`, resets the rolling counter, and guarantees exactly
    /// one `bdSeq` metric carrying the current session value (the caller's
    /// metric is overwritten if present, appended otherwise). The
    /// serialized bytes are retained for [`EdgeNode::rebirth`].
    pub fn publish_birth(&self, payload: &mut PayloadBuilder) -> Result<()> {
        if !self.inner.is_connected() {
            return Err(Error::NotConnected);
        }
        let config = &self.inner.config;
        let mut session = self.inner.lock();

        payload.set_seq(0);
        let bd_seq = session.bd_seq;
        let proto_payload = payload.payload_mut();
        match proto_payload.metric_by_name_mut("bdSeq") {
            Some(metric) => {
                metric.datatype = Some(DataType::UInt64.tag());
                metric.value = Some(proto::metric::Value::LongValue(bd_seq));
            }
            None => proto_payload.metrics.push(proto::Metric {
                name: Some("bdSeq".to_string()),
                timestamp: Some(now_millis()),
                datatype: Some(DataType::UInt64.tag()),
                value: Some(proto::metric::Value::LongValue(bd_seq)),
                ..Default::default()
            }),
        }

        let topic =
            Topic::node(&config.group_id, MessageType::NBirth, &config.edge_node_id).to_string();
        let bytes = payload.build();

        session
            .transport
            .publish(&topic, &bytes, config.data_qos, false)
            .map_err(|e| e.for_message_type("NBIRTH"))?;

        session.last_birth = bytes;
        session.birth_sent = true;
        session.seq = 0;
        Ok(())
    }

    /// Publishes an NDATA (Node Data) message.
    ///
    /// Advances the shared sequence counter and stamps it unless the caller
    /// set one explicitly. A transport failure does not roll the counter
    /// back; consumers treat the resulting gap as a warning.
    pub fn publish_data(&self, payload: &mut PayloadBuilder) -> Result<()> {
        if !self.inner.is_connected() {
            return Err(Error::NotConnected);
        }
        let config = &self.inner.config;
        let mut session = self.inner.lock();

        if !session.birth_sent {
            return Err(Error::PreconditionViolated(
                "NBIRTH must be published before NDATA".to_string(),
            ));
        }

        session.seq = session.seq.wrapping_add(1);
        if !payload.has_seq() {
            payload.set_seq(u64::from(session.seq));
        }

        let topic =
            Topic::node(&config.group_id, MessageType::NData, &config.edge_node_id).to_string();
        let bytes = payload.build();
        session
            .transport
            .publish(&topic, &bytes, config.data_qos, false)
            .map_err(|e| e.for_message_type("NDATA"))
    }

    /// Publishes a DBIRTH (Device Birth) message for a device.
    ///
    /// Requires a prior NBIRTH in this session. The DBIRTH consumes the
    /// next slot of the node's shared sequence counter, so the first DBIRTH
    /// after a birth carries `seq = 1`.
    pub fn publish_device_birth(&self, device_id: &str, payload: &mut PayloadBuilder) -> Result<()> {
        if !self.inner.is_connected() {
            return Err(Error::NotConnected);
        }
        let config = &self.inner.config;
        let mut session = self.inner.lock();

        if !session.birth_sent {
            return Err(Error::PreconditionViolated(
                "NBIRTH must be published before DBIRTH".to_string(),
            ));
        }

        session.seq = session.seq.wrapping_add(1);
        payload.set_seq(u64::from(session.seq));

        let topic = Topic::device(
            &config.group_id,
            MessageType::DBirth,
            &config.edge_node_id,
            device_id,
        )
        .to_string();
        let bytes = payload.build();

        session
            .transport
            .publish(&topic, &bytes, config.data_qos, false)
            .map_err(|e| e.for_message_type("DBIRTH"))?;

        session.devices.insert(
            device_id.to_string(),
            DeviceState {
                last_birth: bytes,
                online: true,
            },
        );
        Ok(())
    }

    /// Publishes a DDATA (Device Data) message for a device.
    ///
    /// Requires a DBIRTH for that device in this session. Consumes the next
    /// slot of the node's shared sequence counter.
    pub fn publish_device_data(&self, device_id: &str, payload: &mut PayloadBuilder) -> Result<()> {
        if !self.inner.is_connected() {
            return Err(Error::NotConnected);
        }
        let config = &self.inner.config;
        let mut session = self.inner.lock();

        let device_online = session
            .devices
            .get(device_id)
            .map(|d| d.online)
            .unwrap_or(false);
        if !device_online {
            return Err(Error::PreconditionViolated(format!(
                "DBIRTH must be published for device '{}' before DDATA",
                device_id
            )));
        }

        session.seq = session.seq.wrapping_add(1);
        if !payload.has_seq() {
            payload.set_seq(u64::from(session.seq));
        }

        let topic = Topic::device(
            &config.group_id,
            MessageType::DData,
            &config.edge_node_id,
            device_id,
        )
        .to_string();
        let bytes = payload.build();
        session
            .transport
            .publish(&topic, &bytes, config.data_qos, false)
            .map_err(|e| e.for_message_type("DDATA"))
    }

    /// Publishes a DDEATH (Device Death) message and marks the device
    /// offline. The device entry is retained so its birth bytes remain
    /// available.
    pub fn publish_device_death(&self, device_id: &str) -> Result<()> {
        if !self.inner.is_connected() {
            return Err(Error::NotConnected);
        }
        let config = &self.inner.config;
        let mut session = self.inner.lock();

        if !session.devices.contains_key(device_id) {
            return Err(Error::PreconditionViolated(format!(
                "unknown device '{}'",
                device_id
            )));
        }

        session.seq = session.seq.wrapping_add(1);
        let mut death = PayloadBuilder::new();
        death.set_timestamp(now_millis());
        death.set_seq(u64::from(session.seq));

        let topic = Topic::device(
            &config.group_id,
            MessageType::DDeath,
            &config.edge_node_id,
            device_id,
        )
        .to_string();
        let bytes = death.build();

        session
            .transport
            .publish(&topic, &bytes, config.data_qos, false)
            .map_err(|e| e.for_message_type("DDEATH"))?;

        if let Some(device) = session.devices.get_mut(device_id) {
            device.online = false;
        }
        Ok(())
    }

    /// Publishes the session's NDEATH explicitly, then disconnects.
    ///
    /// Idempotent: a no-op when already disconnected. The published bytes
    /// are exactly the ones armed as the Last Will, so consumers see the
    /// matching `bdSeq` either way.
    pub fn publish_death(&self) -> Result<()> {
        if !self.inner.is_connected() {
            return Ok(());
        }
        {
            let config = &self.inner.config;
            let mut session = self.inner.lock();
            let SessionState {
                transport,
                death_topic,
                death_payload,
                ..
            } = &mut *session;
            transport
                .publish(death_topic, death_payload, config.death_qos, false)
                .map_err(|e| e.for_message_type("NDEATH"))?;
        }
        self.disconnect()
    }

    /// Publishes a new NBIRTH with an incremented `bdSeq`.
    ///
    /// Replays the stored birth certificate through a full session cycle:
    /// the stored payload gets the next `bdSeq` and `seq = 0`, the session
    /// disconnects so the broker drops the stale will, reconnects (arming a
    /// will that matches the new `bdSeq`), and republishes the NBIRTH.
    /// Typically invoked in response to a `Node Control/Rebirth` NCMD.
    pub fn rebirth(&self) -> Result<()> {
        if !self.inner.is_connected() {
            return Err(Error::NotConnected);
        }

        let (topic, bytes) = {
            let config = &self.inner.config;
            let mut session = self.inner.lock();
            if session.last_birth.is_empty() {
                return Err(Error::PreconditionViolated(
                    "no stored birth payload; publish NBIRTH before rebirth".to_string(),
                ));
            }

            let mut proto_payload = proto::Payload::decode(session.last_birth.as_slice())?;
            let new_bd_seq = session.bd_seq + 1;
            if let Some(metric) = proto_payload.metric_by_name_mut("bdSeq") {
                metric.datatype = Some(DataType::UInt64.tag());
                metric.value = Some(proto::metric::Value::LongValue(new_bd_seq));
            }
            proto_payload.seq = Some(0);

            let bytes = proto_payload.encode_to_vec();
            session.last_birth = bytes.clone();

            let topic = Topic::node(&config.group_id, MessageType::NBirth, &config.edge_node_id)
                .to_string();
            (topic, bytes)
        };

        self.inner.set_state(ConnectionState::Rebirthing);

        let cycle = (|| -> Result<()> {
            {
                let mut session = self.inner.lock();
                session.transport.disconnect(DISCONNECT_TIMEOUT)?;
            }
            // connect_core advances bd_seq to the value already embedded in
            // the replayed payload and arms the matching will.
            self.connect_core()?;

            let mut session = self.inner.lock();
            session
                .transport
                .publish(&topic, &bytes, self.inner.config.data_qos, false)
                .map_err(|e| e.for_message_type("NBIRTH"))?;
            session.birth_sent = true;
            session.seq = 0;
            Ok(())
        })();

        match cycle {
            Ok(()) => {
                self.inner.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                self.inner.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    /// Whether the session currently holds an MQTT connection.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Current value of the rolling message sequence counter.
    pub fn seq(&self) -> u8 {
        self.inner.lock().seq
    }

    /// Current birth/death session counter.
    pub fn bd_seq(&self) -> u64 {
        self.inner.lock().bd_seq
    }

    /// Whether a DBIRTH was published for the device in this session and no
    /// DDEATH followed. `None` if the device was never born.
    pub fn device_online(&self, device_id: &str) -> Option<bool> {
        self.inner.lock().devices.get(device_id).map(|d| d.online)
    }

    /// The serialized bytes of the device's last DBIRTH, if one was
    /// published. Available even after a DDEATH.
    pub fn device_last_birth(&self, device_id: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .devices
            .get(device_id)
            .map(|d| d.last_birth.clone())
    }
}

impl Drop for EdgeNode {
    fn drop(&mut self) {
        if self.inner.is_connected() {
            // Orderly shutdown: explicit NDEATH, then graceful disconnect.
            let _ = self.publish_death();
        }
    }
}
