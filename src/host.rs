//! Sparkplug B Host Application (SCADA / Primary Application).
//!
//! A [`HostApplication`] behaves fundamentally differently from an edge
//! node: it publishes retained JSON STATE liveness under `STATE/<host_id>`
//! instead of a birth/death certificate pair, sends NCMD/DCMD commands,
//! installs no Last Will, and tracks no sequence counters of its own. Its
//! consuming half is a [`HostObserver`] fed from the MQTT subscription
//! surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};
use crate::observer::{
    CommandCallback, HostObserver, LogCallback, LogLevel, MessageCallback, NodeState,
    StateCallback, StateMessage,
};
use crate::payload::{Payload, PayloadBuilder};
use crate::topic::{MessageType, Topic, NAMESPACE, STATE_PREFIX};
use crate::transport::{
    ConnectOptions, Credentials, MqttConnection, MqttTransport, TlsOptions, TransportHandler,
    DISCONNECT_TIMEOUT,
};

/// Configuration for a Host Application session.
#[derive(Clone)]
pub struct HostConfig {
    /// MQTT broker URL (`tcp://host:port` or `ssl://host:port`).
    pub broker_url: String,
    /// Unique MQTT client identifier.
    pub client_id: String,
    /// Host Application identifier, used in the STATE topic.
    pub host_id: String,
    /// MQTT QoS for STATE, commands and subscriptions (default 1).
    pub qos: u8,
    /// MQTT clean session flag.
    pub clean_session: bool,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// TLS material, required for `ssl://` broker URLs.
    pub tls: Option<TlsOptions>,
    /// MQTT username/password.
    pub credentials: Option<Credentials>,
    /// Validate sequence continuity of observed nodes (default true).
    pub validate_sequence: bool,
    /// Callback for every parsed Sparkplug message.
    pub message_callback: Option<MessageCallback>,
    /// Callback for NCMD/DCMD messages.
    pub command_callback: Option<CommandCallback>,
    /// Callback for STATE messages of other hosts.
    pub state_callback: Option<StateCallback>,
    /// Callback receiving observer diagnostics.
    pub log_callback: Option<LogCallback>,
}

impl HostConfig {
    /// Creates a configuration with defaults: QoS 1, clean session, 60 s
    /// keep-alive, sequence validation on.
    pub fn new(
        broker_url: impl Into<String>,
        client_id: impl Into<String>,
        host_id: impl Into<String>,
    ) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: client_id.into(),
            host_id: host_id.into(),
            qos: 1,
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            tls: None,
            credentials: None,
            validate_sequence: true,
            message_callback: None,
            command_callback: None,
            state_callback: None,
            log_callback: None,
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

    /// Overrides the QoS used for STATE, commands and subscriptions.
    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    /// Enables or disables observer sequence validation.
    pub fn with_validate_sequence(mut self, validate: bool) -> Self {
        self.validate_sequence = validate;
        self
    }

    /// Registers the general message callback.
    pub fn with_message_callback(
        mut self,
        callback: impl Fn(&Topic, &Payload) + Send + Sync + 'static,
    ) -> Self {
        self.message_callback = Some(Arc::new(callback));
        self
    }

    /// Registers the NCMD/DCMD command callback.
    pub fn with_command_callback(
        mut self,
        callback: impl Fn(&Topic, &Payload) + Send + Sync + 'static,
    ) -> Self {
        self.command_callback = Some(Arc::new(callback));
        self
    }

    /// Registers the STATE callback.
    pub fn with_state_callback(
        mut self,
        callback: impl Fn(&str, &StateMessage) + Send + Sync + 'static,
    ) -> Self {
        self.state_callback = Some(Arc::new(callback));
        self
    }

    /// Registers the diagnostics callback.
    pub fn with_log_callback(
        mut self,
        callback: impl Fn(LogLevel, &str) + Send + Sync + 'static,
    ) -> Self {
        self.log_callback = Some(Arc::new(callback));
        self
    }
}

struct HostInner {
    config: HostConfig,
    connected: AtomicBool,
    observer: HostObserver,
    transport: Mutex<Box<dyn MqttTransport>>,
}

impl HostInner {
    fn lock(&self) -> MutexGuard<'_, Box<dyn MqttTransport>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransportHandler for HostInner {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.observer.handle_message(topic, payload);
    }

    fn on_connection_lost(&self, cause: &str) {
        self.connected.store(false, Ordering::SeqCst);
        warn!(host_id = %self.config.host_id, cause, "host connection lost");
        self.observer
            .log(LogLevel::Warn, &format!("Connection lost: {}", cause));
    }
}

/// A Sparkplug B Host Application session.
///
/// Connecting publishes nothing automatically; call
/// [`HostApplication::publish_state_birth`] to declare the host online and
/// [`HostApplication::publish_state_death`] before disconnecting so
/// late-joining edge nodes see the host go away (there is no Last Will on
/// the host side).
///
/// # Example
///
/// ```no_run
/// use sparkplug_b::{HostApplication, HostConfig, PayloadBuilder};
///
/// # fn main() -> sparkplug_b::Result<()> {
/// let config = HostConfig::new("tcp://localhost:1883", "scada_client", "SCADA01")
///     .with_message_callback(|topic, payload| {
///         println!("{}: {} metrics", topic, payload.metric_count());
///     });
///
/// let host = HostApplication::new(config)?;
/// host.connect()?;
/// host.subscribe_group("Energy")?;
/// host.publish_state_birth(1_700_000_000_000)?;
///
/// // Ask a gateway to rebirth.
/// let mut cmd = PayloadBuilder::new();
/// cmd.add_node_control_rebirth();
/// host.publish_node_command("Energy", "Gateway01", &cmd)?;
///
/// host.publish_state_death(1_700_000_100_000)?;
/// host.disconnect()?;
/// # Ok(())
/// # }
/// ```
pub struct HostApplication {
    inner: Arc<HostInner>,
}

impl HostApplication {
    /// Creates a host application over the built-in [`MqttConnection`]
    /// transport.
    pub fn new(config: HostConfig) -> Result<Self> {
        let transport = MqttConnection::new(&config.broker_url, config.client_id.clone())?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Creates a host application over a caller-supplied transport.
    pub fn with_transport(config: HostConfig, transport: Box<dyn MqttTransport>) -> Self {
        let mut observer =
            HostObserver::new().with_validate_sequence(config.validate_sequence);
        if let Some(callback) = config.message_callback.clone() {
            observer = observer.with_message_callback(move |t, p| callback(t, p));
        }
        if let Some(callback) = config.command_callback.clone() {
            observer = observer.with_command_callback(move |t, p| callback(t, p));
        }
        if let Some(callback) = config.state_callback.clone() {
            observer = observer.with_state_callback(move |h, s| callback(h, s));
        }
        if let Some(callback) = config.log_callback.clone() {
            observer = observer.with_log_callback(move |l, m| callback(l, m));
        }

        Self {
            inner: Arc::new(HostInner {
                config,
                connected: AtomicBool::new(false),
                observer,
                transport: Mutex::new(transport),
            }),
        }
    }

    /// Connects to the MQTT broker. Publishes nothing automatically and
    /// installs no Last Will.
    pub fn connect(&self) -> Result<()> {
        let config = &self.inner.config;
        let handler: Arc<dyn TransportHandler> = self.inner.clone();

        let mut transport = self.inner.lock();
        transport.connect(
            ConnectOptions {
                clean_session: config.clean_session,
                keep_alive: config.keep_alive,
                credentials: config.credentials.as_ref(),
                tls: config.tls.as_ref(),
                last_will: None,
            },
            handler,
        )?;
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Gracefully disconnects. Publish the STATE death first if consumers
    /// must see this host go offline.
    pub fn disconnect(&self) -> Result<()> {
        let result = self.inner.lock().disconnect(DISCONNECT_TIMEOUT);
        self.inner.connected.store(false, Ordering::SeqCst);
        result
    }

    /// Whether the session currently holds an MQTT connection.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn publish_state(&self, state: StateMessage) -> Result<()> {
        self.require_connected()?;
        let config = &self.inner.config;
        let body = serde_json::to_vec(&state).map_err(|e| Error::PublishFailed {
            message_type: "STATE",
            details: e.to_string(),
        })?;
        let topic = Topic::state(&config.host_id).to_string();
        // STATE is the one retained Sparkplug message: late joiners must
        // learn the host's liveness from the broker.
        self.inner
            .lock()
            .publish(&topic, &body, config.qos, true)
            .map_err(|e| e.for_message_type("STATE"))
    }

    /// Publishes `{"online":true,"timestamp":<ts>}` retained on
    /// `STATE/<host_id>` at the configured QoS.
    pub fn publish_state_birth(&self, timestamp: u64) -> Result<()> {
        self.publish_state(StateMessage::birth(timestamp))
    }

    /// Publishes `{"online":false,"timestamp":<ts>}` retained on
    /// `STATE/<host_id>` at the configured QoS.
    pub fn publish_state_death(&self, timestamp: u64) -> Result<()> {
        self.publish_state(StateMessage::death(timestamp))
    }

    /// Publishes an NCMD (Node Command) to an edge node, non-retained.
    pub fn publish_node_command(
        &self,
        group_id: &str,
        target_edge_node_id: &str,
        payload: &PayloadBuilder,
    ) -> Result<()> {
        self.require_connected()?;
        let topic = Topic::node(group_id, MessageType::NCmd, target_edge_node_id).to_string();
        self.inner
            .lock()
            .publish(&topic, &payload.build(), self.inner.config.qos, false)
            .map_err(|e| e.for_message_type("NCMD"))
    }

    /// Publishes a DCMD (Device Command) to a device, non-retained.
    pub fn publish_device_command(
        &self,
        group_id: &str,
        target_edge_node_id: &str,
        target_device_id: &str,
        payload: &PayloadBuilder,
    ) -> Result<()> {
        self.require_connected()?;
        let topic = Topic::device(
            group_id,
            MessageType::DCmd,
            target_edge_node_id,
            target_device_id,
        )
        .to_string();
        self.inner
            .lock()
            .publish(&topic, &payload.build(), self.inner.config.qos, false)
            .map_err(|e| e.for_message_type("DCMD"))
    }

    /// Subscribes to every Sparkplug message in one group:
    /// `spBv1.0/<group>/#`.
    pub fn subscribe_group(&self, group_id: &str) -> Result<()> {
        self.require_connected()?;
        let filter = format!("{}/{}/#", NAMESPACE, group_id);
        self.inner.lock().subscribe(&filter, self.inner.config.qos)
    }

    /// Subscribes to every Sparkplug message of every group:
    /// `spBv1.0/#`.
    pub fn subscribe_all_groups(&self) -> Result<()> {
        self.require_connected()?;
        let filter = format!("{}/#", NAMESPACE);
        self.inner.lock().subscribe(&filter, self.inner.config.qos)
    }

    /// Subscribes to one edge node's messages:
    /// `spBv1.0/<group>/+/<edge_node>/#`.
    pub fn subscribe_node(&self, group_id: &str, edge_node_id: &str) -> Result<()> {
        self.require_connected()?;
        let filter = format!("{}/{}/+/{}/#", NAMESPACE, group_id, edge_node_id);
        self.inner.lock().subscribe(&filter, self.inner.config.qos)
    }

    /// Subscribes to another host application's STATE topic:
    /// `STATE/<host_id>`.
    pub fn subscribe_state(&self, host_id: &str) -> Result<()> {
        self.require_connected()?;
        let filter = format!("{}/{}", STATE_PREFIX, host_id);
        self.inner.lock().subscribe(&filter, self.inner.config.qos)
    }

    /// The observer tracking node and device state for this host.
    pub fn observer(&self) -> &HostObserver {
        &self.inner.observer
    }

    /// Snapshot of the tracked state for one edge node.
    pub fn get_node_state(&self, group_id: &str, edge_node_id: &str) -> Option<NodeState> {
        self.inner.observer.get_node_state(group_id, edge_node_id)
    }

    /// Resolves a metric alias captured from the latest birth certificate.
    pub fn get_metric_name(
        &self,
        group_id: &str,
        edge_node_id: &str,
        device_id: Option<&str>,
        alias: u64,
    ) -> Option<String> {
        self.inner
            .observer
            .get_metric_name(group_id, edge_node_id, device_id, alias)
    }
}

impl Drop for HostApplication {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.disconnect();
        }
    }
}

