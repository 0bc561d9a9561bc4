//! MQTT transport abstraction.
//!
//! Sessions talk to the broker through the [`MqttTransport`] trait:
//! connect-with-LWT, publish, subscribe, disconnect, plus inbound-message
//! and connection-lost callbacks delivered through a [`TransportHandler`].
//! [`MqttConnection`] is the built-in `rumqttc`-backed implementation; a
//! custom implementation can be injected into sessions for testing or for
//! exotic transports.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rumqttc::{
    Client, ConnectReturnCode, Event, LastWill as MqttLastWill, MqttOptions, Outgoing, Packet,
    QoS, TlsConfiguration, Transport as MqttTransportKind,
};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Bound on the blocking connect (and NCMD subscribe) wait.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on the blocking subscribe wait.
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on the graceful disconnect wait.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS/SSL configuration options for secure MQTT connections.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Path to the CA certificate file (PEM format).
    pub trust_store: String,
    /// Path to the client certificate file (PEM format, optional).
    pub key_store: Option<String>,
    /// Path to the client private key file (PEM format, optional).
    pub private_key: Option<String>,
    /// Password for an encrypted private key (optional).
    pub private_key_password: Option<String>,
    /// Colon-separated list of cipher suites (optional).
    pub enabled_cipher_suites: Option<String>,
    /// Verify the server certificate (default: true).
    pub enable_server_cert_auth: bool,
}

impl TlsOptions {
    /// Creates TLS options that trust the given CA certificate file.
    pub fn new(trust_store: impl Into<String>) -> Self {
        Self {
            trust_store: trust_store.into(),
            key_store: None,
            private_key: None,
            private_key_password: None,
            enabled_cipher_suites: None,
            enable_server_cert_auth: true,
        }
    }

    /// Adds a client certificate and private key for mutual TLS.
    pub fn with_client_auth(
        mut self,
        key_store: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        self.key_store = Some(key_store.into());
        self.private_key = Some(private_key.into());
        self
    }
}

/// MQTT username/password credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// MQTT username.
    pub username: String,
    /// MQTT password.
    pub password: String,
}

impl Credentials {
    /// Creates a credentials pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Last Will and Testament specification handed to the transport at connect
/// time.
///
/// The bytes and topic are borrowed from the session, which keeps them
/// alive in stable storage for the whole connection; the transport copies
/// them into its own connect options.
#[derive(Debug, Clone, Copy)]
pub struct LastWill<'a> {
    /// Topic the broker publishes the will on.
    pub topic: &'a str,
    /// Pre-serialized will payload.
    pub payload: &'a [u8],
    /// MQTT QoS of the will message.
    pub qos: u8,
    /// Whether the will is retained. Sparkplug NDEATH wills never are.
    pub retain: bool,
}

/// Options for [`MqttTransport::connect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions<'a> {
    /// MQTT clean session flag.
    pub clean_session: bool,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Username/password, if the broker requires them.
    pub credentials: Option<&'a Credentials>,
    /// TLS material for `ssl://` brokers.
    pub tls: Option<&'a TlsOptions>,
    /// Will installed before the connection is attempted.
    pub last_will: Option<LastWill<'a>>,
}

/// Inbound callbacks from the transport.
///
/// Both methods are invoked on a transport-owned thread, concurrently with
/// application threads. Implementations must not call back into blocking
/// session operations (connect/disconnect/rebirth).
pub trait TransportHandler: Send + Sync {
    /// A message arrived on a subscribed topic.
    fn on_message(&self, topic: &str, payload: &[u8]);

    /// The connection was lost abnormally (the broker will publish the LWT).
    fn on_connection_lost(&self, cause: &str);
}

/// Abstract MQTT client used by the edge-node and host sessions.
///
/// `connect`, `subscribe` and `disconnect` block the caller until the
/// transport reports completion or the corresponding timeout elapses;
/// `publish` only enqueues and never awaits broker acknowledgement.
pub trait MqttTransport: Send {
    /// Connects, installing the LWT and registering callbacks. Blocks up to
    /// [`CONNECT_TIMEOUT`].
    fn connect(
        &mut self,
        options: ConnectOptions<'_>,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<()>;

    /// Enqueues a publish with the given QoS and retain flag.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: u8, retain: bool) -> Result<()>;

    /// Subscribes to a topic filter (`+`/`#` wildcards allowed). Blocks up
    /// to [`SUBSCRIBE_TIMEOUT`].
    fn subscribe(&mut self, filter: &str, qos: u8) -> Result<()>;

    /// Gracefully disconnects, blocking up to `timeout`.
    fn disconnect(&mut self, timeout: Duration) -> Result<()>;
}

fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Tcp,
    Ssl,
}

#[derive(Debug, Clone)]
struct BrokerUrl {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl BrokerUrl {
    /// Accepts `tcp://host[:port]` and `ssl://host[:port]`.
    fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("tcp://") {
            (Scheme::Tcp, rest)
        } else if let Some(rest) = url.strip_prefix("ssl://") {
            (Scheme::Ssl, rest)
        } else {
            return Err(Error::ConnectFailed(format!(
                "unsupported broker url '{}' (expected tcp:// or ssl://)",
                url
            )));
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::ConnectFailed(format!("invalid port in broker url '{}'", url))
                })?;
                (host, port)
            }
            None => (
                rest,
                match scheme {
                    Scheme::Tcp => 1883,
                    Scheme::Ssl => 8883,
                },
            ),
        };

        if host.is_empty() {
            return Err(Error::ConnectFailed(format!(
                "missing host in broker url '{}'",
                url
            )));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

enum ControlEvent {
    Connected,
    ConnectionRefused(String),
    Subscribed,
    ConnectionLost(String),
    Disconnected,
}

/// The built-in MQTT transport, backed by the `rumqttc` synchronous client.
///
/// One background thread drives the rumqttc event loop per connection; it
/// dispatches inbound publishes to the session handler and signals
/// completion of connect/subscribe/disconnect back to the blocking caller.
/// The event loop intentionally terminates on the first connection error —
/// Sparkplug sessions must not silently resume a broken session, so
/// reconnection is always an explicit `connect()` that re-arms a fresh
/// NDEATH will.
pub struct MqttConnection {
    url: BrokerUrl,
    client_id: String,
    client: Option<Client>,
    control: Option<Receiver<ControlEvent>>,
    worker: Option<JoinHandle<()>>,
    disconnect_requested: Arc<AtomicBool>,
}

impl MqttConnection {
    /// Creates a transport for the given broker URL and MQTT client id.
    pub fn new(broker_url: &str, client_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            url: BrokerUrl::parse(broker_url)?,
            client_id: client_id.into(),
            client: None,
            control: None,
            worker: None,
            disconnect_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    fn tls_configuration(&self, tls: &TlsOptions) -> Result<TlsConfiguration> {
        let ca = fs::read(&tls.trust_store).map_err(|e| {
            Error::ConnectFailed(format!(
                "failed to read trust store '{}': {}",
                tls.trust_store, e
            ))
        })?;

        if tls.private_key_password.is_some() {
            return Err(Error::ConnectFailed(
                "encrypted private keys are not supported".to_string(),
            ));
        }
        if tls.enabled_cipher_suites.is_some() {
            warn!("enabled_cipher_suites is not configurable with rustls; using defaults");
        }
        if !tls.enable_server_cert_auth {
            warn!("server certificate verification cannot be disabled; verifying anyway");
        }

        let client_auth = match (&tls.key_store, &tls.private_key) {
            (Some(key_store), Some(private_key)) => {
                let cert = fs::read(key_store).map_err(|e| {
                    Error::ConnectFailed(format!(
                        "failed to read key store '{}': {}",
                        key_store, e
                    ))
                })?;
                let key = fs::read(private_key).map_err(|e| {
                    Error::ConnectFailed(format!(
                        "failed to read private key '{}': {}",
                        private_key, e
                    ))
                })?;
                Some((cert, key))
            }
            _ => None,
        };

        Ok(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        })
    }

    /// Drops the client handle; the event loop exits on its own once the
    /// request channel closes. The thread is detached rather than joined —
    /// it may be blocked inside an application callback that is itself
    /// waiting on a session lock held by the caller.
    fn teardown(&mut self) {
        self.client = None;
        self.control = None;
        self.worker = None;
    }

    fn wait_for(
        &mut self,
        operation: &'static str,
        timeout: Duration,
        mut accept: impl FnMut(&ControlEvent) -> bool,
    ) -> Result<ControlEvent> {
        let control = self.control.as_ref().ok_or(Error::NotConnected)?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match control.recv_timeout(remaining) {
                Ok(event) if accept(&event) => return Ok(event),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::Timeout { operation, timeout })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::ConnectFailed(
                        "MQTT event loop terminated".to_string(),
                    ))
                }
            }
        }
    }
}

impl MqttTransport for MqttConnection {
    fn connect(
        &mut self,
        options: ConnectOptions<'_>,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<()> {
        // A previous session may still own a worker thread; reap it so the
        // new event loop is the only writer of control events.
        self.teardown();
        self.disconnect_requested.store(false, Ordering::SeqCst);

        let mut mqtt_options =
            MqttOptions::new(self.client_id.clone(), self.url.host.clone(), self.url.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(options.clean_session);

        if let Some(credentials) = options.credentials {
            mqtt_options
                .set_credentials(credentials.username.as_str(), credentials.password.as_str());
        }

        if let Some(will) = options.last_will {
            mqtt_options.set_last_will(MqttLastWill::new(
                will.topic,
                will.payload.to_vec(),
                to_qos(will.qos),
                will.retain,
            ));
        }

        match (self.url.scheme, options.tls) {
            (Scheme::Ssl, Some(tls)) => {
                mqtt_options
                    .set_transport(MqttTransportKind::Tls(self.tls_configuration(tls)?));
            }
            (Scheme::Ssl, None) => {
                return Err(Error::ConnectFailed(
                    "ssl:// broker url requires TLS options".to_string(),
                ));
            }
            (Scheme::Tcp, _) => {}
        }

        let (tx, rx) = mpsc::channel();
        let (client, mut connection) = Client::new(mqtt_options, 64);
        let disconnect_requested = Arc::clone(&self.disconnect_requested);

        let worker = thread::Builder::new()
            .name("sparkplug-mqtt".to_string())
            .spawn(move || {
                event_loop(&mut connection, &tx, &handler, &disconnect_requested);
            })
            .map_err(|e| Error::ConnectFailed(format!("failed to spawn event loop: {}", e)))?;

        self.client = Some(client);
        self.control = Some(rx);
        self.worker = Some(worker);

        match self.wait_for("connect", CONNECT_TIMEOUT, |e| {
            matches!(
                e,
                ControlEvent::Connected
                    | ControlEvent::ConnectionRefused(_)
                    | ControlEvent::ConnectionLost(_)
            )
        }) {
            Ok(ControlEvent::Connected) => Ok(()),
            Ok(ControlEvent::ConnectionRefused(details))
            | Ok(ControlEvent::ConnectionLost(details)) => {
                self.teardown();
                Err(Error::ConnectFailed(details))
            }
            Ok(_) => unreachable!("filtered by wait_for"),
            Err(err) => {
                // Timed out or the loop died: tear the half-open client down.
                self.disconnect_requested.store(true, Ordering::SeqCst);
                if let Some(client) = &self.client {
                    let _ = client.disconnect();
                }
                self.teardown();
                Err(err)
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: u8, retain: bool) -> Result<()> {
        let client = self.client.as_ref().ok_or(Error::NotConnected)?;
        client
            .publish(topic, to_qos(qos), retain, payload.to_vec())
            .map_err(|e| Error::PublishFailed {
                message_type: "message",
                details: e.to_string(),
            })
    }

    fn subscribe(&mut self, filter: &str, qos: u8) -> Result<()> {
        let client = self.client.as_ref().ok_or(Error::NotConnected)?;
        client
            .subscribe(filter, to_qos(qos))
            .map_err(|e| Error::SubscribeFailed {
                filter: filter.to_string(),
                details: e.to_string(),
            })?;

        match self.wait_for("subscribe", SUBSCRIBE_TIMEOUT, |e| {
            matches!(
                e,
                ControlEvent::Subscribed
                    | ControlEvent::ConnectionLost(_)
                    | ControlEvent::Disconnected
            )
        })? {
            ControlEvent::Subscribed => Ok(()),
            ControlEvent::ConnectionLost(details) => Err(Error::SubscribeFailed {
                filter: filter.to_string(),
                details,
            }),
            _ => Err(Error::NotConnected),
        }
    }

    fn disconnect(&mut self, timeout: Duration) -> Result<()> {
        let client = self.client.take().ok_or(Error::NotConnected)?;
        self.disconnect_requested.store(true, Ordering::SeqCst);

        let request = client.disconnect();

        let waited = self.wait_for("disconnect", timeout, |e| {
            matches!(
                e,
                ControlEvent::Disconnected | ControlEvent::ConnectionLost(_)
            )
        });

        self.teardown();

        match (request, waited) {
            (Err(e), _) => Err(Error::DisconnectFailed(e.to_string())),
            (Ok(()), Ok(_)) => Ok(()),
            (Ok(()), Err(Error::NotConnected)) => Ok(()),
            (Ok(()), Err(err)) => Err(err),
        }
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.disconnect_requested.store(true, Ordering::SeqCst);
        if let Some(client) = self.client.take() {
            let _ = client.disconnect();
        }
        // Worker exits once the client request channel closes.
        self.teardown();
    }
}

fn event_loop(
    connection: &mut rumqttc::Connection,
    tx: &Sender<ControlEvent>,
    handler: &Arc<dyn TransportHandler>,
    disconnect_requested: &AtomicBool,
) {
    let mut session_up = false;
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    session_up = true;
                    debug!("MQTT connection established");
                    let _ = tx.send(ControlEvent::Connected);
                } else {
                    let _ = tx.send(ControlEvent::ConnectionRefused(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handler.on_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                let _ = tx.send(ControlEvent::Subscribed);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                let _ = tx.send(ControlEvent::Disconnected);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                if disconnect_requested.load(Ordering::SeqCst) {
                    let _ = tx.send(ControlEvent::Disconnected);
                } else if session_up {
                    let cause = err.to_string();
                    warn!(cause = %cause, "MQTT connection lost");
                    handler.on_connection_lost(&cause);
                    let _ = tx.send(ControlEvent::ConnectionLost(cause));
                } else {
                    let _ = tx.send(ControlEvent::ConnectionRefused(err.to_string()));
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_url_schemes() {
        let url = BrokerUrl::parse("tcp://localhost:1883").unwrap();
        assert_eq!(url.scheme, Scheme::Tcp);
        assert_eq!(url.host, "localhost");
        assert_eq!(url.port, 1883);

        let url = BrokerUrl::parse("ssl://broker.example.com:8883").unwrap();
        assert_eq!(url.scheme, Scheme::Ssl);
        assert_eq!(url.port, 8883);
    }

    #[test]
    fn broker_url_default_ports() {
        assert_eq!(BrokerUrl::parse("tcp://host").unwrap().port, 1883);
        assert_eq!(BrokerUrl::parse("ssl://host").unwrap().port, 8883);
    }

    #[test]
    fn broker_url_rejects_other_schemes() {
        assert!(BrokerUrl::parse("mqtt://host:1883").is_err());
        assert!(BrokerUrl::parse("host:1883").is_err());
        assert!(BrokerUrl::parse("tcp://").is_err());
    }
}
