//! Host-side Sparkplug observer.
//!
//! [`HostObserver`] consumes raw `(topic, bytes)` tuples from the
//! transport, parses topic and payload, validates sequence continuity per
//! edge node, tracks node and device state including the alias tables
//! captured from birth certificates, and fans results out to the
//! registered callbacks. Validation never rejects a message: violations
//! are reported as warnings and state is kept as close to the wire as
//! possible so supervisory logic always sees the latest picture.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::payload::Payload;
use crate::topic::{MessageType, Topic};

/// Callback for every successfully parsed Sparkplug message.
pub type MessageCallback = Arc<dyn Fn(&Topic, &Payload) + Send + Sync>;

/// Callback for NCMD/DCMD command messages.
pub type CommandCallback = Arc<dyn Fn(&Topic, &Payload) + Send + Sync>;

/// Callback for Host Application STATE messages (JSON, not Sparkplug
/// binary, hence the distinct shape).
pub type StateCallback = Arc<dyn Fn(&str, &StateMessage) + Send + Sync>;

/// Callback receiving observer diagnostics.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Severity of an observer diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Noise useful when debugging dispatch.
    Debug,
    /// Normal lifecycle information.
    Info,
    /// A protocol violation that was tolerated.
    Warn,
    /// A message that had to be dropped.
    Error,
}

/// The JSON body of a Host Application STATE message.
///
/// Field order matters: serialization must produce exactly
/// `{"online":…,"timestamp":…}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    /// Whether the host application is online.
    pub online: bool,
    /// Milliseconds since Unix epoch.
    pub timestamp: u64,
}

impl StateMessage {
    /// STATE birth body.
    pub fn birth(timestamp: u64) -> Self {
        Self {
            online: true,
            timestamp,
        }
    }

    /// STATE death body.
    pub fn death(timestamp: u64) -> Self {
        Self {
            online: false,
            timestamp,
        }
    }
}

/// Observer-side record of a device attached to an edge node.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    /// Whether the device is online (DBIRTH seen, no DDEATH since).
    pub online: bool,
    /// Whether a DBIRTH was seen in the current node session.
    pub birth_received: bool,
    /// Node-counter slot of the last message seen for this device.
    pub last_seq: u8,
    /// alias -> metric name mapping from the latest DBIRTH.
    pub alias_table: HashMap<u64, String>,
}

/// Observer-side record of an edge node.
#[derive(Debug, Clone)]
pub struct NodeState {
    /// Whether the node is online (NBIRTH seen, no NDEATH since).
    pub online: bool,
    /// Last sequence number observed for this node's shared counter.
    pub last_seq: u8,
    /// `bdSeq` captured from the latest NBIRTH.
    pub bd_seq: u64,
    /// Payload timestamp of the latest NBIRTH.
    pub birth_timestamp: Option<u64>,
    /// Whether an NBIRTH was seen in the current session.
    pub birth_received: bool,
    /// Devices known for this node.
    pub devices: HashMap<String, DeviceState>,
    /// alias -> metric name mapping from the latest NBIRTH.
    pub alias_table: HashMap<u64, String>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            online: false,
            // Sentinel so the first valid seq=0 satisfies the
            // expected-next test.
            last_seq: u8::MAX,
            bd_seq: 0,
            birth_timestamp: None,
            birth_received: false,
            devices: HashMap::new(),
            alias_table: HashMap::new(),
        }
    }
}

/// Diagnostics gathered while the state mutex is held, emitted after it is
/// released so the log callback can safely query the observer.
type LogEntries = Vec<(LogLevel, String)>;

/// Tracks the state of every observed edge node and device.
///
/// Normally owned by a [`HostApplication`](crate::HostApplication), which
/// feeds it from the transport; it can also be driven directly with
/// [`HostObserver::handle_message`] for replay or bridge scenarios.
pub struct HostObserver {
    validate_sequence: bool,
    groups: Mutex<HashMap<String, HashMap<String, NodeState>>>,
    message_callback: Option<MessageCallback>,
    command_callback: Option<CommandCallback>,
    state_callback: Option<StateCallback>,
    log_callback: Option<LogCallback>,
}

impl Default for HostObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostObserver {
    /// Creates an observer with sequence validation enabled and no
    /// callbacks.
    pub fn new() -> Self {
        Self {
            validate_sequence: true,
            groups: Mutex::new(HashMap::new()),
            message_callback: None,
            command_callback: None,
            state_callback: None,
            log_callback: None,
        }
    }

    /// Enables or disables sequence validation (default enabled). When
    /// disabled the observer still dispatches callbacks but keeps no state.
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

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, NodeState>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        if let Some(callback) = &self.log_callback {
            callback(level, message);
        }
    }

    /// Feeds one raw MQTT message through dispatch, validation, state
    /// tracking and the callbacks.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) {
        // STATE travels as JSON outside the spBv1.0 namespace; it must not
        // reach the Sparkplug payload parser.
        if let Ok(parsed) = Topic::parse(topic) {
            if parsed.message_type == MessageType::State {
                self.handle_state(&parsed, payload);
                return;
            }
            self.handle_sparkplug(&parsed, payload);
            return;
        }
        self.log(
            LogLevel::Debug,
            &format!("ignoring non-Sparkplug topic: {}", topic),
        );
    }

    fn handle_state(&self, topic: &Topic, payload: &[u8]) {
        let host_id = topic.host_id().unwrap_or_default();
        match serde_json::from_slice::<StateMessage>(payload) {
            Ok(state) => {
                if let Some(callback) = &self.state_callback {
                    callback(host_id, &state);
                }
            }
            Err(err) => self.log(
                LogLevel::Warn,
                &format!("invalid STATE payload from '{}': {}", host_id, err),
            ),
        }
    }

    fn handle_sparkplug(&self, topic: &Topic, payload: &[u8]) {
        let payload = match Payload::parse(payload) {
            Ok(payload) => payload,
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    &format!("failed to parse Sparkplug B payload on '{}': {}", topic, err),
                );
                return;
            }
        };

        if self.validate_sequence {
            let entries = {
                let mut groups = self.lock();
                let node = groups
                    .entry(topic.group_id.clone())
                    .or_default()
                    .entry(topic.edge_node_id.clone())
                    .or_default();
                validate(node, topic, &payload)
            };
            for (level, message) in entries {
                self.log(level, &message);
            }
        }

        if topic.message_type.is_command() {
            if let Some(callback) = &self.command_callback {
                callback(topic, &payload);
            }
        }
        if let Some(callback) = &self.message_callback {
            callback(topic, &payload);
        }
    }

    /// Snapshot of the tracked state for one edge node, if any messages
    /// were seen from it.
    pub fn get_node_state(&self, group_id: &str, edge_node_id: &str) -> Option<NodeState> {
        self.lock().get(group_id)?.get(edge_node_id).cloned()
    }

    /// Resolves a metric alias against the node's (or, when `device_id` is
    /// given, the device's) alias table captured from the latest birth.
    pub fn get_metric_name(
        &self,
        group_id: &str,
        edge_node_id: &str,
        device_id: Option<&str>,
        alias: u64,
    ) -> Option<String> {
        let groups = self.lock();
        let node = groups.get(group_id)?.get(edge_node_id)?;
        match device_id {
            Some(device_id) => node
                .devices
                .get(device_id)?
                .alias_table
                .get(&alias)
                .cloned(),
            None => node.alias_table.get(&alias).cloned(),
        }
    }

    /// Drops all tracked node and device state.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

fn alias_table(payload: &Payload) -> HashMap<u64, String> {
    payload
        .metrics()
        .filter_map(|m| match (m.alias, m.name) {
            (Some(alias), Some(name)) => Some((alias, name)),
            _ => None,
        })
        .collect()
}

/// Expected-next check against the node's shared rolling counter. Gaps are
/// warnings; the counter always resynchronizes to the observed value.
fn check_shared_seq(node: &mut NodeState, label: &str, payload: &Payload, out: &mut LogEntries) {
    if let Some(seq) = payload.seq() {
        let expected = node.last_seq.wrapping_add(1);
        if seq != u64::from(expected) {
            out.push((
                LogLevel::Warn,
                format!(
                    "Sequence number gap for {} (got {}, expected {})",
                    label, seq, expected
                ),
            ));
        }
        node.last_seq = seq as u8;
    }
}

fn validate(node: &mut NodeState, topic: &Topic, payload: &Payload) -> LogEntries {
    let mut out = LogEntries::new();
    let node_label = format!("{}/{}", topic.group_id, topic.edge_node_id);

    match topic.message_type {
        MessageType::NBirth => {
            if let Some(seq) = payload.seq() {
                if seq != 0 {
                    out.push((
                        LogLevel::Warn,
                        format!(
                            "NBIRTH for {} has invalid seq: {} (expected 0)",
                            node_label, seq
                        ),
                    ));
                }
            }

            match payload.bd_seq() {
                Some(bd_seq) => node.bd_seq = bd_seq,
                None => out.push((
                    LogLevel::Warn,
                    format!("NBIRTH for {} missing required bdSeq metric", node_label),
                )),
            }

            node.last_seq = 0;
            node.online = true;
            node.birth_received = true;
            node.birth_timestamp = payload.timestamp();
            node.alias_table = alias_table(payload);
            // A new session invalidates every device birth.
            node.devices.clear();
        }

        MessageType::NDeath => {
            match payload.bd_seq() {
                Some(bd_seq) if node.birth_received && bd_seq != node.bd_seq => {
                    out.push((
                        LogLevel::Warn,
                        format!(
                            "NDEATH bdSeq mismatch for {} (NDEATH: {}, NBIRTH: {})",
                            node_label, bd_seq, node.bd_seq
                        ),
                    ));
                }
                Some(_) => {}
                None => out.push((
                    LogLevel::Warn,
                    format!("NDEATH for {} missing bdSeq metric", node_label),
                )),
            }
            node.online = false;
        }

        MessageType::NData => {
            if !node.birth_received {
                out.push((
                    LogLevel::Warn,
                    format!("Received NDATA for {} before NBIRTH", node_label),
                ));
                return out;
            }
            check_shared_seq(node, &node_label, payload, &mut out);
        }

        MessageType::DBirth => {
            let device_id = topic.device_id().unwrap_or_default();
            if !node.birth_received {
                out.push((
                    LogLevel::Warn,
                    format!(
                        "Received DBIRTH for device '{}' on {} before node NBIRTH",
                        device_id, node_label
                    ),
                ));
                return out;
            }

            // The DBIRTH occupies one slot of the node's shared counter.
            check_shared_seq(node, &node_label, payload, &mut out);

            let slot = node.last_seq;
            let device = node.devices.entry(device_id.to_string()).or_default();
            device.online = true;
            device.birth_received = true;
            device.last_seq = slot;
            device.alias_table = alias_table(payload);
        }

        MessageType::DData => {
            let device_id = topic.device_id().unwrap_or_default();
            if !node.birth_received {
                out.push((
                    LogLevel::Warn,
                    format!(
                        "Received DDATA for device '{}' on {} before node NBIRTH",
                        device_id, node_label
                    ),
                ));
                return out;
            }

            let device_born = node
                .devices
                .get(device_id)
                .map(|d| d.birth_received)
                .unwrap_or(false);
            if !device_born {
                out.push((
                    LogLevel::Warn,
                    format!(
                        "Received DDATA for device '{}' on {} before DBIRTH",
                        device_id, node_label
                    ),
                ));
                return out;
            }

            check_shared_seq(node, &node_label, payload, &mut out);
            let slot = node.last_seq;
            if let Some(device) = node.devices.get_mut(device_id) {
                device.last_seq = slot;
            }
        }

        MessageType::DDeath => {
            let device_id = topic.device_id().unwrap_or_default();
            // DDEATH also consumes a slot of the shared counter.
            check_shared_seq(node, &node_label, payload, &mut out);
            let slot = node.last_seq;
            if let Some(device) = node.devices.get_mut(device_id) {
                device.online = false;
                device.last_seq = slot;
            }
        }

        MessageType::NCmd | MessageType::DCmd | MessageType::State => {}
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadBuilder;

    fn birth_bytes(bd_seq: u64) -> Vec<u8> {
        let mut builder = PayloadBuilder::new();
        builder.set_timestamp(1_700_000_000_000);
        builder.set_seq(0);
        builder.add_metric("bdSeq", bd_seq);
        builder.add_metric_with_alias("Temperature", 1, 20.5);
        builder.build()
    }

    #[test]
    fn nbirth_establishes_session_state() {
        let observer = HostObserver::new();
        observer.handle_message("spBv1.0/Energy/NBIRTH/Gateway01", &birth_bytes(5));

        let node = observer.get_node_state("Energy", "Gateway01").unwrap();
        assert!(node.online);
        assert!(node.birth_received);
        assert_eq!(node.bd_seq, 5);
        assert_eq!(node.last_seq, 0);
        assert_eq!(node.birth_timestamp, Some(1_700_000_000_000));
        assert_eq!(node.alias_table.get(&1).map(String::as_str), Some("Temperature"));
    }

    #[test]
    fn ndata_before_birth_warns_and_keeps_no_baseline() {
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&warnings);
        let observer = HostObserver::new().with_log_callback(move |level, message| {
            sink.lock().unwrap().push((level, message.to_string()));
        });

        let mut data = PayloadBuilder::new();
        data.set_seq(1).add_metric_by_alias(1, 21.0);
        observer.handle_message("spBv1.0/Energy/NDATA/Gateway01", &data.build());

        let warnings = warnings.lock().unwrap();
        assert!(warnings
            .iter()
            .any(|(level, m)| *level == LogLevel::Warn && m.contains("before NBIRTH")));
    }

    #[test]
    fn state_json_goes_to_state_callback() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let observer = HostObserver::new().with_state_callback(move |host_id, state| {
            *sink.lock().unwrap() = Some((host_id.to_string(), *state));
        });

        observer.handle_message("STATE/SCADA01", br#"{"online":true,"timestamp":123}"#);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            Some(("SCADA01".to_string(), StateMessage::birth(123)))
        );
    }
}
