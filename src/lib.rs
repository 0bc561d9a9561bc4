//! Sparkplug B client library for Industrial IoT applications.
//!
//! This crate implements the Sparkplug B convention on top of MQTT: the
//! strict session lifecycle of an edge node (NBIRTH/NDATA/NDEATH with a
//! `bdSeq`-carrying Last Will), device sub-sessions (DBIRTH/DDATA/DDEATH),
//! the Host Application side (retained JSON STATE liveness plus NCMD/DCMD
//! commands), and a consuming observer that validates sequence continuity
//! and resolves metric aliases captured from birth certificates.
//!
//! # Architecture
//!
//! - [`EdgeNode`]: edge-node session — NBIRTH/NDATA/NDEATH, device
//!   lifecycle, sequence and `bdSeq` counters, NCMD intake, rebirth
//! - [`HostApplication`]: SCADA side — STATE liveness, NCMD/DCMD commands,
//!   Sparkplug subscriptions
//! - [`HostObserver`]: topic dispatch, sequence validation, alias tables,
//!   node/device state tracking
//! - [`PayloadBuilder`] / [`Payload`]: build and parse the Sparkplug B
//!   metric payload (Eclipse Tahu protobuf schema)
//! - [`Topic`]: parse and render `spBv1.0/...` and `STATE/...` topics
//! - [`MqttTransport`]: the MQTT seam — implemented by the built-in
//!   `rumqttc`-backed [`MqttConnection`], replaceable for tests
//!
//! # Example: edge node
//!
//! ```no_run
//! use sparkplug_b::{EdgeNode, EdgeNodeConfig, PayloadBuilder};
//!
//! # fn main() -> Result<(), sparkplug_b::Error> {
//! let config = EdgeNodeConfig::new(
//!     "tcp://localhost:1883",
//!     "my_edge_node",
//!     "Energy",
//!     "Gateway01",
//! );
//!
//! let node = EdgeNode::new(config)?;
//! node.connect()?;
//!
//! // NBIRTH declares metrics with aliases and carries bdSeq.
//! let mut birth = PayloadBuilder::new();
//! birth
//!     .add_metric_with_alias("Temperature", 1, 20.5)
//!     .add_metric_with_alias("Active", 2, true);
//! node.publish_birth(&mut birth)?;
//!
//! // NDATA updates refer to metrics by alias.
//! let mut data = PayloadBuilder::new();
//! data.add_metric_by_alias(1, 21.0);
//! node.publish_data(&mut data)?;
//!
//! node.publish_death()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: host application
//!
//! ```no_run
//! use sparkplug_b::{HostApplication, HostConfig};
//!
//! # fn main() -> Result<(), sparkplug_b::Error> {
//! let config = HostConfig::new("tcp://localhost:1883", "scada_client", "SCADA01")
//!     .with_message_callback(|topic, payload| {
//!         println!("{}: seq={:?}", topic, payload.seq());
//!     });
//!
//! let host = HostApplication::new(config)?;
//! host.connect()?;
//! host.subscribe_group("Energy")?;
//! host.publish_state_birth(1_700_000_000_000)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod edge;
pub mod error;
pub mod host;
pub mod observer;
pub mod payload;
pub mod proto;
pub mod topic;
pub mod transport;
pub mod types;

pub use edge::{ConnectionState, EdgeNode, EdgeNodeConfig};
pub use error::{Error, Result};
pub use host::{HostApplication, HostConfig};
pub use observer::{
    CommandCallback, DeviceState, HostObserver, LogCallback, LogLevel, MessageCallback, NodeState,
    StateCallback, StateMessage,
};
pub use payload::{Payload, PayloadBuilder};
pub use topic::{MessageType, Topic};
pub use transport::{
    ConnectOptions, Credentials, LastWill, MqttConnection, MqttTransport, TlsOptions,
    TransportHandler,
};
pub use types::{DataType, IntoMetricValue, Metric, MetricValue};
