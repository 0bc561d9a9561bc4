//! Sparkplug payload building and parsing.

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message as _;

use crate::error::{Error, Result};
use crate::proto;
use crate::types::{DataType, IntoMetricValue, Metric, MetricValue};

/// Metric name of the rebirth request in NCMD payloads.
pub const NODE_CONTROL_REBIRTH: &str = "Node Control/Rebirth";
/// Metric name of the reboot request in NCMD payloads.
pub const NODE_CONTROL_REBOOT: &str = "Node Control/Reboot";
/// Metric name of the next-server request in NCMD payloads.
pub const NODE_CONTROL_NEXT_SERVER: &str = "Node Control/Next Server";
/// Metric name of the scan-rate setting in NCMD payloads.
pub const NODE_CONTROL_SCAN_RATE: &str = "Node Control/Scan Rate";

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A Sparkplug payload builder for creating NBIRTH, NDATA, and other
/// messages.
///
/// The Sparkplug datatype tag is inferred from the Rust type of the value
/// handed to the `add_metric` family, so `add_metric("Temp", 20.5)` emits a
/// Double metric while `add_metric("Count", 7u32)` emits a UInt32 one.
///
/// The builder is movable but not meant for concurrent mutation; build one
/// per message.
///
/// # Example
///
/// ```
/// use sparkplug_b::PayloadBuilder;
///
/// let mut builder = PayloadBuilder::new();
/// builder
///     .add_metric_with_alias("Temperature", 1, 20.5)
///     .add_metric_with_alias("Active", 2, true);
///
/// let bytes = builder.build();
/// assert!(!bytes.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct PayloadBuilder {
    payload: proto::Payload,
    seq_explicitly_set: bool,
}

impl PayloadBuilder {
    /// Creates a new, empty payload builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the payload-level timestamp in milliseconds since Unix epoch.
    pub fn set_timestamp(&mut self, timestamp: u64) -> &mut Self {
        self.payload.timestamp = Some(timestamp);
        self
    }

    /// Sets the sequence number manually.
    ///
    /// Sessions stamp the sequence themselves; setting it here opts out of
    /// automatic stamping for data messages.
    pub fn set_seq(&mut self, seq: u64) -> &mut Self {
        self.payload.seq = Some(seq);
        self.seq_explicitly_set = true;
        self
    }

    /// Sets the payload UUID.
    pub fn set_uuid(&mut self, uuid: impl Into<String>) -> &mut Self {
        self.payload.uuid = Some(uuid.into());
        self
    }

    /// Returns true if the caller set a sequence number explicitly.
    pub fn has_seq(&self) -> bool {
        self.seq_explicitly_set
    }

    fn push_metric(
        &mut self,
        name: Option<&str>,
        alias: Option<u64>,
        timestamp: Option<u64>,
        historical: bool,
        value: MetricValue,
    ) -> &mut Self {
        let datatype = value.datatype();
        let is_null = matches!(value, MetricValue::Null);
        self.payload.metrics.push(proto::Metric {
            name: name.map(str::to_string),
            alias,
            timestamp: Some(timestamp.unwrap_or_else(now_millis)),
            datatype: Some(datatype.tag()),
            is_historical: historical.then_some(true),
            is_transient: None,
            is_null: is_null.then_some(true),
            value: value.wire_value(),
        });
        self
    }

    /// Adds a metric by name (for BIRTH messages).
    pub fn add_metric<T: IntoMetricValue>(&mut self, name: &str, value: T) -> &mut Self {
        self.push_metric(Some(name), None, None, false, value.into_metric_value())
    }

    /// Adds a metric with both name and alias (for BIRTH messages, which
    /// establish the alias mapping).
    pub fn add_metric_with_alias<T: IntoMetricValue>(
        &mut self,
        name: &str,
        alias: u64,
        value: T,
    ) -> &mut Self {
        self.push_metric(
            Some(name),
            Some(alias),
            None,
            false,
            value.into_metric_value(),
        )
    }

    /// Adds a metric by alias only (for DATA messages after BIRTH).
    pub fn add_metric_by_alias<T: IntoMetricValue>(&mut self, alias: u64, value: T) -> &mut Self {
        self.push_metric(None, Some(alias), None, false, value.into_metric_value())
    }

    /// Adds a historical metric with an explicit acquisition timestamp.
    pub fn add_metric_at<T: IntoMetricValue>(
        &mut self,
        name: &str,
        timestamp: u64,
        value: T,
    ) -> &mut Self {
        self.push_metric(
            Some(name),
            None,
            Some(timestamp),
            true,
            value.into_metric_value(),
        )
    }

    /// Adds an explicitly null metric of the given datatype.
    pub fn add_null_metric(&mut self, name: &str, datatype: DataType) -> &mut Self {
        self.payload.metrics.push(proto::Metric {
            name: Some(name.to_string()),
            alias: None,
            timestamp: Some(now_millis()),
            datatype: Some(datatype.tag()),
            is_historical: None,
            is_transient: None,
            is_null: Some(true),
            value: None,
        });
        self
    }

    /// Adds the `Node Control/Rebirth` command metric used in NCMD payloads.
    pub fn add_node_control_rebirth(&mut self) -> &mut Self {
        self.add_metric(NODE_CONTROL_REBIRTH, true)
    }

    /// Adds the `Node Control/Reboot` command metric used in NCMD payloads.
    pub fn add_node_control_reboot(&mut self) -> &mut Self {
        self.add_metric(NODE_CONTROL_REBOOT, true)
    }

    /// Adds the `Node Control/Next Server` command metric used in NCMD
    /// payloads.
    pub fn add_node_control_next_server(&mut self) -> &mut Self {
        self.add_metric(NODE_CONTROL_NEXT_SERVER, true)
    }

    /// Adds the `Node Control/Scan Rate` command metric used in NCMD
    /// payloads.
    pub fn add_node_control_scan_rate(&mut self, rate_ms: i64) -> &mut Self {
        self.add_metric(NODE_CONTROL_SCAN_RATE, rate_ms)
    }

    /// Serializes the payload to binary protobuf format.
    pub fn build(&self) -> Vec<u8> {
        self.payload.encode_to_vec()
    }

    /// Read access to the underlying wire payload.
    pub fn payload(&self) -> &proto::Payload {
        &self.payload
    }

    /// Mutable access to the underlying wire payload, for callers that need
    /// to go beyond the builder surface.
    pub fn payload_mut(&mut self) -> &mut proto::Payload {
        &mut self.payload
    }
}

pub(crate) fn metric_from_proto(m: &proto::Metric) -> Metric {
    let datatype = DataType::from_tag(m.datatype.unwrap_or(0));
    let is_null = m.is_null.unwrap_or(false);
    let value = if is_null {
        MetricValue::Null
    } else {
        MetricValue::from_wire(datatype, m.value.as_ref())
    };
    Metric {
        name: m.name.clone(),
        alias: m.alias,
        timestamp: m.timestamp,
        datatype,
        is_historical: m.is_historical.unwrap_or(false),
        is_null,
        value,
    }
}

/// A parsed, read-only Sparkplug payload.
///
/// Owns its decoded representation; the source bytes may be dropped after
/// [`Payload::parse`] returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    inner: proto::Payload,
}

impl Payload {
    /// Parses a Sparkplug payload from binary protobuf data.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let inner = proto::Payload::decode(data)?;
        Ok(Self { inner })
    }

    /// Gets the payload-level timestamp, if present.
    pub fn timestamp(&self) -> Option<u64> {
        self.inner.timestamp
    }

    /// Gets the payload-level sequence number, if present.
    pub fn seq(&self) -> Option<u64> {
        self.inner.seq
    }

    /// Gets the payload UUID, if present.
    pub fn uuid(&self) -> Option<&str> {
        self.inner.uuid.as_deref()
    }

    /// Returns the number of metrics in the payload.
    pub fn metric_count(&self) -> usize {
        self.inner.metrics.len()
    }

    /// Gets a metric at the specified index.
    pub fn metric_at(&self, index: usize) -> Result<Metric> {
        let count = self.metric_count();
        self.inner
            .metrics
            .get(index)
            .map(metric_from_proto)
            .ok_or(Error::InvalidMetricIndex { index, count })
    }

    /// Returns an iterator over all metrics in the payload.
    pub fn metrics(&self) -> impl ExactSizeIterator<Item = Metric> + '_ {
        self.inner.metrics.iter().map(metric_from_proto)
    }

    /// Returns the first metric with the given name, if any.
    pub fn metric_by_name(&self, name: &str) -> Option<Metric> {
        self.inner.metric_by_name(name).map(metric_from_proto)
    }

    /// Extracts the `bdSeq` metric value, if the payload carries one.
    pub fn bd_seq(&self) -> Option<u64> {
        match self.inner.metric_by_name("bdSeq")?.value.as_ref() {
            Some(proto::metric::Value::LongValue(v)) => Some(*v),
            Some(proto::metric::Value::IntValue(v)) => Some(u64::from(*v)),
            _ => None,
        }
    }

    /// Read access to the underlying wire payload.
    pub fn raw(&self) -> &proto::Payload {
        &self.inner
    }
}
