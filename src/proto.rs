//! Wire model of the Eclipse Tahu Sparkplug B payload schema.
//!
//! Hand-maintained `prost` mapping of `org.eclipse.tahu.protobuf.Payload`
//! and its `Metric` submessage (proto2). Field numbers follow
//! `sparkplug_b.proto`; the complex value arms (DataSet, Template,
//! extensions) are not modelled — their tags are skipped as unknown fields
//! on decode, which keeps round-tripping of the scalar Sparkplug types
//! exact without dragging in the full Tahu object model.

/// Top-level Sparkplug B payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Payload {
    /// Timestamp at message sending time, in ms since epoch.
    #[prost(uint64, optional, tag = "1")]
    pub timestamp: ::core::option::Option<u64>,
    /// Repeated forever growing or mutating metrics.
    #[prost(message, repeated, tag = "2")]
    pub metrics: ::prost::alloc::vec::Vec<Metric>,
    /// Sequence number, 0-255 rolling.
    #[prost(uint64, optional, tag = "3")]
    pub seq: ::core::option::Option<u64>,
    /// UUID to track message type in terms of schema definitions.
    #[prost(string, optional, tag = "4")]
    pub uuid: ::core::option::Option<::prost::alloc::string::String>,
    /// Array of bytes used for any custom binary encoded data.
    #[prost(bytes = "vec", optional, tag = "5")]
    pub body: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}

/// A single Sparkplug metric.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    /// Metric name - should only be included on birth.
    #[prost(string, optional, tag = "1")]
    pub name: ::core::option::Option<::prost::alloc::string::String>,
    /// Metric alias - tied to name on birth and included in all later DATA messages.
    #[prost(uint64, optional, tag = "2")]
    pub alias: ::core::option::Option<u64>,
    /// Timestamp associated with data acquisition time.
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: ::core::option::Option<u64>,
    /// DataType of the metric/tag value.
    #[prost(uint32, optional, tag = "4")]
    pub datatype: ::core::option::Option<u32>,
    /// If this is historical data and should not update real time tag.
    #[prost(bool, optional, tag = "5")]
    pub is_historical: ::core::option::Option<bool>,
    /// Tells consuming clients such as MQTT Engine to not store this as a tag.
    #[prost(bool, optional, tag = "6")]
    pub is_transient: ::core::option::Option<bool>,
    /// If this is null - explicitly say so rather than using -1, false, etc.
    #[prost(bool, optional, tag = "7")]
    pub is_null: ::core::option::Option<bool>,
    /// The typed value slot; the active arm is dictated by `datatype`.
    #[prost(oneof = "metric::Value", tags = "10, 11, 12, 13, 14, 15, 16")]
    pub value: ::core::option::Option<metric::Value>,
}

/// Nested value arms for [`Metric`].
pub mod metric {
    /// Scalar value slots of the Tahu `Metric` oneof.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        /// Int8/Int16/Int32 and UInt8/UInt16/UInt32 pack into this slot.
        #[prost(uint32, tag = "10")]
        IntValue(u32),
        /// Int64, UInt64 and DateTime pack into this slot.
        #[prost(uint64, tag = "11")]
        LongValue(u64),
        /// 32-bit floating point.
        #[prost(float, tag = "12")]
        FloatValue(f32),
        /// 64-bit floating point.
        #[prost(double, tag = "13")]
        DoubleValue(f64),
        /// Boolean.
        #[prost(bool, tag = "14")]
        BooleanValue(bool),
        /// String, Text and UUID metrics.
        #[prost(string, tag = "15")]
        StringValue(::prost::alloc::string::String),
        /// Bytes and File metrics.
        #[prost(bytes, tag = "16")]
        BytesValue(::prost::alloc::vec::Vec<u8>),
    }
}

impl Payload {
    /// Returns a reference to the first metric with the given name, if any.
    pub fn metric_by_name(&self, name: &str) -> Option<&Metric> {
        self.metrics
            .iter()
            .find(|m| m.name.as_deref() == Some(name))
    }

    /// Returns a mutable reference to the first metric with the given name.
    pub fn metric_by_name_mut(&mut self, name: &str) -> Option<&mut Metric> {
        self.metrics
            .iter_mut()
            .find(|m| m.name.as_deref() == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn roundtrip_scalar_metric() {
        let payload = Payload {
            timestamp: Some(1_700_000_000_000),
            seq: Some(7),
            uuid: None,
            body: None,
            metrics: vec![Metric {
                name: Some("Temperature".into()),
                alias: Some(1),
                timestamp: Some(1_700_000_000_000),
                datatype: Some(10),
                is_historical: None,
                is_transient: None,
                is_null: None,
                value: Some(metric::Value::DoubleValue(20.5)),
            }],
        };

        let bytes = payload.encode_to_vec();
        let decoded = Payload::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn metric_by_name_finds_bdseq() {
        let mut payload = Payload::default();
        payload.metrics.push(Metric {
            name: Some("bdSeq".into()),
            value: Some(metric::Value::LongValue(3)),
            datatype: Some(8),
            ..Default::default()
        });
        assert!(payload.metric_by_name("bdSeq").is_some());
        assert!(payload.metric_by_name("seq").is_none());
    }
}
