//! Common types for the Sparkplug API.

use crate::proto;

/// Sparkplug data types.
///
/// Tag values match the Sparkplug B specification; the tag travels in the
/// metric's `datatype` field so parsers can present the correct typed view
/// even though several types share a wire slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    /// Unknown or unsupported type
    Unknown = 0,
    /// Signed 8-bit integer
    Int8 = 1,
    /// Signed 16-bit integer
    Int16 = 2,
    /// Signed 32-bit integer
    Int32 = 3,
    /// Signed 64-bit integer
    Int64 = 4,
    /// Unsigned 8-bit integer
    UInt8 = 5,
    /// Unsigned 16-bit integer
    UInt16 = 6,
    /// Unsigned 32-bit integer
    UInt32 = 7,
    /// Unsigned 64-bit integer
    UInt64 = 8,
    /// 32-bit floating point
    Float = 9,
    /// 64-bit floating point
    Double = 10,
    /// Boolean value
    Boolean = 11,
    /// String value
    String = 12,
    /// DateTime value (ms since Unix epoch, carried in the 64-bit slot)
    DateTime = 13,
    /// Text value
    Text = 14,
    /// UUID value (string form)
    Uuid = 15,
    /// DataSet value
    DataSet = 16,
    /// Raw bytes
    Bytes = 17,
    /// File contents
    File = 18,
    /// Template value
    Template = 19,
    /// Property set
    PropertySet = 20,
    /// List of property sets
    PropertySetList = 21,
}

impl DataType {
    /// Maps a wire `datatype` tag back to the enum, `Unknown` for
    /// unrecognized tags.
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            1 => DataType::Int8,
            2 => DataType::Int16,
            3 => DataType::Int32,
            4 => DataType::Int64,
            5 => DataType::UInt8,
            6 => DataType::UInt16,
            7 => DataType::UInt32,
            8 => DataType::UInt64,
            9 => DataType::Float,
            10 => DataType::Double,
            11 => DataType::Boolean,
            12 => DataType::String,
            13 => DataType::DateTime,
            14 => DataType::Text,
            15 => DataType::Uuid,
            16 => DataType::DataSet,
            17 => DataType::Bytes,
            18 => DataType::File,
            19 => DataType::Template,
            20 => DataType::PropertySet,
            21 => DataType::PropertySetList,
            _ => DataType::Unknown,
        }
    }

    /// The wire tag carried in the metric's `datatype` field.
    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Metric value type.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Signed 8-bit integer value
    Int8(i8),
    /// Signed 16-bit integer value
    Int16(i16),
    /// Signed 32-bit integer value
    Int32(i32),
    /// Signed 64-bit integer value
    Int64(i64),
    /// Unsigned 8-bit integer value
    UInt8(u8),
    /// Unsigned 16-bit integer value
    UInt16(u16),
    /// Unsigned 32-bit integer value
    UInt32(u32),
    /// Unsigned 64-bit integer value
    UInt64(u64),
    /// 32-bit floating point value
    Float(f32),
    /// 64-bit floating point value
    Double(f64),
    /// Boolean value
    Boolean(bool),
    /// String value
    String(String),
    /// DateTime value, ms since Unix epoch
    DateTime(u64),
    /// Raw bytes value
    Bytes(Vec<u8>),
    /// Null value
    Null,
}

impl MetricValue {
    /// The Sparkplug datatype this value serializes as.
    pub fn datatype(&self) -> DataType {
        match self {
            MetricValue::Int8(_) => DataType::Int8,
            MetricValue::Int16(_) => DataType::Int16,
            MetricValue::Int32(_) => DataType::Int32,
            MetricValue::Int64(_) => DataType::Int64,
            MetricValue::UInt8(_) => DataType::UInt8,
            MetricValue::UInt16(_) => DataType::UInt16,
            MetricValue::UInt32(_) => DataType::UInt32,
            MetricValue::UInt64(_) => DataType::UInt64,
            MetricValue::Float(_) => DataType::Float,
            MetricValue::Double(_) => DataType::Double,
            MetricValue::Boolean(_) => DataType::Boolean,
            MetricValue::String(_) => DataType::String,
            MetricValue::DateTime(_) => DataType::DateTime,
            MetricValue::Bytes(_) => DataType::Bytes,
            MetricValue::Null => DataType::Unknown,
        }
    }

    /// Writes this value into the type-appropriate wire slot.
    ///
    /// Small integers share the 32-bit slot (signed values travel as their
    /// two's-complement bit pattern); 64-bit integers and DateTime use the
    /// 64-bit slot.
    pub(crate) fn wire_value(&self) -> Option<proto::metric::Value> {
        use proto::metric::Value;
        match self {
            MetricValue::Int8(v) => Some(Value::IntValue(*v as i32 as u32)),
            MetricValue::Int16(v) => Some(Value::IntValue(*v as i32 as u32)),
            MetricValue::Int32(v) => Some(Value::IntValue(*v as u32)),
            MetricValue::Int64(v) => Some(Value::LongValue(*v as u64)),
            MetricValue::UInt8(v) => Some(Value::IntValue(u32::from(*v))),
            MetricValue::UInt16(v) => Some(Value::IntValue(u32::from(*v))),
            MetricValue::UInt32(v) => Some(Value::IntValue(*v)),
            MetricValue::UInt64(v) => Some(Value::LongValue(*v)),
            MetricValue::Float(v) => Some(Value::FloatValue(*v)),
            MetricValue::Double(v) => Some(Value::DoubleValue(*v)),
            MetricValue::Boolean(v) => Some(Value::BooleanValue(*v)),
            MetricValue::String(v) => Some(Value::StringValue(v.clone())),
            MetricValue::DateTime(v) => Some(Value::LongValue(*v)),
            MetricValue::Bytes(v) => Some(Value::BytesValue(v.clone())),
            MetricValue::Null => None,
        }
    }

    /// Reconstructs the typed view from a wire slot plus the datatype tag.
    pub(crate) fn from_wire(datatype: DataType, value: Option<&proto::metric::Value>) -> Self {
        use proto::metric::Value;
        let Some(value) = value else {
            return MetricValue::Null;
        };
        match (datatype, value) {
            (DataType::Int8, Value::IntValue(v)) => MetricValue::Int8(*v as i32 as i8),
            (DataType::Int16, Value::IntValue(v)) => MetricValue::Int16(*v as i32 as i16),
            (DataType::Int32, Value::IntValue(v)) => MetricValue::Int32(*v as i32),
            (DataType::Int64, Value::LongValue(v)) => MetricValue::Int64(*v as i64),
            (DataType::UInt8, Value::IntValue(v)) => MetricValue::UInt8(*v as u8),
            (DataType::UInt16, Value::IntValue(v)) => MetricValue::UInt16(*v as u16),
            (DataType::UInt32, Value::IntValue(v)) => MetricValue::UInt32(*v),
            (DataType::UInt64, Value::LongValue(v)) => MetricValue::UInt64(*v),
            (DataType::DateTime, Value::LongValue(v)) => MetricValue::DateTime(*v),
            (DataType::Float, Value::FloatValue(v)) => MetricValue::Float(*v),
            (DataType::Double, Value::DoubleValue(v)) => MetricValue::Double(*v),
            (DataType::Boolean, Value::BooleanValue(v)) => MetricValue::Boolean(*v),
            (DataType::String | DataType::Text | DataType::Uuid, Value::StringValue(v)) => {
                MetricValue::String(v.clone())
            }
            (DataType::Bytes | DataType::File, Value::BytesValue(v)) => {
                MetricValue::Bytes(v.clone())
            }
            // Tag and slot disagree or the type is not modelled.
            _ => MetricValue::Null,
        }
    }
}

/// Metric information.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Metric name (if present)
    pub name: Option<String>,
    /// Metric alias (if present)
    pub alias: Option<u64>,
    /// Metric timestamp in milliseconds since Unix epoch (if present)
    pub timestamp: Option<u64>,
    /// Data type
    pub datatype: DataType,
    /// Whether the metric was flagged as historical data
    pub is_historical: bool,
    /// Whether the metric carries an explicit null value
    pub is_null: bool,
    /// Metric value (or Null)
    pub value: MetricValue,
}

/// Conversion of host values into [`MetricValue`], used by the payload
/// builder's generic `add_metric` family to pick the Sparkplug datatype
/// tag from the Rust type.
pub trait IntoMetricValue {
    /// Converts self into the tagged metric value.
    fn into_metric_value(self) -> MetricValue;
}

macro_rules! impl_into_metric_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl IntoMetricValue for $ty {
                fn into_metric_value(self) -> MetricValue {
                    MetricValue::$variant(self)
                }
            }
        )*
    };
}

impl_into_metric_value! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    bool => Boolean,
    String => String,
}

impl IntoMetricValue for &str {
    fn into_metric_value(self) -> MetricValue {
        MetricValue::String(self.to_string())
    }
}

impl IntoMetricValue for MetricValue {
    fn into_metric_value(self) -> MetricValue {
        self
    }
}
