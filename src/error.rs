//! Error types for the Sparkplug API.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for Sparkplug operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur when using the Sparkplug API.
///
/// Every public operation returns [`Result`]; nothing panics across the API
/// boundary. Observer-side validation problems are *not* errors — they are
/// reported through the host log callback and `tracing` warnings.
#[derive(Error, Debug)]
pub enum Error {
    /// The operation requires an active MQTT connection.
    #[error("Not connected to MQTT broker")]
    NotConnected,

    /// The transport refused the connection or the connect wait timed out.
    #[error("Failed to connect to broker: {0}")]
    ConnectFailed(String),

    /// The transport reported a disconnect failure. Soft: the session still
    /// transitions to Disconnected.
    #[error("Failed to disconnect: {0}")]
    DisconnectFailed(String),

    /// The transport rejected a publish.
    #[error("Failed to publish {message_type}: {details}")]
    PublishFailed {
        /// The type of message that failed to publish.
        message_type: &'static str,
        /// Additional details about the failure.
        details: String,
    },

    /// The transport rejected a subscribe.
    #[error("Failed to subscribe to '{filter}': {details}")]
    SubscribeFailed {
        /// The topic filter that was being subscribed.
        filter: String,
        /// Additional details about the failure.
        details: String,
    },

    /// A blocking operation exceeded its configured bound.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// A protocol precondition does not hold, e.g. DBIRTH before NBIRTH,
    /// DDATA before DBIRTH, or rebirth with no stored birth certificate.
    #[error("Precondition violated: {0}")]
    PreconditionViolated(String),

    /// A topic string could not be parsed as a Sparkplug topic.
    #[error("Invalid Sparkplug topic: {0}")]
    InvalidTopic(String),

    /// Bytes do not decode to the Sparkplug B payload schema.
    #[error("Failed to decode Sparkplug payload: {0}")]
    PayloadDecodeFailed(#[from] prost::DecodeError),

    /// Invalid metric index into a parsed payload.
    #[error("Invalid metric index: {index} (payload has {count} metrics)")]
    InvalidMetricIndex {
        /// The invalid index that was requested.
        index: usize,
        /// The actual metric count in the payload.
        count: usize,
    },
}

impl Error {
    /// Replaces the generic message type a transport reported on a publish
    /// failure with the Sparkplug message type the session was sending.
    pub(crate) fn for_message_type(self, message_type: &'static str) -> Error {
        match self {
            Error::PublishFailed { details, .. } => Error::PublishFailed {
                message_type,
                details,
            },
            other => other,
        }
    }
}
