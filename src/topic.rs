//! Sparkplug topic parsing and construction.
//!
//! Sparkplug B topics follow the format:
//! - `spBv1.0/{group_id}/{message_type}/{edge_node_id}[/{device_id}]`
//! - `STATE/{host_id}`

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Topic namespace prefix for all Sparkplug B metric messages.
pub const NAMESPACE: &str = "spBv1.0";

/// Topic prefix for Host Application STATE messages.
pub const STATE_PREFIX: &str = "STATE";

/// Sparkplug message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Node Birth - published when a node comes online
    NBirth,
    /// Node Death - published when a node goes offline
    NDeath,
    /// Node Data - published when node metrics change
    NData,
    /// Node Command - command sent to a node
    NCmd,
    /// Device Birth - published when a device comes online
    DBirth,
    /// Device Death - published when a device goes offline
    DDeath,
    /// Device Data - published when device metrics change
    DData,
    /// Device Command - command sent to a device
    DCmd,
    /// State - Host Application liveness (JSON payload, not Sparkplug binary)
    State,
}

impl MessageType {
    /// Returns the string representation used in MQTT topics.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::NBirth => "NBIRTH",
            MessageType::NDeath => "NDEATH",
            MessageType::NData => "NDATA",
            MessageType::NCmd => "NCMD",
            MessageType::DBirth => "DBIRTH",
            MessageType::DDeath => "DDEATH",
            MessageType::DData => "DDATA",
            MessageType::DCmd => "DCMD",
            MessageType::State => "STATE",
        }
    }

    /// Returns true if this is a node-level message type.
    pub fn is_node_message(&self) -> bool {
        matches!(
            self,
            MessageType::NBirth | MessageType::NDeath | MessageType::NData | MessageType::NCmd
        )
    }

    /// Returns true if this is a device-level message type.
    pub fn is_device_message(&self) -> bool {
        matches!(
            self,
            MessageType::DBirth | MessageType::DDeath | MessageType::DData | MessageType::DCmd
        )
    }

    /// Returns true if this is a birth message (NBIRTH or DBIRTH).
    pub fn is_birth(&self) -> bool {
        matches!(self, MessageType::NBirth | MessageType::DBirth)
    }

    /// Returns true if this is a death message (NDEATH or DDEATH).
    pub fn is_death(&self) -> bool {
        matches!(self, MessageType::NDeath | MessageType::DDeath)
    }

    /// Returns true if this is a data message (NDATA or DDATA).
    pub fn is_data(&self) -> bool {
        matches!(self, MessageType::NData | MessageType::DData)
    }

    /// Returns true if this is a command message (NCMD or DCMD).
    pub fn is_command(&self) -> bool {
        matches!(self, MessageType::NCmd | MessageType::DCmd)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NBIRTH" => Ok(MessageType::NBirth),
            "NDEATH" => Ok(MessageType::NDeath),
            "NDATA" => Ok(MessageType::NData),
            "NCMD" => Ok(MessageType::NCmd),
            "DBIRTH" => Ok(MessageType::DBirth),
            "DDEATH" => Ok(MessageType::DDeath),
            "DDATA" => Ok(MessageType::DData),
            "DCMD" => Ok(MessageType::DCmd),
            "STATE" => Ok(MessageType::State),
            _ => Err(Error::InvalidTopic(format!("unknown message type: {}", s))),
        }
    }
}

/// A parsed Sparkplug topic.
///
/// For [`MessageType::State`] topics, `edge_node_id` carries the host
/// application id and `group_id` is empty ([`Topic::host_id`] reads it
/// back under its proper name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// The Sparkplug group ID (empty for STATE).
    pub group_id: String,
    /// The message type.
    pub message_type: MessageType,
    /// The edge node ID (host ID for STATE).
    pub edge_node_id: String,
    /// The device ID (present only for device-level messages).
    pub device_id: Option<String>,
}

impl Topic {
    /// Builds a node-level topic (NBIRTH/NDEATH/NDATA/NCMD).
    pub fn node(
        group_id: impl Into<String>,
        message_type: MessageType,
        edge_node_id: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            message_type,
            edge_node_id: edge_node_id.into(),
            device_id: None,
        }
    }

    /// Builds a device-level topic (DBIRTH/DDEATH/DDATA/DCMD).
    pub fn device(
        group_id: impl Into<String>,
        message_type: MessageType,
        edge_node_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            message_type,
            edge_node_id: edge_node_id.into(),
            device_id: Some(device_id.into()),
        }
    }

    /// Builds a STATE topic for a Host Application.
    pub fn state(host_id: impl Into<String>) -> Self {
        Self {
            group_id: String::new(),
            message_type: MessageType::State,
            edge_node_id: host_id.into(),
            device_id: None,
        }
    }

    /// Parses a Sparkplug topic string.
    ///
    /// # Examples
    ///
    /// ```
    /// use sparkplug_b::Topic;
    ///
    /// // Node-level message
    /// let topic = Topic::parse("spBv1.0/Energy/NDATA/Gateway01")?;
    ///
    /// // Device-level message
    /// let topic = Topic::parse("spBv1.0/Energy/DDATA/Gateway01/Sensor01")?;
    ///
    /// // State message
    /// let topic = Topic::parse("STATE/ScadaHost01")?;
    /// # Ok::<(), sparkplug_b::Error>(())
    /// ```
    pub fn parse(topic: &str) -> Result<Self> {
        let parts: Vec<&str> = topic.split('/').collect();

        if parts[0] == STATE_PREFIX {
            if parts.len() != 2 {
                return Err(Error::InvalidTopic(format!(
                    "STATE topic must be STATE/<host_id>, got '{}'",
                    topic
                )));
            }
            return Ok(Topic::state(parts[1]));
        }

        // spBv1.0/{group_id}/{message_type}/{edge_node_id}[/{device_id}]
        if parts.len() < 4 || parts.len() > 5 {
            return Err(Error::InvalidTopic(format!(
                "topic must have 4 or 5 segments, got {} in '{}'",
                parts.len(),
                topic
            )));
        }

        if parts[0] != NAMESPACE {
            return Err(Error::InvalidTopic(format!(
                "topic must start with '{}', got '{}'",
                NAMESPACE, parts[0]
            )));
        }

        let message_type: MessageType = parts[2].parse()?;
        if message_type == MessageType::State {
            return Err(Error::InvalidTopic(format!(
                "STATE does not belong in the {} namespace: '{}'",
                NAMESPACE, topic
            )));
        }

        let device_id = parts.get(4).map(|s| s.to_string());

        if message_type.is_device_message() && device_id.is_none() {
            return Err(Error::InvalidTopic(format!(
                "{} messages require a device_id",
                message_type
            )));
        }
        if message_type.is_node_message() && device_id.is_some() {
            return Err(Error::InvalidTopic(format!(
                "{} messages must not have a device_id",
                message_type
            )));
        }

        Ok(Topic {
            group_id: parts[1].to_string(),
            message_type,
            edge_node_id: parts[3].to_string(),
            device_id,
        })
    }

    /// Returns the host ID if this is a STATE topic.
    pub fn host_id(&self) -> Option<&str> {
        if self.message_type == MessageType::State {
            Some(&self.edge_node_id)
        } else {
            None
        }
    }

    /// Returns the device ID if this is a device-level topic.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message_type == MessageType::State {
            return write!(f, "{}/{}", STATE_PREFIX, self.edge_node_id);
        }
        write!(
            f,
            "{}/{}/{}/{}",
            NAMESPACE,
            self.group_id,
            self.message_type.as_str(),
            self.edge_node_id
        )?;
        if let Some(device_id) = &self.device_id {
            write!(f, "/{}", device_id)?;
        }
        Ok(())
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Topic::parse(s)
    }
}
