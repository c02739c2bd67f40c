//! Values exchanged with a broker channel.
use std::collections::BTreeMap;

use bytes::Bytes;

/// A typed value in a [`FieldTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    Long(i64),
    Str(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Broker-specific arguments attached to a queue declaration, binding or message, e.g.
/// `x-max-length` or `x-message-ttl`.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// Options for a queue declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDeclareOptions {
    /// Survive a broker restart.
    pub durable: bool,
    /// Only usable by the declaring connection, and deleted when it closes.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

impl QueueDeclareOptions {
    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Default::default()
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Returns true if `other` declares the queue with the same durability, exclusivity and
    /// auto-delete flags. Brokers refuse redeclaring an existing queue with different flags.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.durable == other.durable
            && self.exclusive == other.exclusive
            && self.auto_delete == other.auto_delete
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient,
    Persistent,
}

/// Message properties sent alongside a published body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub delivery_mode: Option<DeliveryMode>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub headers: FieldTable,
}

impl BasicProperties {
    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..self
        }
    }

    pub fn with_delivery_mode(self, delivery_mode: DeliveryMode) -> Self {
        Self {
            delivery_mode: Some(delivery_mode),
            ..self
        }
    }

    pub fn with_message_id(self, message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..self
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// The result of a successful single-message fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    /// Identifies this delivery on the channel that fetched it.
    pub delivery_tag: u64,
    /// True if this message was delivered before and requeued.
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    /// Messages left in the queue after this one was taken.
    pub message_count: u32,
    pub properties: BasicProperties,
    pub body: Bytes,
}
