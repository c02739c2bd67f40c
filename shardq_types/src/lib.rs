//! Shared message types exchanged through a sharded logical queue.
//!
//! A [`Message`] is the unit of data published to, and pulled from, a logical queue. It carries a
//! caller-chosen [`SequenceKey`] used to pick the physical shard on publish, an opaque payload, and
//! (only once it has been fetched from a broker) a [`DeliveryHandle`] identifying that specific
//! delivery.
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The key used to deterministically map a [`Message`] to a shard.
///
/// Keys are opaque to the sharding layer and need not be unique; messages sharing a key are
/// published to the same shard for a fixed shard count.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SequenceKey {
    Int(i64),
    Str(String),
}

impl Display for SequenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for SequenceKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SequenceKey {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for SequenceKey {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<String> for SequenceKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for SequenceKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

/// Identifies one delivery of a message fetched from a physical queue.
///
/// The `delivery_tag` is scoped to the broker channel that performed the fetch and is what the
/// broker needs to acknowledge or reject the delivery. `source` is the physical queue the message
/// was fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryHandle {
    delivery_tag: u64,
    source: String,
}

impl DeliveryHandle {
    pub fn new(delivery_tag: u64, source: impl Into<String>) -> Self {
        Self {
            delivery_tag,
            source: source.into(),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// The physical queue this delivery was fetched from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Display for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.source, self.delivery_tag)
    }
}

/// A message published to or pulled from a logical queue.
///
/// The delivery handle is never serialized: a message being published has none, and a message
/// decoded from a broker response only gains one through [`Message::into_delivered`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    sequence_key: SequenceKey,
    payload: Vec<u8>,
    #[serde(skip)]
    delivery_handle: Option<DeliveryHandle>,
}

impl Message {
    /// Create a new, unpublished message.
    pub fn new(sequence_key: impl Into<SequenceKey>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence_key: sequence_key.into(),
            payload: payload.into(),
            delivery_handle: None,
        }
    }

    pub fn sequence_key(&self) -> &SequenceKey {
        &self.sequence_key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// The handle of the delivery this message was fetched through, if any.
    pub fn delivery_handle(&self) -> Option<&DeliveryHandle> {
        self.delivery_handle.as_ref()
    }

    /// Mark this message as received through the delivery identified by `handle`.
    ///
    /// Only code that fetched the message from a broker should call this.
    pub fn into_delivered(self, handle: DeliveryHandle) -> Self {
        Self {
            delivery_handle: Some(handle),
            ..self
        }
    }
}
