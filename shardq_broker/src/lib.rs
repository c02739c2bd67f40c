//! The broker channel seam of the sharding layer.
//!
//! [`BrokerChannel`] is the small set of AMQP-style channel operations the sharding layer needs:
//! declare a queue, bind it to an exchange, publish a message and fetch a single message without
//! blocking. Connection and channel lifecycle stay with the caller; the sharding layer only ever
//! borrows a channel for the duration of one call.
//!
//! [`memory::MemoryBroker`] is a process-local implementation with AMQP-like routing semantics,
//! used by tests and the load generator.
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

mod types;
pub use types::*;

pub mod memory;

/// Generic boxed error type that is used at the channel seam.
///
/// The dynamic boxing makes it easier to deal with errors from different broker implementations.
pub type BrokerError = Box<dyn std::error::Error + Sync + Send>;

/// A channel on a message broker.
///
/// A channel is generally not safe for concurrent use by multiple callers; implementations are
/// `Sync` only so that a single caller can hold it by reference across `await` points.
#[async_trait]
pub trait BrokerChannel: Debug + Send + Sync {
    /// Declare the queue `name`, creating it if absent.
    ///
    /// Declaring an existing queue with equivalent options is a no-op.
    async fn declare_queue(
        &self,
        name: &str,
        options: &QueueDeclareOptions,
    ) -> Result<(), BrokerError>;

    /// Bind the queue `name` to `exchange`, routing messages published with `routing_key` to it.
    async fn bind_queue(
        &self,
        name: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> Result<(), BrokerError>;

    /// Publish `body` to `exchange` with `routing_key`.
    ///
    /// If `mandatory` is set and the message cannot be routed to any queue, the broker returns it
    /// to the publisher instead of silently dropping it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        properties: &BasicProperties,
        body: Bytes,
    ) -> Result<(), BrokerError>;

    /// Take a single message from queue `name`, without waiting.
    ///
    /// Returns `Ok(None)` if the queue holds no message. If `auto_ack` is false the delivery must
    /// later be settled with [`ack`](Self::ack) or [`reject`](Self::reject).
    async fn fetch_one(&self, name: &str, auto_ack: bool)
    -> Result<Option<GetResponse>, BrokerError>;

    /// Acknowledge the delivery identified by `delivery_tag`.
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Reject the delivery identified by `delivery_tag`, optionally returning it to its queue.
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}
