//! Logical-queue sharding on top of an AMQP-style message broker.
//!
//! A broker delivers the messages of one physical queue one after another, so a single hot queue
//! caps throughput no matter how many consumers drain it. A [`ShardedQueue`] presents callers with
//! one logical queue and routing key while fanning it out to `N` physical queues, named
//! `<logical name><separator><index>` (see [`ShardLayout`]):
//!
//! * [`declare`](ShardedQueue::declare) and [`bind`](ShardedQueue::bind) create and bind all `N`
//!   physical queues.
//! * [`publish`](ShardedQueue::publish) routes each message to exactly one shard, chosen by a
//!   consistent hash of its [`SequenceKey`], so messages sharing a key stay ordered on one shard.
//! * [`pull_one`](ShardedQueue::pull_one) starts at a random shard and scans the others in turn,
//!   so that under sustained load no shard is always drained first.
//!
//! The facade owns no connection or channel: every operation borrows a [`BrokerChannel`] from the
//! caller, and nothing is retried.
use shardq_broker::BrokerError;
use thiserror::Error;

mod layout;
pub use layout::ShardLayout;

mod queue;
pub use queue::ShardedQueue;

pub use shardq_broker::{BasicProperties, BrokerChannel, FieldTable, QueueDeclareOptions};
pub use shardq_codec::{BitcodeCodec, JsonCodec, MessageCodec};
pub use shardq_sharder::{JumpHash, RandomShard, ShardSelector};
pub use shardq_types::{DeliveryHandle, Message, SequenceKey};

/// Errors returned by a [`ShardedQueue`].
///
/// Every error raised while talking to a physical queue names the shard it occurred on. Failures
/// part way through [`declare`](ShardedQueue::declare) or [`bind`](ShardedQueue::bind) leave the
/// shards before the failing one in place; nothing is rolled back.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("failed to declare queue {queue} (shard {shard_index}): {source}")]
    Declare {
        shard_index: usize,
        queue: String,
        source: BrokerError,
    },

    #[error("failed to bind queue {queue} with routing key {routing_key} (shard {shard_index}): {source}")]
    Bind {
        shard_index: usize,
        queue: String,
        routing_key: String,
        source: BrokerError,
    },

    #[error("failed to encode message for shard {shard_index}: {source}")]
    Encode {
        shard_index: usize,
        source: shardq_codec::Error,
    },

    #[error("failed to publish with routing key {routing_key} (shard {shard_index}): {source}")]
    Publish {
        shard_index: usize,
        routing_key: String,
        source: BrokerError,
    },

    #[error("failed to fetch from queue {queue} (shard {shard_index}): {source}")]
    Fetch {
        shard_index: usize,
        queue: String,
        source: BrokerError,
    },

    #[error(
        "failed to decode delivery {delivery_tag} from queue {queue} (shard {shard_index}): {source}"
    )]
    Decode {
        shard_index: usize,
        queue: String,
        delivery_tag: u64,
        source: shardq_codec::Error,
    },
}

impl Error {
    /// The shard this error occurred on, if it is specific to one.
    pub fn shard_index(&self) -> Option<usize> {
        match self {
            Self::InvalidConfiguration { .. } => None,
            Self::Declare { shard_index, .. }
            | Self::Bind { shard_index, .. }
            | Self::Encode { shard_index, .. }
            | Self::Publish { shard_index, .. }
            | Self::Fetch { shard_index, .. }
            | Self::Decode { shard_index, .. } => Some(*shard_index),
        }
    }
}

impl From<shardq_sharder::Error> for Error {
    fn from(e: shardq_sharder::Error) -> Self {
        Self::InvalidConfiguration {
            reason: e.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
