//! Shard index selection strategies.
//!
//! A [`ShardSelector`] maps a [`SequenceKey`] to a shard index in `[0, N)` for a logical queue
//! backed by `N` physical queues. Two implementations are provided:
//!
//! * [`JumpHash`]: deterministic, the same key always maps to the same index for a fixed `N`.
//!   Used when publishing so that related messages land on the same shard.
//! * [`RandomShard`]: ignores the key and draws a uniformly distributed index. Used to pick the
//!   first shard a pull consumer tries, so no shard is permanently favoured.
use std::{fmt::Debug, sync::Arc};

use shardq_types::SequenceKey;
use thiserror::Error;

mod jumphash;
pub use jumphash::*;

mod random;
pub use random::*;

pub mod mock;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid configuration: a sharded queue needs at least one shard")]
    InvalidConfiguration,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A strategy producing a shard index for a key.
///
/// Implementations must return an index in `[0, shard_count)` for every `shard_count >= 1`, and
/// [`Error::InvalidConfiguration`] when `shard_count` is zero.
pub trait ShardSelector: Debug + Send + Sync {
    /// Map `key` to a shard index in `[0, shard_count)`.
    fn select_index(&self, key: &SequenceKey, shard_count: usize) -> Result<usize>;
}

impl<T> ShardSelector for Arc<T>
where
    T: ShardSelector + ?Sized,
{
    fn select_index(&self, key: &SequenceKey, shard_count: usize) -> Result<usize> {
        (**self).select_index(key, shard_count)
    }
}

/// Reject a zero shard count.
pub(crate) fn ensure_shards(shard_count: usize) -> Result<()> {
    match shard_count {
        0 => Err(Error::InvalidConfiguration),
        _ => Ok(()),
    }
}
