use rand::Rng;
use shardq_types::SequenceKey;

use crate::{Result, ShardSelector, ensure_shards};

/// A sharder (with no data locality) that maps every call to a uniformly
/// distributed random shard index, ignoring the key.
///
/// # Distribution
///
/// Each call draws independently from the calling thread's RNG, so over many
/// calls every index in `[0, N)` is selected approximately `1/N` of the time
/// regardless of which thread makes the call.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomShard;

impl ShardSelector for RandomShard {
    fn select_index(&self, _key: &SequenceKey, shard_count: usize) -> Result<usize> {
        ensure_shards(shard_count)?;
        Ok(rand::thread_rng().gen_range(0..shard_count))
    }
}
