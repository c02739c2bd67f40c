//! A scripted [`ShardSelector`] for tests.
use std::collections::VecDeque;

use parking_lot::Mutex;
use shardq_types::SequenceKey;

use crate::{Result, ShardSelector, ensure_shards};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSelectorCall {
    pub key: SequenceKey,
    pub shard_count: usize,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<MockSelectorCall>,
    index_return: VecDeque<usize>,
}

/// Returns the configured indexes in sequence and records every call.
///
/// A zero shard count is still rejected, as any selector must.
#[derive(Debug, Default)]
pub struct MockSelector(Mutex<Inner>);

impl MockSelector {
    /// Return the values specified in `ret` in sequence for calls to
    /// `select_index`, starting from the front.
    pub fn with_return(self, ret: impl Into<VecDeque<usize>>) -> Self {
        self.0.lock().index_return = ret.into();
        self
    }

    pub fn calls(&self) -> Vec<MockSelectorCall> {
        self.0.lock().calls.clone()
    }
}

impl ShardSelector for MockSelector {
    fn select_index(&self, key: &SequenceKey, shard_count: usize) -> Result<usize> {
        ensure_shards(shard_count)?;

        let mut guard = self.0.lock();
        guard.calls.push(MockSelectorCall {
            key: key.clone(),
            shard_count,
        });
        Ok(guard
            .index_return
            .pop_front()
            .expect("no mock shard index to return"))
    }
}
