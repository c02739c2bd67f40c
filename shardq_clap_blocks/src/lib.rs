//! CLI config blocks for building a [`ShardedQueue`].
use std::{str::FromStr, sync::Arc};

use shardq::{BitcodeCodec, JsonCodec, MessageCodec, ShardLayout, ShardedQueue};
use thiserror::Error;

/// Wire format of published message bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CodecKind {
    /// JSON, readable with standard broker tooling.
    #[default]
    Json,

    /// Compact binary encoding.
    Bitcode,
}

impl CodecKind {
    pub fn codec(self) -> Arc<dyn MessageCodec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Bitcode => Arc::new(BitcodeCodec),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum SeedKeyError {
    #[error("seed key must be 32 hex characters, got {0}")]
    Length(usize),

    #[error("invalid seed key: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// A 16 byte hash seed key, given as 32 hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedKey([u8; 16]);

impl SeedKey {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl FromStr for SeedKey {
    type Err = SeedKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut key = [0; 16];
        if s.len() != key.len() * 2 {
            return Err(SeedKeyError::Length(s.len()));
        }
        hex::decode_to_slice(s, &mut key)?;
        Ok(Self(key))
    }
}

/// CLI config for the sharding of a logical queue.
///
/// Every process publishing to or consuming from the same logical queue must use the same shard
/// count, separator and seed key.
#[derive(Debug, Clone, clap::Parser)]
pub struct ShardingConfig {
    /// Number of physical queues backing each logical queue.
    #[clap(
        long = "shard-count",
        env = "SHARDQ_SHARD_COUNT",
        default_value = "4",
        action
    )]
    pub shard_count: usize,

    /// Delimiter between a logical queue name or routing key and the shard index.
    ///
    /// Must be non-empty and must not contain digits.
    #[clap(
        long = "shard-separator",
        env = "SHARDQ_SHARD_SEPARATOR",
        default_value = ShardLayout::DEFAULT_SEPARATOR,
        action
    )]
    pub separator: String,

    /// Seed key for the sequence key hash, as 32 hex characters.
    ///
    /// Changing it changes which shard every key maps to.
    #[clap(long = "shard-seed-key", env = "SHARDQ_SHARD_SEED_KEY", action)]
    pub seed_key: Option<SeedKey>,

    /// Encoding of message bodies.
    #[clap(
        long = "codec",
        env = "SHARDQ_CODEC",
        default_value_t = CodecKind::default(),
        value_enum,
        action
    )]
    pub codec: CodecKind,
}

impl ShardingConfig {
    /// Build the [`ShardedQueue`] this config describes.
    pub fn build(&self) -> Result<ShardedQueue, shardq::Error> {
        let queue = ShardedQueue::new(self.shard_count)?
            .with_separator(self.separator.as_str())?
            .with_codec(self.codec.codec());

        Ok(match &self.seed_key {
            Some(key) => queue.with_seed_key(key.as_bytes()),
            None => queue,
        })
    }
}
