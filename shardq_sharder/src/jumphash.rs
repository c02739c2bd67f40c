use std::hash::Hasher;

use shardq_types::SequenceKey;
use siphasher::sip::SipHasher13;

use crate::{Result, ShardSelector, ensure_shards};

/// The default siphash key, shared by every publisher so that all of them hash the same input to
/// the same `u64`.
///
/// Generated with: xxd -i -l 16 /dev/urandom
const DEFAULT_SEED_KEY: [u8; 16] = [
    0x6d, 0x83, 0x93, 0x52, 0xa3, 0x7c, 0xe6, 0x02, 0xac, 0x01, 0x11, 0x94, 0x79, 0x0c, 0x64, 0x42,
];

/// A [`JumpHash`] maps a [`SequenceKey`] consistently to the same shard index with near perfect
/// distribution.
///
/// Different instances of a [`JumpHash`] using the same seed key will always map the same key to
/// the same index for a given shard count, in any process on any host. Keys are hashed from a
/// fixed byte encoding rather than their in-memory representation, so the mapping does not depend
/// on platform endianness.
///
/// Lookup is `O(ln N)` and uses Google's [jump hash] internally. Growing the shard count from `N`
/// to `N + 1` moves approximately `1/(N + 1)` of the keys, all of them to the new shard.
///
/// [jump hash]: https://arxiv.org/ftp/arxiv/papers/1406/1406.2294.pdf
#[derive(Debug, Clone, Copy)]
pub struct JumpHash {
    hasher: SipHasher13,
}

impl Default for JumpHash {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpHash {
    pub fn new() -> Self {
        Self {
            hasher: SipHasher13::new_with_key(&DEFAULT_SEED_KEY),
        }
    }

    /// Reinitialise [`Self`] with a new key.
    ///
    /// Re-keying [`Self`] changes the mapping of keys to shard indexes; every publisher of a
    /// logical queue must use the same key.
    pub fn with_seed_key(self, key: &[u8; 16]) -> Self {
        Self {
            hasher: SipHasher13::new_with_key(key),
        }
    }

    fn hash_key(&self, key: &SequenceKey) -> u64 {
        let mut state = self.hasher;
        match key {
            SequenceKey::Int(v) => {
                state.write(&[0x01]);
                state.write(&v.to_le_bytes());
            }
            SequenceKey::Str(s) => {
                state.write(&[0x02]);
                state.write(s.as_bytes());
                // Terminate the string so that no key is a prefix of another.
                state.write(&[0xff]);
            }
        }
        state.finish()
    }
}

/// Reduce `key` to a bucket in `[0, buckets)`.
fn jump_consistent_hash(mut key: u64, buckets: usize) -> usize {
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < buckets as i64 {
        b = j;
        key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
        j = ((b.wrapping_add(1) as f64) * (((1u64 << 31) as f64) / (((key >> 33) + 1) as f64)))
            as i64
    }

    assert!(b >= 0, "jump hash over zero buckets");
    b as usize
}

impl ShardSelector for JumpHash {
    fn select_index(&self, key: &SequenceKey, shard_count: usize) -> Result<usize> {
        ensure_shards(shard_count)?;
        Ok(jump_consistent_hash(self.hash_key(key), shard_count))
    }
}
