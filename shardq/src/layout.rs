//! Mapping between logical names and the physical queue names and routing keys backing them.
use crate::{Error, Result};

/// The shard count and separator of a sharded logical queue, and the naming scheme derived from
/// them.
///
/// For shard `i` of a logical queue `orders` with separator `_`, the physical queue is `orders_i`;
/// a logical routing key `orders.created` maps to `orders.created_i`. The mapping is pure and
/// recomputed on every use. It is also persisted as broker state, so changing either the shard
/// count or the separator of an existing deployment strands messages in the old physical queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    shard_count: usize,
    separator: String,
}

impl ShardLayout {
    pub const DEFAULT_SEPARATOR: &'static str = "_";

    /// A layout of `shard_count` shards joined with [`Self::DEFAULT_SEPARATOR`].
    pub fn new(shard_count: usize) -> Result<Self> {
        if shard_count == 0 {
            return Err(Error::InvalidConfiguration {
                reason: "shard count must be at least 1".to_owned(),
            });
        }
        Ok(Self {
            shard_count,
            separator: Self::DEFAULT_SEPARATOR.to_owned(),
        })
    }

    /// Join names and shard indexes with `separator`.
    ///
    /// The separator must be non-empty and must not contain an ASCII digit, otherwise two
    /// different (name, index) pairs could produce the same physical name.
    pub fn with_separator(self, separator: impl Into<String>) -> Result<Self> {
        let separator = separator.into();
        if separator.is_empty() {
            return Err(Error::InvalidConfiguration {
                reason: "shard separator must not be empty".to_owned(),
            });
        }
        if separator.chars().any(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidConfiguration {
                reason: format!("shard separator {separator:?} must not contain digits"),
            });
        }
        Ok(Self { separator, ..self })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// The physical name of shard `shard_index` of the logical queue or routing key `base`.
    pub fn physical_name(&self, base: &str, shard_index: usize) -> String {
        debug_assert!(shard_index < self.shard_count);
        format!("{base}{}{shard_index}", self.separator)
    }

    /// All physical names for `base`, in shard index order.
    pub fn physical_names<'a>(&'a self, base: &'a str) -> impl Iterator<Item = String> + 'a {
        (0..self.shard_count).map(move |i| self.physical_name(base, i))
    }

    /// Split a physical name back into its logical name and shard index.
    ///
    /// Returns `None` if `name` was not produced by [`Self::physical_name`] for this layout.
    pub fn parse_physical_name<'a>(&self, name: &'a str) -> Option<(&'a str, usize)> {
        let (base, index) = name.rsplit_once(self.separator.as_str())?;

        let canonical = index == "0" || !index.starts_with('0');
        if index.is_empty() || !canonical || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let index = index.parse::<usize>().ok()?;
        (index < self.shard_count).then_some((base, index))
    }
}
