use std::{borrow::Cow, sync::Arc};

use observability_deps::tracing::{debug, trace, warn};
use shardq_broker::{BasicProperties, BrokerChannel, FieldTable, QueueDeclareOptions};
use shardq_codec::{JsonCodec, MessageCodec};
use shardq_sharder::{JumpHash, RandomShard, ShardSelector};
use shardq_types::{DeliveryHandle, Message, SequenceKey};

use crate::{Error, Result, ShardLayout};

/// A logical queue backed by a fixed number of physical queues.
///
/// A [`ShardedQueue`] is configuration only: it holds no channel and no per-call state, so one
/// instance can be shared by any number of tasks, each using its own [`BrokerChannel`].
///
/// Calls against a channel are made one at a time, in shard index order for
/// [`declare`](Self::declare) and [`bind`](Self::bind), and in scan order for
/// [`pull_one`](Self::pull_one). No call is retried.
#[derive(Debug, Clone)]
pub struct ShardedQueue {
    layout: ShardLayout,
    hasher: JumpHash,
    /// Picks the first shard a pull tries.
    scan_start: Arc<dyn ShardSelector>,
    codec: Arc<dyn MessageCodec>,
}

impl ShardedQueue {
    /// A sharded queue of `shard_count` physical queues, using the default separator,
    /// [`JsonCodec`] and a random pull scan start.
    pub fn new(shard_count: usize) -> Result<Self> {
        Ok(Self::from_layout(ShardLayout::new(shard_count)?))
    }

    pub fn from_layout(layout: ShardLayout) -> Self {
        Self {
            layout,
            hasher: JumpHash::new(),
            scan_start: Arc::new(RandomShard),
            codec: Arc::new(JsonCodec),
        }
    }

    /// See [`ShardLayout::with_separator`].
    pub fn with_separator(self, separator: impl Into<String>) -> Result<Self> {
        Ok(Self {
            layout: self.layout.with_separator(separator)?,
            ..self
        })
    }

    /// Re-key the publish hash. Every publisher of a logical queue must use the same key.
    pub fn with_seed_key(self, key: &[u8; 16]) -> Self {
        Self {
            hasher: self.hasher.with_seed_key(key),
            ..self
        }
    }

    pub fn with_codec(self, codec: Arc<dyn MessageCodec>) -> Self {
        Self { codec, ..self }
    }

    /// Replace the selector picking the first shard of a pull scan.
    pub fn with_scan_start(self, scan_start: Arc<dyn ShardSelector>) -> Self {
        Self { scan_start, ..self }
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    pub fn shard_count(&self) -> usize {
        self.layout.shard_count()
    }

    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    /// The shard messages with `key` are published to.
    pub fn shard_for(&self, key: &SequenceKey) -> Result<usize> {
        Ok(self.hasher.select_index(key, self.shard_count())?)
    }

    /// Declare every physical queue of `logical_name` with `options`.
    ///
    /// Stops at the first failing shard; the shards before it stay declared.
    pub async fn declare<C>(
        &self,
        channel: &C,
        logical_name: &str,
        options: &QueueDeclareOptions,
    ) -> Result<()>
    where
        C: BrokerChannel + ?Sized,
    {
        for (shard_index, queue) in self.layout.physical_names(logical_name).enumerate() {
            trace!(shard_index, %queue, "declaring shard queue");
            if let Err(source) = channel.declare_queue(&queue, options).await {
                warn!(
                    shard_index,
                    %queue,
                    error = %source,
                    "shard queue declaration failed, earlier shards remain declared"
                );
                return Err(Error::Declare {
                    shard_index,
                    queue,
                    source,
                });
            }
        }

        debug!(
            logical_name,
            shard_count = self.shard_count(),
            durable = options.durable,
            "declared sharded queue"
        );
        Ok(())
    }

    /// Bind every physical queue of `logical_name` to `exchange`, shard `i` under the physical
    /// routing key `i` of `routing_key`.
    ///
    /// Stops at the first failing shard; the shards before it stay bound.
    pub async fn bind<C>(
        &self,
        channel: &C,
        logical_name: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> Result<()>
    where
        C: BrokerChannel + ?Sized,
    {
        let shards = self
            .layout
            .physical_names(logical_name)
            .zip(self.layout.physical_names(routing_key))
            .enumerate();

        for (shard_index, (queue, key)) in shards {
            trace!(shard_index, %queue, routing_key = %key, exchange, "binding shard queue");
            if let Err(source) = channel.bind_queue(&queue, exchange, &key, arguments).await {
                warn!(
                    shard_index,
                    %queue,
                    error = %source,
                    "shard queue binding failed, earlier shards remain bound"
                );
                return Err(Error::Bind {
                    shard_index,
                    queue,
                    routing_key: key,
                    source,
                });
            }
        }

        debug!(
            logical_name,
            exchange,
            routing_key,
            shard_count = self.shard_count(),
            "bound sharded queue"
        );
        Ok(())
    }

    /// Publish `message` to the shard of `routing_key` its sequence key hashes to, returning the
    /// shard index.
    ///
    /// Messages with the same sequence key always go to the same shard for a fixed shard count.
    /// If `properties` has no content type, the codec's is used.
    pub async fn publish<C>(
        &self,
        channel: &C,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        properties: &BasicProperties,
        message: &Message,
    ) -> Result<usize>
    where
        C: BrokerChannel + ?Sized,
    {
        let shard_index = self.shard_for(message.sequence_key())?;
        let physical_key = self.layout.physical_name(routing_key, shard_index);

        let body = self
            .codec
            .encode(message)
            .map_err(|source| Error::Encode {
                shard_index,
                source,
            })?;

        let properties = match properties.content_type {
            Some(_) => Cow::Borrowed(properties),
            None => Cow::Owned(
                properties
                    .clone()
                    .with_content_type(self.codec.content_type()),
            ),
        };

        trace!(
            shard_index,
            routing_key = %physical_key,
            exchange,
            sequence_key = %message.sequence_key(),
            size = body.len(),
            "publishing message"
        );

        channel
            .publish(exchange, &physical_key, mandatory, &properties, body)
            .await
            .map_err(|source| Error::Publish {
                shard_index,
                routing_key: physical_key,
                source,
            })?;

        Ok(shard_index)
    }

    /// Take one message from any shard of `logical_name`, without waiting.
    ///
    /// The scan starts at a shard picked by the scan-start selector (random by default) and
    /// continues through the following shards, wrapping around, until one returns a message.
    /// Returns `Ok(None)` once every shard has been found empty. Each shard is fetched at most
    /// once.
    ///
    /// A fetch error ends the scan immediately; later shards are not tried. A scan-start selector
    /// returning an index outside `[0, shard_count)` fails with [`Error::InvalidConfiguration`]
    /// before any fetch.
    pub async fn pull_one<C>(
        &self,
        channel: &C,
        logical_name: &str,
        auto_ack: bool,
    ) -> Result<Option<Message>>
    where
        C: BrokerChannel + ?Sized,
    {
        let shard_count = self.shard_count();
        let start = self
            .scan_start
            .select_index(&SequenceKey::Int(0), shard_count)?;
        if start >= shard_count {
            return Err(Error::InvalidConfiguration {
                reason: format!("scan start {start} out of range for {shard_count} shards"),
            });
        }

        for shard_index in scan_order(start, shard_count) {
            let queue = self.layout.physical_name(logical_name, shard_index);

            let response = match channel.fetch_one(&queue, auto_ack).await {
                Ok(Some(response)) => response,
                Ok(None) => {
                    trace!(shard_index, %queue, "shard empty");
                    continue;
                }
                Err(source) => {
                    warn!(shard_index, %queue, error = %source, "fetch failed, aborting scan");
                    return Err(Error::Fetch {
                        shard_index,
                        queue,
                        source,
                    });
                }
            };

            let delivery_tag = response.delivery_tag;
            let message = match self.codec.decode(&response.body) {
                Ok(message) => message,
                Err(source) => {
                    return Err(Error::Decode {
                        shard_index,
                        queue,
                        delivery_tag,
                        source,
                    });
                }
            };

            debug!(
                shard_index,
                %queue,
                delivery_tag,
                scan_start = start,
                remaining = response.message_count,
                "pulled message"
            );
            return Ok(Some(
                message.into_delivered(DeliveryHandle::new(delivery_tag, queue)),
            ));
        }

        trace!(logical_name, shard_count, "all shards empty");
        Ok(None)
    }
}

/// Shard indexes in the order a pull scan starting at `start` visits them.
fn scan_order(start: usize, shard_count: usize) -> impl Iterator<Item = usize> {
    (0..shard_count).map(move |i| (start + i) % shard_count)
}
