use std::{
    collections::{BTreeMap, HashMap},
    time::Instant,
};

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use observability_deps::tracing::{debug, info};
use rand::Rng;
use serde::Serialize;
use shardq::{
    BasicProperties, BrokerChannel, FieldTable, Message, QueueDeclareOptions, ShardedQueue,
};
use shardq_broker::memory::{MemoryBroker, MemoryChannel};
use shardq_clap_blocks::ShardingConfig;

#[derive(Debug, Parser)]
#[clap(visible_alias = "r")]
pub(crate) struct Config {
    #[clap(flatten)]
    sharding: ShardingConfig,

    #[clap(flatten)]
    workload: WorkloadConfig,
}

#[derive(Debug, Clone, Parser)]
pub(crate) struct WorkloadConfig {
    /// Logical queue to declare and load
    #[clap(long = "queue", env = "SHARDQ_LOAD_QUEUE", default_value = "load")]
    pub(crate) queue: String,

    /// Exchange the logical queue is bound to
    #[clap(
        long = "exchange",
        env = "SHARDQ_LOAD_EXCHANGE",
        default_value = "shardq.load"
    )]
    pub(crate) exchange: String,

    /// Logical routing key messages are published with
    #[clap(
        long = "routing-key",
        env = "SHARDQ_LOAD_ROUTING_KEY",
        default_value = "load"
    )]
    pub(crate) routing_key: String,

    /// Total number of messages to publish
    #[clap(
        short = 'n',
        long = "messages",
        env = "SHARDQ_LOAD_MESSAGES",
        default_value = "10000"
    )]
    pub(crate) messages: u64,

    /// Number of distinct sequence keys messages are spread over
    #[clap(
        short = 'k',
        long = "keys",
        env = "SHARDQ_LOAD_KEYS",
        default_value = "32"
    )]
    pub(crate) keys: u64,

    /// Probability of pulling one message after each publish, between 0 and 1.
    ///
    /// Whatever is left once publishing finishes is drained.
    #[clap(
        long = "consume-ratio",
        env = "SHARDQ_LOAD_CONSUME_RATIO",
        default_value = "0"
    )]
    pub(crate) consume_ratio: f64,

    /// Pull with manual acknowledgement, acking each message after it is checked
    #[clap(long = "manual-ack", default_value_t = false)]
    pub(crate) manual_ack: bool,
}

/// Outcome of a load run, printed as JSON.
#[derive(Debug, Serialize)]
pub(crate) struct RunReport {
    pub(crate) queue: String,
    pub(crate) shard_count: usize,
    pub(crate) content_type: String,
    pub(crate) published: u64,
    pub(crate) consumed: u64,
    pub(crate) elapsed_ms: u64,
    pub(crate) published_per_shard: Vec<u64>,
    pub(crate) consumed_per_shard: Vec<u64>,
    /// Pulls made while publishing was still in progress.
    pub(crate) interleaved_pulls: u64,
    pub(crate) order_preserved: bool,
    /// Keys whose messages were consumed out of publish order.
    pub(crate) out_of_order_keys: Vec<String>,
}

pub(crate) async fn command(config: Config) -> Result<(), anyhow::Error> {
    let queue = config
        .sharding
        .build()
        .context("invalid sharding configuration")?;

    let report = execute(&queue, &config.workload).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.order_preserved {
        bail!(
            "per-key order violated for {} keys",
            report.out_of_order_keys.len()
        );
    }
    Ok(())
}

/// Tracks the per-shard counts and per-key ordering of consumed messages.
#[derive(Debug)]
struct Consumer {
    per_shard: Vec<u64>,
    /// Last sequence number seen per key.
    last_seen: BTreeMap<String, u64>,
    out_of_order: BTreeMap<String, u64>,
    manual_ack: bool,
}

impl Consumer {
    fn new(shard_count: usize, manual_ack: bool) -> Self {
        Self {
            per_shard: vec![0; shard_count],
            last_seen: BTreeMap::new(),
            out_of_order: BTreeMap::new(),
            manual_ack,
        }
    }

    /// Pull and check one message, returning false once every shard is empty.
    async fn pull(
        &mut self,
        queue: &ShardedQueue,
        channel: &MemoryChannel,
        logical_name: &str,
    ) -> Result<bool, anyhow::Error> {
        let Some(message) = queue.pull_one(channel, logical_name, !self.manual_ack).await? else {
            return Ok(false);
        };
        let handle = message
            .delivery_handle()
            .context("pulled message has no delivery handle")?;

        let (_, shard) = queue
            .layout()
            .parse_physical_name(handle.source())
            .with_context(|| format!("message from unknown queue {}", handle.source()))?;
        self.per_shard[shard] += 1;

        if self.manual_ack {
            channel
                .ack(handle.delivery_tag())
                .await
                .map_err(|e| anyhow!("ack of {handle} failed: {e}"))?;
        }

        let seq: u64 = std::str::from_utf8(message.payload())
            .ok()
            .and_then(|s| s.parse().ok())
            .context("payload is not a sequence number")?;
        let key = message.sequence_key().to_string();
        let expected = self.last_seen.get(&key).map_or(0, |last| last + 1);
        if seq != expected {
            *self.out_of_order.entry(key.clone()).or_default() += 1;
        }
        self.last_seen.insert(key, seq);

        Ok(true)
    }
}

/// Declare and bind the logical queue on a fresh in-memory broker, then publish and consume the
/// configured workload through `queue`.
pub(crate) async fn execute(
    queue: &ShardedQueue,
    workload: &WorkloadConfig,
) -> Result<RunReport, anyhow::Error> {
    if !(0.0..=1.0).contains(&workload.consume_ratio) {
        bail!(
            "consume ratio must be between 0 and 1, got {}",
            workload.consume_ratio
        );
    }
    if workload.keys == 0 {
        bail!("at least one sequence key is required");
    }

    let broker = MemoryBroker::new();
    let channel = broker.channel();

    queue
        .declare(&channel, &workload.queue, &QueueDeclareOptions::durable())
        .await?;
    queue
        .bind(
            &channel,
            &workload.queue,
            &workload.exchange,
            &workload.routing_key,
            &FieldTable::new(),
        )
        .await?;
    info!(
        queue = %workload.queue,
        shard_count = queue.shard_count(),
        messages = workload.messages,
        keys = workload.keys,
        "starting load run"
    );

    let start = Instant::now();
    let mut published_per_shard = vec![0_u64; queue.shard_count()];
    // Next sequence number per key, for the keys drawn so far.
    let mut next_seq: HashMap<u64, u64> = HashMap::new();
    let mut consumer = Consumer::new(queue.shard_count(), workload.manual_ack);
    let mut interleaved_pulls = 0;
    let properties = BasicProperties::default();

    for _ in 0..workload.messages {
        let (key, seq) = {
            let mut rng = rand::thread_rng();
            let key = rng.gen_range(0..workload.keys);
            let next = next_seq.entry(key).or_default();
            let seq = *next;
            *next += 1;
            (key, seq)
        };

        let message = Message::new(format!("key-{key}"), seq.to_string());
        let shard = queue
            .publish(
                &channel,
                &workload.exchange,
                &workload.routing_key,
                false,
                &properties,
                &message,
            )
            .await?;
        published_per_shard[shard] += 1;

        let consume = rand::thread_rng().gen_bool(workload.consume_ratio);
        if consume {
            interleaved_pulls += 1;
            consumer.pull(queue, &channel, &workload.queue).await?;
        }
    }
    debug!(interleaved_pulls, "publishing finished, draining");

    while consumer.pull(queue, &channel, &workload.queue).await? {}

    let consumed = consumer.per_shard.iter().sum();
    let report = RunReport {
        queue: workload.queue.clone(),
        shard_count: queue.shard_count(),
        content_type: queue.codec().content_type().to_owned(),
        published: workload.messages,
        consumed,
        elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        published_per_shard,
        consumed_per_shard: consumer.per_shard,
        interleaved_pulls,
        order_preserved: consumer.out_of_order.is_empty(),
        out_of_order_keys: consumer.out_of_order.into_keys().collect(),
    };
    info!(
        consumed = report.consumed,
        elapsed_ms = report.elapsed_ms,
        order_preserved = report.order_preserved,
        "load run finished"
    );
    Ok(report)
}
