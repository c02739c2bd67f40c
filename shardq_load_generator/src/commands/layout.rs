use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use shardq::{SequenceKey, ShardedQueue};
use shardq_clap_blocks::ShardingConfig;

#[derive(Debug, Parser)]
#[clap(visible_alias = "l")]
pub(crate) struct Config {
    #[clap(flatten)]
    sharding: ShardingConfig,

    /// Logical queue name
    #[clap(long = "queue", env = "SHARDQ_LOAD_QUEUE", default_value = "load")]
    queue: String,

    /// Logical routing key, defaults to the queue name
    #[clap(long = "routing-key", env = "SHARDQ_LOAD_ROUTING_KEY")]
    routing_key: Option<String>,

    /// Sequence key to locate; values that parse as a 64 bit integer are integer keys
    #[clap(long = "key", action = clap::ArgAction::Append)]
    keys: Vec<String>,

    /// Physical queue name to map back to its logical queue and shard
    #[clap(long = "physical", action = clap::ArgAction::Append)]
    physical: Vec<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct ShardEntry {
    pub(crate) index: usize,
    pub(crate) queue: String,
    pub(crate) routing_key: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct KeyEntry {
    pub(crate) key: String,
    pub(crate) kind: &'static str,
    pub(crate) shard: usize,
    pub(crate) queue: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct PhysicalEntry {
    pub(crate) name: String,
    /// `None` if the name is not a shard of any logical queue in this layout.
    pub(crate) logical_name: Option<String>,
    pub(crate) shard: Option<usize>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct LayoutReport {
    pub(crate) shard_count: usize,
    pub(crate) separator: String,
    pub(crate) shards: Vec<ShardEntry>,
    pub(crate) keys: Vec<KeyEntry>,
    pub(crate) physical: Vec<PhysicalEntry>,
}

pub(crate) fn command(config: Config) -> Result<(), anyhow::Error> {
    let queue = config
        .sharding
        .build()
        .context("invalid sharding configuration")?;
    let routing_key = config.routing_key.as_deref().unwrap_or(&config.queue);

    let report = describe(
        &queue,
        &config.queue,
        routing_key,
        &config.keys,
        &config.physical,
    )?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_key(raw: &str) -> SequenceKey {
    raw.parse::<i64>()
        .map(SequenceKey::Int)
        .unwrap_or_else(|_| SequenceKey::Str(raw.to_owned()))
}

pub(crate) fn describe(
    queue: &ShardedQueue,
    logical_name: &str,
    routing_key: &str,
    keys: &[String],
    physical: &[String],
) -> Result<LayoutReport, anyhow::Error> {
    let layout = queue.layout();

    let shards = layout
        .physical_names(logical_name)
        .zip(layout.physical_names(routing_key))
        .enumerate()
        .map(|(index, (queue, routing_key))| ShardEntry {
            index,
            queue,
            routing_key,
        })
        .collect();

    let keys = keys
        .iter()
        .map(|raw| {
            let key = parse_key(raw);
            let shard = queue.shard_for(&key)?;
            Ok(KeyEntry {
                kind: match key {
                    SequenceKey::Int(_) => "int",
                    SequenceKey::Str(_) => "str",
                },
                key: key.to_string(),
                shard,
                queue: layout.physical_name(logical_name, shard),
            })
        })
        .collect::<Result<_, shardq::Error>>()?;

    let physical = physical
        .iter()
        .map(|name| {
            let parsed = layout.parse_physical_name(name);
            PhysicalEntry {
                name: name.clone(),
                logical_name: parsed.map(|(base, _)| base.to_owned()),
                shard: parsed.map(|(_, index)| index),
            }
        })
        .collect();

    Ok(LayoutReport {
        shard_count: layout.shard_count(),
        separator: layout.separator().to_owned(),
        shards,
        keys,
        physical,
    })
}
