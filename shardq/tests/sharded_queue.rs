use std::{collections::BTreeMap, sync::Arc};

use assert_matches::assert_matches;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use shardq::{
    BasicProperties, BitcodeCodec, BrokerChannel, Error, FieldTable, JsonCodec, Message,
    MessageCodec, QueueDeclareOptions, SequenceKey, ShardedQueue,
};
use shardq_broker::memory::{BrokerCall, FaultOp, MemoryBroker};
use shardq_sharder::mock::MockSelector;

const EXCHANGE: &str = "events";

fn fixed_start(queue: ShardedQueue, starts: impl Into<Vec<usize>>) -> ShardedQueue {
    let starts: Vec<usize> = starts.into();
    queue.with_scan_start(Arc::new(MockSelector::default().with_return(starts)))
}

/// A broker with `orders` declared and bound to [`EXCHANGE`] under `orders`.
async fn setup(queue: &ShardedQueue) -> MemoryBroker {
    let broker = MemoryBroker::with_call_log();
    let ch = broker.channel();
    queue
        .declare(&ch, "orders", &QueueDeclareOptions::durable())
        .await
        .unwrap();
    queue
        .bind(&ch, "orders", EXCHANGE, "orders", &FieldTable::new())
        .await
        .unwrap();
    broker
}

fn fetched_queues(broker: &MemoryBroker) -> Vec<String> {
    broker
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            BrokerCall::FetchOne { queue, .. } => Some(queue),
            _ => None,
        })
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_declare_all_shards_in_order() {
    let queue = ShardedQueue::new(3).unwrap();
    let broker = MemoryBroker::with_call_log();
    let opts = QueueDeclareOptions::durable().with_argument("x-max-length", 1000_i64);

    queue.declare(&broker.channel(), "orders", &opts).await.unwrap();

    let want = ["orders_0", "orders_1", "orders_2"]
        .map(|q| BrokerCall::DeclareQueue {
            queue: q.to_owned(),
            options: opts.clone(),
        })
        .to_vec();
    assert_eq!(broker.calls(), want);
    for q in ["orders_0", "orders_1", "orders_2"] {
        assert_eq!(broker.queue_options(q), Some(opts.clone()));
    }

    // Declaring again with the same options is accepted.
    queue.declare(&broker.channel(), "orders", &opts).await.unwrap();
    assert_eq!(broker.queue_names().len(), 3);
}

#[test_log::test(tokio::test)]
async fn test_declare_stops_at_first_failure() {
    let queue = ShardedQueue::new(4).unwrap();
    let broker = MemoryBroker::with_call_log();
    broker.fail_next(FaultOp::DeclareQueue, "orders_2", "access refused");

    let err = queue
        .declare(&broker.channel(), "orders", &QueueDeclareOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.shard_index(), Some(2));
    assert_matches!(&err, Error::Declare { shard_index: 2, queue, source } => {
        assert_eq!(queue, "orders_2");
        assert!(source.to_string().contains("access refused"));
    });

    // Earlier shards remain declared, later ones were never attempted.
    assert_eq!(broker.queue_names(), ["orders_0", "orders_1"]);
    assert!(
        broker
            .calls()
            .iter()
            .all(|c| c.queue() != Some("orders_3"))
    );
}

#[test_log::test(tokio::test)]
async fn test_bind_all_shards() {
    let queue = ShardedQueue::new(3).unwrap();
    let broker = setup(&queue).await;

    for i in 0..3 {
        assert_eq!(
            broker.bindings(EXCHANGE, &format!("orders_{i}")),
            [format!("orders_{i}")]
        );
    }

    let binds = broker
        .calls()
        .into_iter()
        .filter(|c| matches!(c, BrokerCall::BindQueue { .. }))
        .collect::<Vec<_>>();
    assert_eq!(
        binds,
        (0..3)
            .map(|i| BrokerCall::BindQueue {
                queue: format!("orders_{i}"),
                exchange: EXCHANGE.to_owned(),
                routing_key: format!("orders_{i}"),
            })
            .collect::<Vec<_>>()
    );
}

#[test_log::test(tokio::test)]
async fn test_bind_distinct_routing_key() {
    let queue = ShardedQueue::new(2)
        .unwrap()
        .with_separator(".s")
        .unwrap();
    let broker = MemoryBroker::with_call_log();
    let ch = broker.channel();

    queue
        .declare(&ch, "billing", &QueueDeclareOptions::default())
        .await
        .unwrap();
    queue
        .bind(&ch, "billing", EXCHANGE, "invoice.created", &FieldTable::new())
        .await
        .unwrap();

    assert_eq!(broker.bindings(EXCHANGE, "billing.s0"), ["invoice.created.s0"]);
    assert_eq!(broker.bindings(EXCHANGE, "billing.s1"), ["invoice.created.s1"]);
}

#[test_log::test(tokio::test)]
async fn test_bind_partial_failure() {
    let queue = ShardedQueue::new(3).unwrap();
    let broker = MemoryBroker::with_call_log();
    let ch = broker.channel();
    queue
        .declare(&ch, "orders", &QueueDeclareOptions::default())
        .await
        .unwrap();
    broker.fail_next(FaultOp::BindQueue, "orders_1", "channel closed");

    let err = queue
        .bind(&ch, "orders", EXCHANGE, "orders", &FieldTable::new())
        .await
        .unwrap_err();
    assert_matches!(err, Error::Bind { shard_index: 1, queue, routing_key, .. } => {
        assert_eq!(queue, "orders_1");
        assert_eq!(routing_key, "orders_1");
    });

    assert_eq!(broker.bindings(EXCHANGE, "orders_0"), ["orders_0"]);
    assert!(broker.bindings(EXCHANGE, "orders_1").is_empty());
    assert!(broker.bindings(EXCHANGE, "orders_2").is_empty());
}

#[test_log::test(tokio::test)]
async fn test_bind_undeclared_queue() {
    let queue = ShardedQueue::new(2).unwrap();
    let broker = MemoryBroker::with_call_log();

    let err = queue
        .bind(&broker.channel(), "orders", EXCHANGE, "orders", &FieldTable::new())
        .await
        .unwrap_err();
    assert_matches!(err, Error::Bind { shard_index: 0, .. });
}

#[test_log::test(tokio::test)]
async fn test_publish_routes_by_sequence_key() {
    let queue = ShardedQueue::new(4).unwrap();
    let broker = setup(&queue).await;
    let ch = broker.channel();

    for i in 0..5 {
        let shard = queue
            .publish(
                &ch,
                EXCHANGE,
                "orders",
                false,
                &BasicProperties::default(),
                &Message::new(42, format!("m{i}")),
            )
            .await
            .unwrap();
        assert_eq!(shard, 2);
    }
    assert_eq!(queue.shard_for(&SequenceKey::from(42)).unwrap(), 2);

    assert_eq!(broker.queue_depth("orders_0"), Some(0));
    assert_eq!(broker.queue_depth("orders_1"), Some(0));
    assert_eq!(broker.queue_depth("orders_2"), Some(5));
    assert_eq!(broker.queue_depth("orders_3"), Some(0));

    // Other keys land on their own shards.
    let mut placed = BTreeMap::new();
    for key in [SequenceKey::from(4242), SequenceKey::from(-1), SequenceKey::from("bananas")] {
        let shard = queue
            .publish(
                &ch,
                EXCHANGE,
                "orders",
                false,
                &BasicProperties::default(),
                &Message::new(key.clone(), "x"),
            )
            .await
            .unwrap();
        placed.insert(key.to_string(), shard);
    }
    assert_eq!(
        placed,
        BTreeMap::from([
            ("-1".to_owned(), 3),
            ("4242".to_owned(), 1),
            ("bananas".to_owned(), 0),
        ])
    );
}

#[test_log::test(tokio::test)]
async fn test_publish_failure_names_shard() {
    let queue = ShardedQueue::new(4).unwrap();
    let broker = setup(&queue).await;
    broker.fail_next(FaultOp::Publish, "orders_2", "connection blocked");

    let err = queue
        .publish(
            &broker.channel(),
            EXCHANGE,
            "orders",
            false,
            &BasicProperties::default(),
            &Message::new(42, "lost"),
        )
        .await
        .unwrap_err();

    assert_matches!(err, Error::Publish { shard_index: 2, routing_key, .. } => {
        assert_eq!(routing_key, "orders_2");
    });
    assert_eq!(broker.queue_depth("orders_2"), Some(0));
}

/// A codec whose encoding always fails.
#[derive(Debug)]
struct BrokenCodec;

impl MessageCodec for BrokenCodec {
    fn content_type(&self) -> &'static str {
        "application/x-broken"
    }

    fn encode(&self, _message: &Message) -> Result<Bytes, shardq_codec::Error> {
        Err(shardq_codec::Error::Io(std::io::Error::other("encoder unavailable")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, shardq_codec::Error> {
        JsonCodec.decode(bytes)
    }
}

#[test_log::test(tokio::test)]
async fn test_publish_encode_failure() {
    let queue = ShardedQueue::new(4)
        .unwrap()
        .with_codec(Arc::new(BrokenCodec));
    let broker = setup(&queue).await;

    let err = queue
        .publish(
            &broker.channel(),
            EXCHANGE,
            "orders",
            false,
            &BasicProperties::default(),
            &Message::new(42, "never sent"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.shard_index(), Some(2));
    assert_matches!(err, Error::Encode { shard_index: 2, source } => {
        assert!(source.to_string().contains("encoder unavailable"));
    });
    assert!(
        !broker
            .calls()
            .iter()
            .any(|c| matches!(c, BrokerCall::Publish { .. }))
    );
    assert_eq!(broker.queue_depth("orders_2"), Some(0));
}

#[test_log::test(tokio::test)]
async fn test_publish_unroutable_mandatory() {
    let queue = ShardedQueue::new(4).unwrap();
    let broker = MemoryBroker::with_call_log();

    let shard = queue
        .publish(
            &broker.channel(),
            EXCHANGE,
            "orders",
            true,
            &BasicProperties::default(),
            &Message::new(42, "nowhere"),
        )
        .await
        .unwrap();

    let returned = broker.returned_messages();
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].routing_key, format!("orders_{shard}"));
}

#[test_log::test(tokio::test)]
async fn test_publish_content_type() {
    let queue = ShardedQueue::new(1)
        .unwrap()
        .with_codec(Arc::new(BitcodeCodec));
    let broker = setup(&queue).await;
    let ch = broker.channel();

    for props in [
        BasicProperties::default(),
        BasicProperties::default().with_content_type("text/plain"),
    ] {
        queue
            .publish(&ch, EXCHANGE, "orders", false, &props, &Message::new(1, "x"))
            .await
            .unwrap();
    }

    let first = ch.fetch_one("orders_0", true).await.unwrap().unwrap();
    assert_eq!(
        first.properties.content_type.as_deref(),
        Some(BitcodeCodec.content_type())
    );
    let second = ch.fetch_one("orders_0", true).await.unwrap().unwrap();
    assert_eq!(second.properties.content_type.as_deref(), Some("text/plain"));
}

#[test_log::test(tokio::test)]
async fn test_pull_finds_message_from_any_start() {
    let body = JsonCodec.encode(&Message::new(7, "only")).unwrap();

    for start in 0..3 {
        let queue = fixed_start(ShardedQueue::new(3).unwrap(), [start]);
        let broker = setup(&queue).await;
        let ch = broker.channel();
        ch.publish("", "orders_2", false, &BasicProperties::default(), body.clone())
            .await
            .unwrap();

        let msg = queue.pull_one(&ch, "orders", true).await.unwrap().unwrap();
        assert_eq!(msg.payload(), b"only");
        assert_eq!(msg.sequence_key(), &SequenceKey::Int(7));
        assert_eq!(msg.delivery_handle().unwrap().source(), "orders_2");

        // The scan stops at the shard holding the message.
        let want = (0..3)
            .map(|i| (start + i) % 3)
            .take_while(|&i| i != 2)
            .chain([2])
            .map(|i| format!("orders_{i}"))
            .collect::<Vec<_>>();
        assert_eq!(fetched_queues(&broker), want);
    }
}

#[test_log::test(tokio::test)]
async fn test_pull_all_empty() {
    let queue = fixed_start(ShardedQueue::new(4).unwrap(), [1]);
    let broker = setup(&queue).await;

    let got = queue
        .pull_one(&broker.channel(), "orders", true)
        .await
        .unwrap();
    assert!(got.is_none());

    // Every shard is fetched exactly once, in scan order.
    assert_eq!(
        fetched_queues(&broker),
        ["orders_1", "orders_2", "orders_3", "orders_0"]
    );
}

#[test_log::test(tokio::test)]
async fn test_pull_out_of_range_scan_start() {
    for start in [3, usize::MAX] {
        let queue = fixed_start(ShardedQueue::new(3).unwrap(), [start]);
        let broker = setup(&queue).await;

        let err = queue
            .pull_one(&broker.channel(), "orders", true)
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidConfiguration { reason } => {
            assert!(reason.contains("out of range"), "{reason}");
        });
        assert!(fetched_queues(&broker).is_empty());
    }
}

#[test_log::test(tokio::test)]
async fn test_pull_fetch_error_aborts_scan() {
    let queue = fixed_start(ShardedQueue::new(3).unwrap(), [0]);
    let broker = setup(&queue).await;
    let ch = broker.channel();
    let body = JsonCodec.encode(&Message::new(42, "unreached")).unwrap();
    ch.publish("", "orders_2", false, &BasicProperties::default(), body)
        .await
        .unwrap();
    broker.fail_next(FaultOp::FetchOne, "orders_1", "channel closed");

    let err = queue.pull_one(&ch, "orders", true).await.unwrap_err();
    assert_matches!(err, Error::Fetch { shard_index: 1, queue, .. } => {
        assert_eq!(queue, "orders_1");
    });
    assert_eq!(fetched_queues(&broker), ["orders_0", "orders_1"]);
    assert_eq!(broker.queue_depth("orders_2"), Some(1));
}

#[test_log::test(tokio::test)]
async fn test_pull_undecodable_body() {
    let queue = fixed_start(ShardedQueue::new(2).unwrap(), [0]);
    let broker = setup(&queue).await;
    let ch = broker.channel();
    ch.publish(
        "",
        "orders_0",
        false,
        &BasicProperties::default(),
        Bytes::from_static(b"not a framed message"),
    )
    .await
    .unwrap();

    let err = queue.pull_one(&ch, "orders", false).await.unwrap_err();
    assert_matches!(err, Error::Decode { shard_index: 0, delivery_tag: 1, queue, .. } => {
        assert_eq!(queue, "orders_0");
    });

    // The delivery is still held by the channel and can be settled by the caller.
    assert_eq!(ch.unacked_count(), 1);
    ch.reject(1, false).await.unwrap();
    assert_eq!(broker.queue_depth("orders_0"), Some(0));
}

#[test_log::test(tokio::test)]
async fn test_random_start_spreads_service() {
    let queue = ShardedQueue::new(4).unwrap();
    let broker = setup(&queue).await;
    let ch = broker.channel();

    // Keys covering all four shards, enough messages that no shard runs dry.
    let keys = [
        SequenceKey::from("bananas"),
        SequenceKey::from(4242),
        SequenceKey::from(42),
        SequenceKey::from(-1),
    ];
    for key in &keys {
        for _ in 0..400 {
            queue
                .publish(
                    &ch,
                    EXCHANGE,
                    "orders",
                    false,
                    &BasicProperties::default(),
                    &Message::new(key.clone(), "x"),
                )
                .await
                .unwrap();
        }
    }

    let mut served = [0_usize; 4];
    for _ in 0..400 {
        let msg = queue.pull_one(&ch, "orders", true).await.unwrap().unwrap();
        let (_, shard) = queue
            .layout()
            .parse_physical_name(msg.delivery_handle().unwrap().source())
            .unwrap();
        served[shard] += 1;
    }

    for (shard, n) in served.iter().enumerate() {
        assert!(*n > 50, "shard {shard} served {n} of 400: {served:?}");
    }
}

#[test_log::test(tokio::test)]
async fn test_per_key_order_preserved() {
    let queue = ShardedQueue::new(4).unwrap();
    let broker = setup(&queue).await;
    let ch = broker.channel();

    let keys = ["alice", "bob", "carol", "dave", "erin"];
    for seq in 0..20 {
        for key in keys {
            queue
                .publish(
                    &ch,
                    EXCHANGE,
                    "orders",
                    false,
                    &BasicProperties::default(),
                    &Message::new(key, seq.to_string()),
                )
                .await
                .unwrap();
        }
    }

    let mut seen: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    while let Some(msg) = queue.pull_one(&ch, "orders", true).await.unwrap() {
        let seq = std::str::from_utf8(msg.payload()).unwrap().parse().unwrap();
        seen.entry(msg.sequence_key().to_string())
            .or_default()
            .push(seq);
    }

    assert_eq!(seen.len(), keys.len());
    for (key, seqs) in seen {
        assert_eq!(seqs, (0..20).collect::<Vec<_>>(), "key {key} out of order");
    }
}

#[test_log::test(tokio::test)]
async fn test_manual_ack_with_handle() {
    let queue = ShardedQueue::new(2).unwrap();
    let broker = setup(&queue).await;
    let ch = broker.channel();
    queue
        .publish(
            &ch,
            EXCHANGE,
            "orders",
            false,
            &BasicProperties::default(),
            &Message::new("k", "payload"),
        )
        .await
        .unwrap();

    let msg = queue.pull_one(&ch, "orders", false).await.unwrap().unwrap();
    let handle = msg.delivery_handle().unwrap();
    assert_eq!(ch.unacked_count(), 1);

    ch.ack(handle.delivery_tag()).await.unwrap();
    assert_eq!(ch.unacked_count(), 0);
    assert!(queue.pull_one(&ch, "orders", false).await.unwrap().is_none());
}

#[test_log::test(tokio::test)]
async fn test_unacked_redelivered_after_close() {
    let queue = ShardedQueue::new(2).unwrap();
    let broker = setup(&queue).await;
    let ch = broker.channel();
    queue
        .publish(
            &ch,
            EXCHANGE,
            "orders",
            false,
            &BasicProperties::default(),
            &Message::new(42, "again"),
        )
        .await
        .unwrap();

    queue.pull_one(&ch, "orders", false).await.unwrap().unwrap();
    ch.close();

    let ch = broker.channel();
    let msg = queue.pull_one(&ch, "orders", true).await.unwrap().unwrap();
    assert_eq!(msg.payload(), b"again");
}

#[test_log::test(tokio::test)]
async fn test_single_shard() {
    let queue = ShardedQueue::new(1).unwrap();
    let broker = setup(&queue).await;
    let ch = broker.channel();
    assert_eq!(broker.queue_names(), ["orders_0"]);

    for key in [SequenceKey::from(1), SequenceKey::from("x")] {
        let shard = queue
            .publish(
                &ch,
                EXCHANGE,
                "orders",
                false,
                &BasicProperties::default(),
                &Message::new(key, "m"),
            )
            .await
            .unwrap();
        assert_eq!(shard, 0);
    }
    assert_eq!(broker.queue_depth("orders_0"), Some(2));
}

#[test_log::test(tokio::test)]
async fn test_facade_shared_across_channels() {
    let queue = Arc::new(ShardedQueue::new(4).unwrap());
    let broker = setup(&queue).await;

    let mut tasks = Vec::new();
    for worker in 0..4_i64 {
        let queue = Arc::clone(&queue);
        let ch = broker.channel();
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                queue
                    .publish(
                        &ch,
                        EXCHANGE,
                        "orders",
                        false,
                        &BasicProperties::default(),
                        &Message::new(worker * 100 + i, "x"),
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    let total: usize = (0..4)
        .map(|i| broker.queue_depth(&format!("orders_{i}")).unwrap())
        .sum();
    assert_eq!(total, 100);
}

#[test_log::test(tokio::test)]
async fn test_channel_as_trait_object() {
    let queue = ShardedQueue::new(2).unwrap();
    let broker = setup(&queue).await;
    let ch: Box<dyn BrokerChannel> = Box::new(broker.channel());

    queue
        .publish(
            ch.as_ref(),
            EXCHANGE,
            "orders",
            false,
            &BasicProperties::default(),
            &Message::new(9, "dyn"),
        )
        .await
        .unwrap();
    let msg = queue.pull_one(ch.as_ref(), "orders", true).await.unwrap();
    assert_eq!(msg.unwrap().payload(), b"dyn");
}
