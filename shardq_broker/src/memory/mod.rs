//! A process-local broker with AMQP-like queue and routing semantics.
//!
//! * Exchanges are direct exchanges, created on the first binding that names them. The default
//!   exchange `""` routes a message to the queue named by its routing key.
//! * A message is routed to every queue bound with a routing key equal to the one it was published
//!   with. Unroutable messages are dropped, or kept as returned messages if `mandatory` was set.
//! * Each [`MemoryChannel`] numbers its own deliveries and holds its own unacknowledged messages.
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use observability_deps::tracing::{debug, trace};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    BasicProperties, BrokerChannel, BrokerError, FieldTable, GetResponse, QueueDeclareOptions,
};

mod calls;
pub use calls::{BrokerCall, FaultOp};
use calls::Fault;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("PRECONDITION_FAILED - inequivalent arg when redeclaring queue '{queue}'")]
    InequivalentQueue { queue: String },

    #[error("NOT_FOUND - no queue '{queue}'")]
    QueueNotFound { queue: String },

    #[error("PRECONDITION_FAILED - unknown delivery tag {delivery_tag}")]
    UnknownDeliveryTag { delivery_tag: u64 },

    #[error("injected {op} failure on '{target}': {message}")]
    Injected {
        op: FaultOp,
        target: String,
        message: String,
    },
}

/// A message sitting in a queue, or held unacknowledged by a channel.
#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    body: Bytes,
    redelivered: bool,
}

#[derive(Debug)]
struct Queue {
    options: QueueDeclareOptions,
    messages: VecDeque<StoredMessage>,
}

/// A message published with `mandatory` set that no queue accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
}

#[derive(Debug, Default)]
struct State {
    queues: BTreeMap<String, Queue>,
    /// Exchange name -> set of (routing key, queue name) bindings.
    bindings: BTreeMap<String, BTreeSet<(String, String)>>,
    returned: Vec<ReturnedMessage>,
    /// `None` unless the broker was created with [`MemoryBroker::with_call_log`].
    calls: Option<Vec<BrokerCall>>,
    faults: Vec<Fault>,
}

impl State {
    fn record(&mut self, call: BrokerCall) {
        if let Some(calls) = &mut self.calls {
            calls.push(call);
        }
    }

    /// Remove and return the first injected fault matching `op` and `target`.
    fn take_fault(&mut self, op: FaultOp, target: &str) -> Result<(), Error> {
        match self
            .faults
            .iter()
            .position(|f| f.op == op && f.target == target)
        {
            Some(idx) => {
                let fault = self.faults.remove(idx);
                Err(Error::Injected {
                    op: fault.op,
                    target: fault.target,
                    message: fault.message,
                })
            }
            None => Ok(()),
        }
    }

    /// Names of the queues a message published to `exchange` with `routing_key` is delivered to.
    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        if exchange.is_empty() {
            return self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_owned())
                .into_iter()
                .collect();
        }

        self.bindings
            .get(exchange)
            .into_iter()
            .flatten()
            .filter(|(key, queue)| key == routing_key && self.queues.contains_key(queue))
            .map(|(_, queue)| queue.clone())
            .collect()
    }

    fn requeue(&mut self, queue: &str, mut message: StoredMessage) {
        // A queue deleted while the message was unacknowledged drops it.
        if let Some(q) = self.queues.get_mut(queue) {
            message.redelivered = true;
            q.messages.push_front(message);
        }
    }
}

/// Shared state of an in-memory broker.
///
/// Cloning a [`MemoryBroker`] yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that records every channel call, see [`Self::calls`].
    pub fn with_call_log() -> Self {
        let broker = Self::default();
        broker.state.lock().calls = Some(Vec::new());
        broker
    }

    /// Open a new channel on this broker.
    pub fn channel(&self) -> MemoryChannel {
        MemoryChannel {
            state: Arc::clone(&self.state),
            deliveries: Default::default(),
        }
    }

    /// Make the next `op` targeting `target` fail with `message`.
    ///
    /// Each injected failure fires once. `target` is matched against the queue name, or the
    /// routing key for [`FaultOp::Publish`].
    pub fn fail_next(&self, op: FaultOp, target: impl Into<String>, message: impl Into<String>) {
        self.state.lock().faults.push(Fault {
            op,
            target: target.into(),
            message: message.into(),
        });
    }

    /// All calls made on any channel of this broker, in order.
    ///
    /// Always empty unless the broker was created with [`Self::with_call_log`].
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state.lock().calls.clone().unwrap_or_default()
    }

    /// Number of messages waiting in `queue`, or `None` if it does not exist.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.messages.len())
    }

    /// The options `queue` was declared with, or `None` if it does not exist.
    pub fn queue_options(&self, queue: &str) -> Option<QueueDeclareOptions> {
        self.state.lock().queues.get(queue).map(|q| q.options.clone())
    }

    /// Names of all declared queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        self.state.lock().queues.keys().cloned().collect()
    }

    /// Routing keys binding `queue` to `exchange`, sorted.
    pub fn bindings(&self, exchange: &str, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .bindings
            .get(exchange)
            .into_iter()
            .flatten()
            .filter(|(_, q)| q == queue)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Mandatory messages that could not be routed to any queue.
    pub fn returned_messages(&self) -> Vec<ReturnedMessage> {
        self.state.lock().returned.clone()
    }
}

#[derive(Debug, Default)]
struct Deliveries {
    next_tag: u64,
    unacked: BTreeMap<u64, (String, StoredMessage)>,
}

/// A channel on a [`MemoryBroker`].
///
/// Delivery tags start at 1 and are unique per channel. Dropping a channel without calling
/// [`close`](Self::close) loses its unacknowledged messages.
#[derive(Debug)]
pub struct MemoryChannel {
    state: Arc<Mutex<State>>,
    deliveries: Mutex<Deliveries>,
}

impl MemoryChannel {
    /// Number of deliveries taken with `auto_ack = false` and not yet settled.
    pub fn unacked_count(&self) -> usize {
        self.deliveries.lock().unacked.len()
    }

    /// Close the channel, returning every unacknowledged delivery to the head of its queue.
    pub fn close(self) {
        let unacked = std::mem::take(&mut self.deliveries.lock().unacked);
        let mut state = self.state.lock();
        // Requeue newest first so the oldest delivery ends up at the head.
        for (_, (queue, message)) in unacked.into_iter().rev() {
            state.requeue(&queue, message);
        }
    }

    fn settle(&self, delivery_tag: u64) -> Result<(String, StoredMessage), Error> {
        self.deliveries
            .lock()
            .unacked
            .remove(&delivery_tag)
            .ok_or(Error::UnknownDeliveryTag { delivery_tag })
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(
        &self,
        name: &str,
        options: &QueueDeclareOptions,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.record(BrokerCall::DeclareQueue {
            queue: name.to_owned(),
            options: options.clone(),
        });
        state.take_fault(FaultOp::DeclareQueue, name)?;

        match state.queues.get(name) {
            Some(existing) if !existing.options.is_equivalent(options) => {
                return Err(Error::InequivalentQueue {
                    queue: name.to_owned(),
                }
                .into());
            }
            Some(_) => trace!(queue = name, "queue already declared"),
            None => {
                debug!(queue = name, durable = options.durable, "declared queue");
                state.queues.insert(
                    name.to_owned(),
                    Queue {
                        options: options.clone(),
                        messages: VecDeque::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn bind_queue(
        &self,
        name: &str,
        exchange: &str,
        routing_key: &str,
        _arguments: &FieldTable,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.record(BrokerCall::BindQueue {
            queue: name.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        });
        state.take_fault(FaultOp::BindQueue, name)?;

        if !state.queues.contains_key(name) {
            return Err(Error::QueueNotFound {
                queue: name.to_owned(),
            }
            .into());
        }

        debug!(queue = name, exchange, routing_key, "bound queue");
        state
            .bindings
            .entry(exchange.to_owned())
            .or_default()
            .insert((routing_key.to_owned(), name.to_owned()));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        properties: &BasicProperties,
        body: Bytes,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.record(BrokerCall::Publish {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            mandatory,
        });
        state.take_fault(FaultOp::Publish, routing_key)?;

        let targets = state.route(exchange, routing_key);
        if targets.is_empty() {
            trace!(exchange, routing_key, mandatory, "unroutable message");
            if mandatory {
                state.returned.push(ReturnedMessage {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    body,
                });
            }
            return Ok(());
        }

        for queue in targets {
            trace!(exchange, routing_key, %queue, "routed message");
            if let Some(q) = state.queues.get_mut(&queue) {
                q.messages.push_back(StoredMessage {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    properties: properties.clone(),
                    body: body.clone(),
                    redelivered: false,
                });
            }
        }
        Ok(())
    }

    async fn fetch_one(
        &self,
        name: &str,
        auto_ack: bool,
    ) -> Result<Option<GetResponse>, BrokerError> {
        let mut state = self.state.lock();
        state.record(BrokerCall::FetchOne {
            queue: name.to_owned(),
            auto_ack,
        });
        state.take_fault(FaultOp::FetchOne, name)?;

        let queue = state.queues.get_mut(name).ok_or_else(|| Error::QueueNotFound {
            queue: name.to_owned(),
        })?;
        let Some(message) = queue.messages.pop_front() else {
            return Ok(None);
        };
        let message_count = u32::try_from(queue.messages.len()).unwrap_or(u32::MAX);

        let mut deliveries = self.deliveries.lock();
        deliveries.next_tag += 1;
        let delivery_tag = deliveries.next_tag;

        let response = GetResponse {
            delivery_tag,
            redelivered: message.redelivered,
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            message_count,
            properties: message.properties.clone(),
            body: message.body.clone(),
        };

        if !auto_ack {
            deliveries
                .unacked
                .insert(delivery_tag, (name.to_owned(), message));
        }

        trace!(queue = name, delivery_tag, auto_ack, "fetched message");
        Ok(Some(response))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.state.lock().record(BrokerCall::Ack { delivery_tag });
        self.settle(delivery_tag)?;
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.state.lock().record(BrokerCall::Reject {
            delivery_tag,
            requeue,
        });
        let (queue, message) = self.settle(delivery_tag)?;
        if requeue {
            self.state.lock().requeue(&queue, message);
        }
        Ok(())
    }
}
