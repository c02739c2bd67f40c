use std::fmt::Display;

use crate::QueueDeclareOptions;

/// A channel call observed by a [`MemoryBroker`](super::MemoryBroker), recorded in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    DeclareQueue {
        queue: String,
        options: QueueDeclareOptions,
    },
    BindQueue {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    Publish {
        exchange: String,
        routing_key: String,
        mandatory: bool,
    },
    FetchOne {
        queue: String,
        auto_ack: bool,
    },
    Ack {
        delivery_tag: u64,
    },
    Reject {
        delivery_tag: u64,
        requeue: bool,
    },
}

impl BrokerCall {
    /// The queue this call targeted, if it names one.
    pub fn queue(&self) -> Option<&str> {
        match self {
            Self::DeclareQueue { queue, .. }
            | Self::BindQueue { queue, .. }
            | Self::FetchOne { queue, .. } => Some(queue),
            Self::Publish { .. } | Self::Ack { .. } | Self::Reject { .. } => None,
        }
    }
}

/// The channel operation an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    /// Matched against the queue name.
    DeclareQueue,
    /// Matched against the queue name.
    BindQueue,
    /// Matched against the routing key.
    Publish,
    /// Matched against the queue name.
    FetchOne,
}

impl Display for FaultOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeclareQueue => write!(f, "queue.declare"),
            Self::BindQueue => write!(f, "queue.bind"),
            Self::Publish => write!(f, "basic.publish"),
            Self::FetchOne => write!(f, "basic.get"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Fault {
    pub(crate) op: FaultOp,
    pub(crate) target: String,
    pub(crate) message: String,
}
