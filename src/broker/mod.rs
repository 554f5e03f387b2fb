//src/broker/mod.rs

//! Named-queue message broker used by the distributed classifier.
//!
//! A queue delivers each message to exactly one of its consumers, round
//! robin. Messages published while a queue has no consumer wait in the queue.
//! Publishing to a queue nobody declared drops the message, and so does
//! publishing to an exclusive queue whose owner has gone.

pub mod memory;
pub mod tcp;

use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use memory::{InMemoryBroker, InMemoryConnection, InMemoryConnector};
pub use tcp::{BrokerServer, TcpBrokerConnection, TcpConnector};

/// Well-known queue servers consume classification requests from.
pub const REQUEST_QUEUE: &str = "request";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed broker frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("connection is closed")]
    Disconnected,

    #[error("no broker known as '{0}'")]
    UnknownHost(String),
}

/// One message on a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Queue the consumer should answer on, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub body: String,
}

impl Delivery {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            reply_to: None,
            body: body.into(),
        }
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }
}

/// A live session with a broker.
pub trait BrokerConnection: Send + Sync {
    /// Create `queue` if it does not exist yet.
    fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Create `queue` owned by this connection. It is deleted, together with
    /// anything still waiting on it, when the connection closes.
    fn declare_exclusive_queue(&self, queue: &str) -> Result<(), BrokerError>;

    fn publish(&self, queue: &str, delivery: Delivery) -> Result<(), BrokerError>;

    /// Start consuming `queue`. Deliveries are acknowledged on receipt; the
    /// channel disconnects when the connection is lost.
    fn consume(&self, queue: &str) -> Result<Receiver<Delivery>, BrokerError>;

    fn is_open(&self) -> bool;

    fn close(&self);
}

/// Opens connections by broker host name.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}
