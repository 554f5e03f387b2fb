//src/server/mod.rs

//! Distributed classification over a message broker.
//!
//! Servers consume [`REQUEST_QUEUE`](crate::broker::REQUEST_QUEUE), classify
//! each request on a worker pool and answer on the request's reply queue.
//! Clients spread requests over one connection per broker host, time out
//! unanswered attempts and resubmit them elsewhere.

pub mod client;
pub mod connection;
pub mod message;
#[allow(clippy::module_inception)]
pub mod server;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::classify::ClassifyError;
use crate::config::ConfigError;
use crate::types::ClassificationResult;

pub use client::ClassifierClient;
pub use connection::{ClientConnection, ConnectionSettings, ConnectionState};
pub use message::{ClassificationRequestMessage, ClassificationResponseMessage};
pub use server::{ClassifierServer, ServerHandle};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no broker connection could be established")]
    NotConnected,

    #[error("no live connection left to send the request on")]
    NoLiveConnection,

    #[error("client closed before the request completed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Classifier error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Final state of one client request.
#[derive(Debug)]
pub struct Completion {
    pub header: String,
    pub sequence: String,
    /// Attempts sent, retransmissions included
    pub attempts: u32,
    pub outcome: Result<ClassificationResult, ClientError>,
}

impl Completion {
    /// The result, or a FAILED result describing the error.
    pub fn into_result(self) -> ClassificationResult {
        match self.outcome {
            Ok(result) => result,
            Err(e) => ClassificationResult::failed(&self.header, &self.sequence, e),
        }
    }
}

/// A query travelling between connections until it completes.
pub(crate) struct Request {
    pub(crate) header: String,
    pub(crate) sequence: String,
    pub(crate) attempts: u32,
    reply: Sender<Completion>,
}

impl Request {
    pub(crate) fn new(header: String, sequence: String, reply: Sender<Completion>) -> Self {
        Self {
            header,
            sequence,
            attempts: 0,
            reply,
        }
    }

    pub(crate) fn complete(self, outcome: Result<ClassificationResult, ClientError>) {
        let completion = Completion {
            header: self.header,
            sequence: self.sequence,
            attempts: self.attempts,
            outcome,
        };
        // the caller may have stopped waiting
        let _ = self.reply.send(completion);
    }
}

/// Waits for the completion of one request.
pub struct RequestHandle {
    rx: Receiver<Completion>,
}

impl RequestHandle {
    pub(crate) fn new(rx: Receiver<Completion>) -> Self {
        Self { rx }
    }

    pub fn wait(self) -> Completion {
        self.rx.recv().unwrap_or_else(|_| Completion {
            header: String::new(),
            sequence: String::new(),
            attempts: 0,
            outcome: Err(ClientError::Closed),
        })
    }

    /// `None` if nothing arrived within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion> {
        match self.rx.recv_timeout(timeout) {
            Ok(c) => Some(c),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Completion {
                header: String::new(),
                sequence: String::new(),
                attempts: 0,
                outcome: Err(ClientError::Closed),
            }),
        }
    }
}
