//src/server/connection.rs

use ahash::AHashMap;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::message::{ClassificationRequestMessage, ClassificationResponseMessage};
use super::Request;
use crate::broker::{BrokerConnection, Connector, Delivery, REQUEST_QUEUE};
use crate::config::ClientConfiguration;

static REPLY_QUEUE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Timing and flow-control knobs of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub request_timeout: Duration,
    pub max_timeouts: u32,
    pub max_inflight: usize,
    pub sweep_interval: Duration,
}

impl From<&ClientConfiguration> for ConnectionSettings {
    fn from(conf: &ClientConfiguration) -> Self {
        Self {
            request_timeout: Duration::from_secs(conf.request_timeout_secs),
            max_timeouts: conf.max_timeouts.max(1),
            max_inflight: conf.max_inflight.max(1),
            sweep_interval: Duration::from_millis(conf.sweep_interval_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// A request that timed out on connection `from`.
pub(crate) struct Retry {
    pub(crate) request: Request,
    pub(crate) from: usize,
}

struct Inflight {
    request: Request,
    sent_at: Instant,
}

#[derive(Default)]
struct InflightTable {
    entries: AHashMap<u64, Inflight>,
    order: VecDeque<u64>,
}

impl InflightTable {
    fn remove(&mut self, id: u64) -> Option<Inflight> {
        let entry = self.entries.remove(&id)?;
        self.order.retain(|&x| x != id);
        Some(entry)
    }

    /// Pop every request at the head of the queue older than `timeout`.
    fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<(u64, Request)> {
        let mut expired = Vec::new();
        while let Some(&id) = self.order.front() {
            match self.entries.get(&id) {
                Some(e) if now.duration_since(e.sent_at) < timeout => break,
                _ => {}
            }
            self.order.pop_front();
            if let Some(e) = self.entries.remove(&id) {
                expired.push((id, e.request));
            }
        }
        expired
    }
}

struct Shared {
    host: String,
    index: usize,
    settings: ConnectionSettings,
    table: Mutex<InflightTable>,
    space: Condvar,
    connected: AtomicBool,
    timeouts: AtomicU32,
    reachable: AtomicBool,
    retry_tx: Sender<Retry>,
}

impl Shared {
    fn is_live(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.reachable.load(Ordering::Acquire)
    }

    fn report_timeout(&self) {
        let count = self.timeouts.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.settings.max_timeouts && self.reachable.swap(false, Ordering::AcqRel) {
            log::warn!(
                "Broker {} missed {} responses in a row; marking it unreachable",
                self.host,
                count
            );
        }
    }

    fn on_response(&self, delivery: Delivery) {
        let msg = match ClassificationResponseMessage::from_json(&delivery.body) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Malformed response from {}: {}", self.host, e);
                return;
            }
        };
        let entry = self.table.lock().remove(msg.req_id);
        match entry {
            Some(entry) => {
                self.timeouts.store(0, Ordering::Release);
                self.space.notify_all();
                let result = msg.into_result(&entry.request.header, &entry.request.sequence);
                entry.request.complete(Ok(result));
            }
            None => log::warn!(
                "Cannot find matching request for req_id {} on {}",
                msg.req_id,
                self.host
            ),
        }
    }

    fn sweep(&self) {
        let expired = self
            .table
            .lock()
            .expire(Instant::now(), self.settings.request_timeout);
        if expired.is_empty() {
            return;
        }
        self.space.notify_all();
        for (id, request) in expired {
            log::info!("Request {} on {} timed out", id, self.host);
            self.report_timeout();
            let retry = Retry {
                request,
                from: self.index,
            };
            if let Err(e) = self.retry_tx.send(retry) {
                e.into_inner()
                    .request
                    .complete(Err(super::ClientError::Closed));
            }
        }
    }
}

/// One broker host as seen by the client.
///
/// Holds up to `max_inflight` unanswered requests. A consumer thread matches
/// replies to them; a sweeper thread hands requests that outlive
/// `request_timeout` to the client for resubmission.
pub struct ClientConnection {
    shared: Arc<Shared>,
    conn: Option<Arc<dyn BrokerConnection>>,
    reply_queue: String,
    // dropping it stops the sweeper
    _shutdown: Sender<()>,
}

impl ClientConnection {
    /// Connect to `host`. Failures are logged and leave the connection
    /// disconnected.
    pub(crate) fn open(
        connector: &dyn Connector,
        host: &str,
        index: usize,
        settings: ConnectionSettings,
        retry_tx: Sender<Retry>,
    ) -> Self {
        let reply_queue = format!(
            "reply-{}-{}",
            std::process::id(),
            REPLY_QUEUE_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let shared = Arc::new(Shared {
            host: host.to_string(),
            index,
            settings,
            table: Mutex::new(InflightTable::default()),
            space: Condvar::new(),
            connected: AtomicBool::new(false),
            timeouts: AtomicU32::new(0),
            reachable: AtomicBool::new(true),
            retry_tx,
        });

        let conn = match Self::attach(connector, host, &reply_queue, &shared) {
            Ok(conn) => {
                shared.connected.store(true, Ordering::Release);
                log::info!("Connected to broker {host}, replies on '{reply_queue}'");
                Some(conn)
            }
            Err(e) => {
                log::error!("Cannot connect to broker {host}: {e}");
                None
            }
        };

        let sweeper = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("client-sweep-{index}"))
            .spawn(move || run_sweeper(sweeper, shutdown_rx));
        if let Err(e) = spawned {
            log::error!("Cannot start timeout sweeper for {host}: {e}");
            shared.connected.store(false, Ordering::Release);
        }

        Self {
            shared,
            conn,
            reply_queue,
            _shutdown: shutdown_tx,
        }
    }

    fn attach(
        connector: &dyn Connector,
        host: &str,
        reply_queue: &str,
        shared: &Arc<Shared>,
    ) -> Result<Arc<dyn BrokerConnection>, super::ClientError> {
        let conn = connector.connect(host)?;
        conn.declare_queue(REQUEST_QUEUE)?;
        conn.declare_exclusive_queue(reply_queue)?;
        let replies = conn.consume(reply_queue)?;

        let consumer = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("client-consume-{}", shared.index))
            .spawn(move || run_consumer(consumer, replies))?;
        Ok(conn)
    }

    pub fn host(&self) -> &str {
        &self.shared.host
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    pub fn state(&self) -> ConnectionState {
        if self.shared.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Connected and not given up on after repeated timeouts.
    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    pub fn is_reachable(&self) -> bool {
        self.shared.reachable.load(Ordering::Acquire)
    }

    /// Consecutive timeouts since the last response.
    pub fn timeout_count(&self) -> u32 {
        self.shared.timeouts.load(Ordering::Acquire)
    }

    pub fn inflight(&self) -> usize {
        self.shared.table.lock().entries.len()
    }

    /// Whether a send would wait for a free slot.
    pub fn would_block(&self) -> bool {
        self.inflight() >= self.shared.settings.max_inflight
    }

    /// Send `request` under correlation id `id`, waiting for a free slot.
    /// Gives the request back if this connection is not live or the publish
    /// fails.
    pub(crate) fn send(&self, id: u64, mut request: Request) -> Result<(), Request> {
        let Some(conn) = self.conn.as_ref() else {
            return Err(request);
        };
        let body = match ClassificationRequestMessage::new(id, request.sequence.as_str()).to_json() {
            Ok(body) => body,
            Err(e) => {
                request.complete(Err(super::ClientError::Broker(e.into())));
                return Ok(());
            }
        };

        {
            let mut table = self.shared.table.lock();
            while table.entries.len() >= self.shared.settings.max_inflight {
                if !self.shared.is_live() {
                    return Err(request);
                }
                self.shared
                    .space
                    .wait_for(&mut table, self.shared.settings.sweep_interval);
            }
            if !self.shared.is_live() {
                return Err(request);
            }
            request.attempts += 1;
            table.entries.insert(
                id,
                Inflight {
                    request,
                    sent_at: Instant::now(),
                },
            );
            table.order.push_back(id);
        }

        let delivery = Delivery::new(body).with_reply_to(self.reply_queue.as_str());
        if let Err(e) = conn.publish(REQUEST_QUEUE, delivery) {
            log::error!("Publishing request {} to {} failed: {}", id, self.shared.host, e);
            self.shared.connected.store(false, Ordering::Release);
            let entry = self.shared.table.lock().remove(id);
            self.shared.space.notify_all();
            // a concurrent sweep may already own it
            return match entry {
                Some(entry) => Err(entry.request),
                None => Ok(()),
            };
        }
        Ok(())
    }

    pub fn close(&self) {
        self.shared.connected.store(false, Ordering::Release);
        self.shared.space.notify_all();
        if let Some(conn) = &self.conn {
            conn.close();
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_consumer(shared: Arc<Shared>, replies: Receiver<Delivery>) {
    for delivery in replies {
        shared.on_response(delivery);
    }
    if shared.connected.swap(false, Ordering::AcqRel) {
        log::warn!("Lost connection to broker {}", shared.host);
    }
    shared.space.notify_all();
}

fn run_sweeper(shared: Arc<Shared>, shutdown: Receiver<()>) {
    loop {
        match shutdown.recv_timeout(shared.settings.sweep_interval) {
            Err(RecvTimeoutError::Timeout) => shared.sweep(),
            _ => break,
        }
    }
    // whatever is still pending will never be retried from here
    let leftover: Vec<Inflight> = {
        let mut table = shared.table.lock();
        table.order.clear();
        table.entries.drain().map(|(_, e)| e).collect()
    };
    for entry in leftover {
        entry.request.complete(Err(super::ClientError::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, InMemoryConnector};
    use crossbeam::channel::unbounded;

    fn settings(timeout_ms: u64) -> ConnectionSettings {
        ConnectionSettings {
            request_timeout: Duration::from_millis(timeout_ms),
            max_timeouts: 2,
            max_inflight: 2,
            sweep_interval: Duration::from_millis(10),
        }
    }

    fn request(seq: &str) -> (Request, Receiver<super::super::Completion>) {
        let (tx, rx) = unbounded();
        (Request::new(format!("h-{seq}"), seq.to_string(), tx), rx)
    }

    #[test]
    fn test_expire_pops_only_old_heads() {
        let mut table = InflightTable::default();
        let start = Instant::now();
        for (id, age) in [(1u64, 50u64), (2, 5)] {
            let (req, _rx) = request("A");
            table.entries.insert(
                id,
                Inflight {
                    request: req,
                    sent_at: start - Duration::from_millis(age),
                },
            );
            table.order.push_back(id);
        }
        let expired = table.expire(start, Duration::from_millis(20));
        assert_eq!(expired.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(table.order, VecDeque::from(vec![2]));
    }

    #[test]
    fn test_unknown_host_stays_disconnected() {
        let connector = InMemoryConnector::new();
        let (retry_tx, _retry_rx) = unbounded();
        let conn = ClientConnection::open(&connector, "nowhere", 0, settings(100), retry_tx);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_live());
        let (req, _rx) = request("ACGT");
        assert!(conn.send(1, req).is_err());
    }

    #[test]
    fn test_response_completes_request() {
        let broker = InMemoryBroker::new();
        let connector = InMemoryConnector::new();
        connector.register("mq", broker.clone());
        let (retry_tx, _retry_rx) = unbounded();
        let conn = ClientConnection::open(&connector, "mq", 0, settings(5_000), retry_tx);
        assert_eq!(conn.state(), ConnectionState::Connected);

        // play the server by hand
        let server = broker.connect();
        let inbox = server.consume(REQUEST_QUEUE).unwrap();
        let (req, done) = request("ACGT");
        conn.send(41, req).map_err(|_| "not sent").unwrap();
        assert_eq!(conn.inflight(), 1);

        let delivery = inbox.recv_timeout(Duration::from_secs(1)).unwrap();
        let msg = ClassificationRequestMessage::from_json(&delivery.body).unwrap();
        assert_eq!(msg.req_id, 41);
        let reply = ClassificationResponseMessage::from_result(
            msg.req_id,
            crate::types::ClassificationResult::unknown("", &msg.sequence),
        );
        server
            .publish(
                delivery.reply_to.as_deref().unwrap(),
                Delivery::new(reply.to_json().unwrap()),
            )
            .unwrap();

        let completion = done.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(completion.header, "h-ACGT");
        assert_eq!(completion.attempts, 1);
        assert!(completion.outcome.is_ok());
        assert_eq!(conn.inflight(), 0);
    }

    #[test]
    fn test_timeouts_retry_and_exclude() {
        let connector = InMemoryConnector::new();
        connector.register("mq", InMemoryBroker::new());
        let (retry_tx, retry_rx) = unbounded();
        let conn = ClientConnection::open(&connector, "mq", 3, settings(30), retry_tx);

        let (a, _ra) = request("A");
        let (b, _rb) = request("C");
        conn.send(1, a).map_err(|_| "not sent").unwrap();
        conn.send(2, b).map_err(|_| "not sent").unwrap();
        assert!(conn.would_block());

        for _ in 0..2 {
            let retry = retry_rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(retry.from, 3);
            assert_eq!(retry.request.attempts, 1);
        }
        assert_eq!(conn.timeout_count(), 2);
        assert!(!conn.is_reachable());
        assert!(!conn.is_live());
        let (c, _rc) = request("G");
        assert!(conn.send(3, c).is_err());
    }
}
