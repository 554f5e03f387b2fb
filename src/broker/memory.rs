//src/broker/memory.rs

use ahash::AHashMap;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::{BrokerConnection, BrokerError, Connector, Delivery};

struct Consumer {
    connection: u64,
    tx: Sender<Delivery>,
}

#[derive(Default)]
struct Queue {
    /// Connection that declared the queue exclusive
    owner: Option<u64>,
    waiting: VecDeque<Delivery>,
    consumers: Vec<Consumer>,
    next: usize,
}

impl Queue {
    /// Hand `delivery` to the next consumer still listening, or keep it.
    fn dispatch(&mut self, mut delivery: Delivery) {
        while !self.consumers.is_empty() {
            let idx = self.next % self.consumers.len();
            match self.consumers[idx].tx.send(delivery) {
                Ok(()) => {
                    self.next = idx + 1;
                    return;
                }
                Err(err) => {
                    delivery = err.into_inner();
                    self.consumers.remove(idx);
                }
            }
        }
        self.waiting.push_back(delivery);
    }
}

#[derive(Default)]
struct BrokerState {
    queues: AHashMap<String, Queue>,
}

/// Process-local broker. Clones share the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_connection: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> InMemoryConnection {
        InMemoryConnection {
            broker: self.clone(),
            id: self.next_connection.fetch_add(1, Ordering::Relaxed),
            open: AtomicBool::new(true),
        }
    }

    /// Messages waiting on `queue` for a consumer.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.waiting.len())
    }

    /// Number of declared queues.
    pub fn queue_count(&self) -> usize {
        self.state.lock().queues.len()
    }

    fn release(&self, connection: u64) {
        let mut state = self.state.lock();
        state.queues.retain(|name, queue| {
            if queue.owner == Some(connection) {
                if !queue.waiting.is_empty() {
                    log::debug!("Deleting '{}' with {} waiting messages", name, queue.waiting.len());
                }
                return false;
            }
            queue.consumers.retain(|c| c.connection != connection);
            true
        });
    }
}

pub struct InMemoryConnection {
    broker: InMemoryBroker,
    id: u64,
    open: AtomicBool,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::Disconnected)
        }
    }

    /// Simulate losing the connection: consumers stop receiving and later
    /// calls fail.
    pub fn sever(&self) {
        self.close();
    }
}

impl BrokerConnection for InMemoryConnection {
    fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker
            .state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    fn declare_exclusive_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let q = state.queues.entry(queue.to_string()).or_default();
        q.owner.get_or_insert(self.id);
        Ok(())
    }

    fn publish(&self, queue: &str, delivery: Delivery) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        match state.queues.get_mut(queue) {
            Some(q) => q.dispatch(delivery),
            None => log::warn!("Dropping message for undeclared queue '{queue}'"),
        }
        Ok(())
    }

    fn consume(&self, queue: &str) -> Result<Receiver<Delivery>, BrokerError> {
        self.ensure_open()?;
        let (tx, rx) = unbounded();
        let mut state = self.broker.state.lock();
        let q = state.queues.entry(queue.to_string()).or_default();
        q.consumers.push(Consumer {
            connection: self.id,
            tx,
        });
        let waiting: Vec<Delivery> = q.waiting.drain(..).collect();
        for delivery in waiting {
            q.dispatch(delivery);
        }
        Ok(rx)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.broker.release(self.id);
        }
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolves host names to in-process brokers.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    brokers: Arc<Mutex<AHashMap<String, InMemoryBroker>>>,
    connections: Arc<Mutex<Vec<(String, Weak<InMemoryConnection>)>>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, host: &str, broker: InMemoryBroker) {
        self.brokers.lock().insert(host.to_string(), broker);
    }

    /// Sever every connection this connector opened to `host`.
    pub fn sever(&self, host: &str) {
        let mut connections = self.connections.lock();
        connections.retain(|(_, conn)| conn.strong_count() > 0);
        for (h, conn) in connections.iter() {
            if h == host {
                if let Some(conn) = conn.upgrade() {
                    conn.sever();
                }
            }
        }
    }
}

impl Connector for InMemoryConnector {
    fn connect(&self, host: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let broker = self
            .brokers
            .lock()
            .get(host)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownHost(host.to_string()))?;
        let conn = Arc::new(broker.connect());
        let mut connections = self.connections.lock();
        connections.retain(|(_, c)| c.strong_count() > 0);
        connections.push((host.to_string(), Arc::downgrade(&conn)));
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_waiting_messages_reach_late_consumer() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect();
        conn.declare_queue("q").unwrap();
        conn.publish("q", Delivery::new("one")).unwrap();
        assert_eq!(broker.queue_depth("q"), 1);

        let rx = conn.consume("q").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().body, "one");
        assert_eq!(broker.queue_depth("q"), 0);
    }

    #[test]
    fn test_round_robin_between_consumers() {
        let broker = InMemoryBroker::new();
        let a = broker.connect();
        let b = broker.connect();
        a.declare_queue("q").unwrap();
        let ra = a.consume("q").unwrap();
        let rb = b.consume("q").unwrap();
        for i in 0..4 {
            a.publish("q", Delivery::new(i.to_string())).unwrap();
        }
        assert_eq!(ra.try_iter().count(), 2);
        assert_eq!(rb.try_iter().count(), 2);
    }

    #[test]
    fn test_undeclared_queue_drops() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect();
        conn.publish("nowhere", Delivery::new("x")).unwrap();
        assert_eq!(broker.queue_depth("nowhere"), 0);
    }

    #[test]
    fn test_sever_disconnects_consumers() {
        let broker = InMemoryBroker::new();
        let server = broker.connect();
        let client = broker.connect();
        server.declare_queue("q").unwrap();
        let rx = server.consume("q").unwrap();
        server.sever();

        assert!(!server.is_open());
        assert!(matches!(server.publish("q", Delivery::new("x")), Err(BrokerError::Disconnected)));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        // with no consumer left the message waits
        client.publish("q", Delivery::new("x")).unwrap();
        assert_eq!(broker.queue_depth("q"), 1);
    }

    #[test]
    fn test_exclusive_queue_goes_with_its_owner() {
        let broker = InMemoryBroker::new();
        let owner = broker.connect();
        let server = broker.connect();
        owner.declare_queue("shared").unwrap();
        owner.declare_exclusive_queue("reply-1").unwrap();
        server.publish("reply-1", Delivery::new("early")).unwrap();
        assert_eq!(broker.queue_depth("reply-1"), 1);

        owner.close();
        assert_eq!(broker.queue_count(), 1);
        // late answers are dropped instead of piling up
        server.publish("reply-1", Delivery::new("late")).unwrap();
        assert_eq!(broker.queue_depth("reply-1"), 0);
        assert_eq!(broker.queue_count(), 1);
    }

    #[test]
    fn test_connector_does_not_keep_connections_alive() {
        let broker = InMemoryBroker::new();
        let connector = InMemoryConnector::new();
        connector.register("mq1", broker.clone());
        let conn = connector.connect("mq1").unwrap();
        conn.declare_exclusive_queue("reply-1").unwrap();
        assert_eq!(broker.queue_count(), 1);

        drop(conn);
        assert_eq!(broker.queue_count(), 0);
        connector.sever("mq1");
        assert!(connector.connections.lock().is_empty());
    }

    #[test]
    fn test_connector_resolves_hosts() {
        let connector = InMemoryConnector::new();
        connector.register("mq1", InMemoryBroker::new());
        let conn = connector.connect("mq1").unwrap();
        assert!(conn.is_open());
        connector.sever("mq1");
        assert!(!conn.is_open());
        assert!(matches!(connector.connect("mq2"), Err(BrokerError::UnknownHost(_))));
    }
}
