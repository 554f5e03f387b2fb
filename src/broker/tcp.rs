//src/broker/tcp.rs

//! Broker over TCP with newline-delimited JSON frames.

use ahash::AHashMap;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::memory::{InMemoryBroker, InMemoryConnection};
use super::{BrokerConnection, BrokerError, Connector, Delivery};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Frame {
    Hello {
        #[serde(default)]
        user_id: Option<String>,
    },
    Declare {
        queue: String,
    },
    #[serde(rename = "declare_exclusive")]
    DeclareExclusive {
        queue: String,
    },
    Publish {
        queue: String,
        delivery: Delivery,
    },
    Consume {
        queue: String,
    },
    Deliver {
        queue: String,
        delivery: Delivery,
    },
}

type FrameWriter = Arc<Mutex<BufWriter<TcpStream>>>;

fn write_frame(writer: &FrameWriter, frame: &Frame) -> Result<(), BrokerError> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    let mut w = writer.lock();
    w.write_all(line.as_bytes())?;
    w.flush()?;
    Ok(())
}

/// Serves an [`InMemoryBroker`] to TCP clients.
pub struct BrokerServer {
    broker: InMemoryBroker,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl BrokerServer {
    /// Bind and start accepting on a background thread.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let broker = InMemoryBroker::new();
        let running = Arc::new(AtomicBool::new(true));

        let accept_broker = broker.clone();
        let accept_running = Arc::clone(&running);
        thread::Builder::new()
            .name("broker-accept".into())
            .spawn(move || {
                for stream in listener.incoming() {
                    if !accept_running.load(Ordering::Acquire) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            let broker = accept_broker.clone();
                            let spawned = thread::Builder::new()
                                .name("broker-session".into())
                                .spawn(move || serve_session(broker, stream));
                            if let Err(e) = spawned {
                                log::error!("Cannot start broker session: {e}");
                            }
                        }
                        Err(e) => log::warn!("Broker accept failed: {e}"),
                    }
                }
                log::info!("Broker stopped accepting");
            })?;

        log::info!("Broker listening on {local_addr}");
        Ok(Self {
            broker,
            local_addr,
            running,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Stop accepting new sessions. Open sessions run until their peer leaves.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            // wake the accept loop
            let _ = TcpStream::connect(self.local_addr);
        }
    }
}

impl Drop for BrokerServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_session(broker: InMemoryBroker, stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    let writer: FrameWriter = match stream.try_clone() {
        Ok(s) => Arc::new(Mutex::new(BufWriter::new(s))),
        Err(e) => {
            log::error!("Broker session {peer}: {e}");
            return;
        }
    };
    let conn = broker.connect();
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::debug!("Broker session {peer} read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame: Frame = match serde_json::from_str(&line) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("Broker session {peer} sent a bad frame: {e}");
                continue;
            }
        };
        if let Err(e) = handle_frame(&conn, &writer, frame, &peer) {
            log::warn!("Broker session {peer}: {e}");
            break;
        }
    }
    conn.close();
    log::debug!("Broker session {peer} closed");
}

fn handle_frame(
    conn: &InMemoryConnection,
    writer: &FrameWriter,
    frame: Frame,
    peer: &str,
) -> Result<(), BrokerError> {
    match frame {
        Frame::Hello { user_id } => {
            log::info!("Broker session {peer} opened by {}", user_id.as_deref().unwrap_or("anonymous"));
        }
        Frame::Declare { queue } => conn.declare_queue(&queue)?,
        Frame::DeclareExclusive { queue } => conn.declare_exclusive_queue(&queue)?,
        Frame::Publish { queue, delivery } => conn.publish(&queue, delivery)?,
        Frame::Consume { queue } => {
            let rx = conn.consume(&queue)?;
            let writer = Arc::clone(writer);
            thread::Builder::new()
                .name(format!("broker-deliver-{queue}"))
                .spawn(move || {
                    for delivery in rx {
                        let frame = Frame::Deliver {
                            queue: queue.clone(),
                            delivery,
                        };
                        if write_frame(&writer, &frame).is_err() {
                            break;
                        }
                    }
                })?;
        }
        Frame::Deliver { .. } => {
            log::warn!("Broker session {peer} sent a deliver frame; ignored");
        }
    }
    Ok(())
}

/// Client side of a TCP broker session.
pub struct TcpBrokerConnection {
    writer: FrameWriter,
    stream: TcpStream,
    consumers: Arc<Mutex<AHashMap<String, Sender<Delivery>>>>,
    open: Arc<AtomicBool>,
}

impl TcpBrokerConnection {
    pub fn connect<A: ToSocketAddrs>(addr: A, user_id: Option<&str>) -> Result<Self, BrokerError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let writer: FrameWriter = Arc::new(Mutex::new(BufWriter::new(stream.try_clone()?)));
        let consumers: Arc<Mutex<AHashMap<String, Sender<Delivery>>>> =
            Arc::new(Mutex::new(AHashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        let reader = BufReader::new(stream.try_clone()?);
        let read_consumers = Arc::clone(&consumers);
        let read_open = Arc::clone(&open);
        thread::Builder::new()
            .name("broker-client-read".into())
            .spawn(move || {
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    match serde_json::from_str::<Frame>(&line) {
                        Ok(Frame::Deliver { queue, delivery }) => {
                            let consumers = read_consumers.lock();
                            match consumers.get(&queue) {
                                Some(tx) => {
                                    let _ = tx.send(delivery);
                                }
                                None => log::warn!("Delivery for unconsumed queue '{queue}'"),
                            }
                        }
                        Ok(other) => log::debug!("Ignoring broker frame {other:?}"),
                        Err(e) => log::warn!("Bad frame from broker: {e}"),
                    }
                }
                read_open.store(false, Ordering::Release);
                // disconnects every consumer channel
                read_consumers.lock().clear();
            })?;

        let conn = Self {
            writer,
            stream,
            consumers,
            open,
        };
        conn.send(&Frame::Hello {
            user_id: user_id.map(str::to_string),
        })?;
        Ok(conn)
    }

    fn send(&self, frame: &Frame) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::Disconnected);
        }
        write_frame(&self.writer, frame).map_err(|e| {
            self.open.store(false, Ordering::Release);
            e
        })
    }
}

impl BrokerConnection for TcpBrokerConnection {
    fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.send(&Frame::Declare {
            queue: queue.to_string(),
        })
    }

    fn declare_exclusive_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.send(&Frame::DeclareExclusive {
            queue: queue.to_string(),
        })
    }

    fn publish(&self, queue: &str, delivery: Delivery) -> Result<(), BrokerError> {
        self.send(&Frame::Publish {
            queue: queue.to_string(),
            delivery,
        })
    }

    fn consume(&self, queue: &str) -> Result<Receiver<Delivery>, BrokerError> {
        let (tx, rx) = unbounded();
        self.consumers.lock().insert(queue.to_string(), tx);
        self.send(&Frame::Consume {
            queue: queue.to_string(),
        })?;
        Ok(rx)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpBrokerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connects to `host:port`, passing the configured user along.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub port: u16,
    pub user_id: Option<String>,
    /// Carried for configuration compatibility; the broker does not check it.
    pub user_pwd: Option<String>,
}

impl TcpConnector {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            user_id: None,
            user_pwd: None,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, host: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let conn = TcpBrokerConnection::connect((host, self.port), self.user_id.as_deref())?;
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_frame_json_shape() {
        let f = Frame::Publish {
            queue: "request".into(),
            delivery: Delivery::new("{}").with_reply_to("reply-1"),
        };
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["op"], "publish");
        assert_eq!(v["delivery"]["reply_to"], "reply-1");
        assert_eq!(serde_json::from_value::<Frame>(v).unwrap(), f);
    }

    #[test]
    fn test_publish_and_consume_over_tcp() {
        let server = BrokerServer::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr();

        let consumer = TcpBrokerConnection::connect(addr, Some("worker")).unwrap();
        let producer = TcpBrokerConnection::connect(addr, None).unwrap();
        consumer.declare_queue("q").unwrap();
        let rx = consumer.consume("q").unwrap();
        // frames on separate sessions are not ordered against each other
        thread::sleep(Duration::from_millis(100));

        producer
            .publish("q", Delivery::new("hello").with_reply_to("r"))
            .unwrap();
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got.body, "hello");
        assert_eq!(got.reply_to.as_deref(), Some("r"));
    }

    #[test]
    fn test_exclusive_queue_ends_with_session() {
        let server = BrokerServer::bind("127.0.0.1:0").unwrap();
        let conn = TcpBrokerConnection::connect(server.local_addr(), None).unwrap();
        conn.declare_exclusive_queue("reply-x").unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while server.broker().queue_count() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.broker().queue_count(), 1);

        conn.close();
        while server.broker().queue_count() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.broker().queue_count(), 0);
    }

    #[test]
    fn test_closed_connection_rejects_calls() {
        let server = BrokerServer::bind("127.0.0.1:0").unwrap();
        let conn = TcpBrokerConnection::connect(server.local_addr(), None).unwrap();
        conn.close();
        assert!(!conn.is_open());
        assert!(matches!(conn.declare_queue("q"), Err(BrokerError::Disconnected)));
    }
}
