//src/server/server.rs

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::message::{ClassificationRequestMessage, ClassificationResponseMessage};
use super::ServerError;
use crate::broker::{BrokerConnection, Connector, Delivery, TcpConnector, REQUEST_QUEUE};
use crate::classify::Classifier;
use crate::config::ServerConfiguration;
use crate::pool::WorkerPool;

/// Answers classification requests arriving on the request queue.
pub struct ClassifierServer {
    classifier: Arc<Classifier>,
    threads: usize,
}

impl ClassifierServer {
    pub fn new(classifier: Arc<Classifier>, threads: usize) -> Self {
        Self {
            classifier,
            threads: threads.max(1),
        }
    }

    /// Open the index named by `conf` and connect to its broker over TCP.
    pub fn serve(conf: &ServerConfiguration) -> Result<ServerHandle, ServerError> {
        let classifier = Arc::new(Classifier::open(&conf.classifier)?);
        let connector = TcpConnector {
            port: conf.broker_port,
            user_id: conf.broker_user_id.clone(),
            user_pwd: conf.broker_user_pwd.clone(),
        };
        let conn = connector.connect(&conf.broker_hostname)?;
        log::info!(
            "Serving classification requests from {}:{}",
            conf.broker_hostname,
            conf.broker_port
        );
        Self::new(classifier, conf.classifier.worker_threads).start(conn)
    }

    /// Start consuming on `conn`. Runs until the connection closes.
    pub fn start(self, conn: Arc<dyn BrokerConnection>) -> Result<ServerHandle, ServerError> {
        conn.declare_queue(REQUEST_QUEUE)?;
        let requests = conn.consume(REQUEST_QUEUE)?;
        let pool = WorkerPool::new(self.threads, self.threads * 2)?;

        let worker_conn = Arc::clone(&conn);
        let consumer = thread::Builder::new()
            .name("server-consume".into())
            .spawn(move || {
                let mut served = 0u64;
                for delivery in requests {
                    let classifier = Arc::clone(&self.classifier);
                    let conn = Arc::clone(&worker_conn);
                    pool.execute(move || handle_request(&classifier, conn.as_ref(), delivery));
                    served += 1;
                }
                pool.join();
                log::info!("Request consumer stopped after {served} requests");
                served
            })?;

        Ok(ServerHandle {
            conn,
            consumer: Some(consumer),
        })
    }
}

fn handle_request(classifier: &Classifier, conn: &dyn BrokerConnection, delivery: Delivery) {
    let Some(reply_to) = delivery.reply_to else {
        log::warn!("Dropping request without a reply queue");
        return;
    };
    let request = match ClassificationRequestMessage::from_json(&delivery.body) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Dropping malformed request: {e}");
            return;
        }
    };

    // empty sequences come back FAILED
    let result = classifier.classify_or_fail("", &request.sequence);
    let response = ClassificationResponseMessage::from_result(request.req_id, result);
    let body = match response.to_json() {
        Ok(b) => b,
        Err(e) => {
            log::error!("Cannot encode response {}: {}", request.req_id, e);
            return;
        }
    };
    if let Err(e) = conn.publish(&reply_to, Delivery::new(body)) {
        log::error!("Cannot answer request {} on '{}': {}", request.req_id, reply_to, e);
    }
}

/// A running server.
pub struct ServerHandle {
    conn: Arc<dyn BrokerConnection>,
    consumer: Option<JoinHandle<u64>>,
}

impl ServerHandle {
    /// Close the broker connection; the consumer drains and exits.
    pub fn stop(&self) {
        self.conn.close();
    }

    /// Wait for the consumer to exit. Returns the number of requests taken.
    pub fn join(mut self) -> u64 {
        self.consumer
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.consumer.take() {
            self.conn.close();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::config::Configuration;
    use crate::index::{IndexMeta, IndexSearcher, Similarity};
    use crate::types::ResultType;
    use std::time::Duration;

    fn server() -> ClassifierServer {
        let searcher = Arc::new(IndexSearcher::from_documents(
            IndexMeta::new(10, false),
            Vec::new(),
            Similarity::Classic,
        ));
        let classifier = Classifier::with_searcher(searcher, &Configuration::default()).unwrap();
        ClassifierServer::new(Arc::new(classifier), 2)
    }

    #[test]
    fn test_answers_on_reply_queue() {
        let broker = InMemoryBroker::new();
        let handle = server().start(Arc::new(broker.connect())).unwrap();

        let client = broker.connect();
        client.declare_queue("reply-t").unwrap();
        let replies = client.consume("reply-t").unwrap();
        for (id, seq) in [(1u64, "ACGTACGTACGTACGT"), (2, "")] {
            let body = ClassificationRequestMessage::new(id, seq).to_json().unwrap();
            client
                .publish(REQUEST_QUEUE, Delivery::new(body).with_reply_to("reply-t"))
                .unwrap();
        }

        let mut got: Vec<ClassificationResponseMessage> = (0..2)
            .map(|_| {
                let d = replies.recv_timeout(Duration::from_secs(5)).unwrap();
                ClassificationResponseMessage::from_json(&d.body).unwrap()
            })
            .collect();
        got.sort_by_key(|m| m.req_id);
        assert_eq!(got[0].result_type, ResultType::Unknown);
        assert_eq!(got[1].result_type, ResultType::Failed);
        assert!(got[1].error.is_some());

        handle.stop();
        assert_eq!(handle.join(), 2);
    }
}
