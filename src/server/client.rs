//src/server/client.rs

use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::connection::{ClientConnection, ConnectionSettings, Retry};
use super::{ClientError, Completion, Request, RequestHandle};
use crate::broker::{Connector, TcpConnector};
use crate::classifications_stats::{summary_path_for, ClassificationSummary, ResultSink};
use crate::classify::local::output_path_for;
use crate::config::ClientConfiguration;
use crate::fasta;

struct Router {
    connections: Vec<ClientConnection>,
    next_id: AtomicU64,
    turn: AtomicUsize,
}

impl Router {
    fn live_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_live()).count()
    }

    /// Next live connection in turn, skipping `avoid` when another is live.
    fn pick(&self, avoid: Option<usize>) -> Option<usize> {
        let live: Vec<usize> = (0..self.connections.len())
            .filter(|&i| self.connections[i].is_live())
            .collect();
        if live.is_empty() {
            return None;
        }
        let preferred: Vec<usize> = live.iter().copied().filter(|&i| Some(i) != avoid).collect();
        let candidates = if preferred.is_empty() { live } else { preferred };
        let turn = self.turn.fetch_add(1, Ordering::Relaxed);
        Some(candidates[turn % candidates.len()])
    }

    /// Send `request` on the next live connection under a fresh id.
    fn dispatch(&self, mut request: Request, mut avoid: Option<usize>) {
        loop {
            let Some(idx) = self.pick(avoid) else {
                log::error!("No live connection for '{}'", request.header);
                request.complete(Err(ClientError::NoLiveConnection));
                return;
            };
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            match self.connections[idx].send(id, request) {
                Ok(()) => return,
                Err(back) => {
                    request = back;
                    avoid = Some(idx);
                }
            }
        }
    }
}

/// Classifies queries through servers reachable over one or more brokers.
pub struct ClassifierClient {
    router: Arc<Router>,
    shutdown: Option<Sender<()>>,
    retry_thread: Option<JoinHandle<()>>,
}

impl ClassifierClient {
    /// Connect over TCP to every host in `conf`.
    pub fn connect(conf: &ClientConfiguration) -> Result<Self, ClientError> {
        conf.validate()?;
        let connector = TcpConnector {
            port: conf.broker_port,
            user_id: conf.broker_user_id.clone(),
            user_pwd: conf.broker_user_pwd.clone(),
        };
        Self::with_connector(&conf.broker_hostnames, ConnectionSettings::from(conf), &connector)
    }

    /// Connect to `hosts` through `connector`. Fails only when no host could
    /// be reached.
    pub fn with_connector(
        hosts: &[String],
        settings: ConnectionSettings,
        connector: &dyn Connector,
    ) -> Result<Self, ClientError> {
        let (retry_tx, retry_rx) = unbounded::<Retry>();
        let connections: Vec<ClientConnection> = hosts
            .iter()
            .enumerate()
            .map(|(i, host)| ClientConnection::open(connector, host, i, settings, retry_tx.clone()))
            .collect();
        drop(retry_tx);

        let router = Arc::new(Router {
            connections,
            next_id: AtomicU64::new(0),
            turn: AtomicUsize::new(0),
        });
        if router.live_count() == 0 {
            return Err(ClientError::NotConnected);
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let retry_router = Arc::clone(&router);
        let retry_thread = thread::Builder::new()
            .name("client-retry".into())
            .spawn(move || run_retries(retry_router, retry_rx, shutdown_rx))?;

        Ok(Self {
            router,
            shutdown: Some(shutdown_tx),
            retry_thread: Some(retry_thread),
        })
    }

    pub fn connections(&self) -> &[ClientConnection] {
        &self.router.connections
    }

    pub fn live_connections(&self) -> usize {
        self.router.live_count()
    }

    /// Submit one query. Blocks while the chosen connection is full.
    pub fn request(&self, header: &str, sequence: &str) -> RequestHandle {
        let (tx, rx) = bounded(1);
        self.submit(header, sequence, tx);
        RequestHandle::new(rx)
    }

    fn submit(&self, header: &str, sequence: &str, reply: Sender<Completion>) {
        let request = Request::new(header.to_string(), sequence.to_string(), reply);
        self.router.dispatch(request, None);
    }

    /// Classify every record of `input` into NDJSON at `output`. Requests
    /// that fail are written as FAILED results.
    pub fn classify_file(
        &self,
        input: &Path,
        output: &Path,
        summary_output: Option<&Path>,
    ) -> Result<ClassificationSummary, ClientError> {
        if self.live_connections() == 0 {
            log::error!("No live connection");
            return Err(ClientError::NoLiveConnection);
        }
        let sink = ResultSink::create(output, fasta::display_name(input))?;
        let (tx, rx) = unbounded::<Completion>();

        let written = thread::scope(|scope| -> Result<u64, ClientError> {
            let writer = scope.spawn(|| collect_results(&sink, rx));

            let mut submitted = 0u64;
            let mut read_error = None;
            for entry in fasta::open_fasta(input)? {
                match entry {
                    Ok(entry) => {
                        self.submit(&entry.header, &entry.sequence, tx.clone());
                        submitted += 1;
                    }
                    Err(e) => {
                        read_error = Some(e);
                        break;
                    }
                }
            }
            // the writer ends once every request has completed
            drop(tx);
            let written = writer.join().unwrap_or(0);
            if written != submitted {
                log::error!("{} of {} requests never completed", submitted - written, submitted);
            }
            match read_error {
                Some(e) => Err(e.into()),
                None => Ok(written),
            }
        })?;

        let summary = sink.finish()?;
        log::info!(
            "Classifying {} finished in {} ms: {} results, {} classified, {} vague, {} unknown, {} failed",
            summary.query_filename,
            summary.time_taken_ms(),
            written,
            summary.classified,
            summary.vague,
            summary.unknown,
            summary.failed
        );
        if let Some(path) = summary_output {
            summary.save(path)?;
        }
        Ok(summary)
    }

    /// Classify every FASTA file under `input` into `output_dir`, one result
    /// file and summary per query file.
    pub fn classify_path(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<Vec<ClassificationSummary>, ClientError> {
        let files = fasta::find_fasta_files(input)?;
        let mut summaries = Vec::with_capacity(files.len());
        for file in files {
            let output = output_path_for(&file, output_dir);
            let summary_path = summary_path_for(&output);
            summaries.push(self.classify_file(&file, &output, Some(&summary_path))?);
        }
        Ok(summaries)
    }

    /// Stop retrying and close every connection. Requests still in flight
    /// complete with [`ClientError::Closed`].
    pub fn close(&mut self) {
        self.shutdown.take();
        for conn in &self.router.connections {
            conn.close();
        }
        if let Some(handle) = self.retry_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ClassifierClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn collect_results(sink: &ResultSink, rx: Receiver<Completion>) -> u64 {
    let mut written = 0;
    for completion in rx {
        if let Err(e) = &completion.outcome {
            log::error!("Request '{}' failed: {}", completion.header, e);
        }
        if completion.attempts > 1 {
            log::debug!("'{}' answered after {} attempts", completion.header, completion.attempts);
        }
        let result = completion.into_result();
        match sink.record(&result) {
            Ok(()) => written += 1,
            Err(e) => log::error!("Cannot write result for '{}': {}", result.query_header, e),
        }
    }
    written
}

fn run_retries(router: Arc<Router>, retries: Receiver<Retry>, shutdown: Receiver<()>) {
    loop {
        select! {
            recv(retries) -> msg => match msg {
                Ok(Retry { request, from }) => {
                    log::info!("Retransmitting '{}' (attempt {})", request.header, request.attempts + 1);
                    router.dispatch(request, Some(from));
                }
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    for retry in retries.try_iter() {
        retry.request.complete(Err(ClientError::Closed));
    }
}
