use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use bytesize::ByteSize;
use futures::future::join_all;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    error::{EngineClosedSnafu, Result},
    request::BulkRequest,
    response::BulkResponse,
    transport::{BulkTransport, TransportError},
};

/// Commit callbacks bound to the coordinator.
///
/// The engine fires exactly one `before_commit`/`after_commit` pair per
/// commit attempt; a batch that is retried after a transient transport error
/// fires a fresh pair for every attempt.
pub trait CommitHooks: Send + Sync + 'static {
    fn before_commit(&self, batch: &[BulkRequest]);
    fn after_commit(
        &self,
        batch: &[BulkRequest],
        outcome: &std::result::Result<BulkResponse, TransportError>,
    );
}

/// Flush and retry configuration for the bulk engine.
#[derive(Debug, Clone)]
pub struct BulkEngineOptions {
    /// Number of parallel flush workers.
    pub workers: usize,
    /// Flush a worker's buffer when the queued request count reaches this.
    pub max_actions: usize,
    /// Flush a worker's buffer when the queued encoded bytes reach this.
    pub max_bytes: ByteSize,
    /// Flush when this much time has passed since the first queued request.
    pub flush_interval: Duration,
    /// First delay after a transient transport error.
    pub initial_backoff: Duration,
    /// Delay ceiling for the retry loop.
    pub max_backoff: Duration,
}

impl Default for BulkEngineOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            max_actions: 500,
            max_bytes: ByteSize::mb(16),
            flush_interval: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(20),
        }
    }
}

impl BulkEngineOptions {
    /// Change the number of flush workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Change the request-count flush threshold.
    pub fn with_max_actions(mut self, max_actions: usize) -> Self {
        self.max_actions = max_actions;
        self
    }

    /// Change the byte-size flush threshold.
    pub fn with_max_bytes(mut self, max_bytes: ByteSize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Change the flush interval.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }
}

/// Batches opaque requests and commits them to the search engine's bulk API.
///
/// Requests are distributed round-robin across `workers` flush workers. Each
/// worker owns a buffer that flushes when any threshold trips: request count,
/// encoded bytes, or time since the first queued request. Transient transport
/// errors re-commit the whole batch with exponential backoff.
pub struct BulkEngine {
    client: BulkEngineClient,
    ct: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// Cheap handle for enqueueing requests with a running engine.
#[derive(Clone)]
pub struct BulkEngineClient {
    senders: Arc<Vec<mpsc::Sender<BulkRequest>>>,
    next_worker: Arc<AtomicUsize>,
}

impl BulkEngine {
    /// Starts the flush workers and returns the engine handle.
    pub fn start(
        transport: Arc<dyn BulkTransport>,
        hooks: Arc<dyn CommitHooks>,
        options: BulkEngineOptions,
    ) -> Self {
        let ct = CancellationToken::new();
        let worker_count = options.workers.max(1);
        let channel_capacity = options.max_actions.max(1) * 2;

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel(channel_capacity);
            senders.push(tx);

            let worker = FlushWorker {
                id,
                rx,
                transport: transport.clone(),
                hooks: hooks.clone(),
                options: options.clone(),
                ct: ct.clone(),
                buffer: Vec::new(),
                buffered_bytes: 0,
            };
            workers.push(tokio::spawn(worker.run()));
        }

        Self {
            client: BulkEngineClient {
                senders: Arc::new(senders),
                next_worker: Arc::new(AtomicUsize::new(0)),
            },
            ct,
            workers,
        }
    }

    /// Returns a handle producers use to enqueue requests.
    pub fn client(&self) -> BulkEngineClient {
        self.client.clone()
    }

    /// Stops the engine: drains queued requests, commits what remains, and
    /// waits for every in-flight batch to terminate.
    pub async fn stop(self) {
        self.ct.cancel();
        for result in join_all(self.workers).await {
            if let Err(err) = result {
                error!(error = %err, "bulk engine worker terminated abnormally");
            }
        }
    }
}

impl BulkEngineClient {
    /// Enqueues a request with one of the flush workers.
    pub async fn add(&self, request: BulkRequest) -> Result<()> {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[index]
            .send(request)
            .await
            .or_else(|_| EngineClosedSnafu {}.fail())
    }
}

struct FlushWorker {
    id: usize,
    rx: mpsc::Receiver<BulkRequest>,
    transport: Arc<dyn BulkTransport>,
    hooks: Arc<dyn CommitHooks>,
    options: BulkEngineOptions,
    ct: CancellationToken,
    buffer: Vec<BulkRequest>,
    buffered_bytes: u64,
}

impl FlushWorker {
    async fn run(mut self) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = self.ct.cancelled() => {
                    self.drain().await;
                    break;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    deadline = None;
                    self.flush().await;
                }
                request = self.rx.recv() => {
                    let Some(request) = request else {
                        self.flush().await;
                        break;
                    };

                    if self.buffer.is_empty() {
                        deadline = Some(Instant::now() + self.options.flush_interval);
                    }
                    self.buffered_bytes += request.encoded_len() as u64;
                    self.buffer.push(request);

                    if self.buffer.len() >= self.options.max_actions
                        || self.buffered_bytes >= self.options.max_bytes.as_u64()
                    {
                        deadline = None;
                        self.flush().await;
                    }
                }
            }
        }
    }

    /// Pulls whatever is still queued, then commits the final batch.
    async fn drain(&mut self) {
        while let Ok(request) = self.rx.try_recv() {
            self.buffered_bytes += request.encoded_len() as u64;
            self.buffer.push(request);
        }
        self.flush().await;
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;

        debug!(worker = self.id, requests = batch.len(), "committing bulk batch");
        self.commit(batch).await;
    }

    /// Commits one batch, re-committing on transient transport errors with
    /// exponential backoff. Every attempt fires a before/after hook pair.
    /// A stopping engine gives up after the attempt in progress; orphaned
    /// producers observe their acknowledgement timeout instead.
    async fn commit(&self, batch: Vec<BulkRequest>) {
        let mut backoff = self.options.initial_backoff;

        loop {
            self.hooks.before_commit(&batch);
            let outcome = self.transport.execute(&batch).await;
            let retry = matches!(&outcome, Err(err) if err.is_retryable());
            self.hooks.after_commit(&batch, &outcome);

            if !retry || self.ct.is_cancelled() {
                return;
            }

            debug!(
                worker = self.id,
                delay_ms = backoff.as_millis() as u64,
                "retrying bulk commit after transient transport error"
            );
            tokio::select! {
                _ = self.ct.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.options.max_backoff);
        }
    }
}
