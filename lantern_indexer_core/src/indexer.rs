use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU8, Ordering},
};

use snafu::OptionExt;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::{
    engine::{BulkEngine, BulkEngineClient, BulkEngineOptions, CommitHooks},
    error::{NotRunningSnafu, Result},
    metrics::IndexerMetrics,
    request::BulkRequest,
    response::{BulkResponse, is_retryable_status},
    sharded_map::ShardedMap,
    ticket::AckTicket,
    transport::{BulkTransport, TransportError},
};

const STATUS_INITIALIZED: u8 = 0;
const STATUS_STARTED: u8 = 1;
const STATUS_STOPPED: u8 = 2;

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct VisibilityIndexerOptions {
    /// Number of stripes in the acknowledgement map.
    pub concurrency: usize,
    /// Bulk engine flush and retry configuration.
    pub engine: BulkEngineOptions,
}

impl Default for VisibilityIndexerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1024,
            engine: BulkEngineOptions::default(),
        }
    }
}

impl VisibilityIndexerOptions {
    /// Change the acknowledgement map stripe count.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Change the engine configuration.
    pub fn with_engine(mut self, engine: BulkEngineOptions) -> Self {
        self.engine = engine;
        self
    }
}

/// Write-side coordinator multiplexing visibility updates into the search
/// engine's bulk API.
///
/// Producers submit one request per visibility task key through [`add`] and
/// receive a one-shot channel that resolves `true` when the update was
/// durably indexed and `false` when it failed permanently or was superseded
/// by a newer update for the same key. At most one request per key is
/// outstanding at a time; a duplicate immediately nacks its predecessor and
/// takes over its slot, so the eventual engine response routes to the newest
/// channel.
///
/// [`add`]: VisibilityIndexer::add
pub struct VisibilityIndexer {
    status: AtomicU8,
    options: VisibilityIndexerOptions,
    transport: Arc<dyn BulkTransport>,
    metrics: Arc<IndexerMetrics>,
    running: Mutex<Option<Running>>,
    engine: Mutex<Option<BulkEngine>>,
}

#[derive(Clone)]
struct Running {
    router: Arc<AckRouter>,
    engine_client: BulkEngineClient,
}

impl VisibilityIndexer {
    pub fn new(transport: Arc<dyn BulkTransport>, options: VisibilityIndexerOptions) -> Self {
        Self {
            status: AtomicU8::new(STATUS_INITIALIZED),
            options,
            transport,
            metrics: Arc::new(IndexerMetrics::default()),
            running: Mutex::new(None),
            engine: Mutex::new(None),
        }
    }

    /// Starts the indexer. Only the first call transitions the state;
    /// concurrent and repeated calls are no-ops.
    pub fn start(&self) {
        if self
            .status
            .compare_exchange(
                STATUS_INITIALIZED,
                STATUS_STARTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let router = Arc::new(AckRouter {
            map: ShardedMap::new(self.options.concurrency),
            metrics: self.metrics.clone(),
        });
        let engine = BulkEngine::start(
            self.transport.clone(),
            router.clone(),
            self.options.engine.clone(),
        );

        let engine_client = engine.client();
        *lock(&self.engine) = Some(engine);
        *lock(&self.running) = Some(Running {
            router,
            engine_client,
        });

        info!("visibility indexer started");
    }

    /// Stops the indexer, draining the engine's buffered batches.
    ///
    /// Tickets still pending afterwards are not nacked: dropping the map
    /// closes their channels, which producers treat the same way as their
    /// acknowledgement timeout.
    pub async fn stop(&self) {
        if self
            .status
            .compare_exchange(
                STATUS_STARTED,
                STATUS_STOPPED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        // New submissions fail from here on; in-flight batches still route
        // acknowledgements through the router the engine holds.
        let running = lock(&self.running).take();
        let engine = lock(&self.engine).take();
        if let Some(engine) = engine {
            engine.stop().await;
        }
        drop(running);

        info!("visibility indexer stopped");
    }

    /// Submits a visibility update and returns its acknowledgement channel.
    ///
    /// When a request for the same key is already outstanding, that earlier
    /// request is nacked and this one takes over its map slot without being
    /// enqueued again: the earlier payload is still in the engine's buffer
    /// under the same document id, and its response will resolve the channel
    /// returned here.
    pub async fn add(
        &self,
        request: BulkRequest,
        visibility_task_key: &str,
    ) -> Result<oneshot::Receiver<bool>> {
        let running = lock(&self.running).clone().context(NotRunningSnafu)?;

        let (sender, receiver) = oneshot::channel();
        let ticket = AckTicket::new(sender);

        let duplicate = running
            .router
            .map
            .put_or_do(visibility_task_key, ticket, |existing, fresh| {
                warn!(
                    visibility_task_key,
                    doc_id = request.doc_id().as_deref().unwrap_or(""),
                    request = %request,
                    "duplicate bulk request for visibility task key, superseding the pending one"
                );
                existing.done(false, &running.router.metrics);
                *existing = fresh;
            });

        if !duplicate {
            running.engine_client.add(request).await?;
        }

        Ok(receiver)
    }

    /// Number of visibility task keys with an outstanding acknowledgement.
    pub fn pending(&self) -> usize {
        lock(&self.running)
            .as_ref()
            .map(|running| running.router.map.len())
            .unwrap_or(0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared between the coordinator facade and the engine hooks: the
/// key-to-ticket map and the instruments both sides record into.
struct AckRouter {
    map: ShardedMap<AckTicket>,
    metrics: Arc<IndexerMetrics>,
}

impl AckRouter {
    /// Completes and removes the ticket for `key` in one atomic step.
    ///
    /// The remove-if atom is what prevents a response from racing the dedup
    /// path in `add`: either this removal wins and the duplicate inserts a
    /// fresh entry, or the duplicate's mutator wins and this removal finds
    /// the replaced ticket.
    fn send_to_ack(&self, key: &str, ack: bool) {
        self.map.remove_if(key, |ticket| {
            ticket.done(ack, &self.metrics);
            true
        });
    }

    fn extract_visibility_task_key(&self, request: &BulkRequest) -> Option<String> {
        match request.visibility_task_key() {
            Some(key) => Some(key),
            None => {
                error!(request = %request, "unable to extract visibility task key from bulk request");
                self.metrics.corrupted_data.add(1, &[]);
                None
            }
        }
    }

    fn extract_doc_id(&self, request: &BulkRequest) -> Option<String> {
        match request.doc_id() {
            Some(doc_id) => Some(doc_id),
            None => {
                error!(request = %request, "unable to extract document id from bulk request");
                self.metrics.corrupted_data.add(1, &[]);
                None
            }
        }
    }
}

impl CommitHooks for AckRouter {
    fn before_commit(&self, batch: &[BulkRequest]) {
        self.metrics.requests.add(batch.len() as u64, &[]);
        self.metrics.bulk_size.record(batch.len() as u64, &[]);

        for request in batch {
            let Some(key) = self.extract_visibility_task_key(request) else {
                continue;
            };
            self.map
                .get_and_do(&key, |ticket| ticket.mark_started(&self.metrics));
        }
    }

    fn after_commit(
        &self,
        batch: &[BulkRequest],
        outcome: &std::result::Result<BulkResponse, TransportError>,
    ) {
        match outcome {
            Err(err) => {
                // The whole batch failed at the transport level. Retryable
                // errors are the engine's to re-commit; nobody is nacked for
                // those, the next attempt fires a fresh hook pair.
                let retryable = err.is_retryable();
                error!(error = %err, retryable, "unable to commit bulk request batch");

                for request in batch {
                    error!(request = %request, "bulk request failed");
                    self.metrics.failures.add(1, &[]);

                    if retryable {
                        continue;
                    }
                    let Some(key) = self.extract_visibility_task_key(request) else {
                        continue;
                    };
                    self.send_to_ack(&key, false);
                }
            }
            Ok(response) => {
                let items = response.index_by_doc_id();

                for request in batch {
                    let Some(key) = self.extract_visibility_task_key(request) else {
                        continue;
                    };
                    let Some(doc_id) = self.extract_doc_id(request) else {
                        self.send_to_ack(&key, false);
                        continue;
                    };

                    let Some(item) = items.get(doc_id.as_str()) else {
                        error!(
                            visibility_task_key = %key,
                            doc_id = %doc_id,
                            "bulk request has no matching response item"
                        );
                        self.metrics.corrupted_data.add(1, &[]);
                        self.send_to_ack(&key, false);
                        continue;
                    };

                    if item.is_success() {
                        self.send_to_ack(&key, true);
                    } else if !is_retryable_status(item.status) {
                        error!(
                            status = item.status,
                            reason = item.error_reason(),
                            visibility_task_key = %key,
                            doc_id = %doc_id,
                            "bulk request failed"
                        );
                        self.metrics.failures.add(1, &[]);
                        self.send_to_ack(&key, false);
                    } else {
                        warn!(
                            status = item.status,
                            reason = item.error_reason(),
                            visibility_task_key = %key,
                            doc_id = %doc_id,
                            "bulk request will be retried"
                        );
                        self.metrics.retries.add(1, &[]);
                    }
                }
            }
        }
    }
}
