use std::time::Instant;

use tokio::sync::oneshot;

use crate::metrics::IndexerMetrics;

/// Per-request handle tracking a pending acknowledgement.
///
/// The producer holds the receiving half of the one-shot channel; the ticket
/// holds the sender until the request reaches a terminal classification. The
/// capacity-one channel means completion never blocks, and a producer that
/// stopped listening is harmless.
pub(crate) struct AckTicket {
    sender: Option<oneshot::Sender<bool>>,
    added_at: Instant,
    started_at: Option<Instant>,
}

impl AckTicket {
    pub(crate) fn new(sender: oneshot::Sender<bool>) -> Self {
        Self {
            sender: Some(sender),
            added_at: Instant::now(),
            started_at: None,
        }
    }

    /// Marks the containing batch as picked up by the engine.
    ///
    /// Records the time the request waited in the engine's buffer. A batch
    /// that is retried marks its tickets again, overwriting `started_at`.
    pub(crate) fn mark_started(&mut self, metrics: &IndexerMetrics) {
        metrics
            .wait_latency
            .record(self.added_at.elapsed().as_secs_f64(), &[]);
        self.started_at = Some(Instant::now());
    }

    /// Completes the ticket with the final acknowledgement value.
    ///
    /// Consumes the sender, so a second call is a no-op; the map's compound
    /// operations ensure the first call is also the only one attempted for a
    /// live ticket.
    pub(crate) fn done(&mut self, ack: bool, metrics: &IndexerMetrics) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let _ = sender.send(ack);

        metrics
            .request_latency
            .record(self.added_at.elapsed().as_secs_f64(), &[]);
        if let Some(started_at) = self.started_at {
            metrics
                .commit_latency
                .record(started_at.elapsed().as_secs_f64(), &[]);
        }
    }
}
