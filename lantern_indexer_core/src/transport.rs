use async_trait::async_trait;
use snafu::Snafu;

use crate::{request::BulkRequest, response::BulkResponse};

/// Transport error for a whole batch.
///
/// The classification drives the engine's retry loop: transient errors are
/// re-committed with backoff, permanent errors fail every request in the
/// batch exactly once.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    /// The engine could not be reached or answered with a retryable
    /// condition (connection refused, overload, cluster unavailable).
    #[snafu(display("transient transport error: {message}"))]
    Transient { message: String },
    /// The request was rejected in a way a retry will not fix
    /// (authentication, malformed payload, closed index).
    #[snafu(display("permanent transport error: {message}"))]
    Permanent { message: String },
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient { .. })
    }
}

/// Client for the search engine's bulk endpoint.
///
/// Implementations submit the batch as a single bulk call and decode the
/// response; they do not retry. Retry policy lives in the bulk engine.
#[async_trait]
pub trait BulkTransport: Send + Sync + 'static {
    async fn execute(&self, batch: &[BulkRequest]) -> Result<BulkResponse, TransportError>;
}
