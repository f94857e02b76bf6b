use snafu::Snafu;

/// Indexer error types.
///
/// These surface to producers through [`crate::VisibilityIndexer::add`];
/// everything that happens after a request is accepted is reported through
/// the acknowledgement channel instead.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IndexerError {
    /// The indexer has not been started, or has already been stopped.
    #[snafu(display("visibility indexer is not running"))]
    NotRunning,
    /// The bulk engine workers have shut down and no longer accept requests.
    #[snafu(display("bulk engine is shut down"))]
    EngineClosed,
}

pub type Result<T, E = IndexerError> = std::result::Result<T, E>;
