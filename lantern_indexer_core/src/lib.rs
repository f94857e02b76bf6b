//! Bulk visibility indexer.
//!
//! Multiplexes concurrent visibility-update requests from shard-owned task
//! processors into the search engine's bulk API, with per-request
//! acknowledgement, deduplication by visibility task key, and batch-level
//! retry. Producers persist their tasks upstream and retry on timeout; the
//! indexer itself holds no durable state.

pub mod engine;
pub mod error;
pub mod indexer;
pub mod metrics;
pub mod request;
pub mod response;
pub mod sharded_map;
pub mod transport;

mod ticket;

pub use engine::{BulkEngine, BulkEngineClient, BulkEngineOptions, CommitHooks};
pub use error::{IndexerError, Result};
pub use indexer::{VisibilityIndexer, VisibilityIndexerOptions};
pub use request::{BulkRequest, VISIBILITY_TASK_KEY_FIELD};
pub use response::{BulkResponse, BulkResponseError, BulkResponseItem, is_retryable_status};
pub use sharded_map::ShardedMap;
pub use transport::{BulkTransport, TransportError};
