use lantern_observability::{Counter, Histogram};

/// Instruments for the bulk indexer.
pub struct IndexerMetrics {
    /// Requests submitted to the engine, counted per commit attempt.
    pub requests: Counter<u64>,
    /// Requests that failed permanently.
    pub failures: Counter<u64>,
    /// Requests whose payload could not be decoded or matched to a response.
    pub corrupted_data: Counter<u64>,
    /// Requests left to the engine's retry path.
    pub retries: Counter<u64>,
    /// Requests per committed batch.
    pub bulk_size: Histogram<u64>,
    /// Seconds from submission to batch pickup.
    pub wait_latency: Histogram<f64>,
    /// Seconds from batch pickup to acknowledgement.
    pub commit_latency: Histogram<f64>,
    /// Seconds from submission to acknowledgement.
    pub request_latency: Histogram<f64>,
}

impl Default for IndexerMetrics {
    fn default() -> Self {
        let meter = lantern_observability::meter("visibility_indexer");
        Self {
            requests: meter
                .u64_counter("indexer.bulk.requests")
                .with_unit("{request}")
                .with_description("bulk requests submitted to the search engine")
                .build(),
            failures: meter
                .u64_counter("indexer.bulk.failures")
                .with_unit("{request}")
                .with_description("bulk requests that failed permanently")
                .build(),
            corrupted_data: meter
                .u64_counter("indexer.bulk.corrupted_data")
                .with_unit("{request}")
                .with_description("bulk requests with undecodable payloads or missing response items")
                .build(),
            retries: meter
                .u64_counter("indexer.bulk.retries")
                .with_unit("{request}")
                .with_description("bulk requests left to the retry path")
                .build(),
            bulk_size: meter
                .u64_histogram("indexer.bulk.size")
                .with_unit("{request}")
                .with_description("requests per committed batch")
                .build(),
            wait_latency: meter
                .f64_histogram("indexer.bulk.wait_latency")
                .with_unit("s")
                .with_description("time requests wait in the engine buffer")
                .build(),
            commit_latency: meter
                .f64_histogram("indexer.bulk.commit_latency")
                .with_unit("s")
                .with_description("time from batch pickup to acknowledgement")
                .build(),
            request_latency: meter
                .f64_histogram("indexer.bulk.request_latency")
                .with_unit("s")
                .with_description("time from submission to acknowledgement")
                .build(),
        }
    }
}
