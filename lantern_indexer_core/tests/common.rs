#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lantern_indexer_core::{
    BulkRequest, BulkResponse, BulkResponseError, BulkResponseItem, BulkTransport,
    TransportError, VISIBILITY_TASK_KEY_FIELD, VisibilityIndexer, VisibilityIndexerOptions,
};
use serde_json::json;
use tokio::sync::oneshot;

/// Scripted bulk transport.
///
/// Each commit pops the next scripted outcome and records the batch it was
/// given. With an empty script every request in the batch succeeds with
/// status 200.
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Result<BulkResponse, TransportError>>>,
    committed: Mutex<Vec<Vec<BulkRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            committed: Mutex::new(Vec::new()),
        })
    }

    pub fn push_response(&self, response: BulkResponse) {
        self.outcomes.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_transient_error(&self) {
        self.outcomes.lock().unwrap().push_back(Err(
            TransportError::Transient {
                message: "connection refused".to_string(),
            },
        ));
    }

    pub fn push_permanent_error(&self) {
        self.outcomes.lock().unwrap().push_back(Err(
            TransportError::Permanent {
                message: "authentication failed".to_string(),
            },
        ));
    }

    /// Batches committed so far, in commit order. Retries append again.
    pub fn committed(&self) -> Vec<Vec<BulkRequest>> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BulkTransport for ScriptedTransport {
    async fn execute(&self, batch: &[BulkRequest]) -> Result<BulkResponse, TransportError> {
        self.committed.lock().unwrap().push(batch.to_vec());
        let scripted = self.outcomes.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(success_response(batch)))
    }
}

/// Builds a response acknowledging every request in the batch with 200.
pub fn success_response(batch: &[BulkRequest]) -> BulkResponse {
    let statuses: Vec<(String, u16)> = batch
        .iter()
        .filter_map(|request| request.doc_id())
        .map(|doc_id| (doc_id, 200))
        .collect();
    bulk_response(
        &statuses
            .iter()
            .map(|(id, status)| (id.as_str(), *status))
            .collect::<Vec<_>>(),
    )
}

/// Builds a bulk response from `(doc_id, status)` pairs.
pub fn bulk_response(statuses: &[(&str, u16)]) -> BulkResponse {
    BulkResponse {
        errors: statuses.iter().any(|(_, status)| *status >= 300),
        items: statuses
            .iter()
            .map(|(doc_id, status)| {
                HashMap::from([("index".to_string(), response_item(doc_id, *status, None))])
            })
            .collect(),
    }
}

pub fn response_item(doc_id: &str, status: u16, error_kind: Option<&str>) -> BulkResponseItem {
    BulkResponseItem {
        id: doc_id.to_string(),
        status,
        error: error_kind.map(|kind| BulkResponseError {
            kind: kind.to_string(),
            reason: format!("{kind} raised"),
        }),
    }
}

/// Index request whose body carries the given visibility task key.
pub fn index_request(doc_id: &str, visibility_task_key: &str) -> BulkRequest {
    BulkRequest::index(
        "visibility-v1",
        doc_id,
        json!({
            VISIBILITY_TASK_KEY_FIELD: visibility_task_key,
            "ExecutionState": "Running",
        }),
    )
}

pub fn started_indexer(
    transport: &Arc<ScriptedTransport>,
    options: VisibilityIndexerOptions,
) -> VisibilityIndexer {
    let indexer = VisibilityIndexer::new(transport.clone(), options);
    indexer.start();
    indexer
}

/// Awaits the acknowledgement with a generous timeout; panics when none
/// arrives or the indexer dropped the ticket.
pub async fn recv_ack(receiver: oneshot::Receiver<bool>) -> bool {
    tokio::time::timeout(Duration::from_secs(30), receiver)
        .await
        .expect("no acknowledgement arrived")
        .expect("acknowledgement channel closed")
}

/// Polls until `condition` holds; the paused clock makes the sleeps free.
pub async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
