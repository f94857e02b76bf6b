use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value, json};

/// Body field carrying the visibility task key in index and update requests.
pub const VISIBILITY_TASK_KEY_FIELD: &str = "VisibilityTaskKey";

/// A single index, update, or delete operation targeted at the search engine.
///
/// The indexer treats the payload as opaque. A request is stored as the one
/// or two NDJSON lines submitted to the bulk API: the action line, followed
/// by the body line for index and update operations. The only structure the
/// indexer relies on is the `_id` field of the action line and, for two-line
/// requests, the [`VISIBILITY_TASK_KEY_FIELD`] field of the body.
#[derive(Debug, Clone)]
pub struct BulkRequest {
    lines: Vec<String>,
}

impl BulkRequest {
    /// Creates a request from pre-encoded NDJSON lines.
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Creates an index request for the given document.
    pub fn index(index: &str, doc_id: &str, body: Value) -> Self {
        let action = json!({ "index": { "_index": index, "_id": doc_id } });
        Self {
            lines: vec![action.to_string(), body.to_string()],
        }
    }

    /// Creates an update request for the given document.
    pub fn update(index: &str, doc_id: &str, body: Value) -> Self {
        let action = json!({ "update": { "_index": index, "_id": doc_id } });
        Self {
            lines: vec![action.to_string(), body.to_string()],
        }
    }

    /// Creates a delete request for the given document.
    pub fn delete(index: &str, doc_id: &str) -> Self {
        let action = json!({ "delete": { "_index": index, "_id": doc_id } });
        Self {
            lines: vec![action.to_string()],
        }
    }

    /// The NDJSON lines submitted to the bulk API.
    pub fn source(&self) -> &[String] {
        &self.lines
    }

    /// Encoded size in bytes, counting the newline after every line.
    pub fn encoded_len(&self) -> usize {
        self.lines.iter().map(|line| line.len() + 1).sum()
    }

    /// Returns the visibility task key this request belongs to.
    ///
    /// Index and update requests carry the key in their body; for delete
    /// requests the document id doubles as the key. Returns `None` when the
    /// payload cannot be decoded or the field is missing or empty.
    pub fn visibility_task_key(&self) -> Option<String> {
        if self.lines.len() == 2 {
            let body: Map<String, Value> = serde_json::from_str(&self.lines[1]).ok()?;
            body.get(VISIBILITY_TASK_KEY_FIELD)
                .and_then(Value::as_str)
                .filter(|key| !key.is_empty())
                .map(str::to_owned)
        } else {
            self.doc_id()
        }
    }

    /// Returns the document id from the action line.
    ///
    /// The action line holds a single operation (`index`, `update`, `create`
    /// or `delete`); the `_id` of whichever is present is returned.
    pub fn doc_id(&self) -> Option<String> {
        let action: HashMap<String, Map<String, Value>> =
            serde_json::from_str(self.lines.first()?).ok()?;
        action
            .values()
            .find_map(|op| op.get("_id").and_then(Value::as_str))
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
    }
}

impl fmt::Display for BulkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_request_carries_key_in_body() {
        let request = BulkRequest::index(
            "visibility-v1",
            "doc-1",
            json!({ VISIBILITY_TASK_KEY_FIELD: "7-619", "state": "Running" }),
        );

        assert_eq!(request.source().len(), 2);
        assert_eq!(request.doc_id().as_deref(), Some("doc-1"));
        assert_eq!(request.visibility_task_key().as_deref(), Some("7-619"));
    }

    #[test]
    fn test_delete_request_uses_doc_id_as_key() {
        let request = BulkRequest::delete("visibility-v1", "doc-2");

        assert_eq!(request.source().len(), 1);
        assert_eq!(request.visibility_task_key().as_deref(), Some("doc-2"));
    }

    #[test]
    fn test_missing_key_field() {
        let request = BulkRequest::index("visibility-v1", "doc-3", json!({ "state": "Running" }));
        assert_eq!(request.visibility_task_key(), None);
    }

    #[test]
    fn test_unparseable_body() {
        let request = BulkRequest::from_lines(vec![
            json!({ "index": { "_id": "doc-4" } }).to_string(),
            "not json".to_string(),
        ]);
        assert_eq!(request.visibility_task_key(), None);
        assert_eq!(request.doc_id().as_deref(), Some("doc-4"));
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let request = BulkRequest::index(
            "visibility-v1",
            "doc-5",
            json!({ VISIBILITY_TASK_KEY_FIELD: "" }),
        );
        assert_eq!(request.visibility_task_key(), None);
    }

    #[test]
    fn test_encoded_len_counts_newlines() {
        let request = BulkRequest::from_lines(vec!["ab".to_string(), "cde".to_string()]);
        assert_eq!(request.encoded_len(), 7);
    }
}
