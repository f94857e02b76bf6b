use std::collections::HashMap;

use serde::Deserialize;

/// Error type reported by the search engine when a 404 is caused by the
/// target index itself being absent rather than the document.
pub const INDEX_NOT_FOUND_EXCEPTION: &str = "index_not_found_exception";

/// Response to a committed batch.
///
/// Mirrors the bulk API's response shape: one entry per request, each a map
/// from the operation name to the per-document outcome.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkResponseItem>>,
}

/// Outcome of a single operation within a bulk response.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkResponseItem {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub error: Option<BulkResponseError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponseError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

impl BulkResponse {
    /// Builds a document id to response item index.
    ///
    /// The same document id can appear more than once in a single bulk (two
    /// updates for one document landing in the same batch); the item with the
    /// greatest status code wins so that an error is never shadowed by an
    /// earlier success.
    pub fn index_by_doc_id(&self) -> HashMap<&str, &BulkResponseItem> {
        let mut index: HashMap<&str, &BulkResponseItem> = HashMap::new();
        for operation in &self.items {
            for item in operation.values() {
                let replace = match index.get(item.id.as_str()) {
                    Some(existing) => existing.status < item.status,
                    None => true,
                };
                if replace {
                    index.insert(item.id.as_str(), item);
                }
            }
        }
        index
    }
}

impl BulkResponseItem {
    /// Whether the operation took effect from the indexer's point of view.
    ///
    /// A 409 version conflict means a newer update already won. A 404 is
    /// benign for deletes (the document is already gone) unless it was the
    /// whole index that was missing.
    pub fn is_success(&self) -> bool {
        if (200..300).contains(&self.status) {
            return true;
        }

        if self.status == 409 {
            return true;
        }

        if self.status == 404 {
            return !matches!(&self.error, Some(error) if error.kind == INDEX_NOT_FOUND_EXCEPTION);
        }

        false
    }

    /// Failure reason reported by the engine, empty when none was given.
    pub fn error_reason(&self) -> &str {
        self.error
            .as_ref()
            .map(|error| error.reason.as_str())
            .unwrap_or("")
    }
}

/// Statuses the surrounding system re-attempts; no acknowledgement is routed
/// for these.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 503 | 507)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, status: u16, error_kind: Option<&str>) -> BulkResponseItem {
        BulkResponseItem {
            id: id.to_string(),
            status,
            error: error_kind.map(|kind| BulkResponseError {
                kind: kind.to_string(),
                reason: format!("{kind} raised"),
            }),
        }
    }

    #[test]
    fn test_success_statuses() {
        assert!(item("a", 200, None).is_success());
        assert!(item("a", 201, None).is_success());
        assert!(item("a", 299, None).is_success());
        assert!(!item("a", 300, None).is_success());
        assert!(!item("a", 400, None).is_success());
        assert!(!item("a", 500, None).is_success());
    }

    #[test]
    fn test_version_conflict_is_success() {
        assert!(item("a", 409, Some("version_conflict_engine_exception")).is_success());
    }

    #[test]
    fn test_not_found_is_success_unless_index_missing() {
        assert!(item("a", 404, None).is_success());
        assert!(item("a", 404, Some("document_missing_exception")).is_success());
        assert!(!item("a", 404, Some(INDEX_NOT_FOUND_EXCEPTION)).is_success());
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 503, 507] {
            assert!(is_retryable_status(status), "{status} should be retryable");
        }
        for status in [200, 400, 403, 404, 409, 501] {
            assert!(!is_retryable_status(status), "{status} should be permanent");
        }
    }

    #[test]
    fn test_index_by_doc_id_keeps_greatest_status() {
        let response = BulkResponse {
            errors: true,
            items: vec![
                HashMap::from([("index".to_string(), item("a", 200, None))]),
                HashMap::from([(
                    "update".to_string(),
                    item("a", 429, Some("circuit_breaking_exception")),
                )]),
                HashMap::from([("index".to_string(), item("b", 201, None))]),
            ],
        };

        let index = response.index_by_doc_id();
        assert_eq!(index.len(), 2);
        assert_eq!(index["a"].status, 429);
        assert_eq!(index["b"].status, 201);
    }

    #[test]
    fn test_error_reason() {
        assert_eq!(item("a", 400, None).error_reason(), "");
        assert_eq!(
            item("a", 400, Some("mapper_parsing_exception")).error_reason(),
            "mapper_parsing_exception raised"
        );
    }

    #[test]
    fn test_decodes_bulk_api_shape() {
        let raw = r#"{
            "took": 7,
            "errors": true,
            "items": [
                { "index": { "_index": "visibility-v1", "_id": "doc-1", "status": 201 } },
                { "delete": { "_index": "visibility-v1", "_id": "doc-2", "status": 404,
                              "error": { "type": "index_not_found_exception", "reason": "no such index" } } }
            ]
        }"#;

        let response: BulkResponse = serde_json::from_str(raw).expect("decode bulk response");
        assert!(response.errors);
        let index = response.index_by_doc_id();
        assert!(index["doc-1"].is_success());
        assert!(!index["doc-2"].is_success());
        assert_eq!(index["doc-2"].error_reason(), "no such index");
    }
}
