use serde_json::Value as Json;

use crate::error::StoreResult;
use crate::query::{Projection, Query};

/// Document store used by storage-backed channels.
///
/// All implementations must satisfy these invariants:
/// - Documents are keyed by their `_uuid` field; `put` is an upsert.
/// - Stored documents are returned exactly as written (modulo projection).
/// - The store never interprets fields other than `_uuid`.
pub trait BackingStore: Send + Sync {
    /// First document matching `query`, if any.
    fn find_one(&self, query: &Query, projection: Option<&Projection>) -> StoreResult<Option<Json>>;

    /// All documents matching `query`.
    fn find(&self, query: &Query, projection: Option<&Projection>) -> StoreResult<Vec<Json>>;

    /// Insert or replace the document with the same `_uuid`.
    fn put(&self, document: Json) -> StoreResult<()>;

    /// Remove and return the first document matching `query`.
    fn find_and_remove(&self, query: &Query) -> StoreResult<Option<Json>>;
}
