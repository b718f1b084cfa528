//! Durable store seam.

use crate::{ClearFilter, RecordKey, RecordMeta, StoreResult, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable record store partitioned by storage location.
///
/// Each upload queue owns one location; locations never share keys.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record, replacing any record with the same key.
    async fn insert(
        &self,
        location: &str,
        key: &RecordKey,
        timestamp: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> StoreResult<()>;

    /// List key and timestamp of every record in the location.
    async fn list_meta(&self, location: &str) -> StoreResult<Vec<RecordMeta>>;

    /// Read a single record. `None` if it does not exist (any more).
    async fn read(&self, location: &str, key: &RecordKey) -> StoreResult<Option<StoredRecord>>;

    /// Delete matching records, returning how many were removed.
    async fn delete(&self, location: &str, filter: &ClearFilter) -> StoreResult<u64>;
}
