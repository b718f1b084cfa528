//! In-memory record store.

use crate::{ClearFilter, RecordKey, RecordMeta, RecordStore, StoreResult, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Record store kept entirely in memory.
///
/// Listing preserves insertion order; replacing a key keeps its position.
#[derive(Debug, Default)]
pub struct MemoryStore {
    locations: Mutex<HashMap<String, Vec<StoredRecord>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a location.
    pub fn len(&self, location: &str) -> usize {
        self.locations
            .lock()
            .get(location)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether a location holds no records.
    pub fn is_empty(&self, location: &str) -> bool {
        self.len(location) == 0
    }

    /// Keys of a location, in insertion order.
    pub fn keys(&self, location: &str) -> Vec<RecordKey> {
        self.locations
            .lock()
            .get(location)
            .map(|records| records.iter().map(|r| r.key.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(
        &self,
        location: &str,
        key: &RecordKey,
        timestamp: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> StoreResult<()> {
        key.validate()?;
        let record = StoredRecord {
            key: key.clone(),
            timestamp,
            payload: payload.clone(),
        };

        let mut locations = self.locations.lock();
        let records = locations.entry(location.to_string()).or_default();
        match records.iter_mut().find(|r| &r.key == key) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn list_meta(&self, location: &str) -> StoreResult<Vec<RecordMeta>> {
        Ok(self
            .locations
            .lock()
            .get(location)
            .map(|records| records.iter().map(StoredRecord::meta).collect())
            .unwrap_or_default())
    }

    async fn read(&self, location: &str, key: &RecordKey) -> StoreResult<Option<StoredRecord>> {
        Ok(self
            .locations
            .lock()
            .get(location)
            .and_then(|records| records.iter().find(|r| &r.key == key).cloned()))
    }

    async fn delete(&self, location: &str, filter: &ClearFilter) -> StoreResult<u64> {
        let mut locations = self.locations.lock();
        let Some(records) = locations.get_mut(location) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| !filter.matches(&r.key, r.timestamp));
        Ok((before - records.len()) as u64)
    }
}
