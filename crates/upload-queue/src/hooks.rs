//! Customization points of an upload queue.

use crate::{Acknowledgement, ClearFilter, QueueResult, RecordStore, StoredRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Handle to the storage location owned by one queue.
///
/// Handed to [`UploadHooks::on_handle_response`] so acknowledgement handling
/// can purge records without reaching into the queue.
#[derive(Clone)]
pub struct QueueStorage {
    store: Arc<dyn RecordStore>,
    location: String,
}

impl QueueStorage {
    pub(crate) fn new(store: Arc<dyn RecordStore>, location: impl Into<String>) -> Self {
        Self {
            store,
            location: location.into(),
        }
    }

    /// Storage location (table) of the queue.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Delete records of this location matching the filter.
    pub async fn clear(&self, filter: &ClearFilter) -> QueueResult<u64> {
        Ok(self.store.delete(&self.location, filter).await?)
    }
}

/// Per-queue strategy supplied at construction.
///
/// Every method has a default, so `DefaultHooks` gives an identity
/// transform, the statically configured URL and the conventional
/// acknowledgement handling.
#[async_trait]
pub trait UploadHooks: Send + Sync {
    /// Reshape a record before it leaves the process. Must be pure.
    fn transform_send(&self, record: &StoredRecord) -> serde_json::Value {
        record.payload.clone()
    }

    /// Resolve the destination dynamically.
    ///
    /// `Ok(None)` falls back to the queue's static URL.
    async fn resolve_url(&self) -> QueueResult<Option<String>> {
        Ok(None)
    }

    /// Reconcile local storage after the server acknowledged a batch.
    ///
    /// Runs after the dispatched keys left the pending set.
    async fn on_handle_response(
        &self,
        ack: &Acknowledgement,
        storage: &QueueStorage,
    ) -> QueueResult<()> {
        clear_acknowledged(ack, storage).await?;
        Ok(())
    }
}

/// Hooks with every default in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

#[async_trait]
impl UploadHooks for DefaultHooks {}

/// Conventional acknowledgement handling.
///
/// A single acknowledgement purges everything at or before its timestamp; a
/// per-record acknowledgement purges the accepted records unless they were
/// replaced by a newer version after dispatch. Returns the number of deleted
/// records.
pub async fn clear_acknowledged(ack: &Acknowledgement, storage: &QueueStorage) -> QueueResult<u64> {
    let removed = match ack {
        Acknowledgement::Single { timestamp } => {
            storage.clear(&ClearFilter::until(*timestamp)).await?
        }
        Acknowledgement::PerRecord(_) => {
            let mut removed = 0;
            for result in ack.accepted() {
                let filter = ClearFilter {
                    key: Some(result.key.clone()),
                    until: Some(result.timestamp),
                };
                removed += storage.clear(&filter).await?;
            }
            removed
        }
    };

    debug!(location = %storage.location(), removed, "Cleared acknowledged records");
    Ok(removed)
}
