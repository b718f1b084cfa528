//! Registry of live upload queues.

use crate::{QueueResult, QueueStatus, UploadQueue};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Named collection of queues flushed by the scheduler.
///
/// Queues are kept in id order, which is also the order in which a flush
/// visits them.
#[derive(Default)]
pub struct QueueRegistry {
    queues: RwLock<BTreeMap<String, Arc<UploadQueue>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue under `id`, returning the queue it replaced.
    pub async fn register(
        &self,
        id: impl Into<String>,
        queue: Arc<UploadQueue>,
    ) -> Option<Arc<UploadQueue>> {
        let id = id.into();
        let previous = self.queues.write().await.insert(id.clone(), queue);
        info!(queue = %id, replaced = previous.is_some(), "Registered upload queue");
        previous
    }

    /// Remove a queue. Unknown ids are ignored.
    pub async fn unregister(&self, id: &str) -> Option<Arc<UploadQueue>> {
        let removed = self.queues.write().await.remove(id);
        if removed.is_some() {
            info!(queue = %id, "Unregistered upload queue");
        }
        removed
    }

    /// Look up a queue by id.
    pub async fn find(&self, id: &str) -> Option<Arc<UploadQueue>> {
        self.queues.read().await.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.queues.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.queues.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queues.read().await.is_empty()
    }

    /// Registered queues in id order. The lock is not held by the caller.
    pub async fn snapshot(&self) -> Vec<(String, Arc<UploadQueue>)> {
        self.queues
            .read()
            .await
            .iter()
            .map(|(id, queue)| (id.clone(), queue.clone()))
            .collect()
    }

    /// Status of every registered queue.
    pub async fn status(&self) -> QueueResult<BTreeMap<String, QueueStatus>> {
        let mut status = BTreeMap::new();
        for (id, queue) in self.snapshot().await {
            status.insert(id, queue.status().await?);
        }
        Ok(status)
    }
}
