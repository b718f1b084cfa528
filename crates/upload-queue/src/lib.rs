//! Offline-first outbound queue.
//!
//! Records are appended to a local durable store by application code and later
//! flushed to a remote endpoint on a timer, tolerating intermittent connectivity.
//!
//! This crate provides:
//! - UploadQueue: batch selection, in-flight (pending) tracking, dispatch and
//!   acknowledgement handling for one storage location
//! - QueueRegistry: named lookup of live queues
//! - UploadScheduler: timer that flushes every registered queue sequentially
//! - RecordStore / Transport: the seams to durable storage and the network,
//!   with an in-memory store for tests and embedding
//!
//! # Example
//!
//! ```ignore
//! let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
//! let queue = UploadQueue::new(
//!     "events",
//!     QueueOptions::new("events").with_max_length(50).with_static_url(url),
//!     store,
//!     transport,
//!     Arc::new(DefaultHooks),
//! )?;
//!
//! let registry = Arc::new(QueueRegistry::new());
//! registry.register("events", Arc::new(queue)).await;
//!
//! let scheduler = UploadScheduler::new(registry);
//! scheduler.start(None)?;
//! ```

mod ack;
mod error;
mod hooks;
mod memory;
mod queue;
mod record;
mod registry;
mod scheduler;
mod store;
mod transport;

#[cfg(test)]
mod test_support;

pub use ack::{Acknowledgement, RecordResult};
pub use error::{QueueError, QueueResult, StoreError, StoreResult, TransportError};
pub use hooks::{clear_acknowledged, DefaultHooks, QueueStorage, UploadHooks};
pub use memory::MemoryStore;
pub use queue::{BatchEntry, QueueOptions, QueueStatus, SendOutcome, UploadQueue};
pub use record::{ClearFilter, RecordKey, RecordMeta, StoredRecord};
pub use registry::QueueRegistry;
pub use scheduler::{FlushReport, UploadScheduler, DEFAULT_FLUSH_INTERVAL};
pub use store::RecordStore;
pub use transport::Transport;
