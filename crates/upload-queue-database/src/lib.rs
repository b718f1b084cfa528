//! SQLite durable store for upload queues.
//!
//! This crate provides:
//! - Async SQLite executor on a dedicated thread (`AsyncDatabase`)
//! - Versioned schema migrations
//! - `SqliteRecordStore`, the `RecordStore` implementation used by the daemon
//!
//! ```ignore
//! let store = SqliteRecordStore::open(&paths.database_file()).await?;
//! let queue = UploadQueue::new("events", options, Arc::new(store), transport, hooks)?;
//! ```

mod error;
mod executor;
mod migrations;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use store::SqliteRecordStore;
