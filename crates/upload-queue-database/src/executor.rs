//! Async SQLite executor on a dedicated background thread.
//!
//! Every statement is sent to one `tokio-rusqlite` thread and runs in FIFO
//! order, so the Tokio runtime is never blocked on disk I/O. Only SQL and
//! lightweight row mapping belong inside [`AsyncDatabase::call`]; decoding of
//! keys and payloads happens on the caller's side.

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const IN_MEMORY: &str = ":memory:";

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => {
            DatabaseError::Connection("Connection closed".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open (or create) a database file.
    ///
    /// Creates the parent directory, enables WAL mode and runs pending
    /// migrations before returning.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening upload database");

        let conn = Connection::open(path)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Self::initialize(conn, path_str, true).await
    }

    /// Open a private in-memory database. Contents are lost on drop.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Self::initialize(conn, IN_MEMORY.to_string(), false).await
    }

    async fn initialize(conn: Connection, path: String, wal: bool) -> DatabaseResult<Self> {
        conn.call(move |conn| {
            if wal {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    ",
                )?;
            }
            conn.execute_batch(
                "
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        let db = Self { conn, path };
        db.call(|conn| migrations::run_migrations(conn)).await?;

        info!(path = %db.path, wal, "Upload database initialized");
        Ok(db)
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread while the calling task
    /// is parked.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // The inner DatabaseResult rides inside tokio_rusqlite's Ok variant.
        let outer = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that only produces rusqlite errors.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Database file path, `:memory:` for in-memory databases.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run a trivial statement to verify the executor is alive.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1"))
            .await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Wait for queued statements, then shut down the executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {e:?}")))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}
