//! `RecordStore` backed by the `upload_records` table.

use crate::{AsyncDatabase, DatabaseError, DatabaseResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use tracing::{debug, warn};
use upload_queue::{
    ClearFilter, RecordKey, RecordMeta, RecordStore, StoreResult, StoredRecord,
};

/// SQLite durable store. Each storage location is a partition of one table.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: AsyncDatabase,
}

impl SqliteRecordStore {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        Ok(Self::new(AsyncDatabase::open(path).await?))
    }

    pub async fn open_in_memory() -> DatabaseResult<Self> {
        Ok(Self::new(AsyncDatabase::open_in_memory().await?))
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    /// Number of records stored under `location`.
    pub async fn count(&self, location: &str) -> DatabaseResult<u64> {
        let location = location.to_string();
        let count: i64 = self
            .db
            .call_sqlite(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM upload_records WHERE location = ?1",
                    [&location],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count as u64)
    }

    /// Locations holding at least one record.
    pub async fn locations(&self) -> DatabaseResult<Vec<String>> {
        self.db
            .call_sqlite(|conn| {
                let mut stmt = conn
                    .prepare("SELECT DISTINCT location FROM upload_records ORDER BY location")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await
    }
}

fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

fn from_micros(micros: i64) -> DatabaseResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| DatabaseError::InvalidData(format!("timestamp out of range: {micros}")))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(
        &self,
        location: &str,
        key: &RecordKey,
        timestamp: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> StoreResult<()> {
        key.validate()?;
        let location = location.to_string();
        let record_key = key.to_canonical_json()?;
        let payload = serde_json::to_string(payload)?;
        let timestamp_us = to_micros(timestamp);

        self.db
            .call_sqlite(move |conn| {
                conn.execute(
                    "INSERT INTO upload_records (location, record_key, timestamp_us, payload)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(location, record_key)
                     DO UPDATE SET timestamp_us = excluded.timestamp_us,
                                   payload = excluded.payload",
                    params![location, record_key, timestamp_us, payload],
                )
            })
            .await?;
        Ok(())
    }

    async fn list_meta(&self, location: &str) -> StoreResult<Vec<RecordMeta>> {
        let location_name = location.to_string();
        let rows: Vec<(String, i64)> = self
            .db
            .call_sqlite(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT record_key, timestamp_us FROM upload_records
                     WHERE location = ?1 ORDER BY rowid",
                )?;
                let rows =
                    stmt.query_map([&location_name], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })
            .await?;

        let mut meta = Vec::with_capacity(rows.len());
        for (raw_key, micros) in rows {
            let key = match RecordKey::from_canonical_json(&raw_key) {
                Ok(key) => key,
                Err(e) => {
                    warn!(location = %location, record_key = %raw_key, error = %e, "Skipping row with undecodable key");
                    continue;
                }
            };
            let timestamp = match from_micros(micros) {
                Ok(timestamp) => timestamp,
                Err(e) => {
                    warn!(location = %location, key = %key, error = %e, "Skipping row with invalid timestamp");
                    continue;
                }
            };
            meta.push(RecordMeta { key, timestamp });
        }
        Ok(meta)
    }

    async fn read(&self, location: &str, key: &RecordKey) -> StoreResult<Option<StoredRecord>> {
        let location = location.to_string();
        let record_key = key.to_canonical_json()?;
        let row: Option<(i64, String)> = self
            .db
            .call_sqlite(move |conn| {
                conn.query_row(
                    "SELECT timestamp_us, payload FROM upload_records
                     WHERE location = ?1 AND record_key = ?2",
                    params![location, record_key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
            })
            .await?;

        let Some((micros, payload)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredRecord {
            key: key.clone(),
            timestamp: from_micros(micros)?,
            payload: serde_json::from_str(&payload)?,
        }))
    }

    async fn delete(&self, location: &str, filter: &ClearFilter) -> StoreResult<u64> {
        let location_name = location.to_string();
        let record_key = filter
            .key
            .as_ref()
            .map(RecordKey::to_canonical_json)
            .transpose()?;
        let cutoff = filter.until.map(to_micros);

        let removed = self
            .db
            .call_sqlite(move |conn| {
                conn.execute(
                    "DELETE FROM upload_records
                     WHERE location = ?1
                       AND (?2 IS NULL OR record_key = ?2)
                       AND (?3 IS NULL OR timestamp_us <= ?3)",
                    params![location_name, record_key, cutoff],
                )
            })
            .await?;

        debug!(location = %location, removed, "Deleted upload records");
        Ok(removed as u64)
    }
}
