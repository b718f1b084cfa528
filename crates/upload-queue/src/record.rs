//! Record model shared by the queue and the durable store.

use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Structured record identifier: a set of (column, value) pairs.
///
/// Two keys are equal only when they carry exactly the same columns with
/// exactly the same values. Columns are kept sorted, so the JSON form is
/// canonical and can be used as a storage key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(BTreeMap<String, String>);

impl RecordKey {
    /// Key with a single column.
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(column.into(), value.into());
        Self(columns)
    }

    /// Add (or replace) a column.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    /// Build a key from `column=value` strings.
    pub fn parse_pairs<'a, I>(pairs: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut columns = BTreeMap::new();
        for pair in pairs {
            let (column, value) = pair
                .split_once('=')
                .ok_or_else(|| StoreError::InvalidKey(format!("expected column=value, got '{pair}'")))?;
            columns.insert(column.trim().to_string(), value.to_string());
        }
        let key = Self(columns);
        key.validate()?;
        Ok(key)
    }

    /// Value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Iterate over (column, value) pairs in column order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no columns (never valid for storage).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject keys that cannot locate a record.
    pub fn validate(&self) -> StoreResult<()> {
        if self.0.is_empty() {
            return Err(StoreError::InvalidKey("key has no columns".to_string()));
        }
        if self.0.keys().any(|c| c.is_empty()) {
            return Err(StoreError::InvalidKey("empty column name".to_string()));
        }
        Ok(())
    }

    /// Canonical JSON form (columns sorted).
    pub fn to_canonical_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Parse the canonical JSON form.
    pub fn from_canonical_json(raw: &str) -> StoreResult<Self> {
        let key: Self = serde_json::from_str(raw)?;
        key.validate()?;
        Ok(key)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (column, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{column}={value}")?;
        }
        Ok(())
    }
}

/// Key and timestamp of a stored record, as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub key: RecordKey,
    pub timestamp: DateTime<Utc>,
}

/// A record as persisted in the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: RecordKey,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl StoredRecord {
    /// Metadata view of this record.
    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            key: self.key.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Deserialize the payload into an application type.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Selects records to delete.
///
/// A record matches when the key (if given) is equal AND the timestamp is at
/// or before `until` (if given). The default filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearFilter {
    pub key: Option<RecordKey>,
    pub until: Option<DateTime<Utc>>,
}

impl ClearFilter {
    /// Match every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match a single record by key.
    pub fn key(key: RecordKey) -> Self {
        Self {
            key: Some(key),
            until: None,
        }
    }

    /// Match every record at or before the cutoff.
    pub fn until(cutoff: DateTime<Utc>) -> Self {
        Self {
            key: None,
            until: Some(cutoff),
        }
    }

    /// Whether a record with this key and timestamp matches.
    pub fn matches(&self, key: &RecordKey, timestamp: DateTime<Utc>) -> bool {
        if let Some(expected) = &self.key {
            if expected != key {
                return false;
            }
        }
        match self.until {
            Some(cutoff) => timestamp <= cutoff,
            None => true,
        }
    }
}
