//! Acknowledgements returned by the remote endpoint.

use crate::{RecordKey, RecordMeta, TransportError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Server-confirmed receipt of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Acknowledgement {
    /// Every local record at or before `timestamp` may be purged.
    Single { timestamp: DateTime<Utc> },
    /// One result per dispatched record.
    PerRecord(Vec<RecordResult>),
}

/// Outcome for a single dispatched record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordResult {
    pub key: RecordKey,
    /// Timestamp of the version that was dispatched.
    pub timestamp: DateTime<Utc>,
    pub accepted: bool,
}

#[derive(Deserialize)]
struct WireSingleAck {
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct WireRecordResult {
    #[serde(default)]
    key: Option<RecordKey>,
    #[serde(alias = "success")]
    accepted: bool,
}

impl Acknowledgement {
    /// Decode a response body against the dispatched batch.
    ///
    /// Array entries carrying a `key` are matched by key, the rest by
    /// position. Keyed entries naming a record outside the batch are dropped.
    pub fn decode(response: Value, batch: &[RecordMeta]) -> Result<Self, TransportError> {
        match response {
            Value::Array(entries) => {
                if entries.len() > batch.len() {
                    return Err(TransportError::InvalidResponse(format!(
                        "{} results for a batch of {}",
                        entries.len(),
                        batch.len()
                    )));
                }

                let mut results = Vec::with_capacity(entries.len());
                for (position, entry) in entries.into_iter().enumerate() {
                    let wire: WireRecordResult = serde_json::from_value(entry).map_err(|e| {
                        TransportError::InvalidResponse(format!("result {position}: {e}"))
                    })?;

                    let dispatched = match wire.key {
                        Some(key) => match batch.iter().find(|m| m.key == key) {
                            Some(meta) => meta,
                            None => {
                                warn!(key = %key, "Ignoring result for a record outside the batch");
                                continue;
                            }
                        },
                        None => &batch[position],
                    };
                    results.push(RecordResult {
                        key: dispatched.key.clone(),
                        timestamp: dispatched.timestamp,
                        accepted: wire.accepted,
                    });
                }
                Ok(Self::PerRecord(results))
            }
            Value::Object(_) => {
                let wire: WireSingleAck = serde_json::from_value(response)
                    .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
                Ok(Self::Single {
                    timestamp: wire.timestamp,
                })
            }
            other => Err(TransportError::InvalidResponse(format!(
                "expected an object or an array, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Results the server accepted (per-record form only).
    pub fn accepted(&self) -> Vec<&RecordResult> {
        match self {
            Self::Single { .. } => Vec::new(),
            Self::PerRecord(results) => results.iter().filter(|r| r.accepted).collect(),
        }
    }

    /// Keys the server accepted (per-record form only).
    pub fn accepted_keys(&self) -> Vec<&RecordKey> {
        self.accepted().into_iter().map(|r| &r.key).collect()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
