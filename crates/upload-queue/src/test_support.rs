//! Shared fixtures for unit tests.

use crate::{
    ClearFilter, MemoryStore, RecordKey, RecordMeta, RecordStore, StoreError, StoreResult,
    StoredRecord, Transport, TransportError,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use tokio::sync::{Notify, Semaphore};

pub(crate) const LOCATION: &str = "events";
pub(crate) const URL: &str = "https://collector.test/upload";

/// 2024-05-01 10:<minute>:00 UTC.
pub(crate) fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
}

pub(crate) fn key(minute: u32) -> RecordKey {
    RecordKey::new("id", minute.to_string())
}

/// Insert one record per minute, keyed `id=<minute>`.
pub(crate) async fn seed(store: &dyn RecordStore, minutes: &[u32]) {
    for &minute in minutes {
        store
            .insert(LOCATION, &key(minute), at(minute), &json!({ "minute": minute }))
            .await
            .unwrap();
    }
}

/// Transport answering from a script, optionally holding each call until released.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    gate: Option<Semaphore>,
    entered: Notify,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            gate: None,
            entered: Notify::new(),
        }
    }

    /// Every call blocks until [`release`](Self::release) hands out a permit.
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub(crate) fn respond(&self, response: Result<Value, TransportError>) -> &Self {
        self.responses.lock().push_back(response);
        self
    }

    pub(crate) fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Wait until a call has reached the transport.
    pub(crate) async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, url: &str, batch: &[Value]) -> Result<Value, TransportError> {
        self.calls.lock().push((url.to_string(), batch.to_vec()));
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?
                .forget();
        }

        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted response".into())))
    }
}

/// Memory store whose reads fail for selected keys.
pub(crate) struct FlakyStore {
    pub(crate) inner: MemoryStore,
    failing_reads: Mutex<HashSet<RecordKey>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_reads: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn fail_read(&self, key: RecordKey) {
        self.failing_reads.lock().insert(key);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn insert(
        &self,
        location: &str,
        key: &RecordKey,
        timestamp: DateTime<Utc>,
        payload: &Value,
    ) -> StoreResult<()> {
        self.inner.insert(location, key, timestamp, payload).await
    }

    async fn list_meta(&self, location: &str) -> StoreResult<Vec<RecordMeta>> {
        self.inner.list_meta(location).await
    }

    async fn read(&self, location: &str, key: &RecordKey) -> StoreResult<Option<StoredRecord>> {
        if self.failing_reads.lock().contains(key) {
            return Err(StoreError::Backend(format!("cannot read {key}")));
        }
        self.inner.read(location, key).await
    }

    async fn delete(&self, location: &str, filter: &ClearFilter) -> StoreResult<u64> {
        self.inner.delete(location, filter).await
    }
}
