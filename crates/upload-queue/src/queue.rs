//! Upload queue for one storage location.

use crate::{
    Acknowledgement, ClearFilter, QueueError, QueueResult, QueueStorage, RecordKey, RecordMeta,
    RecordStore, StoredRecord, Transport, UploadHooks,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable per-queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Durable partition (table) owned by the queue.
    pub storage_location: String,
    /// Maximum records per dispatch. `None` sends everything outstanding.
    pub max_length: Option<usize>,
    /// Destination used when the hooks do not resolve one dynamically.
    pub static_url: Option<String>,
}

impl QueueOptions {
    pub fn new(storage_location: impl Into<String>) -> Self {
        Self {
            storage_location: storage_location.into(),
            max_length: None,
            static_url: None,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_static_url(mut self, url: impl Into<String>) -> Self {
        self.static_url = Some(url.into());
        self
    }
}

/// One record of a batch, already transformed for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub key: RecordKey,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Result of a [`UploadQueue::send`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing eligible; no request was made.
    Idle,
    /// A batch was dispatched and acknowledged.
    Delivered {
        records: usize,
        acknowledgement: Acknowledgement,
    },
}

/// Snapshot of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    /// Records in the durable store.
    pub stored: usize,
    /// Records currently awaiting a dispatch result.
    pub in_flight: usize,
    /// Timestamp of the oldest stored record.
    pub oldest: Option<DateTime<Utc>>,
}

/// Keys claimed for one dispatch; released when dropped.
struct PendingClaim<'a> {
    pending: &'a Mutex<HashSet<RecordKey>>,
    keys: Vec<RecordKey>,
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        for key in &self.keys {
            pending.remove(key);
        }
    }
}

/// Outbound queue over one storage location.
///
/// Selects the oldest stored records, posts them as one batch and lets the
/// hooks reconcile storage with the acknowledgement. Keys of a batch stay in
/// the pending set while the request is outstanding, so concurrent `send()`
/// calls never dispatch the same record twice.
pub struct UploadQueue {
    id: String,
    options: QueueOptions,
    store: Arc<dyn RecordStore>,
    storage: QueueStorage,
    transport: Arc<dyn Transport>,
    hooks: Arc<dyn UploadHooks>,
    pending: Mutex<HashSet<RecordKey>>,
}

impl UploadQueue {
    /// Create a queue. Rejects an empty location and `max_length == 0`.
    pub fn new(
        id: impl Into<String>,
        options: QueueOptions,
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        hooks: Arc<dyn UploadHooks>,
    ) -> QueueResult<Self> {
        let id = id.into();
        if options.storage_location.trim().is_empty() {
            return Err(QueueError::Configuration(format!(
                "queue '{id}' has an empty storage location"
            )));
        }
        if options.max_length == Some(0) {
            return Err(QueueError::Configuration(format!(
                "queue '{id}' has max_length 0"
            )));
        }

        let storage = QueueStorage::new(store.clone(), options.storage_location.clone());
        Ok(Self {
            id,
            options,
            store,
            storage,
            transport,
            hooks,
            pending: Mutex::new(HashSet::new()),
        })
    }

    /// Queue identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue configuration.
    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    fn location(&self) -> &str {
        &self.options.storage_location
    }

    /// Append a record stamped with the current time.
    pub async fn enqueue<T: Serialize>(&self, key: RecordKey, payload: &T) -> QueueResult<()> {
        self.enqueue_at(key, Utc::now(), payload).await
    }

    /// Append a record with an explicit timestamp.
    pub async fn enqueue_at<T: Serialize>(
        &self,
        key: RecordKey,
        timestamp: DateTime<Utc>,
        payload: &T,
    ) -> QueueResult<()> {
        let payload = serde_json::to_value(payload).map_err(crate::StoreError::from)?;
        self.store
            .insert(self.location(), &key, timestamp, &payload)
            .await?;
        debug!(queue = %self.id, key = %key, "Enqueued record");
        Ok(())
    }

    /// Timestamp of the oldest stored record, `None` when empty.
    pub async fn age(&self) -> QueueResult<Option<DateTime<Utc>>> {
        let meta = self.store.list_meta(self.location()).await?;
        Ok(meta.iter().map(|m| m.timestamp).min())
    }

    /// Destination of the next batch.
    pub async fn url(&self) -> QueueResult<String> {
        if let Some(url) = self.hooks.resolve_url().await? {
            return Ok(url);
        }
        self.options.static_url.clone().ok_or_else(|| {
            QueueError::Configuration(format!(
                "queue '{}' has no static URL and no URL resolver",
                self.id
            ))
        })
    }

    /// Wire form of a record, as shaped by the hooks.
    pub fn transform_send(&self, record: &StoredRecord) -> serde_json::Value {
        self.hooks.transform_send(record)
    }

    /// Reconcile storage with an acknowledgement through the hooks.
    pub async fn on_handle_response(&self, ack: &Acknowledgement) -> QueueResult<()> {
        self.hooks.on_handle_response(ack, &self.storage).await
    }

    /// Delete stored records matching the filter.
    pub async fn clear(&self, filter: &ClearFilter) -> QueueResult<u64> {
        let removed = self.storage.clear(filter).await?;
        debug!(queue = %self.id, removed, "Cleared records");
        Ok(removed)
    }

    /// Number of records awaiting a dispatch result.
    pub fn in_flight_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Keys awaiting a dispatch result.
    pub fn pending_keys(&self) -> Vec<RecordKey> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Stored and in-flight counts plus the oldest timestamp.
    pub async fn status(&self) -> QueueResult<QueueStatus> {
        let meta = self.store.list_meta(self.location()).await?;
        Ok(QueueStatus {
            stored: meta.len(),
            in_flight: self.in_flight_count(),
            oldest: meta.iter().map(|m| m.timestamp).min(),
        })
    }

    /// The batch the next `send()` would dispatch, without claiming it.
    ///
    /// Oldest records first, pending keys excluded, capped at `max_length`.
    /// Records that cannot be read are skipped.
    pub async fn next_batch(&self) -> QueueResult<Vec<BatchEntry>> {
        let meta = self.store.list_meta(self.location()).await?;
        let selection = self.select(meta);

        let mut batch = Vec::with_capacity(selection.len());
        for meta in selection {
            match self.store.read(self.location(), &meta.key).await {
                Ok(Some(record)) => batch.push(BatchEntry {
                    payload: self.transform_send(&record),
                    key: record.key,
                    timestamp: record.timestamp,
                }),
                Ok(None) => {
                    debug!(queue = %self.id, key = %meta.key, "Record vanished before read");
                }
                Err(e) => {
                    warn!(queue = %self.id, key = %meta.key, error = %e, "Skipping unreadable record");
                }
            }
        }
        Ok(batch)
    }

    fn select(&self, meta: Vec<RecordMeta>) -> Vec<RecordMeta> {
        let mut candidates: Vec<RecordMeta> = {
            let pending = self.pending.lock();
            meta.into_iter()
                .filter(|m| !pending.contains(&m.key))
                .collect()
        };

        candidates.sort_by_key(|m| m.timestamp);
        if let Some(max_length) = self.options.max_length {
            candidates.truncate(max_length);
        }
        candidates
    }

    /// Claim the batch keys. Keys claimed by a concurrent send in the
    /// meantime are dropped from the batch.
    fn claim(&self, batch: Vec<BatchEntry>) -> (PendingClaim<'_>, Vec<BatchEntry>) {
        let mut pending = self.pending.lock();
        let batch: Vec<BatchEntry> = batch
            .into_iter()
            .filter(|entry| pending.insert(entry.key.clone()))
            .collect();
        let keys = batch.iter().map(|e| e.key.clone()).collect();
        drop(pending);

        (
            PendingClaim {
                pending: &self.pending,
                keys,
            },
            batch,
        )
    }

    /// Flush one batch.
    ///
    /// On success the keys leave the pending set before the hooks reconcile
    /// storage. On failure they leave the pending set, nothing is deleted and
    /// the error is returned; the records are retried by a later call.
    pub async fn send(&self) -> QueueResult<SendOutcome> {
        let batch = self.next_batch().await?;
        if batch.is_empty() {
            debug!(queue = %self.id, "Nothing to send");
            return Ok(SendOutcome::Idle);
        }

        let url = self.url().await?;

        let (claim, batch) = self.claim(batch);
        if batch.is_empty() {
            debug!(queue = %self.id, "Selected records already in flight");
            return Ok(SendOutcome::Idle);
        }

        let (dispatched, payloads): (Vec<RecordMeta>, Vec<serde_json::Value>) = batch
            .into_iter()
            .map(|e| {
                let meta = RecordMeta {
                    key: e.key,
                    timestamp: e.timestamp,
                };
                (meta, e.payload)
            })
            .unzip();

        debug!(queue = %self.id, url = %url, records = dispatched.len(), "Dispatching batch");
        let result = self.transport.post(&url, &payloads).await;
        drop(claim);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(queue = %self.id, records = dispatched.len(), error = %e, "Batch dispatch failed");
                return Err(e.into());
            }
        };

        let acknowledgement = Acknowledgement::decode(response, &dispatched)?;
        self.on_handle_response(&acknowledgement).await?;

        info!(queue = %self.id, records = dispatched.len(), "Batch acknowledged");
        Ok(SendOutcome::Delivered {
            records: dispatched.len(),
            acknowledgement,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, key, seed, FlakyStore, ScriptedTransport, LOCATION, URL};
    use crate::{DefaultHooks, MemoryStore, RecordResult, TransportError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{OnceLock, Weak};

    fn queue_with(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        max_length: Option<usize>,
    ) -> UploadQueue {
        let mut options = QueueOptions::new(LOCATION).with_static_url(URL);
        options.max_length = max_length;
        UploadQueue::new("events", options, store, transport, Arc::new(DefaultHooks)).unwrap()
    }

    fn minutes_of(batch: &[Value]) -> Vec<u64> {
        batch.iter().map(|p| p["minute"].as_u64().unwrap()).collect()
    }

    #[test]
    fn test_new_rejects_zero_max_length() {
        let result = UploadQueue::new(
            "events",
            QueueOptions::new(LOCATION).with_max_length(0),
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedTransport::new()),
            Arc::new(DefaultHooks),
        );
        assert!(matches!(result, Err(QueueError::Configuration(_))));
    }

    #[test]
    fn test_new_rejects_empty_location() {
        let result = UploadQueue::new(
            "events",
            QueueOptions::new("  "),
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedTransport::new()),
            Arc::new(DefaultHooks),
        );
        assert!(matches!(result, Err(QueueError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_age_of_empty_and_seeded_store() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone(), Arc::new(ScriptedTransport::new()), None);
        assert_eq!(queue.age().await.unwrap(), None);

        seed(store.as_ref(), &[10, 0, 5]).await;
        assert_eq!(queue.age().await.unwrap(), Some(at(0)));
    }

    #[tokio::test]
    async fn test_url_without_static_or_resolver_is_configuration_error() {
        let queue = UploadQueue::new(
            "events",
            QueueOptions::new(LOCATION),
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedTransport::new()),
            Arc::new(DefaultHooks),
        )
        .unwrap();

        let err = queue.url().await.unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
    }

    struct DynamicUrl;

    #[async_trait]
    impl UploadHooks for DynamicUrl {
        async fn resolve_url(&self) -> QueueResult<Option<String>> {
            Ok(Some("https://dynamic.test/v2/upload".to_string()))
        }
    }

    #[tokio::test]
    async fn test_resolver_takes_precedence_over_static_url() {
        let queue = UploadQueue::new(
            "events",
            QueueOptions::new(LOCATION).with_static_url(URL),
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedTransport::new()),
            Arc::new(DynamicUrl),
        )
        .unwrap();

        assert_eq!(queue.url().await.unwrap(), "https://dynamic.test/v2/upload");
    }

    #[tokio::test]
    async fn test_send_on_empty_store_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let queue = queue_with(Arc::new(MemoryStore::new()), transport.clone(), None);

        assert_eq!(queue.send().await.unwrap(), SendOutcome::Idle);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unbounded_send_selects_everything_oldest_first() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[7, 2, 9, 0, 4]).await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Ok(json!({ "timestamp": at(9) })));
        let queue = queue_with(store.clone(), transport.clone(), None);

        let outcome = queue.send().await.unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered { records: 5, .. }));

        let calls = transport.calls();
        assert_eq!(calls[0].0, URL);
        assert_eq!(minutes_of(&calls[0].1), vec![0, 2, 4, 7, 9]);
        assert!(store.is_empty(LOCATION));
    }

    #[tokio::test]
    async fn test_max_length_selects_the_oldest_records() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[30, 10, 50, 20, 40]).await;
        let queue = queue_with(store, Arc::new(ScriptedTransport::new()), Some(3));

        let batch = queue.next_batch().await.unwrap();
        let keys: Vec<RecordKey> = batch.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![key(10), key(20), key(30)]);
    }

    #[tokio::test]
    async fn test_sub_second_timestamps_order_correctly() {
        let store = Arc::new(MemoryStore::new());
        let base = at(0);
        for (minute, millis) in [(1, 900), (2, 100)] {
            store
                .insert(
                    LOCATION,
                    &key(minute),
                    base + chrono::Duration::milliseconds(millis),
                    &json!({ "minute": minute }),
                )
                .await
                .unwrap();
        }
        let queue = queue_with(store, Arc::new(ScriptedTransport::new()), None);

        let keys: Vec<RecordKey> = queue
            .next_batch()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec![key(2), key(1)]);
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_records_and_releases_pending() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[0, 5, 10]).await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Err(TransportError::Request("offline".into())));
        let queue = queue_with(store.clone(), transport.clone(), Some(2));

        let err = queue.send().await.unwrap_err();
        assert!(matches!(err, QueueError::Transport(TransportError::Request(_))));

        assert_eq!(minutes_of(&transport.calls()[0].1), vec![0, 5]);
        assert_eq!(store.len(LOCATION), 3);
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_single_ack_for_record_timestamp_empties_store() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[3]).await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Ok(json!({ "timestamp": at(3) })));
        let queue = queue_with(store.clone(), transport, None);

        queue.send().await.unwrap();
        assert!(store.is_empty(LOCATION));
        assert_eq!(queue.age().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_per_record_ack_removes_only_accepted_records() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[1, 2, 3]).await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Ok(json!([
            { "accepted": true },
            { "accepted": false },
            { "accepted": true }
        ])));
        let queue = queue_with(store.clone(), transport, None);

        let outcome = queue.send().await.unwrap();
        match outcome {
            SendOutcome::Delivered { acknowledgement, .. } => assert_eq!(
                acknowledgement,
                Acknowledgement::PerRecord(vec![
                    RecordResult { key: key(1), timestamp: at(1), accepted: true },
                    RecordResult { key: key(2), timestamp: at(2), accepted: false },
                    RecordResult { key: key(3), timestamp: at(3), accepted: true },
                ])
            ),
            SendOutcome::Idle => panic!("expected a delivery"),
        }
        assert_eq!(store.keys(LOCATION), vec![key(2)]);
    }

    #[tokio::test]
    async fn test_unparseable_response_deletes_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[1, 2]).await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Ok(json!("thanks")));
        let queue = queue_with(store.clone(), transport, None);

        let err = queue.send().await.unwrap_err();
        assert!(matches!(err, QueueError::Transport(TransportError::InvalidResponse(_))));
        assert_eq!(store.len(LOCATION), 2);
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_url_fails_before_dispatch() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[1]).await;
        let transport = Arc::new(ScriptedTransport::new());
        let queue = UploadQueue::new(
            "events",
            QueueOptions::new(LOCATION),
            store.clone(),
            transport.clone(),
            Arc::new(DefaultHooks),
        )
        .unwrap();

        assert!(matches!(queue.send().await, Err(QueueError::Configuration(_))));
        assert_eq!(transport.call_count(), 0);
        assert_eq!(queue.in_flight_count(), 0);
        assert_eq!(store.len(LOCATION), 1);
    }

    #[tokio::test]
    async fn test_unreadable_records_are_skipped() {
        let store = Arc::new(FlakyStore::new());
        seed(store.as_ref(), &[1, 2, 3]).await;
        store.fail_read(key(2));
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Ok(json!({ "timestamp": at(3) })));
        let queue = queue_with(store.clone(), transport.clone(), None);

        queue.send().await.unwrap();
        assert_eq!(minutes_of(&transport.calls()[0].1), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_concurrent_sends_never_overlap() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[0, 5, 10]).await;
        let transport = Arc::new(ScriptedTransport::gated());
        transport
            .respond(Ok(json!([{ "accepted": true }, { "accepted": true }])))
            .respond(Ok(json!([{ "accepted": true }])));
        let queue = Arc::new(queue_with(store.clone(), transport.clone(), Some(2)));

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.send().await }
        });
        transport.wait_entered().await;
        assert_eq!(queue.in_flight_count(), 2);

        let second = tokio::spawn({
            let queue = queue.clone();
            async move { queue.send().await }
        });
        transport.wait_entered().await;
        assert_eq!(queue.in_flight_count(), 3);

        transport.release(1);
        first.await.unwrap().unwrap();
        transport.release(1);
        second.await.unwrap().unwrap();

        let calls = transport.calls();
        assert_eq!(minutes_of(&calls[0].1), vec![0, 5]);
        assert_eq!(minutes_of(&calls[1].1), vec![10]);
        assert!(store.is_empty(LOCATION));
        assert_eq!(queue.in_flight_count(), 0);
    }

    async fn update_in_flight_record(ack: Value) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(LOCATION, &key(1), at(1), &json!({ "v": "old" }))
            .await
            .unwrap();
        let transport = Arc::new(ScriptedTransport::gated());
        transport
            .respond(Ok(ack))
            .respond(Ok(json!([{ "accepted": true }])));
        let queue = Arc::new(queue_with(store.clone(), transport.clone(), None));

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.send().await }
        });
        transport.wait_entered().await;
        queue
            .enqueue_at(key(1), at(2), &json!({ "v": "new" }))
            .await
            .unwrap();

        transport.release(1);
        first.await.unwrap().unwrap();

        let record = store.read(LOCATION, &key(1)).await.unwrap().unwrap();
        assert_eq!(record.payload, json!({ "v": "new" }));
        assert_eq!(record.timestamp, at(2));

        transport.release(1);
        queue.send().await.unwrap();
        let calls = transport.calls();
        assert_eq!(calls[0].1, vec![json!({ "v": "old" })]);
        assert_eq!(calls[1].1, vec![json!({ "v": "new" })]);
        assert!(store.is_empty(LOCATION));
    }

    #[tokio::test]
    async fn test_per_record_ack_keeps_record_updated_in_flight() {
        update_in_flight_record(json!([{ "accepted": true }])).await;
    }

    #[tokio::test]
    async fn test_single_ack_keeps_record_updated_past_cutoff() {
        update_in_flight_record(json!({ "timestamp": at(1) })).await;
    }

    #[tokio::test]
    async fn test_send_while_everything_is_in_flight_is_idle() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[0]).await;
        let transport = Arc::new(ScriptedTransport::gated());
        transport.respond(Err(TransportError::Request("offline".into())));
        let queue = Arc::new(queue_with(store.clone(), transport.clone(), None));

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.send().await }
        });
        transport.wait_entered().await;

        assert_eq!(queue.send().await.unwrap(), SendOutcome::Idle);
        assert_eq!(transport.call_count(), 1);

        transport.release(1);
        assert!(first.await.unwrap().is_err());
        assert_eq!(queue.pending_keys(), Vec::<RecordKey>::new());
        assert_eq!(store.len(LOCATION), 1);
    }

    struct Uppercase;

    #[async_trait]
    impl UploadHooks for Uppercase {
        fn transform_send(&self, record: &StoredRecord) -> Value {
            json!({ "id": record.key.get("id"), "body": record.payload["text"].as_str().map(str::to_uppercase) })
        }
    }

    #[tokio::test]
    async fn test_transform_shapes_the_wire_payload() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(LOCATION, &key(1), at(1), &json!({ "text": "hello" }))
            .await
            .unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Ok(json!({ "timestamp": at(1) })));
        let queue = UploadQueue::new(
            "events",
            QueueOptions::new(LOCATION).with_static_url(URL),
            store,
            transport.clone(),
            Arc::new(Uppercase),
        )
        .unwrap();

        queue.send().await.unwrap();
        assert_eq!(transport.calls()[0].1, vec![json!({ "id": "1", "body": "HELLO" })]);
    }

    /// Records how many keys were pending when the response hook ran.
    #[derive(Default)]
    struct ObservingHooks {
        queue: OnceLock<Weak<UploadQueue>>,
        pending_at_ack: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl UploadHooks for ObservingHooks {
        async fn on_handle_response(
            &self,
            _ack: &Acknowledgement,
            _storage: &QueueStorage,
        ) -> QueueResult<()> {
            let queue = self.queue.get().and_then(Weak::upgrade);
            *self.pending_at_ack.lock() = queue.map(|q| q.in_flight_count());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pending_is_released_before_response_handling() {
        let store = Arc::new(MemoryStore::new());
        seed(store.as_ref(), &[1, 2]).await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Ok(json!({ "timestamp": at(2) })));
        let hooks = Arc::new(ObservingHooks::default());
        let queue = Arc::new(
            UploadQueue::new(
                "events",
                QueueOptions::new(LOCATION).with_static_url(URL),
                store.clone(),
                transport,
                hooks.clone(),
            )
            .unwrap(),
        );
        hooks.queue.set(Arc::downgrade(&queue)).ok();

        queue.send().await.unwrap();
        assert_eq!(*hooks.pending_at_ack.lock(), Some(0));
        // custom hook clears nothing
        assert_eq!(store.len(LOCATION), 2);
    }

    #[tokio::test]
    async fn test_clear_on_empty_store_is_noop() {
        let queue = queue_with(Arc::new(MemoryStore::new()), Arc::new(ScriptedTransport::new()), None);
        assert_eq!(queue.clear(&ClearFilter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_and_status() {
        #[derive(Serialize)]
        struct Click {
            x: i32,
            y: i32,
        }

        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone(), Arc::new(ScriptedTransport::new()), None);
        queue
            .enqueue_at(key(1), at(1), &Click { x: 1, y: 2 })
            .await
            .unwrap();
        queue.enqueue(key(2), &Click { x: 3, y: 4 }).await.unwrap();

        let record = store.read(LOCATION, &key(1)).await.unwrap().unwrap();
        assert_eq!(record.payload, json!({ "x": 1, "y": 2 }));

        let status = queue.status().await.unwrap();
        assert_eq!(
            status,
            QueueStatus {
                stored: 2,
                in_flight: 0,
                oldest: Some(at(1)),
            }
        );
    }
}
