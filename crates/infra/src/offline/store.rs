//! Offline cache and mutation queue over a [`KeyValueStore`].
//!
//! Persisted layout:
//!
//! | Key | Value |
//! |-----|-------|
//! | `offline-<key>` | JSON encoded value (cached responses) |
//! | `offline-cache-<key>` | [`CacheEntry`] written by the offline fetcher |
//! | `offline-queue` | JSON array of [`QueuedOperation`] |
//!
//! Cache operations never fail: storage and encoding errors are logged at
//! `warn` and turned into `None` or a no-op. The queue is rewritten as a
//! whole on every change. Writers inside one process are serialized; two
//! processes sharing the same file store are last-writer-wins.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clinview_common::storage::{FileStore, KeyValueStore, MemoryStore, StorageResult};
use clinview_domain::constants::CACHE_STALE_AFTER_MS;
use clinview_domain::OfflineConfig;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// Prefix of every key the offline layer writes
pub const OFFLINE_PREFIX: &str = "offline-";

/// Key holding the operation queue
pub const QUEUE_KEY: &str = "offline-queue";

/// Sub-prefix used by the offline fetcher, relative to [`OFFLINE_PREFIX`]
pub const FETCH_CACHE_PREFIX: &str = "cache-";

/// Replay tag for a queued create
pub const CREATE_OPERATION: &str = "create";
/// Replay tag for a queued update
pub const UPDATE_OPERATION: &str = "update";
/// Replay tag for a queued delete
pub const DELETE_OPERATION: &str = "delete";

const ID_SUFFIX_LEN: usize = 9;
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

//==============================================================================
// Records
//==============================================================================

/// Cached value with the time it was stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Entry stamped now
    pub fn new(data: T) -> Self {
        Self { data, timestamp: Utc::now() }
    }

    pub fn age(&self) -> ChronoDuration {
        Utc::now() - self.timestamp
    }

    /// Older than five minutes
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp > stale_after()
    }
}

fn stale_after() -> ChronoDuration {
    ChronoDuration::milliseconds(i64::try_from(CACHE_STALE_AFTER_MS).unwrap_or(i64::MAX))
}

/// A mutation to replay once the server is reachable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineOperation {
    /// Replay tag, e.g. `create`
    #[serde(rename = "type")]
    pub operation_type: String,
    pub data: Value,
}

impl OfflineOperation {
    pub fn new(operation_type: impl Into<String>, data: Value) -> Self {
        Self { operation_type: operation_type.into(), data }
    }

    /// Create `resource`; its `resourceType` picks the endpoint
    pub fn create(resource: Value) -> Self {
        Self::new(CREATE_OPERATION, resource)
    }

    /// Update `resource`; needs `resourceType` and `id`
    pub fn update(resource: Value) -> Self {
        Self::new(UPDATE_OPERATION, resource)
    }

    /// Delete `<resource_type>/<id>`
    pub fn delete(resource_type: impl fmt::Display, id: impl Into<String>) -> Self {
        Self::new(
            DELETE_OPERATION,
            serde_json::json!({ "resourceType": resource_type.to_string(), "id": id.into() }),
        )
    }
}

/// Queue entry as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// `<epoch millis>-<9 random lowercase alphanumerics>`
    pub id: String,
    #[serde(rename = "type")]
    pub operation_type: String,
    pub data: Value,
    /// Enqueue time; entries written without one read as the epoch
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    /// Failed replays so far
    #[serde(default)]
    pub attempts: u32,
}

/// Outcome of one queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    /// Entries replayed successfully and removed
    pub processed: usize,
    /// Entries whose replay failed and stay queued
    pub failed: usize,
    /// Entries left in the queue afterwards, including ones added mid-drain
    pub remaining: usize,
}

fn generate_operation_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| char::from(ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())]))
        .collect();
    format!("{}-{suffix}", now.timestamp_millis())
}

//==============================================================================
// Store
//==============================================================================

/// Offline cache and operation queue.
///
/// Clones share the backing store and the queue locks.
#[derive(Clone)]
pub struct OfflineStore {
    kv: Arc<dyn KeyValueStore>,
    queue_lock: Arc<parking_lot::Mutex<()>>,
    drain_lock: Arc<tokio::sync::Mutex<()>>,
}

impl fmt::Debug for OfflineStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineStore").finish_non_exhaustive()
    }
}

impl OfflineStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            queue_lock: Arc::new(parking_lot::Mutex::new(())),
            drain_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Store over a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// File-backed store when `storage_path` is set, in-memory otherwise
    pub fn open(config: &OfflineConfig) -> StorageResult<Self> {
        match &config.storage_path {
            Some(path) => Ok(Self::new(Arc::new(FileStore::open(path)?))),
            None => Ok(Self::in_memory()),
        }
    }

    /// The backing key-value store
    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    // ---- cache -------------------------------------------------------------

    /// Save `data` under `offline-<key>`; failures are logged and dropped
    pub fn store_offline_data<T: Serialize + ?Sized>(&self, key: &str, data: &T) {
        let full_key = format!("{OFFLINE_PREFIX}{key}");
        let encoded = match serde_json::to_string(data) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key = %full_key, error = %err, "Failed to encode offline data");
                return;
            }
        };

        if let Err(err) = self.kv.set(&full_key, &encoded) {
            warn!(key = %full_key, error = %err, "Failed to store offline data");
        }
    }

    /// Load `offline-<key>`; missing, unreadable or undecodable data is `None`
    pub fn get_offline_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = format!("{OFFLINE_PREFIX}{key}");
        let raw = match self.kv.get(&full_key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key = %full_key, error = %err, "Failed to read offline data");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = %full_key, error = %err, "Failed to decode offline data");
                None
            }
        }
    }

    pub fn clear_offline_data(&self, key: &str) {
        let full_key = format!("{OFFLINE_PREFIX}{key}");
        if let Err(err) = self.kv.remove(&full_key) {
            warn!(key = %full_key, error = %err, "Failed to clear offline data");
        }
    }

    /// Remove every cached `offline-<prefix>*` value; returns how many went
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let full_prefix = format!("{OFFLINE_PREFIX}{prefix}");
        let keys = match self.kv.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(prefix = %full_prefix, error = %err, "Failed to list offline keys");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|key| key.starts_with(&full_prefix) && *key != QUEUE_KEY) {
            match self.kv.remove(key) {
                Ok(()) => removed += 1,
                Err(err) => warn!(key = %key, error = %err, "Failed to invalidate cache entry"),
            }
        }
        if removed > 0 {
            debug!(prefix = %full_prefix, removed, "Invalidated cached entries");
        }
        removed
    }

    /// Cache a fetched value with its timestamp under `offline-cache-<key>`
    pub fn store_fetch_cache<T: Serialize>(&self, key: &str, data: &T) {
        self.store_offline_data(&format!("{FETCH_CACHE_PREFIX}{key}"), &CacheEntry::new(data));
    }

    pub fn get_fetch_cache<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        self.get_offline_data(&format!("{FETCH_CACHE_PREFIX}{key}"))
    }

    // ---- queue -------------------------------------------------------------

    /// Read the queue; `None` when storage or the stored JSON is unusable
    fn read_queue(&self) -> Option<Vec<QueuedOperation>> {
        let raw = match self.kv.get(QUEUE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Some(Vec::new()),
            Err(err) => {
                warn!(error = %err, "Failed to read offline queue");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(queue) => Some(queue),
            Err(err) => {
                warn!(error = %err, "Offline queue is corrupt");
                None
            }
        }
    }

    fn write_queue(&self, queue: &[QueuedOperation]) -> bool {
        let encoded = match serde_json::to_string(queue) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "Failed to encode offline queue");
                return false;
            }
        };

        match self.kv.set(QUEUE_KEY, &encoded) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "Failed to write offline queue");
                false
            }
        }
    }

    /// Append an operation; returns its id, or `None` if it was not stored.
    ///
    /// A corrupt queue is left untouched rather than overwritten.
    #[instrument(skip(self, operation), fields(operation_type = %operation.operation_type))]
    pub fn queue_offline_operation(&self, operation: OfflineOperation) -> Option<String> {
        let _guard = self.queue_lock.lock();
        let mut queue = self.read_queue()?;

        let now = Utc::now();
        let id = generate_operation_id(now);
        queue.push(QueuedOperation {
            id: id.clone(),
            operation_type: operation.operation_type,
            data: operation.data,
            timestamp: now,
            attempts: 0,
        });

        if !self.write_queue(&queue) {
            return None;
        }
        debug!(id = %id, queue_size = queue.len(), "Queued offline operation");
        Some(id)
    }

    /// Pending entries in enqueue order; empty when unreadable
    pub fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.read_queue().unwrap_or_default()
    }

    /// Pending entry count; 0 when unreadable
    pub fn get_queue_size(&self) -> usize {
        self.read_queue().map_or(0, |queue| queue.len())
    }

    pub fn clear_offline_queue(&self) {
        let _guard = self.queue_lock.lock();
        if let Err(err) = self.kv.remove(QUEUE_KEY) {
            warn!(error = %err, "Failed to clear offline queue");
        }
    }

    /// Replay queued operations in order, one at a time.
    ///
    /// Succeeded entries are removed; failed ones stay with `attempts`
    /// incremented. Entries queued while the drain runs are kept. Concurrent
    /// drains wait for each other.
    #[instrument(skip_all)]
    pub async fn process_offline_queue<F, Fut, E>(&self, mut processor: F) -> QueueReport
    where
        F: FnMut(QueuedOperation) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let _drain = self.drain_lock.lock().await;

        let Some(snapshot) = self.read_queue() else {
            return QueueReport::default();
        };
        if snapshot.is_empty() {
            return QueueReport::default();
        }

        info!(count = snapshot.len(), "Processing offline queue");

        let mut succeeded = HashSet::new();
        let mut failed = HashSet::new();
        for operation in snapshot {
            let id = operation.id.clone();
            match processor(operation).await {
                Ok(()) => {
                    debug!(id = %id, "Replayed offline operation");
                    succeeded.insert(id);
                }
                Err(err) => {
                    warn!(id = %id, error = %err, "Failed to process offline operation");
                    failed.insert(id);
                }
            }
        }

        let _guard = self.queue_lock.lock();
        let Some(current) = self.read_queue() else {
            return QueueReport { processed: succeeded.len(), failed: failed.len(), remaining: 0 };
        };
        let remaining: Vec<QueuedOperation> = current
            .into_iter()
            .filter(|operation| !succeeded.contains(&operation.id))
            .map(|mut operation| {
                if failed.contains(&operation.id) {
                    operation.attempts = operation.attempts.saturating_add(1);
                }
                operation
            })
            .collect();
        self.write_queue(&remaining);

        let report =
            QueueReport { processed: succeeded.len(), failed: failed.len(), remaining: remaining.len() };
        info!(
            processed = report.processed,
            failed = report.failed,
            remaining = report.remaining,
            "Offline queue processed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn store_with_backend() -> (OfflineStore, MemoryStore) {
        let backend = MemoryStore::new();
        (OfflineStore::new(Arc::new(backend.clone())), backend)
    }

    #[test]
    fn test_cache_round_trip_uses_prefix() {
        let (store, backend) = store_with_backend();
        store.store_offline_data("patients", &json!([{"id": "p1"}]));

        let cached: Option<Value> = store.get_offline_data("patients");
        assert_eq!(cached, Some(json!([{"id": "p1"}])));
        assert!(backend.get("offline-patients").expect("get").is_some());

        store.clear_offline_data("patients");
        assert_eq!(store.get_offline_data::<Value>("patients"), None);
    }

    /// Validates that storage failures never escape the cache API.
    ///
    /// Assertions:
    /// - Writes past the quota are dropped silently.
    /// - Reads from disabled storage yield `None`.
    #[test]
    fn test_cache_failures_are_swallowed() {
        let store = OfflineStore::new(Arc::new(MemoryStore::with_quota(16)));
        store.store_offline_data("big", &"x".repeat(64));
        assert_eq!(store.get_offline_data::<String>("big"), None);

        let (store, backend) = store_with_backend();
        store.store_offline_data("k", &1);
        backend.disable();
        assert_eq!(store.get_offline_data::<i32>("k"), None);
        store.clear_offline_data("k");
        assert_eq!(store.get_queue_size(), 0);
        assert_eq!(store.queue_offline_operation(OfflineOperation::new("create", json!({}))), None);
    }

    #[test]
    fn test_undecodable_cache_value_is_none() {
        let (store, backend) = store_with_backend();
        backend.set("offline-bad", "{not json").expect("set");
        assert_eq!(store.get_offline_data::<Value>("bad"), None);
    }

    #[test]
    fn test_queue_ids_and_order() {
        let store = OfflineStore::in_memory();
        let first = store
            .queue_offline_operation(OfflineOperation::new("create", json!({"n": 1})))
            .expect("queued");
        let second = store
            .queue_offline_operation(OfflineOperation::new("update", json!({"n": 2})))
            .expect("queued");

        assert_ne!(first, second);
        let (millis, suffix) = first.split_once('-').expect("id separator");
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        let pending = store.pending_operations();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[1].operation_type, "update");
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(store.get_queue_size(), 2);
    }

    /// Validates selective removal during a drain.
    ///
    /// Assertions:
    /// - Entries are processed in enqueue order.
    /// - Only the failed entry remains, with one recorded attempt.
    #[tokio::test]
    async fn test_process_queue_keeps_failures() {
        let store = OfflineStore::in_memory();
        for n in 1..=3 {
            store.queue_offline_operation(OfflineOperation::new("create", json!(n.to_string())));
        }

        let seen = Mutex::new(Vec::new());
        let report = store
            .process_offline_queue(|operation| {
                let value = operation.data.as_str().unwrap_or_default().to_string();
                seen.lock().expect("lock").push(value.clone());
                async move {
                    if value == "2" {
                        Err("server rejected")
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(*seen.lock().expect("lock"), vec!["1", "2", "3"]);
        assert_eq!(report, QueueReport { processed: 2, failed: 1, remaining: 1 });

        let pending = store.pending_operations();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].data, json!("2"));
        assert_eq!(pending[0].attempts, 1);
    }

    /// Validates that scattered failures keep their relative order.
    #[tokio::test]
    async fn test_process_queue_keeps_failure_order() {
        let store = OfflineStore::in_memory();
        for label in ["a", "b", "c", "d", "e", "f"] {
            store.queue_offline_operation(OfflineOperation::new("update", json!(label)));
        }

        let report = store
            .process_offline_queue(|operation| async move {
                match operation.data.as_str() {
                    Some("b" | "d" | "f") => Err("conflict"),
                    _ => Ok(()),
                }
            })
            .await;

        assert_eq!(report, QueueReport { processed: 3, failed: 3, remaining: 3 });
        let labels: Vec<Value> = store.pending_operations().into_iter().map(|op| op.data).collect();
        assert_eq!(labels, vec![json!("b"), json!("d"), json!("f")]);
    }

    /// A create that succeeds and an update that fails leave only the update.
    #[tokio::test]
    async fn test_process_queue_create_then_failed_update() {
        let (store, backend) = store_with_backend();
        backend
            .set(
                QUEUE_KEY,
                r#"[{"id":"1","type":"create","data":{}},{"id":"2","type":"update","data":{}}]"#,
            )
            .expect("seed queue");
        assert_eq!(store.get_queue_size(), 2);

        let report = store
            .process_offline_queue(|operation| async move {
                if operation.id == "2" {
                    Err("update rejected")
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(report.remaining, 1);
        let pending = store.pending_operations();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "2");
        assert_eq!(pending[0].operation_type, "update");
        assert_eq!(pending[0].data, json!({}));
    }

    #[tokio::test]
    async fn test_operations_queued_during_drain_survive() {
        let store = OfflineStore::in_memory();
        store.queue_offline_operation(OfflineOperation::new("create", json!("a")));

        let inner = store.clone();
        let report = store
            .process_offline_queue(move |_| {
                inner.queue_offline_operation(OfflineOperation::new("create", json!("late")));
                async { Ok::<(), String>(()) }
            })
            .await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(store.pending_operations()[0].data, json!("late"));
    }

    #[test]
    fn test_corrupt_queue_is_not_overwritten() {
        let (store, backend) = store_with_backend();
        backend.set(QUEUE_KEY, "[{broken").expect("set");

        assert_eq!(store.get_queue_size(), 0);
        assert!(store.pending_operations().is_empty());
        assert_eq!(store.queue_offline_operation(OfflineOperation::new("create", json!({}))), None);
        assert_eq!(backend.get(QUEUE_KEY).expect("get").as_deref(), Some("[{broken"));
    }

    #[test]
    fn test_invalidate_prefix_spares_queue_and_other_types() {
        let store = OfflineStore::in_memory();
        store.store_offline_data("Patient:read:p1", &json!({"id": "p1"}));
        store.store_offline_data("Patient:search:{}", &json!([]));
        store.store_offline_data("Observation:read:o1", &json!({"id": "o1"}));
        store.queue_offline_operation(OfflineOperation::new("create", json!({})));

        assert_eq!(store.invalidate_prefix("Patient:"), 2);
        assert!(store.get_offline_data::<Value>("Patient:read:p1").is_none());
        assert!(store.get_offline_data::<Value>("Observation:read:o1").is_some());
        assert_eq!(store.get_queue_size(), 1);
    }

    /// Validates the five-minute staleness window.
    ///
    /// Assertions:
    /// - An entry exactly five minutes old is fresh.
    /// - One millisecond later it is stale.
    #[test]
    fn test_cache_entry_staleness() {
        let stored = Utc::now();
        let entry = CacheEntry { data: 1, timestamp: stored };

        assert!(!entry.is_stale_at(stored + ChronoDuration::minutes(4)));
        assert!(!entry.is_stale_at(stored + ChronoDuration::minutes(5)));
        assert!(entry.is_stale_at(stored + ChronoDuration::minutes(5) + ChronoDuration::milliseconds(1)));
        assert!(!CacheEntry::new(1).is_stale());
    }

    #[test]
    fn test_fetch_cache_key_layout() {
        let (store, backend) = store_with_backend();
        store.store_fetch_cache("vitals", &json!({"hr": 72}));

        let entry: CacheEntry<Value> = store.get_fetch_cache("vitals").expect("cached");
        assert_eq!(entry.data, json!({"hr": 72}));
        assert!(backend.get("offline-cache-vitals").expect("get").is_some());
    }
}
