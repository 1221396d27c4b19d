//! In-memory key-value store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{KeyValueStore, StorageError, StorageResult};

/// Process-local store.
///
/// Clones share the same map. A byte quota (keys plus values) can be set to
/// emulate a full browser storage, and the store can be switched off to
/// emulate storage being disabled.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<BTreeMap<String, String>>>,
    quota_bytes: Option<usize>,
    disabled: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses writes growing it past `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self { quota_bytes: Some(quota_bytes), ..Self::default() }
    }

    /// Make every operation fail with [`StorageError::Unavailable`]
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    /// Undo [`Self::disable`]
    pub fn enable(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn ensure_enabled(&self) -> StorageResult<()> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("storage is disabled".to_string()));
        }
        Ok(())
    }
}

fn used_bytes(data: &BTreeMap<String, String>) -> usize {
    data.iter().map(|(k, v)| k.len() + v.len()).sum()
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.ensure_enabled()?;
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.ensure_enabled()?;
        let mut data = self.data.lock();

        if let Some(limit) = self.quota_bytes {
            let existing = data.get(key).map_or(0, |old| key.len() + old.len());
            let needed = used_bytes(&data) - existing + key.len() + value.len();
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit });
            }
        }

        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.ensure_enabled()?;
        self.data.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_enabled()?;
        Ok(self.data.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates basic set/get/remove/keys behaviour.
    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();
        store.set("a", "1").expect("set");
        store.set("b", "2").expect("set");

        assert_eq!(store.get("a").expect("get"), Some("1".to_string()));
        assert_eq!(store.keys().expect("keys"), vec!["a".to_string(), "b".to_string()]);

        store.remove("a").expect("remove");
        store.remove("missing").expect("removing a missing key is fine");
        assert_eq!(store.get("a").expect("get"), None);
        assert_eq!(store.len(), 1);
    }

    /// Writes past the quota fail and leave the previous value intact.
    #[test]
    fn test_quota_exceeded() {
        let store = MemoryStore::with_quota(10);
        store.set("k", "12345").expect("fits");

        let err = store.set("k", "1234567890").expect_err("over quota");
        assert!(matches!(err, StorageError::QuotaExceeded { limit: 10, .. }));
        assert_eq!(store.get("k").expect("get"), Some("12345".to_string()));

        store.set("k", "123456789").expect("replacement counts old value as freed");
    }

    /// A disabled store fails every call until re-enabled.
    #[test]
    fn test_disable() {
        let store = MemoryStore::new();
        store.disable();
        assert!(matches!(store.set("a", "1"), Err(StorageError::Unavailable(_))));
        assert!(store.get("a").is_err());
        assert!(store.keys().is_err());

        store.enable();
        store.set("a", "1").expect("enabled again");
    }
}
