//! Offline-aware data fetching.
//!
//! Wraps a fetch function with the connectivity state: while offline the
//! function is not called at all, and every success is cached under
//! `offline-cache-<key>` so views can fall back to the last known value.

use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connectivity::ConnectivityState;
use super::store::{CacheEntry, OfflineStore};

/// Why a fetch produced no fresh value
#[derive(Debug, Error)]
pub enum FetchError<E> {
    /// Skipped because the monitor reports no connection
    #[error("Offline: no network connection")]
    Offline,

    #[error("{0}")]
    Failed(E),
}

/// Fetch helper bound to one connectivity feed
#[derive(Debug, Clone)]
pub struct OfflineFetcher {
    store: OfflineStore,
    connectivity: watch::Receiver<ConnectivityState>,
}

impl OfflineFetcher {
    pub fn new(store: OfflineStore, connectivity: watch::Receiver<ConnectivityState>) -> Self {
        Self { store, connectivity }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.borrow().is_online
    }

    /// Run `fetch` unless offline, caching its value under `key`
    pub async fn fetch<T, F, Fut, E>(&self, key: &str, fetch: F) -> Result<T, FetchError<E>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_online() {
            debug!(key, "Skipping fetch while offline");
            return Err(FetchError::Offline);
        }

        let value = fetch().await.map_err(FetchError::Failed)?;
        self.store.store_fetch_cache(key, &value);
        Ok(value)
    }

    /// Last cached value for `key` with its timestamp; see
    /// [`CacheEntry::is_stale`]
    pub fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        self.store.get_fetch_cache(key)
    }

    /// Spawn a watcher that repeats `fetch` after every reconnect until
    /// `cancel` fires or the connectivity feed closes
    pub fn refetch_on_reconnect<T, F, Fut, E>(
        &self,
        key: impl Into<String>,
        fetch: F,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let key = key.into();
        let fetcher = self.clone();
        let mut updates = self.connectivity.clone();
        updates.borrow_and_update();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            debug!(key = %key, "Connectivity feed closed");
                            break;
                        }
                        let reconnected = {
                            let state = updates.borrow_and_update();
                            state.is_online && state.was_offline
                        };
                        if !reconnected {
                            continue;
                        }

                        info!(key = %key, "Refetching after reconnect");
                        if let Err(err) = fetcher.fetch(&key, &fetch).await {
                            warn!(key = %key, error = %err, "Refetch after reconnect failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::offline::connectivity::{
        ConnectivityConfig, ConnectivityEvent, ConnectivityMonitor, ConnectivityProbe,
    };

    struct AlwaysOnline;

    #[async_trait]
    impl ConnectivityProbe for AlwaysOnline {
        async fn probe(&self) -> bool {
            true
        }
    }

    fn monitor(online: bool) -> ConnectivityMonitor {
        ConnectivityMonitor::new(
            ConnectivityConfig::new("http://unused/metadata"),
            Arc::new(AlwaysOnline),
            online,
        )
    }

    #[tokio::test]
    async fn test_fetch_caches_success() {
        let monitor = monitor(true);
        let fetcher = OfflineFetcher::new(OfflineStore::in_memory(), monitor.subscribe());

        let value = fetcher
            .fetch("vitals", || async { Ok::<_, String>(json!({"hr": 72})) })
            .await
            .expect("fetch");
        assert_eq!(value, json!({"hr": 72}));

        let cached: CacheEntry<Value> = fetcher.cached("vitals").expect("cached");
        assert_eq!(cached.data, json!({"hr": 72}));
        assert!(!cached.is_stale());
    }

    /// Validates that nothing runs while offline.
    ///
    /// Assertions:
    /// - The fetch closure is never invoked.
    /// - The error is `Offline` and earlier cached data is still readable.
    #[tokio::test]
    async fn test_offline_skips_fetch() {
        let monitor = monitor(true);
        let fetcher = OfflineFetcher::new(OfflineStore::in_memory(), monitor.subscribe());
        fetcher.fetch("labs", || async { Ok::<_, String>(json!([1, 2])) }).await.expect("fetch");

        monitor.handle_platform_event(ConnectivityEvent::Offline);
        let calls = AtomicUsize::new(0);
        let result = fetcher
            .fetch("labs", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(json!([])) }
            })
            .await;

        assert!(matches!(result, Err(FetchError::Offline)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.cached::<Value>("labs").map(|entry| entry.data), Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let monitor = monitor(true);
        let fetcher = OfflineFetcher::new(OfflineStore::in_memory(), monitor.subscribe());

        let result = fetcher.fetch("meds", || async { Err::<Value, _>("HTTP 500") }).await;

        assert!(matches!(result, Err(FetchError::Failed("HTTP 500"))));
        assert!(fetcher.cached::<Value>("meds").is_none());
    }

    #[tokio::test]
    async fn test_refetch_on_reconnect() {
        let monitor = monitor(false);
        let fetcher = OfflineFetcher::new(OfflineStore::in_memory(), monitor.subscribe());
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let handle = fetcher.refetch_on_reconnect(
            "encounters",
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok::<_, String>(json!({"fetch": n})) }
            },
            cancel.clone(),
        );

        monitor.handle_platform_event(ConnectivityEvent::Online);
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fetcher.cached::<Value>("encounters").map(|entry| entry.data),
            Some(json!({"fetch": 1}))
        );

        cancel.cancel();
        handle.await.expect("watcher ends");
    }
}
