//! Offline support: response cache and mutation queue, connectivity
//! detection and offline-aware fetching.

pub mod connectivity;
pub mod fetcher;
pub mod store;

pub use connectivity::{
    ConnectivityCallback, ConnectivityConfig, ConnectivityEvent, ConnectivityMonitor,
    ConnectivityProbe, ConnectivityState, HttpProbe, MonitorError, MonitorResult,
};
pub use fetcher::{FetchError, OfflineFetcher};
pub use store::{
    CacheEntry, OfflineOperation, OfflineStore, QueueReport, QueuedOperation, CREATE_OPERATION,
    DELETE_OPERATION, FETCH_CACHE_PREFIX, OFFLINE_PREFIX, QUEUE_KEY, UPDATE_OPERATION,
};
