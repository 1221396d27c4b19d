//! Synchronous string key-value storage.
//!
//! The offline layer persists cached responses and its operation queue into
//! a store with local-storage semantics: string keys, string values, and
//! writes that may fail (quota, disabled storage, I/O). Two backends ship
//! here:
//!
//! - [`MemoryStore`]: process-local map with an optional byte quota
//! - [`FileStore`]: the same map persisted as one JSON document, rewritten
//!   atomically on every mutation

pub mod error;
pub mod file;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;

/// String key-value store with fallible operations
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Insert or replace a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a value; deleting a missing key is not an error
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Snapshot of all keys currently stored
    fn keys(&self) -> StorageResult<Vec<String>>;
}
