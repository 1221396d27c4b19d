//! JSON-file backed key-value store

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use super::{KeyValueStore, StorageResult};

/// Store persisted as a single JSON object on disk.
///
/// The map is loaded once at open and mirrored in memory. Every mutation
/// rewrites the file through a temporary sibling followed by a rename, so a
/// crash never leaves a half-written document behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A file that does not parse as a JSON string map is treated as empty
    /// and replaced on the next write.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(err) => {
                    warn!(error = %err, "Storage file is not a JSON string map, starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            BTreeMap::new()
        };

        debug!(entries = data.len(), "Opened file store");
        Ok(Self { path, data: Mutex::new(data) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(data)?;
        let temp_path = self.path.with_extension("tmp");

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.lock();
        let previous = data.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&data) {
            match previous {
                Some(old) => data.insert(key.to_string(), old),
                None => data.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut data = self.data.lock();
        let Some(previous) = data.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&data) {
            data.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    /// Values survive reopening the store.
    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("store.json");

        {
            let store = FileStore::open(&path).expect("open");
            store.set("offline-queue", "[]").expect("set");
            store.set("offline-Patient:read:{}", "{}").expect("set");
            store.remove("offline-Patient:read:{}").expect("remove");
        }

        let reopened = FileStore::open(&path).expect("reopen");
        assert_eq!(reopened.get("offline-queue").expect("get"), Some("[]".to_string()));
        assert_eq!(reopened.keys().expect("keys"), vec!["offline-queue".to_string()]);
        assert!(!path.with_extension("tmp").exists(), "temp file renamed away");
    }

    /// A corrupt file opens as an empty store.
    #[test]
    fn test_corrupt_file_opens_empty() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").expect("write");

        let store = FileStore::open(&path).expect("open");
        assert!(store.keys().expect("keys").is_empty());
        store.set("k", "v").expect("set overwrites corrupt file");
        assert_eq!(FileStore::open(&path).expect("reopen").get("k").expect("get"), Some("v".into()));
    }
}
