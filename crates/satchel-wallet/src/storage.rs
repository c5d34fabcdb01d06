//! Key-value storage backends.
//!
//! [`MemoryStore`] keeps everything in process. [`FileStore`] persists a
//! single JSON object and replaces the file through a temp file and rename,
//! so a batch lands entirely or not at all.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use satchel_core::error::StoreError;
use satchel_core::traits::KeyValueStore;

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut map = self.entries.write();
        for (k, v) in entries {
            map.insert((*k).to_string(), v.clone());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut map = self.entries.write();
        for k in keys {
            map.remove(k);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// JSON file store.
///
/// The whole map is cached in memory and rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_out(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        let json = serde_json::to_vec_pretty(entries).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        let mut file = private_file(&tmp).map_err(|e| StoreError::Io(e.to_string()))?;
        file.write_all(&json).map_err(|e| StoreError::Io(e.to_string()))?;
        file.sync_all().map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::Io(e.to_string()))
    }

    /// Apply `f` to a copy of the map, write it, then commit it in memory.
    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StoreError> {
        let mut guard = self.entries.lock();
        let mut next = guard.clone();
        f(&mut next);
        self.write_out(&next)?;
        *guard = next;
        Ok(())
    }
}

/// Open `path` for writing, truncated, readable by the owner only.
///
/// The store holds the root key and mnemonic in the clear.
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // A stale temp file keeps its old mode through `open`.
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        self.mutate(|map| {
            for (k, v) in entries {
                map.insert((*k).to_string(), v.clone());
            }
        })
    }

    fn remove_many(&self, keys: &[String]) -> Result<(), StoreError> {
        self.mutate(|map| {
            for k in keys {
                map.remove(k);
            }
        })
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        store
            .set_many(&[("satchel.a", "1".into()), ("satchel.b", "2".into()), ("other", "x".into())])
            .unwrap();
        assert_eq!(store.get("satchel.a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(store.keys().unwrap().len(), 3);

        assert_eq!(store.remove_prefixed("satchel").unwrap(), 2);
        assert_eq!(store.keys().unwrap(), vec!["other".to_string()]);
        store.remove_many(&["never-set".into()]).unwrap();
    }

    #[test]
    fn memory_store_basics() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn file_store_basics() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileStore::open(dir.path().join("wallet.json")).unwrap());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wallet.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.set_many(&[("satchel.num", "7".into())]).unwrap();
        }
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("satchel.num").unwrap().as_deref(), Some("7"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("absent.json")).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        // A leftover temp file from an interrupted write.
        std::fs::write(path.with_extension("tmp"), b"{}").unwrap();
        std::fs::set_permissions(path.with_extension("tmp"), std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileStore::open(&path).unwrap();
        store.set_many(&[("satchel.xpriv", "xprv-secret".into())]).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Corrupt(_))));
    }
}
