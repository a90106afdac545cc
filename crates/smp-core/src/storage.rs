//! Contact persistence.
//!
//! The contact table is stored as one blob per namespace. Queues are not
//! persisted on their own; only contacts survive a restart.

use crate::contact::ContactTable;
use crate::error::StorageError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Load, save and erase the contact table.
pub trait ContactStorage: Send + Sync {
    /// Load the table; `Ok(None)` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the blob exists but cannot be read.
    fn load_contacts(&self, namespace: &str) -> Result<Option<ContactTable>, StorageError>;

    /// Replace the stored table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if writing fails.
    fn save_contacts(&self, namespace: &str, table: &ContactTable) -> Result<(), StorageError>;

    /// Remove the stored table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if removal fails.
    fn erase_all_contacts(&self, namespace: &str) -> Result<(), StorageError>;
}

/// Volatile storage for tests and ephemeral clients
#[derive(Debug, Default)]
pub struct MemoryContactStorage {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryContactStorage {
    /// Empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.blobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ContactStorage for MemoryContactStorage {
    fn load_contacts(&self, namespace: &str) -> Result<Option<ContactTable>, StorageError> {
        self.blobs()
            .get(namespace)
            .map(|json| serde_json::from_str(json).map_err(StorageError::from))
            .transpose()
    }

    fn save_contacts(&self, namespace: &str, table: &ContactTable) -> Result<(), StorageError> {
        let json = serde_json::to_string(table)?;
        self.blobs().insert(namespace.to_string(), json);
        Ok(())
    }

    fn erase_all_contacts(&self, namespace: &str) -> Result<(), StorageError> {
        self.blobs().remove(namespace);
        Ok(())
    }
}

/// JSON file per namespace inside a directory
#[derive(Debug, Clone)]
pub struct FileContactStorage {
    dir: PathBuf,
}

impl FileContactStorage {
    /// Store blobs under `dir` (created on first save)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the blobs
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, namespace: &str) -> PathBuf {
        let file: String = namespace
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl ContactStorage for FileContactStorage {
    fn load_contacts(&self, namespace: &str) -> Result<Option<ContactTable>, StorageError> {
        let path = self.path(namespace);
        match fs::read_to_string(&path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_contacts(&self, namespace: &str, table: &ContactTable) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(namespace);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(table)?)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!("Saved {} contact slots to {}", table.contacts.len(), path.display());
        Ok(())
    }

    fn erase_all_contacts(&self, namespace: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path(namespace)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactStore;
    use crate::queue::QueueRecord;

    fn table() -> ContactTable {
        let mut store = ContactStore::new();
        store
            .insert("alice", QueueRecord::generate("smp.example.com", 5223, [1; 32]))
            .unwrap();
        store.to_table()
    }

    fn exercise(storage: &dyn ContactStorage) {
        assert!(storage.load_contacts("ns").unwrap().is_none());
        storage.save_contacts("ns", &table()).unwrap();

        let loaded = storage.load_contacts("ns").unwrap().unwrap();
        assert_eq!(ContactStore::from_table(loaded).num_contacts(), 1);
        assert!(storage.load_contacts("other").unwrap().is_none());

        storage.erase_all_contacts("ns").unwrap();
        assert!(storage.load_contacts("ns").unwrap().is_none());
        storage.erase_all_contacts("ns").unwrap();
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryContactStorage::new());
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileContactStorage::new(dir.path().join("contacts")));
    }

    #[test]
    fn test_file_storage_sanitizes_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileContactStorage::new(dir.path());
        storage.save_contacts("../escape", &table()).unwrap();
        assert!(dir.path().join("___escape.json").exists());
    }

    #[test]
    fn test_corrupt_blob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ns.json"), b"not json").unwrap();
        let storage = FileContactStorage::new(dir.path());
        assert!(matches!(
            storage.load_contacts("ns"),
            Err(StorageError::Serialization(_))
        ));
    }
}
