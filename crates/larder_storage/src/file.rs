//! File-based document store for persistent storage.
//!
//! Layout of a store directory:
//!
//! ```text
//! <dir>/
//! ├─ LOCK              # Advisory lock for single-owner access
//! ├─ items.home.doc    # One file per document key
//! └─ todos.home.doc
//! ```

use crate::backend::DocumentStore;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const DOC_EXTENSION: &str = "doc";
const TEMP_SUFFIX: &str = ".tmp";

/// A directory-backed document store.
///
/// Each document lives in its own file. Writes go to a temporary sibling
/// which is synced and then renamed over the target, so a crash leaves either
/// the old or the new document on disk.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on its directory for its whole
/// lifetime. Writes within the process are serialized.
///
/// # Example
///
/// ```no_run
/// use larder_storage::{DocumentStore, FileDocumentStore};
/// use std::path::Path;
///
/// let store = FileDocumentStore::open(Path::new("larder-data")).unwrap();
/// store.write("items.home", b"{\"items\":[]}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileDocumentStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileDocumentStore {
    /// Opens or creates a document store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `Locked`)
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("not a directory: {}", dir.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(dir.display().to_string()));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{DOC_EXTENSION}")))
    }
}

/// Keys become file names, so only a conservative character set is allowed.
fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

impl DocumentStore for FileDocumentStore {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.document_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.document_path(key)?;
        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        let _guard = self.write_lock.lock();
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;

        // Directory sync makes the rename durable; not every platform allows it.
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(key, len = bytes.len(), "document written");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.document_path(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOC_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        let store = FileDocumentStore::open(&path).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let store = FileDocumentStore::open(dir.path()).unwrap();

        store.write("items.home", b"hello").unwrap();
        assert_eq!(store.read("items.home").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.read("items.away").unwrap(), None);
    }

    #[test]
    fn file_overwrite_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let store = FileDocumentStore::open(dir.path()).unwrap();

        store.write("items.home", b"one").unwrap();
        store.write("items.home", b"two").unwrap();

        assert_eq!(store.read("items.home").unwrap(), Some(b"two".to_vec()));
        assert!(!dir.path().join("items.home.doc.tmp").exists());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileDocumentStore::open(dir.path()).unwrap();
            store.write("todos.h1", b"persistent").unwrap();
        }

        {
            let store = FileDocumentStore::open(dir.path()).unwrap();
            assert_eq!(store.read("todos.h1").unwrap(), Some(b"persistent".to_vec()));
        }
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileDocumentStore::open(dir.path()).unwrap();

        let second = FileDocumentStore::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[test]
    fn file_rejects_bad_keys() {
        let dir = tempdir().unwrap();
        let store = FileDocumentStore::open(dir.path()).unwrap();

        assert!(matches!(store.write("", b"x"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(store.write("../escape", b"x"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(store.write(".hidden", b"x"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(store.read("a/b"), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn file_keys_and_remove() {
        let dir = tempdir().unwrap();
        let store = FileDocumentStore::open(dir.path()).unwrap();

        store.write("todos.h1", b"1").unwrap();
        store.write("items.h1", b"2").unwrap();
        assert_eq!(
            store.keys().unwrap(),
            vec!["items.h1".to_string(), "todos.h1".to_string()]
        );

        store.remove("items.h1").unwrap();
        store.remove("items.h1").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["todos.h1".to_string()]);
    }
}
