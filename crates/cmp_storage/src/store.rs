#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use cmp_kernel_contracts::complaint::ComplaintId;
use cmp_kernel_contracts::directory::UserId;
use cmp_kernel_contracts::CmpError;
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STORE_SCHEMA_VERSION: u32 = 1;

pub const USERS_PREFIX: &str = "users/";
pub const USER_EMAILS_PREFIX: &str = "user_emails/";
pub const COMPLAINTS_PREFIX: &str = "complaints/";

pub type Document = serde_json::Value;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: &'static str },
    #[error("store schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: u32, found: u32 },
    #[error("{0}")]
    Unavailable(String),
}

impl From<StorageError> for CmpError {
    fn from(e: StorageError) -> Self {
        CmpError::StorageUnavailable(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn user(id: &UserId) -> Self {
        Self(format!("{USERS_PREFIX}{}", id.as_str()))
    }

    /// Uniqueness claim for a normalized email.
    pub fn user_email(normalized_email: &str) -> Self {
        Self(format!("{USER_EMAILS_PREFIX}{normalized_email}"))
    }

    pub fn complaint(id: &ComplaintId) -> Self {
        Self(format!("{COMPLAINTS_PREFIX}{}", id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent mapping from entity key to JSON document.
///
/// Every write is all-or-nothing: after an `Err` the previous document (or absence) is intact.
pub trait EntityStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &StoreKey) -> Result<Option<Document>, StorageError>;
    fn put(&self, key: &StoreKey, doc: Document) -> Result<(), StorageError>;
    /// Installs `next` (removes the key when `None`) only while the current
    /// document equals `expected`. Returns whether the swap happened.
    fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: Option<&Document>,
        next: Option<Document>,
    ) -> Result<bool, StorageError>;
    /// Returns whether a document was removed.
    fn delete(&self, key: &StoreKey) -> Result<bool, StorageError>;
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(StoreKey, Document)>, StorageError>;

    /// Writes only when `key` is absent. Returns whether the write happened.
    fn put_if_absent(&self, key: &StoreKey, doc: Document) -> Result<bool, StorageError> {
        self.compare_and_swap(key, None, Some(doc))
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Document, StorageError> {
    Ok(serde_json::to_value(value)?)
}

pub fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, StorageError> {
    Ok(serde_json::from_value(doc)?)
}

fn scan_map(map: &BTreeMap<String, Document>, prefix: &str) -> Vec<(StoreKey, Document)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (StoreKey(k.clone()), v.clone()))
        .collect()
}

fn swap_in_map(
    map: &mut BTreeMap<String, Document>,
    key: &StoreKey,
    expected: Option<&Document>,
    next: Option<Document>,
) -> bool {
    if map.get(key.as_str()) != expected {
        return false;
    }
    match next {
        Some(doc) => {
            map.insert(key.as_str().to_string(), doc);
        }
        None => {
            map.remove(key.as_str());
        }
    }
    true
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Document>, StorageError> {
        Ok(self.entries.read().get(key.as_str()).cloned())
    }

    fn put(&self, key: &StoreKey, doc: Document) -> Result<(), StorageError> {
        self.entries.write().insert(key.as_str().to_string(), doc);
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: Option<&Document>,
        next: Option<Document>,
    ) -> Result<bool, StorageError> {
        Ok(swap_in_map(&mut self.entries.write(), key, expected, next))
    }

    fn delete(&self, key: &StoreKey) -> Result<bool, StorageError> {
        Ok(self.entries.write().remove(key.as_str()).is_some())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(StoreKey, Document)>, StorageError> {
        Ok(scan_map(&self.entries.read(), prefix))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    schema_version: u32,
    entries: BTreeMap<String, Document>,
}

/// Single-file JSON store that may be shared by several handles and processes.
///
/// Every operation holds an OS lock on a `<file>.lock` sidecar and reads the
/// file afresh, so no handle ever writes back a stale map. Writes go through a
/// synced temp file that is renamed into place.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    // flock is per open file; the mutex keeps threads of one handle from sharing it.
    lock_file: Mutex<File>,
}

struct StoreLockGuard<'a> {
    file: MutexGuard<'a, File>,
    path: &'a Path,
}

impl Drop for StoreLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&*self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        create_parent_dir(&path)?;
        let lock_path = sidecar_path(&path, "lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| io_err(&lock_path, e))?;
        let store = Self {
            path,
            lock_path,
            lock_file: Mutex::new(lock_file),
        };
        let entries = store.read(|m| m.len())?;
        tracing::debug!(path = %store.path.display(), entries, "opened json store");
        Ok(store)
    }

    fn lock(&self, exclusive: bool) -> Result<StoreLockGuard<'_>, StorageError> {
        let file = self.lock_file.lock();
        let locked = if exclusive {
            FileExt::lock_exclusive(&*file)
        } else {
            FileExt::lock_shared(&*file)
        };
        locked.map_err(|e| io_err(&self.lock_path, e))?;
        Ok(StoreLockGuard {
            file,
            path: &self.lock_path,
        })
    }

    fn read<R>(
        &self,
        view: impl FnOnce(&BTreeMap<String, Document>) -> R,
    ) -> Result<R, StorageError> {
        let _guard = self.lock(false)?;
        Ok(view(&read_store_file(&self.path)?))
    }

    /// Re-reads the file under the exclusive lock, applies `change`, and
    /// rewrites the file only when `change` returns `Some`.
    fn commit<R>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, Document>) -> Option<R>,
    ) -> Result<Option<R>, StorageError> {
        let _guard = self.lock(true)?;
        let mut entries = read_store_file(&self.path)?;
        let Some(out) = change(&mut entries) else {
            return Ok(None);
        };
        write_store_file(&self.path, &entries)?;
        Ok(Some(out))
    }
}

impl EntityStore for JsonFileStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Document>, StorageError> {
        self.read(|m| m.get(key.as_str()).cloned())
    }

    fn put(&self, key: &StoreKey, doc: Document) -> Result<(), StorageError> {
        self.commit(|m| {
            m.insert(key.as_str().to_string(), doc);
            Some(())
        })?;
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: Option<&Document>,
        next: Option<Document>,
    ) -> Result<bool, StorageError> {
        let swapped = self.commit(|m| swap_in_map(m, key, expected, next).then_some(()))?;
        Ok(swapped.is_some())
    }

    fn delete(&self, key: &StoreKey) -> Result<bool, StorageError> {
        let removed = self.commit(|m| m.remove(key.as_str()).map(|_| ()))?;
        Ok(removed.is_some())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(StoreKey, Document)>, StorageError> {
        self.read(|m| scan_map(m, prefix))
    }
}

fn io_err(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `store.json` becomes `store.json.<suffix>`.
fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".");
    raw.push(suffix);
    PathBuf::from(raw)
}

fn create_parent_dir(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))
        }
        _ => Ok(()),
    }
}

fn read_store_file(path: &Path) -> Result<BTreeMap<String, Document>, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(io_err(path, e)),
    };
    // Writes never leave an empty file behind, so an empty one is damage, not a fresh store.
    if raw.trim().is_empty() {
        return Err(StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: "store file is empty",
        });
    }
    let file = serde_json::from_str::<StoreFile>(&raw)?;
    if file.schema_version != STORE_SCHEMA_VERSION {
        return Err(StorageError::SchemaMismatch {
            expected: STORE_SCHEMA_VERSION,
            found: file.schema_version,
        });
    }
    Ok(file.entries)
}

fn write_store_file(path: &Path, entries: &BTreeMap<String, Document>) -> Result<(), StorageError> {
    create_parent_dir(path)?;
    let file = StoreFileRef {
        schema_version: STORE_SCHEMA_VERSION,
        entries,
    };
    let serialized = serde_json::to_vec_pretty(&file)?;
    let tmp = sidecar_path(path, "tmp");
    let mut out = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
    out.write_all(&serialized).map_err(|e| io_err(&tmp, e))?;
    out.sync_all().map_err(|e| io_err(&tmp, e))?;
    drop(out);
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    schema_version: u32,
    entries: &'a BTreeMap<String, Document>,
}
