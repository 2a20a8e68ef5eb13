#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::store::{Document, EntityStore, StorageError, StoreKey};

const UNLIMITED: usize = usize::MAX;

/// Store wrapper whose writes can be switched off, for exercising
/// `StorageUnavailable` paths. Reads always pass through.
#[derive(Debug)]
pub struct FailingStore {
    inner: Arc<dyn EntityStore>,
    /// Writes still allowed before every further write fails.
    write_budget: AtomicUsize,
}

impl FailingStore {
    pub fn wrap(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            write_budget: AtomicUsize::new(UNLIMITED),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        let budget = if fail { 0 } else { UNLIMITED };
        self.write_budget.store(budget, Ordering::SeqCst);
    }

    /// Lets the next `n` writes through and fails the ones after them.
    pub fn fail_after_writes(&self, n: usize) {
        self.write_budget.store(n, Ordering::SeqCst);
    }

    fn check_write(&self, key: &StoreKey) -> Result<(), StorageError> {
        let allowed = self
            .write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                UNLIMITED => Some(UNLIMITED),
                n => Some(n - 1),
            })
            .is_ok();
        if !allowed {
            return Err(StorageError::Unavailable(format!("write refused: {key}")));
        }
        Ok(())
    }
}

impl EntityStore for FailingStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Document>, StorageError> {
        self.inner.get(key)
    }

    fn put(&self, key: &StoreKey, doc: Document) -> Result<(), StorageError> {
        self.check_write(key)?;
        self.inner.put(key, doc)
    }

    fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: Option<&Document>,
        next: Option<Document>,
    ) -> Result<bool, StorageError> {
        self.check_write(key)?;
        self.inner.compare_and_swap(key, expected, next)
    }

    fn delete(&self, key: &StoreKey) -> Result<bool, StorageError> {
        self.check_write(key)?;
        self.inner.delete(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(StoreKey, Document)>, StorageError> {
        self.inner.scan_prefix(prefix)
    }
}
