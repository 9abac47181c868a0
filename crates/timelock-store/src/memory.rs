//! In-memory store with fault injection

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::{KvStore, StoreError, StoreResult};

/// Process-local store. Writes can be made to fail to exercise retry and
/// degraded-mode paths.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    failed_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of writes rejected while failing
    pub fn failed_writes(&self) -> u32 {
        self.failed_writes.load(Ordering::SeqCst)
    }

    fn values(&self) -> StoreResult<MutexGuard<'_, HashMap<String, String>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        self.values
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".into()))
    }

    fn values_for_write(&self) -> StoreResult<MutexGuard<'_, HashMap<String, String>>> {
        self.values().inspect_err(|_| {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

impl KvStore for MemoryStore {
    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.values_for_write()?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn compare_and_swap(&self, key: &str, expected: Option<&str>, value: &str) -> StoreResult<bool> {
        let mut values = self.values_for_write()?;
        if values.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        values.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.values_for_write()?.remove(key);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}
