//! Store trait definitions

use crate::StoreResult;

/// Durable string key-value store. Values are UTF-8 JSON.
pub trait KvStore: Send + Sync {
    /// Insert or replace the value under `key`
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Value under `key`, `None` if absent
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Replace the value under `key` only if it still equals `expected`
    /// (`None` meaning absent). Returns false, writing nothing, otherwise.
    fn compare_and_swap(&self, key: &str, expected: Option<&str>, value: &str) -> StoreResult<bool>;

    /// Remove `key`; removing an absent key is not an error
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
