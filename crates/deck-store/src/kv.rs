//! The key-value store contract.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::StoreResult;

/// Field map of a hash record.
pub type Fields = BTreeMap<String, String>;

/// Shared, dynamically dispatched store handle.
///
/// Components receive one of these in their constructor; there is no
/// process-wide store.
pub type SharedStore = Arc<dyn KvStore>;

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Keys on this page.
    pub keys: Vec<String>,
    /// Cursor to resume from, `None` once the scan is complete.
    pub cursor: Option<String>,
}

impl ScanPage {
    /// Whether another page may follow.
    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }
}

/// Keyed string/hash/set storage with scan and expiry primitives.
///
/// Semantics follow the usual Redis conventions:
///
/// - a key holds exactly one kind of value; using it as another kind is a
///   [`StoreError::Corrupt`](crate::StoreError::Corrupt) error
/// - expired keys behave exactly like absent keys
/// - writing a string with [`set`](KvStore::set) clears any TTL, while
///   hash and set writes preserve it
/// - a set that loses its last member disappears
///
/// Each call is atomic with respect to a single key. Nothing is atomic
/// across keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a string value, replacing whatever was there.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Set a string value only if the key is absent.
    ///
    /// Returns `true` if the value was written.
    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Delete a key of any kind. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Read every field of a hash record.
    async fn hash_get_all(&self, key: &str) -> StoreResult<Option<Fields>>;

    /// Write fields into a hash record, creating it if needed.
    async fn hash_set(&self, key: &str, fields: &Fields) -> StoreResult<()>;

    /// Write fields into a hash record only if it already exists.
    ///
    /// Returns `false` (and writes nothing) when the record is gone, so a
    /// late update can never resurrect a deleted record.
    async fn hash_update(&self, key: &str, fields: &Fields) -> StoreResult<bool>;

    /// Add a member to a set. Returns `true` if it was not already present.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a member from a set. Returns `true` if it was present.
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// List the members of a set (empty if the set does not exist).
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Enumerate keys starting with `prefix`, at most `count` per page.
    ///
    /// Pass `None` to start and the returned cursor to continue. The scan
    /// is weakly consistent: keys present for the whole scan are returned
    /// exactly once, keys created or deleted meanwhile may or may not be.
    async fn scan(&self, prefix: &str, cursor: Option<&str>, count: usize)
        -> StoreResult<ScanPage>;

    /// Set a key's time to live. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining time to live, `None` if the key is absent or persistent.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;
}

/// Helper to build store keys with namespacing.
///
/// # Example
///
/// ```rust
/// use deck_store::store_key;
///
/// let key = store_key!("session", "abc123");
/// assert_eq!(key, "session:abc123");
/// ```
#[macro_export]
macro_rules! store_key {
    ($prefix:expr, $($part:expr),+) => {{
        let mut key = String::from($prefix);
        $(
            key.push(':');
            key.push_str(&$part.to_string());
        )+
        key
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_store_key_single_part() {
        assert_eq!(store_key!("user", "u1"), "user:u1");
    }

    #[test]
    fn test_store_key_multiple_parts() {
        let id = 42;
        assert_eq!(store_key!("card", "u1", id), "card:u1:42");
    }
}
