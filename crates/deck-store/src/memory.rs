//! In-process store backend.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{Clock, Fields, KvStore, ScanPage, SharedClock, StoreError, StoreResult, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(Fields),
    Set(BTreeSet<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Unix timestamp after which the entry is gone.
    expires_at: Option<i64>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Store backed by an ordered map behind a lock.
///
/// Suitable for tests, local development, and single-process
/// deployments. TTLs are evaluated against the injected [`Clock`], and
/// expired entries are dropped lazily on the next write to their key.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    clock: SharedClock,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Create an empty store using `clock` for expiry.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// Wrap in an `Arc` for sharing between components.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, "purged expired store entries");
        }
        removed
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store has no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on the live entry at `key`, if any.
    fn read<T>(
        &self,
        key: &str,
        f: impl FnOnce(&Entry) -> StoreResult<T>,
    ) -> StoreResult<Option<T>> {
        let now = self.clock.now();
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => f(entry).map(Some),
            _ => Ok(None),
        }
    }

    /// Take the write lock with the entry at `key` already expired out.
    fn write<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut BTreeMap<String, Entry>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        f(&mut entries)
    }
}

fn wrong_kind(key: &str, expected: &str, found: &Value) -> StoreError {
    StoreError::corrupt(
        key,
        format!("expected {} value, found {}", expected, found.kind()),
    )
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.read(key, |entry| match &entry.value {
            Value::Str(s) => Ok(s.clone()),
            other => Err(wrong_kind(key, "string", other)),
        })
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.write(key, |entries| {
            entries.insert(key.to_string(), Entry::new(Value::Str(value.to_string())));
            Ok(())
        })
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.write(key, |entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(key.to_string(), Entry::new(Value::Str(value.to_string())));
            Ok(true)
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.write(key, |entries| Ok(entries.remove(key).is_some()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read(key, |_| Ok(()))?.is_some())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<Option<Fields>> {
        self.read(key, |entry| match &entry.value {
            Value::Hash(fields) => Ok(fields.clone()),
            other => Err(wrong_kind(key, "hash", other)),
        })
    }

    async fn hash_set(&self, key: &str, fields: &Fields) -> StoreResult<()> {
        self.write(key, |entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Hash(Fields::new())));
            match &mut entry.value {
                Value::Hash(existing) => {
                    existing.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Ok(())
                }
                other => Err(wrong_kind(key, "hash", other)),
            }
        })
    }

    async fn hash_update(&self, key: &str, fields: &Fields) -> StoreResult<bool> {
        self.write(key, |entries| match entries.get_mut(key) {
            None => Ok(false),
            Some(entry) => match &mut entry.value {
                Value::Hash(existing) => {
                    existing.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Ok(true)
                }
                other => Err(wrong_kind(key, "hash", other)),
            },
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write(key, |entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())));
            match &mut entry.value {
                Value::Set(members) => Ok(members.insert(member.to_string())),
                other => Err(wrong_kind(key, "set", other)),
            }
        })
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write(key, |entries| {
            let (removed, now_empty) = match entries.get_mut(key) {
                None => return Ok(false),
                Some(entry) => match &mut entry.value {
                    Value::Set(members) => (members.remove(member), members.is_empty()),
                    other => return Err(wrong_kind(key, "set", other)),
                },
            };
            if now_empty {
                entries.remove(key);
            }
            Ok(removed)
        })
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let members = self.read(key, |entry| match &entry.value {
            Value::Set(members) => Ok(members.iter().cloned().collect()),
            other => Err(wrong_kind(key, "set", other)),
        })?;
        Ok(members.unwrap_or_default())
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let count = count.max(1);
        let now = self.clock.now();
        let entries = self.entries.read();

        // Resume strictly after the last key handed out, so keys inserted
        // behind the cursor are skipped and nothing is returned twice.
        let lower = match cursor {
            Some(after) => Bound::Excluded(after),
            None => Bound::Included(prefix),
        };

        let mut keys = Vec::with_capacity(count);
        let mut more = false;
        for (key, entry) in entries.range::<str, _>((lower, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            if !entry.is_live(now) {
                continue;
            }
            if keys.len() == count {
                more = true;
                break;
            }
            keys.push(key.clone());
        }

        let cursor = if more { keys.last().cloned() } else { None };
        Ok(ScanPage { keys, cursor })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let at = self.clock.now() + ttl.as_secs() as i64;
        self.write(key, |entries| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now();
        let remaining = self.read(key, |entry| {
            Ok(entry
                .expires_at
                .map(|at| Duration::from_secs((at - now).max(0) as u64)))
        })?;
        Ok(remaining.flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_string_roundtrip_and_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.exists("k").await.unwrap());

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent_only_writes_once() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("email:a@x.com", "u1").await.unwrap());
        assert!(!store.set_if_absent("email:a@x.com", "u2").await.unwrap());
        assert_eq!(
            store.get("email:a@x.com").await.unwrap(),
            Some("u1".to_string())
        );
    }

    #[tokio::test]
    async fn test_hash_update_requires_existing_record() {
        let store = MemoryStore::new();
        let patch = fields(&[("last_activity", "5")]);

        assert!(!store.hash_update("session:gone", &patch).await.unwrap());
        assert_eq!(store.hash_get_all("session:gone").await.unwrap(), None);

        store
            .hash_set("session:s1", &fields(&[("roles", "guest")]))
            .await
            .unwrap();
        assert!(store.hash_update("session:s1", &patch).await.unwrap());

        let record = store.hash_get_all("session:s1").await.unwrap().unwrap();
        assert_eq!(record.get("roles").map(String::as_str), Some("guest"));
        assert_eq!(record.get("last_activity").map(String::as_str), Some("5"));
    }

    #[tokio::test]
    async fn test_wrong_kind_is_corrupt() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();

        let err = store.hash_get_all("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(store.set_add("k", "m").await.is_err());
    }

    #[tokio::test]
    async fn test_sets_disappear_when_emptied() {
        let store = MemoryStore::new();
        assert!(store.set_add("idx", "a").await.unwrap());
        assert!(!store.set_add("idx", "a").await.unwrap());
        assert!(store.set_add("idx", "b").await.unwrap());
        assert_eq!(store.set_members("idx").await.unwrap(), vec!["a", "b"]);

        assert!(store.set_remove("idx", "a").await.unwrap());
        assert!(store.set_remove("idx", "b").await.unwrap());
        assert!(!store.exists("idx").await.unwrap());
        assert!(store.set_members("idx").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_hides_keys() {
        let (store, clock) = store_with_clock();
        store.hash_set("session:s1", &fields(&[("a", "1")])).await.unwrap();
        assert!(store
            .expire("session:s1", Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(
            store.ttl("session:s1").await.unwrap(),
            Some(Duration::from_secs(60))
        );

        clock.advance(Duration::from_secs(59));
        assert!(store.exists("session:s1").await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(!store.exists("session:s1").await.unwrap());
        assert_eq!(store.hash_get_all("session:s1").await.unwrap(), None);
        assert!(!store
            .hash_update("session:s1", &fields(&[("a", "2")]))
            .await
            .unwrap());
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_hash_writes_keep_ttl_and_set_clears_it() {
        let (store, _clock) = store_with_clock();
        store.hash_set("h", &fields(&[("a", "1")])).await.unwrap();
        store.expire("h", Duration::from_secs(30)).await.unwrap();
        store.hash_set("h", &fields(&[("b", "2")])).await.unwrap();
        assert_eq!(store.ttl("h").await.unwrap(), Some(Duration::from_secs(30)));

        store.set("s", "1").await.unwrap();
        store.expire("s", Duration::from_secs(30)).await.unwrap();
        store.set("s", "2").await.unwrap();
        assert_eq!(store.ttl("s").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired_counts_removed() {
        let (store, clock) = store_with_clock();
        store.set("a", "1").await.unwrap();
        store.set("b", "1").await.unwrap();
        store.expire("a", Duration::from_secs(1)).await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_scan_pages_through_prefix() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.set(&format!("session:{}", i), "x").await.unwrap();
        }
        store.set("user:1", "x").await.unwrap();

        let first = store.scan("session:", None, 2).await.unwrap();
        assert_eq!(first.keys, vec!["session:0", "session:1"]);
        assert!(first.has_more());

        let second = store
            .scan("session:", first.cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["session:2", "session:3"]);

        let third = store
            .scan("session:", second.cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(third.keys, vec!["session:4"]);
        assert!(!third.has_more());
    }

    #[tokio::test]
    async fn test_scan_tolerates_deletes_between_pages() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store.set(&format!("session:{}", i), "x").await.unwrap();
        }

        let first = store.scan("session:", None, 2).await.unwrap();
        // The cursor key itself disappears before the next page.
        store.delete("session:1").await.unwrap();
        store.delete("session:2").await.unwrap();

        let second = store
            .scan("session:", first.cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["session:3"]);
        assert!(!second.has_more());
    }
}
