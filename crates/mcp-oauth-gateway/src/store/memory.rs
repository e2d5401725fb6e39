//! In-process store for single-instance deployments and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Store;
use crate::error::StoreResult;

enum Value {
    Text(String),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self { value, expires_at: ttl.and_then(deadline) }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Deadline `ttl` from now. A TTL past what `Instant` can represent never expires.
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// In-memory store. Expired entries are dropped lazily when touched.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Drop the entry under `key` if it has expired.
fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries.get(key).is_some_and(Entry::is_expired) {
        entries.remove(key);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).filter(|e| !e.is_expired()).and_then(|e| match &e.value {
            Value::Text(text) => Some(text.clone()),
            Value::Set(_) => None,
        }))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.entries.write().await.insert(key.to_owned(), Entry::new(Value::Text(value), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some_and(|e| !e.is_expired()))
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries, key);

        match entries.get(key).map(|e| &e.value) {
            Some(Value::Text(_)) => {}
            _ => return Ok(None),
        }
        Ok(entries.remove(key).and_then(|e| match e.value {
            Value::Text(text) => Some(text),
            Value::Set(_) => None,
        }))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).is_some_and(|e| !e.is_expired()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries, key);

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = deadline(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired())
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries, key);

        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new()), None));
        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_owned());
            }
            Value::Text(_) => {
                let mut members = HashSet::new();
                members.insert(member.to_owned());
                *entry = Entry::new(Value::Set(members), None);
            }
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries, key);

        let now_empty = match entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Set(members)) => {
                members.remove(member);
                members.is_empty()
            }
            _ => false,
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| match &e.value {
                Value::Set(members) => members.iter().cloned().collect(),
                Value::Text(_) => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("a", "1".into(), None).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.exists("a").await.unwrap());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store.set("short", "v".into(), Some(Duration::from_millis(20))).await.unwrap();
        store.set("forever", "v".into(), None).await.unwrap();

        assert!(store.ttl("short").await.unwrap().is_some());
        assert!(store.ttl("forever").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.take("short").await.unwrap().is_none());
        assert!(!store.exists("short").await.unwrap());
        assert!(store.exists("forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = MemoryStore::new();
        store.set("code", "payload".into(), None).await.unwrap();

        assert_eq!(store.take("code").await.unwrap().as_deref(), Some("payload"));
        assert!(store.take("code").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_take_has_one_winner() {
        let store = MemoryStore::new();
        store.set("code", "payload".into(), None).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take("code").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        store.set_add("s", "x").await.unwrap();
        store.set_add("s", "y").await.unwrap();
        store.set_add("s", "x").await.unwrap();

        let mut members = store.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["x", "y"]);

        store.set_remove("s", "x").await.unwrap();
        store.set_remove("s", "y").await.unwrap();
        assert!(store.set_members("s").await.unwrap().is_empty());
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_existing_key() {
        let store = MemoryStore::new();
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());

        store.set_add("s", "x").await.unwrap();
        assert!(store.expire("s", Duration::from_secs(60)).await.unwrap());
        assert!(store.ttl("s").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let store = MemoryStore::new();
        let huge = Duration::from_secs(u64::MAX);

        store.set("k", "v".into(), Some(huge)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.set_add("s", "x").await.unwrap();
        assert!(store.expire("s", huge).await.unwrap());
        assert_eq!(store.set_members("s").await.unwrap(), vec!["x"]);
    }
}
