//! Process-local [`CacheStore`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{CacheStore, Result};
use crate::errors::CacheError;

enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

struct Slot {
    value: Value,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory store for single-node deployments and tests.
///
/// Expired keys read as absent. They are dropped when overwritten or by
/// [`CacheStore::purge_expired`].
#[derive(Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|s| s.is_live(now)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn hash_put(&self, key: &str, field: &str, value: String, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        match self.slots.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if !slot.is_live(now) {
                    slot.value = Value::Hash(HashMap::new());
                }
                let Value::Hash(map) = &mut slot.value else {
                    return Err(CacheError::WrongType(key.to_owned()));
                };
                let _ = map.insert(field.to_owned(), value);
                slot.expires_at = now + ttl;
            }
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(Slot {
                    value: Value::Hash(HashMap::from([(field.to_owned(), value)])),
                    expires_at: now + ttl,
                });
            }
        }
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let Some(slot) = self.slots.get(key).filter(|s| s.is_live(Instant::now())) else {
            return Ok(None);
        };
        match &slot.value {
            Value::Hash(map) => Ok(map.get(field).cloned()),
            Value::Text(_) => Err(CacheError::WrongType(key.to_owned())),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        let Some(slot) = self.slots.get(key).filter(|s| s.is_live(Instant::now())) else {
            return Ok(Vec::new());
        };
        match &slot.value {
            Value::Hash(map) => Ok(map.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
            Value::Text(_) => Err(CacheError::WrongType(key.to_owned())),
        }
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let now = Instant::now();
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Ok(false);
        };
        if !slot.is_live(now) {
            return Ok(false);
        }
        match &mut slot.value {
            Value::Hash(map) => Ok(map.remove(field).is_some()),
            Value::Text(_) => Err(CacheError::WrongType(key.to_owned())),
        }
    }

    async fn hash_delete_if(&self, key: &str, field: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Ok(false);
        };
        if !slot.is_live(now) {
            return Ok(false);
        }
        match &mut slot.value {
            Value::Hash(map) if map.get(field).is_some_and(|v| v == expected) => {
                Ok(map.remove(field).is_some())
            }
            Value::Hash(_) => Ok(false),
            Value::Text(_) => Err(CacheError::WrongType(key.to_owned())),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let _ = self.slots.insert(
            key.to_owned(),
            Slot {
                value: Value::Text(value),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(slot) = self.slots.get(key).filter(|s| s.is_live(Instant::now())) else {
            return Ok(None);
        };
        match &slot.value {
            Value::Text(text) => Ok(Some(text.clone())),
            Value::Hash(_) => Err(CacheError::WrongType(key.to_owned())),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        Ok(before.saturating_sub(self.slots.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn hash_upsert_is_last_write_wins() {
        let store = MemoryStore::new();
        store.hash_put("h", "f", "1".into(), TTL).await.unwrap();
        store.hash_put("h", "f", "2".into(), TTL).await.unwrap();
        assert_eq!(store.hash_get("h", "f").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.hash_get_all("h").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hash_fields_are_independent() {
        let store = MemoryStore::new();
        store.hash_put("h", "a", "1".into(), TTL).await.unwrap();
        store.hash_put("h", "b", "2".into(), TTL).await.unwrap();
        let mut all = store.hash_get_all("h").await.unwrap();
        all.sort();
        assert_eq!(all, vec![("a".into(), "1".into()), ("b".into(), "2".into())]);

        assert!(store.hash_delete("h", "a").await.unwrap());
        assert!(!store.hash_delete("h", "a").await.unwrap());
        assert!(store.hash_get("h", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_keys_read_empty() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(store.hash_get("nope", "f").await.unwrap().is_none());
        assert!(store.hash_get_all("nope").await.unwrap().is_empty());
        assert!(!store.delete("nope").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn string_keys_expire() {
        let store = MemoryStore::new();
        store.put("k", "v".into(), Duration::from_millis(20)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_hash_restarts_empty() {
        let store = MemoryStore::new();
        store.hash_put("h", "old", "1".into(), Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        store.hash_put("h", "new", "2".into(), TTL).await.unwrap();
        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all, vec![("new".into(), "2".into())]);
    }

    #[tokio::test]
    async fn hash_put_extends_expiry() {
        let store = MemoryStore::new();
        store.hash_put("h", "a", "1".into(), Duration::from_millis(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.hash_put("h", "b", "2".into(), Duration::from_millis(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.hash_get("h", "a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn wrong_type_is_error() {
        let store = MemoryStore::new();
        store.put("k", "v".into(), TTL).await.unwrap();
        assert_matches!(
            store.hash_put("k", "f", "x".into(), TTL).await,
            Err(CacheError::WrongType(k)) if k == "k"
        );
        store.hash_put("h", "f", "x".into(), TTL).await.unwrap();
        assert_matches!(store.get("h").await, Err(CacheError::WrongType(_)));
    }

    #[tokio::test]
    async fn conditional_delete_only_matches_current_value() {
        let store = MemoryStore::new();
        store.hash_put("h", "f", "old".into(), TTL).await.unwrap();
        store.hash_put("h", "f", "new".into(), TTL).await.unwrap();

        assert!(!store.hash_delete_if("h", "f", "old").await.unwrap());
        assert_eq!(store.hash_get("h", "f").await.unwrap().as_deref(), Some("new"));

        assert!(store.hash_delete_if("h", "f", "new").await.unwrap());
        assert!(store.hash_get("h", "f").await.unwrap().is_none());
        assert!(!store.hash_delete_if("nope", "f", "new").await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_expired_slots() {
        let store = MemoryStore::new();
        store.put("gone", "v".into(), Duration::from_millis(20)).await.unwrap();
        store.hash_put("gone-h", "f", "x".into(), Duration::from_millis(20)).await.unwrap();
        store.put("kept", "v".into(), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Expired slots are invisible but still held until purged.
        assert_eq!(store.len(), 1);
        assert_eq!(store.slots.len(), 3);

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert_eq!(store.slots.len(), 1);
        assert_eq!(store.get("kept").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_removes_any_type() {
        let store = MemoryStore::new();
        store.put("k", "v".into(), TTL).await.unwrap();
        store.hash_put("h", "f", "x".into(), TTL).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.delete("k").await.unwrap());
        assert!(store.delete("h").await.unwrap());
        assert!(store.is_empty());
    }
}
