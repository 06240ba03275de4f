//! In-memory store backend

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::StoreBackend;
use crate::{Error, Result};

struct Entry {
    value: String,
    stored_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now().duration_since(self.stored_at) > self.ttl
    }
}

/// Thread-safe in-process store with lazy TTL eviction
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return Err(Error::NoSessionStateFound);
            }
            return Ok(entry.value.clone());
        }
        Err(Error::NoSessionStateFound)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        store
            .set("k", "refresh-token", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), "refresh-token");

        store.delete("k").await.unwrap();
        assert!(matches!(
            store.get("k").await,
            Err(Error::NoSessionStateFound)
        ));
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn missing_key_reports_no_session_state() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("absent").await,
            Err(Error::NoSessionStateFound)
        ));
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let store = MemoryStore::new();
        store.set("k", "old", Duration::from_secs(60)).await.unwrap();
        store.set("k", "new", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), "new");
    }
}
