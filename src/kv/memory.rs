use super::{Kv, KvError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local `Kv` implementation for tests (spec.md §4.3): same
/// surface as [`super::RedisKv`], no TTL eviction sweep — expiry is
/// checked lazily on read, which is enough for unit tests and for any
/// single-process deployment that doesn't need cross-instance sharing.
#[derive(Default)]
pub struct MemoryKv {
    strings: RwLock<HashMap<String, Entry>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.strings.write().await;
        if let Some(entry) = map.get(key) {
            if entry.is_expired() {
                map.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, nx: bool, ex: Option<u64>) -> Result<bool> {
        let mut map = self.strings.write().await;
        if nx {
            if let Some(existing) = map.get(key) {
                if !existing.is_expired() {
                    return Ok(false);
                }
            }
        }
        let expires_at = ex.map(|secs| Instant::now() + Duration::from_secs(secs));
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut map = self.strings.write().await;
        Ok(map.remove(key).is_some())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let mut map = self.strings.write().await;
        match map.get(key) {
            Some(entry) if !entry.is_expired() && entry.value == expected => {
                map.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>> {
        let map = self.hashes.read().await;
        Ok(map.get(hash).and_then(|h| h.get(field).cloned()))
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        let mut map = self.hashes.write().await;
        map.entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, hash: &str) -> Result<HashMap<String, String>> {
        let map = self.hashes.read().await;
        Ok(map.get(hash).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_rejects_existing_key() {
        let kv = MemoryKv::new();
        assert!(kv.set("k", "v1", true, None).await.unwrap());
        assert!(!kv.set("k", "v2", true, None).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), Some("v1".to_string()));
    }

    #[tokio::test]
    async fn set_overwrites_without_nx() {
        let kv = MemoryKv::new();
        kv.set("k", "v1", false, None).await.unwrap();
        kv.set("k", "v2", false, None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn expired_key_is_absent_and_nx_can_reclaim() {
        let kv = MemoryKv::new();
        kv.set("k", "v1", true, Some(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.set("k", "v2", true, None).await.unwrap());
    }

    #[tokio::test]
    async fn delete_if_eq_only_deletes_matching_token() {
        let kv = MemoryKv::new();
        kv.set("lock:1", "token-a", true, Some(60)).await.unwrap();

        assert!(!kv.delete_if_eq("lock:1", "token-b").await.unwrap());
        assert_eq!(kv.get("lock:1").await.unwrap(), Some("token-a".to_string()));

        assert!(kv.delete_if_eq("lock:1", "token-a").await.unwrap());
        assert_eq!(kv.get("lock:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_roundtrip() {
        let kv = MemoryKv::new();
        kv.hset("routes", "tools.add", "http://tools/add")
            .await
            .unwrap();
        kv.hset("routes", "tools.sub", "http://tools/sub")
            .await
            .unwrap();

        assert_eq!(
            kv.hget("routes", "tools.add").await.unwrap(),
            Some("http://tools/add".to_string())
        );
        assert_eq!(kv.hgetall("routes").await.unwrap().len(), 2);
    }
}
