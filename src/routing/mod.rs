//! Dynamic route table (spec.md §3, §4.2): `category.action` → upstream
//! URL, backed by the shared KV hash `routes`, with an in-memory snapshot
//! for O(1) lookups under concurrent reads.

use crate::kv::Kv;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

const ROUTES_HASH: &str = "routes";

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route table not ready")]
    NotReady,
    #[error("kv error: {0}")]
    Kv(#[from] crate::kv::KvError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub category: String,
    pub action: String,
    pub url: String,
}

fn route_key(category: &str, action: &str) -> String {
    format!("{category}.{action}")
}

/// Snapshot-based route table. Readers take a cheap `Arc` clone of the
/// current immutable map; `add`/`reload` swap in a new map under a write
/// lock, so resolution never blocks on a concurrent registration.
pub struct RouteTable {
    kv: Arc<dyn Kv>,
    snapshot: RwLock<Option<Arc<HashMap<String, String>>>>,
}

impl RouteTable {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self {
            kv,
            snapshot: RwLock::new(None),
        }
    }

    /// Builds the initial snapshot with a bounded timeout (spec.md §4.2,
    /// default 2s). Failure is not fatal: a request arriving before the
    /// table is ready gets `503 routes_not_ready`, and the next request
    /// retries construction implicitly via [`Self::ensure_ready`].
    pub async fn init(&self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.reload()).await {
            Ok(Ok(())) => info!("route table ready"),
            Ok(Err(err)) => warn!(error = %err, "route table init failed, will retry lazily"),
            Err(_) => warn!("route table init timed out, will retry lazily"),
        }
    }

    /// Re-reads the full KV hash and atomically swaps the snapshot.
    pub async fn reload(&self) -> Result<(), RouteError> {
        let all = self.kv.hgetall(ROUTES_HASH).await?;
        let mut guard = self.snapshot.write().await;
        *guard = Some(Arc::new(all));
        Ok(())
    }

    /// Retries construction on the caller's behalf if it never succeeded.
    async fn ensure_ready(&self) -> Result<Arc<HashMap<String, String>>, RouteError> {
        if let Some(snap) = self.snapshot.read().await.clone() {
            return Ok(snap);
        }
        self.reload().await?;
        self.snapshot
            .read()
            .await
            .clone()
            .ok_or(RouteError::NotReady)
    }

    pub async fn resolve(&self, category: &str, action: &str) -> Result<Option<String>, RouteError> {
        let snap = self.ensure_ready().await?;
        Ok(snap.get(&route_key(category, action)).cloned())
    }

    /// Upsert; last write wins, persisted to the backing KV hash and
    /// reflected immediately in the in-memory snapshot.
    pub async fn add(&self, category: &str, action: &str, url: &str) -> Result<(), RouteError> {
        let key = route_key(category, action);
        self.kv.hset(ROUTES_HASH, &key, url).await?;

        let mut guard = self.snapshot.write().await;
        let mut map = guard
            .as_deref()
            .cloned()
            .unwrap_or_default();
        map.insert(key, url.to_string());
        *guard = Some(Arc::new(map));
        Ok(())
    }

    /// Snapshot for diagnostics (spec.md §4.2 `all()`).
    pub async fn all(&self) -> Vec<RouteEntry> {
        let snap = match self.snapshot.read().await.clone() {
            Some(snap) => snap,
            None => return Vec::new(),
        };
        snap.iter()
            .filter_map(|(key, url)| {
                let (category, action) = key.split_once('.')?;
                Some(RouteEntry {
                    category: category.to_string(),
                    action: action.to_string(),
                    url: url.clone(),
                })
            })
            .collect()
    }

    pub async fn is_ready(&self) -> bool {
        self.snapshot.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn table() -> RouteTable {
        RouteTable::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn resolve_before_init_lazily_builds_empty_snapshot() {
        let table = table();
        assert_eq!(table.resolve("tools", "add").await.unwrap(), None);
        assert!(table.is_ready().await);
    }

    #[tokio::test]
    async fn add_then_resolve_round_trips() {
        let table = table();
        table.add("tools", "add", "http://tools:7001/add").await.unwrap();

        assert_eq!(
            table.resolve("tools", "add").await.unwrap(),
            Some("http://tools:7001/add".to_string())
        );
    }

    #[tokio::test]
    async fn add_upserts_last_write_wins() {
        let table = table();
        table.add("tools", "add", "http://v1/add").await.unwrap();
        table.add("tools", "add", "http://v2/add").await.unwrap();

        assert_eq!(
            table.resolve("tools", "add").await.unwrap(),
            Some("http://v2/add".to_string())
        );
    }

    #[tokio::test]
    async fn reload_picks_up_external_writes() {
        let kv = Arc::new(MemoryKv::new());
        let table = RouteTable::new(kv.clone());
        table.init(Duration::from_secs(2)).await;

        kv.hset("routes", "tools.sub", "http://tools/sub").await.unwrap();
        assert_eq!(table.resolve("tools", "sub").await.unwrap(), None);

        table.reload().await.unwrap();
        assert_eq!(
            table.resolve("tools", "sub").await.unwrap(),
            Some("http://tools/sub".to_string())
        );
    }

    #[tokio::test]
    async fn all_lists_every_route() {
        let table = table();
        table.add("tools", "add", "http://tools/add").await.unwrap();
        table.add("agents", "doc-ocr", "http://orch/agents/doc-ocr").await.unwrap();

        let mut entries = table.all().await;
        entries.sort_by(|a, b| a.action.cmp(&b.action));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "add");
        assert_eq!(entries[1].action, "doc-ocr");
    }
}
