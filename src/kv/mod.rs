//! Shared key/value abstraction (spec.md §4.1).
//!
//! Two implementations: [`RedisKv`] is the production backend — the route
//! table and the job tracker's lock/record both need to be visible across
//! every gateway and orchestrator process, which an embedded store cannot
//! provide. [`MemoryKv`] is the pure in-process variant spec.md §4.3
//! requires for tests; it implements the identical `nx`+`ex` atomicity
//! contract under a single lock.

mod memory;
mod redis_kv;

pub use memory::MemoryKv;
pub use redis_kv::RedisKv;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, KvError>;

/// Operations required by route table and job tracker alike (spec.md §4.1).
/// `nx` and `ex` on `set` must be atomic together — lock correctness
/// depends on it.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns `true` if the key was written (i.e. it didn't already exist
    /// when `nx` is set, or unconditionally otherwise).
    async fn set(&self, key: &str, value: &str, nx: bool, ex: Option<u64>) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<bool>;

    /// Deletes `key` only if its current value equals `expected`. Used for
    /// token-scoped lock release (spec.md §3 invariants): a mismatched
    /// token must be a no-op, never deleting someone else's lock.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool>;

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>>;

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<()>;

    async fn hgetall(&self, hash: &str) -> Result<HashMap<String, String>>;

    async fn ping(&self) -> Result<()>;
}
