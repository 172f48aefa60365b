use super::{Kv, KvError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Backend(err.to_string())
    }
}

/// A compare-then-delete Lua script, so a mismatched lock token can never
/// race with a concurrent re-acquisition between the GET and the DEL
/// (spec.md §3 invariant: release with `t' != t` is a no-op).
const DELETE_IF_EQ_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed `Kv`. Production backend: the route table and the job
/// tracker's lock/record both need to be visible to every gateway and
/// orchestrator replica, which only a networked store provides.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisKv {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            prefix: key_prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, nx: bool, ex: Option<u64>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if nx {
            cmd.arg("NX");
        }
        if let Some(ttl) = ex {
            cmd.arg("EX").arg(ttl);
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(self.key(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(DELETE_IF_EQ_SCRIPT)
            .key(self.key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(self.key(hash), field).await?;
        Ok(value)
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(self.key(hash), field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, hash: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(self.key(hash)).await?;
        Ok(map)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
