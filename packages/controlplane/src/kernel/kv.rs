//! Shared KV store: lease locks and the persisted autoscaler config.
//!
//! `RedisKv` is the production implementation. `MemoryKv` backs tests and
//! the documented single-instance degradation when no Redis is configured.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::common::Result;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Write `{key -> value}` with a TTL iff the key is absent. Returns
    /// whether the write happened.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Reset the TTL iff the stored value still equals `value`.
    async fn extend_if_equals(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete iff the stored value still equals `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

// ============================================================================
// Redis implementation
// ============================================================================

const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn extend_if_equals(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = redis::Script::new(EXTEND_SCRIPT)
            .key(key)
            .arg(value)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(DELETE_SCRIPT)
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// Process-local KV with TTL semantics matching the Redis implementation.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if !entry.expired() {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn extend_if_equals(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key) {
            Some(entry) if !entry.expired() && entry.value == value => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if !entry.expired() && entry.value == value => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_refuses_live_key() {
        let kv = MemoryKv::new();
        assert!(kv
            .put_if_absent("k", "a", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!kv
            .put_if_absent("k", "b", Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn put_if_absent_replaces_expired_key() {
        let kv = MemoryKv::new();
        assert!(kv
            .put_if_absent("k", "a", Duration::from_millis(1))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(kv
            .put_if_absent("k", "b", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn extend_requires_matching_value() {
        let kv = MemoryKv::new();
        kv.put_if_absent("k", "a", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(kv
            .extend_if_equals("k", "a", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!kv
            .extend_if_equals("k", "other", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_if_equals_requires_matching_value() {
        let kv = MemoryKv::new();
        kv.put_if_absent("k", "a", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!kv.delete_if_equals("k", "other").await.unwrap());
        assert!(kv.delete_if_equals("k", "a").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
