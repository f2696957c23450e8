//! Redis transport
//!
//! Runs over a [`ConnectionManager`], which reconnects internally. `set_nx`
//! maps to `SET NX EX`; `del_if_eq` is a server-side Lua script so the
//! compare and the delete cannot interleave with another client.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::kv::Kv;
use crate::error::KvError;

/// Compare-and-delete: delete the key only while it still holds our value.
const DEL_IF_EQ_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("redis connection established");
        Ok(Self { conn })
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(Self::ttl_secs(ttl));
        }
        let _: () = cmd.query_async(&mut self.conn.clone()).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(result.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(removed > 0)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let removed: i64 = redis::cmd("EVAL")
            .arg(DEL_IF_EQ_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(expected)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(removed == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let found: u64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(found > 0)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let len: u64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(len)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let value: Option<String> = redis::cmd("RPOP")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(value)
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let len: u64 = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(len)
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: u64 = cmd.query_async(&mut self.conn.clone()).await?;
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<Vec<(String, String)>, KvError> {
        let fields: Vec<(String, String)> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(fields)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut self.conn.clone())
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), KvError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }
}
