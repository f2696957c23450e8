//! Key-value transport trait
//!
//! The minimal command set the gateway needs. Implementations must make
//! `set_nx` and `del_if_eq` atomic on the server side; the whole locking
//! contract rests on those two.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::KvError;

#[async_trait]
pub trait Kv: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Set only if the key is absent; returns true iff this call set it.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn del(&self, key: &str) -> Result<bool, KvError>;

    /// Delete only if the current value equals `expected`; returns true iff
    /// the key was deleted.
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, KvError>;

    async fn rpop(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn llen(&self, key: &str) -> Result<u64, KvError>;

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError>;

    async fn hget_all(&self, key: &str) -> Result<Vec<(String, String)>, KvError>;

    /// Keys matching a glob pattern whose TTL has not yet expired.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, KvError>;

    async fn ping(&self) -> Result<(), KvError>;
}
