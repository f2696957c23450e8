//! In-process key-value fake
//!
//! TTL-aware stand-in for Redis used by the test suite and by demos that run
//! without external services. Atomicity of `set_nx`/`del_if_eq` holds because
//! every command runs under one mutex; expiry is evaluated lazily on access,
//! so `scan_match` and `exists` never report a dead key.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::kv::Kv;
use crate::error::KvError;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

#[derive(Debug, Default)]
struct State {
    strings: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl State {
    /// Drop the entry if its TTL has lapsed, then return a live reference.
    fn live_entry(&mut self, key: &str) -> Option<&Entry> {
        if let Some(entry) = self.strings.get(key) {
            if !entry.live() {
                self.strings.remove(key);
                return None;
            }
        }
        self.strings.get(key)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<State>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl: Duration) -> Option<Instant> {
        Some(Instant::now() + ttl)
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut state = self.state.lock().unwrap();
        state.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.and_then(Self::expiry),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut state = self.state.lock().unwrap();
        if state.live_entry(key).is_some() {
            return Ok(false);
        }
        state.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::expiry(ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.live_entry(key).map(|e| e.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let mut state = self.state.lock().unwrap();
        let was_live = state.live_entry(key).is_some();
        state.strings.remove(key);
        Ok(was_live)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut state = self.state.lock().unwrap();
        match state.live_entry(key) {
            Some(entry) if entry.value == expected => {
                state.strings.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.live_entry(key).is_some())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut state = self.state.lock().unwrap();
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len() as u64)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.lists.get_mut(key).and_then(|l| l.pop_back()))
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let state = self.state.lock().unwrap();
        Ok(state.lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
        let mut state = self.state.lock().unwrap();
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<Vec<(String, String)>, KvError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        // Prefix globs only ("ns:*"), which is all the gateway asks for.
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let mut state = self.state.lock().unwrap();
        let keys: Vec<String> = state
            .strings
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys
            .into_iter()
            .filter(|k| state.live_entry(k).is_some())
            .collect())
    }

    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }
}
