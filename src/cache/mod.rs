//! Shared key-value cache: locks, status hints, queues, heartbeats
//!
//! The [`CacheGateway`] is the only cache surface the rest of the core sees.
//! It speaks through the [`Kv`] transport trait, implemented for Redis in
//! production and by an in-process fake for tests. Every gateway operation is
//! fail-soft: transport errors are logged and reported as the miss/no-op form,
//! never raised, so callers treat the cache as a best-effort fast path and
//! fall back to the authoritative store.

pub mod gateway;
pub mod keys;
mod kv;
pub mod memory;
pub mod redis;

pub use gateway::CacheGateway;
pub use kv::Kv;
pub use memory::MemoryKv;
pub use self::redis::RedisKv;
