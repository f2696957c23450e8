//! Error types for the monitoring core
//!
//! Workers never propagate per-order errors upward; these types exist so the
//! loops can tell recoverable conditions apart and so the binary gets a single
//! top-level error.

use thiserror::Error;

/// Authoritative-store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store invariant violated: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Transient errors are retried once with a short backoff; everything
    /// else abandons the current operation.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::Io(_)
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Cache transport errors. Callers treat the cache as best-effort: reads
/// degrade to misses, writes to no-ops. Only the gateway ever sees this type.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache value malformed: {0}")]
    BadValue(String),
}

/// A cache-queue payload that does not decode to a known event kind.
#[derive(Error, Debug)]
#[error("malformed event payload: {0}")]
pub struct MalformedEvent(#[from] pub serde_json::Error);

/// Top-level error for engine construction and the service binary.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cache unavailable: {0}")]
    Cache(#[from] KvError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store and cache unreachable for longer than the grace period")]
    Fatal,
}
