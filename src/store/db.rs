//! PostgreSQL pool lifecycle
//!
//! Owns the pool handed to [`super::PgStore`]. Sizing and the acquire
//! deadline come from [`DatabaseSettings`]; the deadline doubles as the upper
//! bound a worker can stall on a checkout, since no lock is ever held across
//! one. `connect` fails fast on an unreachable server — the service binary
//! wraps it in a bounded retry loop, and liveness after startup is the fatal
//! watchdog's job, probing through [`super::OrderStore::health_check`].

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseSettings;
use crate::error::StoreError;

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect(&settings.url)
            .await?;

        tracing::info!(
            max_connections = settings.max_connections,
            acquire_timeout_secs = settings.acquire_timeout_secs,
            "order store pool ready"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Drain checked-out connections, then close. Called last during
    /// shutdown, after the workers and the observer have stopped issuing
    /// queries.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("order store pool closed");
    }
}
