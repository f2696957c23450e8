//! orderwatch service binary
//!
//! Bootstraps the monitoring engine against PostgreSQL and Redis: load
//! settings, initialize logging, connect with bounded retry, register the
//! built-in event handlers, then run until SIGINT or a fatal condition.

use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use orderwatch::cache::{CacheGateway, RedisKv};
use orderwatch::config::Settings;
use orderwatch::engine::MonitorEngine;
use orderwatch::events::handlers::register_builtin_handlers;
use orderwatch::logging::init_logging;
use orderwatch::models::Order;
use orderwatch::store::{Database, OrderStore, PgStore};
use orderwatch::userlog::TracingUserLog;
use orderwatch::worker::{Execution, ExecutionAdapter};

const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Placeholder transition function. A deploying host links its own
/// [`ExecutionAdapter`] carrying the real trading side-effect; this one
/// leaves every order untouched so the service is safe to run as-is.
struct HoldExecution;

#[async_trait]
impl ExecutionAdapter for HoldExecution {
    async fn execute(&self, _order: &Order) -> anyhow::Result<Execution> {
        Ok(Execution::Unchanged)
    }
}

async fn connect_with_retry<T, E, F, Fut>(what: &str, connect: F) -> anyhow::Result<T>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut backoff = Duration::from_secs(1);
    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match connect().await {
            Ok(value) => {
                info!(attempt, "{what} connection established");
                return Ok(value);
            }
            Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                error!(attempt, error = %e, "{what} connection failed, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
            Err(e) => {
                anyhow::bail!("{what} unreachable after {MAX_CONNECT_ATTEMPTS} attempts: {e}");
            }
        }
    }
    unreachable!("retry loop returns or bails");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let settings =
        Settings::load(config_path.as_deref()).context("failed to load settings")?;

    let _log_guards = init_logging(&settings.logging);
    info!("orderwatch starting");

    let database = {
        let db_settings = settings.database.clone();
        connect_with_retry("postgres", move || {
            let db_settings = db_settings.clone();
            async move { Database::connect(&db_settings).await }
        })
        .await?
    };

    let kv = {
        let redis_url = settings.redis.url.clone();
        connect_with_retry("redis", move || {
            let redis_url = redis_url.clone();
            async move { RedisKv::connect(&redis_url).await }
        })
        .await?
    };

    let store: Arc<dyn OrderStore> = Arc::new(PgStore::new(database.pool().clone()));
    let cache = Arc::new(CacheGateway::new(Arc::new(kv)));
    let user_log = Arc::new(TracingUserLog);

    let engine = MonitorEngine::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::new(HoldExecution),
        user_log.clone(),
        settings.monitor.clone(),
    );

    register_builtin_handlers(
        engine.bus(),
        store,
        cache,
        user_log,
        settings.monitor.status_cache_ttl(),
    );

    engine.start().await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
        }
        _ = engine.wait_stopped() => {
            error!("engine stopped on its own, shutting down");
        }
    }

    engine.stop().await;
    database.close().await;
    info!("orderwatch stopped");
    Ok(())
}
