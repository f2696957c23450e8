//! Monitoring engine
//!
//! Explicitly constructed core: store, cache gateway, scheduler, worker pool,
//! status observer, and event bus are built here and handed to every task.
//! There is no ambient state; the engine value is the process.
//!
//! Shutdown order: raise the stop flag (workers stop leasing, observer stops
//! snapshotting), join workers and auxiliary loops, then drain the event bus.
//! Connection pools are closed by the caller that opened them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::{CacheGateway, keys};
use crate::config::MonitorConfig;
use crate::events::EventBus;
use crate::observer::StatusObserver;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::OrderStore;
use crate::userlog::UserLog;
use crate::worker::{ExecutionAdapter, WorkerContext, WorkerPool};

/// Health probe cadence of the fatal watchdog.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);
/// Stop-signal poll slice for auxiliary loops.
const STOP_POLL_SLICE: Duration = Duration::from_millis(50);

/// Operator-facing roll-up of engine state.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub active_users: usize,
    pub total_pending: usize,
    pub total_in_flight: usize,
    pub live_workers: usize,
    pub processed: u64,
    pub errors: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
}

pub struct MonitorEngine {
    store: Arc<dyn OrderStore>,
    cache: Arc<CacheGateway>,
    scheduler: Arc<Scheduler>,
    bus: Arc<EventBus>,
    observer: Arc<StatusObserver>,
    pool: WorkerPool,
    config: Arc<MonitorConfig>,
    stop: Arc<AtomicBool>,
    running: AtomicBool,
    aux_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorEngine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<CacheGateway>,
        adapter: Arc<dyn ExecutionAdapter>,
        user_log: Arc<dyn UserLog>,
        config: MonitorConfig,
    ) -> Self {
        let config = Arc::new(config);
        let stop = Arc::new(AtomicBool::new(false));

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            SchedulerConfig::from(config.as_ref()),
        ));
        let bus = Arc::new(EventBus::new(
            config.event_bus_queue_size,
            config.event_bus_workers,
            config.event_handler_timeout(),
        ));
        let observer = Arc::new(StatusObserver::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&bus),
            Arc::clone(&config),
            Arc::clone(&stop),
        ));
        let pool = WorkerPool::new(Arc::new(WorkerContext {
            store: Arc::clone(&store),
            cache: Arc::clone(&cache),
            scheduler: Arc::clone(&scheduler),
            bus: Arc::clone(&bus),
            adapter,
            user_log,
            config: Arc::clone(&config),
            stop: Arc::clone(&stop),
        }));

        Self {
            store,
            cache,
            scheduler,
            bus,
            observer,
            pool,
            config,
            stop,
            running: AtomicBool::new(false),
            aux_handles: Mutex::new(Vec::new()),
        }
    }

    /// The bus, for handler registration before [`MonitorEngine::start`].
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Start every component. Handlers registered on the bus after this point
    /// miss events that were already dispatched.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("engine already running");
            return;
        }
        info!(
            workers = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting order monitoring engine"
        );

        self.bus.start();

        if let Err(e) = self.observer.reconcile_hints().await {
            warn!(error = %e, "initial hint reconcile failed, hints warm lazily");
        }

        {
            let observer = Arc::clone(&self.observer);
            self.aux_handles
                .lock()
                .unwrap()
                .push(tokio::spawn(async move { observer.run().await }));
        }

        self.pool.start();
        self.spawn_stats_loop();
        self.spawn_fatal_watchdog();

        info!("order monitoring engine started");
    }

    /// Graceful shutdown; safe to call once.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping order monitoring engine");

        self.stop.store(true, Ordering::Relaxed);
        self.pool.stop().await;

        let aux: Vec<JoinHandle<()>> = std::mem::take(&mut *self.aux_handles.lock().unwrap());
        for handle in aux {
            if let Err(e) = handle.await {
                error!(error = %e, "auxiliary task panicked");
            }
        }

        self.bus.shutdown().await;
        info!("order monitoring engine stopped");
    }

    /// True once a fatal condition or a stop call ended the engine's loops.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Resolves when the stop flag rises (fatal watchdog or explicit stop).
    pub async fn wait_stopped(&self) {
        while !self.stop_requested() {
            tokio::time::sleep(STOP_POLL_SLICE).await;
        }
    }

    pub async fn status(&self) -> EngineStatus {
        let scheduler = self.scheduler.system_status();
        EngineStatus {
            running: self.running.load(Ordering::SeqCst),
            active_users: scheduler.active_users,
            total_pending: scheduler.total_pending,
            total_in_flight: scheduler.total_in_flight,
            live_workers: self.cache.list_live_workers().await.len(),
            processed: self.pool.total_processed(),
            errors: self.pool.total_errors(),
            events_delivered: self.bus.delivered_count(),
            events_failed: self.bus.failed_count(),
        }
    }

    /// Once a minute, roll the per-worker counters up into process totals.
    fn spawn_stats_loop(&self) {
        let cache = Arc::clone(&self.cache);
        let stop = Arc::clone(&self.stop);
        let interval = self.config.stats_interval();

        self.aux_handles.lock().unwrap().push(tokio::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                let deadline = Instant::now() + interval;
                while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
                    tokio::time::sleep(STOP_POLL_SLICE).await;
                }
                if stop.load(Ordering::Relaxed) {
                    break;
                }

                let counters = cache.read_counters().await;
                let total_processed: i64 = counters
                    .iter()
                    .filter(|(k, _)| k.starts_with("worker_") && k.ends_with("_processed"))
                    .map(|(_, v)| *v)
                    .sum();
                let total_errors: i64 = counters
                    .iter()
                    .filter(|(k, _)| k.starts_with("worker_") && k.ends_with("_errors"))
                    .map(|(_, v)| *v)
                    .sum();
                let live_workers = cache.list_live_workers().await.len() as i64;
                let queue_length = cache.queue_len(keys::ORDER_EVENT_QUEUE).await as i64;

                cache
                    .update_counters(&[
                        ("total_processed".to_string(), total_processed),
                        ("total_errors".to_string(), total_errors),
                        ("active_workers".to_string(), live_workers),
                        ("queue_length".to_string(), queue_length),
                        (
                            "last_stats_update".to_string(),
                            chrono::Utc::now().timestamp(),
                        ),
                    ])
                    .await;

                if total_processed > 0 || queue_length > 0 {
                    info!(
                        total_processed,
                        total_errors, live_workers, queue_length, "monitoring stats"
                    );
                }
            }
        }));
    }

    /// Trigger graceful shutdown when both the store and the cache stay
    /// unreachable past the grace period.
    fn spawn_fatal_watchdog(&self) {
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let stop = Arc::clone(&self.stop);
        let grace = self.config.fatal_grace();

        self.aux_handles.lock().unwrap().push(tokio::spawn(async move {
            let mut failing_since: Option<Instant> = None;
            while !stop.load(Ordering::Relaxed) {
                let store_down = store.health_check().await.is_err();
                let cache_down = !cache.ping().await;

                if store_down && cache_down {
                    let since = *failing_since.get_or_insert_with(Instant::now);
                    if since.elapsed() > grace {
                        error!(
                            grace_secs = grace.as_secs(),
                            "store and cache unreachable past grace period, shutting down"
                        );
                        stop.store(true, Ordering::Relaxed);
                        break;
                    }
                    warn!("store and cache both unreachable");
                } else {
                    failing_since = None;
                }

                let deadline = Instant::now() + WATCHDOG_INTERVAL;
                while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
                    tokio::time::sleep(STOP_POLL_SLICE).await;
                }
            }
        }));
    }
}
