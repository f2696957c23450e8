//! Order workers
//!
//! `worker_count` long-lived loops, each leasing one user's batch at a time
//! from the scheduler and driving every order through the processing step:
//! claim the processing mark, re-check eligibility, invoke the host's
//! execution adapter, persist, emit. Per-order failures are counted and
//! logged, never propagated; only the stop signal ends the loop.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheGateway, keys};
use crate::config::MonitorConfig;
use crate::core_types::UserId;
use crate::error::StoreError;
use crate::events::{Event, EventBus, OrderStatusChange};
use crate::models::{GroupStatus, Order, OrderStatus, StatusLogEntry, UserStatus};
use crate::scheduler::Scheduler;
use crate::store::OrderStore;
use crate::userlog::UserLog;

const TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of the host's transition function for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// The order stays as it is.
    Unchanged,
    /// The order advances to `status` with a new cumulative fill.
    Progress {
        status: OrderStatus,
        filled_quantity: Decimal,
    },
}

/// The trading side-effect of "processing an order", provided by the host
/// application. Called only while the worker holds both the user lock and
/// the order's processing mark.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn execute(&self, order: &Order) -> anyhow::Result<Execution>;
}

/// Shared dependencies of every worker in the pool.
pub struct WorkerContext {
    pub store: Arc<dyn OrderStore>,
    pub cache: Arc<CacheGateway>,
    pub scheduler: Arc<Scheduler>,
    pub bus: Arc<EventBus>,
    pub adapter: Arc<dyn ExecutionAdapter>,
    pub user_log: Arc<dyn UserLog>,
    pub config: Arc<MonitorConfig>,
    pub stop: Arc<AtomicBool>,
}

pub struct Worker {
    id: String,
    ctx: Arc<WorkerContext>,
    processed: AtomicU64,
    errors: AtomicU64,
    last_heartbeat: Mutex<Option<Instant>>,
}

impl Worker {
    pub fn new(id: String, ctx: Arc<WorkerContext>) -> Self {
        Self {
            id,
            ctx,
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_heartbeat: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn stopping(&self) -> bool {
        self.ctx.stop.load(Ordering::Relaxed)
    }

    /// The worker loop: heartbeat, lease, process, release, sleep when idle.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "order worker started");
        let check_interval = self.ctx.config.check_interval();
        let batch_size = self.ctx.config.batch_size;

        while !self.stopping() {
            self.heartbeat_if_due().await;

            match self.ctx.scheduler.lease_batch(&self.id, batch_size).await {
                Some((user_id, batch)) => {
                    debug!(
                        worker_id = %self.id,
                        user_id,
                        count = batch.len(),
                        "processing leased batch"
                    );
                    self.process_batch(user_id, &batch).await;
                    self.ctx.scheduler.release(user_id, &self.id).await;
                    self.flush_counters().await;
                }
                None => tokio::time::sleep(check_interval).await,
            }
        }

        info!(
            worker_id = %self.id,
            processed = self.processed(),
            errors = self.errors(),
            "order worker stopped"
        );
    }

    /// Process one leased batch in lease order. Orders not reached before a
    /// stop signal get their in-flight slots returned untouched.
    pub async fn process_batch(&self, user_id: UserId, batch: &[Order]) {
        for (index, order) in batch.iter().enumerate() {
            if self.stopping() {
                for unprocessed in &batch[index..] {
                    self.ctx.scheduler.mark_complete(user_id, unprocessed.id);
                }
                return;
            }
            self.process_order(order).await;
            self.ctx.scheduler.mark_complete(user_id, order.id);
        }
    }

    /// The full per-order step. Returns true when the order was executed
    /// (changed or not), false when it was skipped.
    pub async fn process_order(&self, order: &Order) -> bool {
        let claimed = self
            .ctx
            .cache
            .mark_order_processing(order.id, &self.id, self.ctx.config.order_processing_ttl())
            .await;
        if !claimed {
            debug!(order_id = order.id, "order already claimed elsewhere");
            return false;
        }

        let outcome = self.process_claimed(order).await;
        self.ctx.cache.clear_order_processing(order.id).await;

        match outcome {
            Ok(executed) => {
                if executed {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
                executed
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!(worker_id = %self.id, order_id = order.id, error = %e, "order step failed");
                false
            }
        }
    }

    async fn process_claimed(&self, order: &Order) -> anyhow::Result<bool> {
        if !order.fill_within_bounds() {
            error!(
                order_id = order.id,
                quantity = %order.quantity,
                filled = %order.filled_quantity,
                "stored fill exceeds quantity, skipping order"
            );
            return Ok(false);
        }

        if !self.order_eligible(order).await {
            debug!(order_id = order.id, "order no longer eligible");
            return Ok(false);
        }

        let execution = self.ctx.adapter.execute(order).await?;
        let Execution::Progress {
            status,
            filled_quantity,
        } = execution
        else {
            return Ok(true);
        };

        if !order.status.can_transition_to(status) || filled_quantity > order.quantity {
            error!(
                order_id = order.id,
                from = %order.status,
                to = %status,
                filled = %filled_quantity,
                quantity = %order.quantity,
                "illegal transition from execution adapter, skipping order"
            );
            return Ok(false);
        }

        self.persist_transition(order, status, filled_quantity)
            .await?;
        self.emit_change(order, status, filled_quantity).await;
        Ok(true)
    }

    /// Eligibility re-check against the cache hints, reading through to the
    /// store (and priming the hint) on a miss.
    async fn order_eligible(&self, order: &Order) -> bool {
        let ttl = self.ctx.config.status_cache_ttl();

        let user_enabled = match self.ctx.cache.get_user_status(order.user_id).await {
            Some(status) => status == UserStatus::Enabled,
            None => match self.ctx.store.user_status(order.user_id).await {
                Ok(Some(status)) => {
                    self.ctx.cache.set_user_status(order.user_id, status, ttl).await;
                    status == UserStatus::Enabled
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(user_id = order.user_id, error = %e, "user status lookup failed");
                    false
                }
            },
        };
        if !user_enabled {
            return false;
        }

        match self.ctx.cache.get_group_status(order.group_id).await {
            Some(status) => status == GroupStatus::Open,
            None => match self.ctx.store.group_status(order.group_id).await {
                Ok(Some(status)) => {
                    self.ctx.cache.set_group_status(order.group_id, status, ttl).await;
                    status == GroupStatus::Open
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(group_id = order.group_id, error = %e, "group status lookup failed");
                    false
                }
            },
        }
    }

    /// Update the order row and append the status-log row, each with one
    /// retry on a transient store error.
    async fn persist_transition(
        &self,
        order: &Order,
        status: OrderStatus,
        filled_quantity: Decimal,
    ) -> Result<(), StoreError> {
        let updated = retry_transient(|| {
            self.ctx.store.update_order(order.id, status, filled_quantity)
        })
        .await?;
        if !updated {
            warn!(order_id = order.id, "order row vanished before update");
            return Ok(());
        }

        let entry = StatusLogEntry {
            order_id: order.id,
            old_status: order.status,
            new_status: status,
            old_filled_quantity: order.filled_quantity,
            new_filled_quantity: filled_quantity,
            change_reason: format!("processed by {}", self.id),
        };
        retry_transient(|| self.ctx.store.append_status_log(&entry)).await?;
        Ok(())
    }

    async fn emit_change(&self, order: &Order, status: OrderStatus, filled_quantity: Decimal) {
        let event = Event::OrderStatusChange(OrderStatusChange {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            order_id: order.id,
            user_id: order.user_id,
            group_id: order.group_id,
            old_status: order.status,
            new_status: status,
            filled_quantity,
            symbol: order.symbol.clone(),
        });

        // external tail point for consumers outside this process
        self.ctx
            .cache
            .push_event(keys::ORDER_EVENT_QUEUE, &event)
            .await;

        if !self.ctx.bus.publish(event) {
            warn!(order_id = order.id, "event bus rejected order status change");
        }

        self.ctx.user_log.entry(
            order.user_id,
            &format!(
                "order[{}] {} -> {}, filled: {filled_quantity}",
                order.id, order.status, status
            ),
        );
    }

    async fn heartbeat_if_due(&self) {
        let due = {
            let last = self.last_heartbeat.lock().unwrap();
            last.is_none_or(|at| at.elapsed() >= self.ctx.config.heartbeat_interval())
        };
        if due {
            self.ctx
                .cache
                .record_worker_heartbeat(&self.id, self.ctx.config.heartbeat_ttl())
                .await;
            *self.last_heartbeat.lock().unwrap() = Some(Instant::now());
        }
    }

    async fn flush_counters(&self) {
        self.ctx
            .cache
            .update_counters(&[
                (format!("{}_processed", self.id), self.processed() as i64),
                (format!("{}_errors", self.id), self.errors() as i64),
                (format!("{}_last_update", self.id), Utc::now().timestamp()),
            ])
            .await;
    }
}

/// Retry a store operation once after a short backoff when the first attempt
/// failed transiently.
async fn retry_transient<T, F, Fut>(op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            warn!(error = %e, "transient store error, retrying once");
            tokio::time::sleep(TRANSIENT_RETRY_BACKOFF).await;
            op().await
        }
        other => other,
    }
}

/// Fixed-size pool of order workers sharing one context.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Build `worker_count` workers. Ids follow `worker_<index>_<uuid[..8]>`
    /// so counters and heartbeats stay distinguishable across restarts.
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        let stop = Arc::clone(&ctx.stop);
        let workers = (0..ctx.config.worker_count)
            .map(|index| {
                let suffix = Uuid::new_v4().simple().to_string();
                let id = format!("worker_{index}_{}", &suffix[..8]);
                Arc::new(Worker::new(id, Arc::clone(&ctx)))
            })
            .collect();
        Self {
            workers,
            handles: Mutex::new(Vec::new()),
            stop,
        }
    }

    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        if !handles.is_empty() {
            warn!("worker pool already started");
            return;
        }
        for worker in &self.workers {
            let worker = Arc::clone(worker);
            handles.push(tokio::spawn(async move { worker.run().await }));
        }
        info!(workers = self.workers.len(), "worker pool started");
    }

    /// Signal stop and wait for every worker to finish its current batch.
    pub async fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "order worker panicked");
            }
        }
        info!("worker pool stopped");
    }

    pub fn total_processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed()).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.workers.iter().map(|w| w.errors()).sum()
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.id().to_string()).collect()
    }
}
