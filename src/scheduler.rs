//! User-level order scheduler
//!
//! Process-wide registry of active users, their priority scores, and their
//! queues. Hands a free worker the next (user, batch) pair under the
//! distributed user-lock contract: at most one worker works a given user's
//! queue at any moment, across every process sharing the cache.
//!
//! The registry mutex is held only around map reads and writes, never across
//! a store or cache call.

use rust_decimal::prelude::ToPrimitive;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::cache::CacheGateway;
use crate::config::MonitorConfig;
use crate::core_types::{OrderId, UserId};
use crate::models::Order;
use crate::queue::{QueueStatus, UserQueue};
use crate::store::OrderStore;

/// Priority score = count weight · order count + priority weight · average
/// priority. Policy constants, not invariants.
const SCORE_COUNT_WEIGHT: f64 = 0.7;
const SCORE_PRIORITY_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub active_refresh_interval: Duration,
    pub queue_refresh_interval: Duration,
    pub user_lock_ttl: Duration,
    pub max_in_flight_per_user: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            active_refresh_interval: Duration::from_secs(30),
            queue_refresh_interval: Duration::from_secs(5),
            user_lock_ttl: Duration::from_secs(300),
            max_in_flight_per_user: 3,
        }
    }
}

impl From<&MonitorConfig> for SchedulerConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            active_refresh_interval: config.active_refresh_interval(),
            queue_refresh_interval: config.queue_refresh_interval(),
            user_lock_ttl: config.user_lock_ttl(),
            max_in_flight_per_user: config.max_in_flight_per_user,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    /// Active users sorted by descending score (user id ascending on ties).
    ranked: Vec<(UserId, f64)>,
    scores: FxHashMap<UserId, f64>,
    queues: FxHashMap<UserId, Arc<UserQueue>>,
    last_refresh: Option<Instant>,
    /// Bumped each lease to rotate within equal-score blocks.
    cursor: usize,
}

/// Roll-up of scheduler state for operators.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub active_users: usize,
    pub total_pending: usize,
    pub total_in_flight: usize,
    pub queues: Vec<QueueStatus>,
}

pub struct Scheduler {
    store: Arc<dyn OrderStore>,
    cache: Arc<CacheGateway>,
    config: SchedulerConfig,
    registry: Mutex<Registry>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<CacheGateway>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn score(order_count: i64, avg_priority: Option<rust_decimal::Decimal>) -> f64 {
        let avg = avg_priority.and_then(|d| d.to_f64()).unwrap_or(0.0);
        order_count as f64 * SCORE_COUNT_WEIGHT + avg * SCORE_PRIORITY_WEIGHT
    }

    /// Reload the active-user set from the store, at most once per refresh
    /// interval. Queues of users that left the set are dropped. Returns the
    /// size of the active set; a store error leaves the registry as it was.
    pub async fn refresh_active_users(&self) -> usize {
        {
            let registry = self.registry.lock().unwrap();
            let due = registry
                .last_refresh
                .is_none_or(|at| at.elapsed() > self.config.active_refresh_interval);
            if !due {
                return registry.ranked.len();
            }
        }

        let rows = match self.store.active_users().await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "active user refresh failed");
                return self.registry.lock().unwrap().ranked.len();
            }
        };

        let mut registry = self.registry.lock().unwrap();
        registry.scores.clear();
        for row in &rows {
            registry
                .scores
                .insert(row.user_id, Self::score(row.order_count, row.avg_priority));
        }

        let mut ranked: Vec<(UserId, f64)> = registry
            .scores
            .iter()
            .map(|(user, score)| (*user, *score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        registry.ranked = ranked;

        let Registry { queues, scores, .. } = &mut *registry;
        queues.retain(|user, _| scores.contains_key(user));
        registry.last_refresh = Some(Instant::now());

        info!(active_users = registry.ranked.len(), "active user set refreshed");
        registry.ranked.len()
    }

    /// Iteration order for one lease pass: descending score, with equal-score
    /// blocks rotated by the cursor so pressure spreads across workers.
    fn iteration_order(ranked: &[(UserId, f64)], cursor: usize) -> Vec<UserId> {
        let mut order = Vec::with_capacity(ranked.len());
        let mut start = 0;
        while start < ranked.len() {
            let mut end = start + 1;
            while end < ranked.len() && ranked[end].1 == ranked[start].1 {
                end += 1;
            }
            let block = &ranked[start..end];
            let offset = cursor % block.len();
            order.extend(block[offset..].iter().map(|(user, _)| *user));
            order.extend(block[..offset].iter().map(|(user, _)| *user));
            start = end;
        }
        order
    }

    fn queue_for(&self, user_id: UserId) -> Arc<UserQueue> {
        let mut registry = self.registry.lock().unwrap();
        Arc::clone(registry.queues.entry(user_id).or_insert_with(|| {
            Arc::new(UserQueue::new(
                user_id,
                self.config.queue_refresh_interval,
                self.config.max_in_flight_per_user,
            ))
        }))
    }

    /// Find the next user with work for this worker and lease up to
    /// `batch_size` of their orders. On success the worker holds the user's
    /// distributed lock and must call [`Scheduler::release`] when done.
    pub async fn lease_batch(
        &self,
        worker_id: &str,
        batch_size: usize,
    ) -> Option<(UserId, Vec<Order>)> {
        self.refresh_active_users().await;

        let candidates = {
            let mut registry = self.registry.lock().unwrap();
            if registry.ranked.is_empty() {
                return None;
            }
            registry.cursor = registry.cursor.wrapping_add(1);
            Self::iteration_order(&registry.ranked, registry.cursor)
        };

        for user_id in candidates {
            if !self
                .cache
                .acquire_user_lock(user_id, worker_id, self.config.user_lock_ttl)
                .await
            {
                continue;
            }

            let queue = self.queue_for(user_id);
            if queue.needs_refresh() {
                let refreshed = queue.refresh(self.store.as_ref()).await;
                if refreshed > 0 {
                    debug!(user_id, refreshed, "working set refreshed");
                }
            }

            let mut orders = Vec::with_capacity(batch_size);
            while orders.len() < batch_size {
                match queue.take() {
                    Some(order) => orders.push(order),
                    None => break,
                }
            }

            if orders.is_empty() {
                self.cache.release_user_lock(user_id, worker_id).await;
                continue;
            }

            debug!(
                worker_id,
                user_id,
                count = orders.len(),
                "batch leased"
            );
            return Some((user_id, orders));
        }

        None
    }

    /// Release the user's distributed lock on behalf of a worker.
    pub async fn release(&self, user_id: UserId, worker_id: &str) {
        self.cache.release_user_lock(user_id, worker_id).await;
    }

    /// Return an in-flight slot after an order finished (or was skipped).
    pub fn mark_complete(&self, user_id: UserId, order_id: OrderId) {
        let queue = {
            let registry = self.registry.lock().unwrap();
            registry.queues.get(&user_id).cloned()
        };
        if let Some(queue) = queue {
            queue.complete(order_id);
        }
    }

    pub fn active_user_count(&self) -> usize {
        self.registry.lock().unwrap().ranked.len()
    }

    pub fn system_status(&self) -> SystemStatus {
        let registry = self.registry.lock().unwrap();
        let queues: Vec<QueueStatus> = registry.queues.values().map(|q| q.status()).collect();
        SystemStatus {
            active_users: registry.ranked.len(),
            total_pending: queues.iter().map(|q| q.pending_count).sum(),
            total_in_flight: queues.iter().map(|q| q.in_flight_count).sum(),
            queues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKv;
    use crate::models::test_fixtures::{group, order, user};
    use crate::models::{GroupStatus, OrderStatus, UserStatus};
    use crate::store::MemoryStore;

    fn scheduler_with(store: Arc<MemoryStore>) -> Scheduler {
        let cache = Arc::new(CacheGateway::new(Arc::new(MemoryKv::new())));
        let config = SchedulerConfig {
            // refresh on every lease in tests
            active_refresh_interval: Duration::ZERO,
            queue_refresh_interval: Duration::ZERO,
            user_lock_ttl: Duration::from_secs(60),
            max_in_flight_per_user: 3,
        };
        Scheduler::new(store, cache, config)
    }

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user(1, UserStatus::Enabled));
        store.insert_user(user(2, UserStatus::Enabled));
        store.insert_group(group(10, 1, GroupStatus::Open));
        store.insert_group(group(20, 2, GroupStatus::Open));
        store
    }

    #[tokio::test]
    async fn test_refresh_scores_and_ranks() {
        let store = seeded();
        // user 1: two orders, avg priority 0 -> 1.4
        store.insert_order(order(101, 1, 10, OrderStatus::Pending, 0, 0));
        store.insert_order(order(102, 1, 10, OrderStatus::Pending, 0, 1));
        // user 2: one order, priority 10 -> 0.7 + 3.0 = 3.7
        store.insert_order(order(201, 2, 20, OrderStatus::Pending, 10, 2));

        let scheduler = scheduler_with(store);
        assert_eq!(scheduler.refresh_active_users().await, 2);

        let registry = scheduler.registry.lock().unwrap();
        assert_eq!(registry.ranked[0].0, 2);
        assert_eq!(registry.ranked[1].0, 1);
        assert!((registry.scores[&1] - 1.4).abs() < 1e-9);
        assert!((registry.scores[&2] - 3.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_lease_batch_grants_exclusive_access() {
        let store = seeded();
        for i in 0..4 {
            store.insert_order(order(100 + i, 1, 10, OrderStatus::Pending, 0, i));
        }

        let scheduler = scheduler_with(store);
        let (user_id, batch) = scheduler.lease_batch("worker-a", 2).await.unwrap();
        assert_eq!(user_id, 1);
        assert_eq!(batch.len(), 2);

        // worker-b cannot lease the only user while worker-a holds the lock
        assert!(scheduler.lease_batch("worker-b", 2).await.is_none());

        for order in &batch {
            scheduler.mark_complete(user_id, order.id);
        }
        scheduler.release(user_id, "worker-a").await;

        // the store still reports all four orders processable, so the re-lease
        // is bounded only by the in-flight limit
        let (user_id, batch) = scheduler.lease_batch("worker-b", 10).await.unwrap();
        assert_eq!(user_id, 1);
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn test_lease_skips_user_without_work() {
        let store = seeded();
        // only user 2 has orders
        store.insert_order(order(201, 2, 20, OrderStatus::Pending, 0, 0));

        let scheduler = scheduler_with(store);
        let (user_id, batch) = scheduler.lease_batch("worker-a", 5).await.unwrap();
        assert_eq!(user_id, 2);
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_active_set_yields_none() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store);
        assert!(scheduler.lease_batch("worker-a", 5).await.is_none());
    }

    #[tokio::test]
    async fn test_departed_user_queue_is_dropped() {
        let store = seeded();
        store.insert_order(order(101, 1, 10, OrderStatus::Pending, 0, 0));

        let scheduler = scheduler_with(store.clone());
        let (user_id, batch) = scheduler.lease_batch("worker-a", 1).await.unwrap();
        scheduler.mark_complete(user_id, batch[0].id);
        scheduler.release(user_id, "worker-a").await;
        assert_eq!(scheduler.system_status().queues.len(), 1);

        store.set_user_status(1, UserStatus::Disabled);
        assert_eq!(scheduler.refresh_active_users().await, 0);
        assert!(scheduler.system_status().queues.is_empty());
    }

    #[test]
    fn test_iteration_rotates_within_equal_scores() {
        let ranked = vec![(5, 9.0), (1, 2.0), (2, 2.0), (3, 2.0)];
        assert_eq!(Scheduler::iteration_order(&ranked, 0), vec![5, 1, 2, 3]);
        assert_eq!(Scheduler::iteration_order(&ranked, 1), vec![5, 2, 3, 1]);
        assert_eq!(Scheduler::iteration_order(&ranked, 2), vec![5, 3, 1, 2]);
        // the top block has one member, so it never loses its place
        assert_eq!(Scheduler::iteration_order(&ranked, 3), vec![5, 1, 2, 3]);
    }
}
