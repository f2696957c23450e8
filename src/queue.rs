//! Per-user order queue
//!
//! Holds one user's working set of processable orders, bounds how many of
//! them may be in flight at once, and recycles the set from the store on a
//! cadence. Invariants:
//!
//! - an id returned by [`UserQueue::take`] leaves the sequence before `take`
//!   returns, so two takes never yield the same id;
//! - the sequence and the in-flight set stay disjoint, including across
//!   [`UserQueue::refresh`];
//! - [`UserQueue::complete`] without a prior take is a no-op.
//!
//! The store fetch inside `refresh` happens before the state mutex is taken;
//! no lock is ever held across an await.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::error;

use crate::core_types::{OrderId, UserId};
use crate::models::Order;
use crate::store::OrderStore;

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Order>,
    in_flight: HashSet<OrderId>,
    last_refresh: Option<Instant>,
}

/// Point-in-time view of one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub user_id: UserId,
    pub pending_count: usize,
    pub in_flight_count: usize,
    pub refreshed_ago: Option<Duration>,
}

#[derive(Debug)]
pub struct UserQueue {
    user_id: UserId,
    refresh_interval: Duration,
    max_in_flight: usize,
    state: Mutex<QueueState>,
}

impl UserQueue {
    pub fn new(user_id: UserId, refresh_interval: Duration, max_in_flight: usize) -> Self {
        Self {
            user_id,
            refresh_interval,
            max_in_flight,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                in_flight: HashSet::new(),
                last_refresh: None,
            }),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// True until the first refresh, then whenever the cadence has lapsed.
    pub fn needs_refresh(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .last_refresh
            .is_none_or(|at| at.elapsed() > self.refresh_interval)
    }

    /// Replace the working set from the store. Ids currently in flight are
    /// dropped from the fetched rows so a re-read never duplicates them.
    /// Returns the number of orders now queued; a store error leaves the
    /// queue untouched and returns 0.
    pub async fn refresh(&self, store: &dyn OrderStore) -> usize {
        let fetched = match store.user_working_set(self.user_id).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(user_id = self.user_id, error = %e, "working set refresh failed");
                return 0;
            }
        };

        let mut state = self.state.lock().unwrap();
        let mut fresh: Vec<Order> = fetched
            .into_iter()
            .filter(|o| !state.in_flight.contains(&o.id))
            .collect();
        // Store ordering is trusted but re-asserted: priority desc, oldest first.
        fresh.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        state.pending = fresh.into();
        state.last_refresh = Some(Instant::now());
        state.pending.len()
    }

    /// Next order, if the in-flight bound allows one. The returned order's id
    /// is already recorded as in flight.
    pub fn take(&self) -> Option<Order> {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.len() >= self.max_in_flight {
            return None;
        }
        let order = state.pending.pop_front()?;
        state.in_flight.insert(order.id);
        Some(order)
    }

    /// Release an in-flight slot. Unknown ids are ignored.
    pub fn complete(&self, order_id: OrderId) {
        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(&order_id);
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock().unwrap();
        QueueStatus {
            user_id: self.user_id,
            pending_count: state.pending.len(),
            in_flight_count: state.in_flight.len(),
            refreshed_ago: state.last_refresh.map(|at| at.elapsed()),
        }
    }
}
