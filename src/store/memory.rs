//! In-memory store double
//!
//! Backs the test suite and service-free demos. Row semantics mirror the SQL
//! in [`super::pg`]: same filters, same ordering, same `filled_at` stamping.
//! `fail_updates` injects a transient error on write paths so retry behavior
//! can be exercised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::OrderStore;
use crate::core_types::{GroupId, OrderId, UserId};
use crate::error::StoreError;
use crate::models::{
    ActiveUserRow, GroupStatus, Order, OrderGroup, OrderStatus, StatusLogEntry, User, UserStatus,
};

/// A persisted status-log row plus its insertion timestamp.
#[derive(Debug, Clone)]
pub struct LoggedChange {
    pub entry: StatusLogEntry,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    groups: HashMap<GroupId, OrderGroup>,
    orders: HashMap<OrderId, Order>,
    status_logs: Vec<LoggedChange>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_updates: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.tables.lock().unwrap().users.insert(user.id, user);
    }

    pub fn insert_group(&self, group: OrderGroup) {
        self.tables.lock().unwrap().groups.insert(group.id, group);
    }

    pub fn insert_order(&self, order: Order) {
        self.tables.lock().unwrap().orders.insert(order.id, order);
    }

    pub fn set_user_status(&self, user_id: UserId, status: UserStatus) {
        if let Some(user) = self.tables.lock().unwrap().users.get_mut(&user_id) {
            user.status = status;
        }
    }

    pub fn set_group_status(&self, group_id: GroupId, status: GroupStatus) {
        if let Some(group) = self.tables.lock().unwrap().groups.get_mut(&group_id) {
            group.status = status;
        }
    }

    pub fn remove_user(&self, user_id: UserId) {
        self.tables.lock().unwrap().users.remove(&user_id);
    }

    /// When set, `update_order` and `append_status_log` return a transient
    /// error until cleared.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// When set, query paths return a transient error until cleared.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.tables.lock().unwrap().orders.get(&order_id).cloned()
    }

    pub fn status_logs(&self) -> Vec<LoggedChange> {
        self.tables.lock().unwrap().status_logs.clone()
    }

    fn transient() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn active_users(&self) -> Result<Vec<ActiveUserRow>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::transient());
        }
        let tables = self.tables.lock().unwrap();
        let mut per_user: HashMap<UserId, (i64, i64)> = HashMap::new();

        for order in tables.orders.values() {
            if !order.status.is_processable() {
                continue;
            }
            let user_enabled = tables
                .users
                .get(&order.user_id)
                .is_some_and(|u| u.status == UserStatus::Enabled);
            let group_open = tables
                .groups
                .get(&order.group_id)
                .is_some_and(|g| g.status == GroupStatus::Open);
            if !user_enabled || !group_open {
                continue;
            }
            let slot = per_user.entry(order.user_id).or_insert((0, 0));
            slot.0 += 1;
            slot.1 += i64::from(order.priority);
        }

        let mut rows: Vec<ActiveUserRow> = per_user
            .into_iter()
            .map(|(user_id, (count, priority_sum))| ActiveUserRow {
                user_id,
                order_count: count,
                avg_priority: Some(Decimal::from(priority_sum) / Decimal::from(count)),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.order_count
                .cmp(&a.order_count)
                .then(b.avg_priority.cmp(&a.avg_priority))
        });
        Ok(rows)
    }

    async fn user_working_set(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::transient());
        }
        let tables = self.tables.lock().unwrap();
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.status.is_processable())
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(orders)
    }

    async fn user_status(&self, user_id: UserId) -> Result<Option<UserStatus>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.users.get(&user_id).map(|u| u.status))
    }

    async fn group_status(&self, group_id: GroupId) -> Result<Option<GroupStatus>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.groups.get(&group_id).map(|g| g.status))
    }

    async fn snapshot_users(&self) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.users.values().cloned().collect())
    }

    async fn snapshot_groups(&self) -> Result<Vec<OrderGroup>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.groups.values().cloned().collect())
    }

    async fn update_order(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        filled_quantity: Decimal,
    ) -> Result<bool, StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::transient());
        }
        let mut tables = self.tables.lock().unwrap();
        match tables.orders.get_mut(&order_id) {
            Some(order) => {
                order.status = status;
                order.filled_quantity = filled_quantity;
                order.updated_at = Utc::now();
                if status == OrderStatus::Filled {
                    order.filled_at = Some(Utc::now());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_status_log(&self, entry: &StatusLogEntry) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::transient());
        }
        self.tables.lock().unwrap().status_logs.push(LoggedChange {
            entry: entry.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn user_groups(&self, user_id: UserId) -> Result<Vec<OrderGroup>, StoreError> {
        let tables = self.tables.lock().unwrap();
        let mut groups: Vec<OrderGroup> = tables
            .groups
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn count_active_group_orders(&self, group_id: GroupId) -> Result<i64, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .orders
            .values()
            .filter(|o| o.group_id == group_id && o.status.is_processable())
            .count() as i64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
