//! Authoritative store access
//!
//! [`OrderStore`] is the seam between the core and the relational store: it
//! carries exactly the query shapes the scheduler, workers, observer, and
//! event handlers issue. [`pg::PgStore`] is the PostgreSQL implementation;
//! [`memory::MemoryStore`] backs the test suite.

pub mod db;
pub mod memory;
pub mod pg;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::core_types::{GroupId, OrderId, UserId};
use crate::error::StoreError;
use crate::models::{
    ActiveUserRow, GroupStatus, Order, OrderGroup, OrderStatus, StatusLogEntry, User, UserStatus,
};

pub use db::Database;
pub use memory::MemoryStore;
pub use pg::PgStore;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Users that currently have processable orders and pass both eligibility
    /// flags, with order count and average priority for scoring.
    async fn active_users(&self) -> Result<Vec<ActiveUserRow>, StoreError>;

    /// A user's pending-and-partial orders, priority descending then oldest
    /// first.
    async fn user_working_set(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;

    async fn user_status(&self, user_id: UserId) -> Result<Option<UserStatus>, StoreError>;

    async fn group_status(&self, group_id: GroupId) -> Result<Option<GroupStatus>, StoreError>;

    /// All user rows, for the observer snapshot.
    async fn snapshot_users(&self) -> Result<Vec<User>, StoreError>;

    /// All group rows, for the observer snapshot.
    async fn snapshot_groups(&self) -> Result<Vec<OrderGroup>, StoreError>;

    /// Persist a status transition. `filled_at` is stamped when the order
    /// moves into `Filled`. Returns false when the row no longer exists.
    async fn update_order(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        filled_quantity: Decimal,
    ) -> Result<bool, StoreError>;

    async fn append_status_log(&self, entry: &StatusLogEntry) -> Result<(), StoreError>;

    /// All groups owned by a user (any status), for cache reconciliation.
    async fn user_groups(&self, user_id: UserId) -> Result<Vec<OrderGroup>, StoreError>;

    /// Pending-and-partial order count inside one group.
    async fn count_active_group_orders(&self, group_id: GroupId) -> Result<i64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
