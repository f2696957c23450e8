//! PostgreSQL implementation of the store seam

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::Row;

use super::OrderStore;
use crate::core_types::{GroupId, OrderId, UserId};
use crate::error::StoreError;
use crate::models::{
    ActiveUserRow, GroupStatus, Order, OrderGroup, OrderStatus, StatusLogEntry, User, UserStatus,
};

const ORDER_COLUMNS: &str = "id, user_id, group_id, order_no, symbol, order_type, price, \
     quantity, filled_quantity, status, priority, created_at, updated_at, filled_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn active_users(&self) -> Result<Vec<ActiveUserRow>, StoreError> {
        let rows = sqlx::query_as::<_, ActiveUserRow>(
            r#"SELECT o.user_id, COUNT(o.id) AS order_count, AVG(o.priority) AS avg_priority
               FROM orders o
               JOIN users u ON o.user_id = u.id
               JOIN order_groups og ON o.group_id = og.id
               WHERE o.status IN ($1, $2) AND u.status = $3 AND og.status = $4
               GROUP BY o.user_id
               ORDER BY order_count DESC, avg_priority DESC"#,
        )
        .bind(OrderStatus::Pending.as_str())
        .bind(OrderStatus::Partial.as_str())
        .bind(UserStatus::Enabled.code())
        .bind(GroupStatus::Open.code())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn user_working_set(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE user_id = $1 AND status IN ($2, $3) \
             ORDER BY priority DESC, created_at ASC"
        ))
        .bind(user_id)
        .bind(OrderStatus::Pending.as_str())
        .bind(OrderStatus::Partial.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn user_status(&self, user_id: UserId) -> Result<Option<UserStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let code: i16 = row.try_get("status")?;
                UserStatus::from_code(code)
                    .map(Some)
                    .ok_or_else(|| StoreError::Corrupt(format!("users.status = {code}")))
            }
            None => Ok(None),
        }
    }

    async fn group_status(&self, group_id: GroupId) -> Result<Option<GroupStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM order_groups WHERE id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let code: i16 = row.try_get("status")?;
                GroupStatus::from_code(code)
                    .map(Some)
                    .ok_or_else(|| StoreError::Corrupt(format!("order_groups.status = {code}")))
            }
            None => Ok(None),
        }
    }

    async fn snapshot_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, User>("SELECT id, username, status FROM users")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn snapshot_groups(&self) -> Result<Vec<OrderGroup>, StoreError> {
        let rows = sqlx::query_as::<_, OrderGroup>(
            "SELECT id, user_id, group_name, status FROM order_groups",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_order(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        filled_quantity: Decimal,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE orders
               SET status = $1, filled_quantity = $2, updated_at = NOW(),
                   filled_at = CASE WHEN $1 = 'FILLED' THEN NOW() ELSE filled_at END
               WHERE id = $3"#,
        )
        .bind(status.as_str())
        .bind(filled_quantity)
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_status_log(&self, entry: &StatusLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO order_status_logs
               (order_id, old_status, new_status, old_filled_quantity,
                new_filled_quantity, change_reason, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, NOW())"#,
        )
        .bind(entry.order_id)
        .bind(entry.old_status.as_str())
        .bind(entry.new_status.as_str())
        .bind(entry.old_filled_quantity)
        .bind(entry.new_filled_quantity)
        .bind(&entry.change_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn user_groups(&self, user_id: UserId) -> Result<Vec<OrderGroup>, StoreError> {
        let rows = sqlx::query_as::<_, OrderGroup>(
            "SELECT id, user_id, group_name, status FROM order_groups \
             WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_active_group_orders(&self, group_id: GroupId) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE group_id = $1 AND status IN ($2, $3)",
        )
        .bind(group_id)
        .bind(OrderStatus::Pending.as_str())
        .bind(OrderStatus::Partial.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
