//! Domain models: orders, users, order groups, status log rows
//!
//! Status columns are stored as the string codes below (orders) or as 0/1
//! SMALLINTs (users, groups). All row types derive `FromRow` so the store can
//! use the runtime query API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::core_types::{GroupId, OrderId, UserId};

/// Order life-cycle status.
///
/// Transitions follow a DAG: `Pending -> {Partial, Filled, Cancelled, Failed}`,
/// `Partial -> {Partial, Filled, Cancelled, Failed}`. Terminal states are
/// sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Terminal states accept no further transitions.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Statuses a worker may still act on.
    #[inline]
    pub fn is_processable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Partial)
    }

    /// Whether `self -> next` is a legal edge of the status DAG.
    ///
    /// `Partial -> Partial` is legal (another partial fill); everything else
    /// must move forward.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => next != OrderStatus::Pending,
            OrderStatus::Partial => next != OrderStatus::Pending,
            _ => false,
        }
    }

    /// String code as stored in the `orders.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PENDING" => Some(OrderStatus::Pending),
            "PARTIAL" => Some(OrderStatus::Partial),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "FAILED" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        OrderStatus::from_code(&value).ok_or_else(|| format!("unknown order status: {value}"))
    }
}

/// User enable/disable flag, 0/1 in the `users.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum UserStatus {
    Disabled = 0,
    Enabled = 1,
}

impl UserStatus {
    #[inline]
    pub fn code(&self) -> i16 {
        *self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(UserStatus::Disabled),
            1 => Some(UserStatus::Enabled),
            _ => None,
        }
    }
}

impl TryFrom<i16> for UserStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        UserStatus::from_code(value).ok_or_else(|| format!("unknown user status: {value}"))
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Disabled => write!(f, "DISABLED"),
            UserStatus::Enabled => write!(f, "ENABLED"),
        }
    }
}

/// Group open/closed flag, 0/1 in the `order_groups.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum GroupStatus {
    Closed = 0,
    Open = 1,
}

impl GroupStatus {
    #[inline]
    pub fn code(&self) -> i16 {
        *self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(GroupStatus::Closed),
            1 => Some(GroupStatus::Open),
            _ => None,
        }
    }
}

impl TryFrom<i16> for GroupStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        GroupStatus::from_code(value).ok_or_else(|| format!("unknown group status: {value}"))
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupStatus::Closed => write!(f, "CLOSED"),
            GroupStatus::Open => write!(f, "OPEN"),
        }
    }
}

/// One row of the `orders` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub order_no: String,
    pub symbol: String,
    pub order_type: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// `filled_quantity <= quantity` must hold for every row the store hands
    /// out; a violation is logged and the order skipped rather than processed.
    pub fn fill_within_bounds(&self) -> bool {
        self.filled_quantity <= self.quantity
    }
}

/// One row of the `users` table (columns the core reads).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[sqlx(try_from = "i16")]
    pub status: UserStatus,
}

/// One row of the `order_groups` table (columns the core reads).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderGroup {
    pub id: GroupId,
    pub user_id: UserId,
    pub group_name: String,
    #[sqlx(try_from = "i16")]
    pub status: GroupStatus,
}

/// Insert payload for `order_status_logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub old_filled_quantity: Decimal,
    pub new_filled_quantity: Decimal,
    pub change_reason: String,
}

/// One row of the active-users grouping query: a user with processable orders
/// that passes both eligibility flags.
#[derive(Debug, Clone, FromRow)]
pub struct ActiveUserRow {
    pub user_id: UserId,
    pub order_count: i64,
    pub avg_priority: Option<Decimal>,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }

    #[test]
    fn test_transition_dag() {
        // Pending fans out to everything but itself
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Partial));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Filled));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));

        // Partial may repeat or finish, never go back
        assert!(OrderStatus::Partial.can_transition_to(OrderStatus::Partial));
        assert!(OrderStatus::Partial.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::Partial.can_transition_to(OrderStatus::Pending));

        // Terminal states are sinks
        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            for next in [
                OrderStatus::Pending,
                OrderStatus::Partial,
                OrderStatus::Filled,
                OrderStatus::Cancelled,
                OrderStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_code_roundtrip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Partial,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::from_code(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::from_code("BOGUS"), None);
    }

    #[test]
    fn test_flag_codes() {
        assert_eq!(UserStatus::from_code(1), Some(UserStatus::Enabled));
        assert_eq!(UserStatus::from_code(0), Some(UserStatus::Disabled));
        assert_eq!(UserStatus::from_code(7), None);
        assert_eq!(GroupStatus::Open.code(), 1);
        assert_eq!(GroupStatus::Closed.code(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(OrderStatus::Partial.to_string(), "PARTIAL");
        assert_eq!(UserStatus::Enabled.to_string(), "ENABLED");
        assert_eq!(GroupStatus::Closed.to_string(), "CLOSED");
    }
}
