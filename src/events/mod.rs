//! Domain events and their delivery
//!
//! The event set is closed: five kinds, each a concrete payload struct, all
//! serialized as tagged JSON (`"type"` discriminator). Decoding a payload off
//! a cache queue yields either a concrete variant or [`MalformedEvent`] —
//! never a dynamic bag of fields.

pub mod bus;
pub mod handlers;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core_types::{GroupId, OrderId, UserId};
use crate::error::MalformedEvent;
use crate::models::{GroupStatus, OrderStatus, UserStatus};

pub use bus::{EventBus, EventHandler};

/// Discriminator used for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OrderStatusChange,
    UserStatusChange,
    GroupStatusChange,
    UserAdded,
    GroupAdded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderStatusChange {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub filled_quantity: Decimal,
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStatusChange {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub username: String,
    pub old_status: UserStatus,
    pub new_status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupStatusChange {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub group_name: String,
    pub old_status: GroupStatus,
    pub new_status: GroupStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAdded {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub username: String,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupAdded {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub group_name: String,
    pub status: GroupStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderStatusChange(OrderStatusChange),
    UserStatusChange(UserStatusChange),
    GroupStatusChange(GroupStatusChange),
    UserAdded(UserAdded),
    GroupAdded(GroupAdded),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::OrderStatusChange(_) => EventKind::OrderStatusChange,
            Event::UserStatusChange(_) => EventKind::UserStatusChange,
            Event::GroupStatusChange(_) => EventKind::GroupStatusChange,
            Event::UserAdded(_) => EventKind::UserAdded,
            Event::GroupAdded(_) => EventKind::GroupAdded,
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            Event::OrderStatusChange(e) => e.event_id,
            Event::UserStatusChange(e) => e.event_id,
            Event::GroupStatusChange(e) => e.event_id,
            Event::UserAdded(e) => e.event_id,
            Event::GroupAdded(e) => e.event_id,
        }
    }

    /// Owner of the entity the event concerns.
    pub fn user_id(&self) -> UserId {
        match self {
            Event::OrderStatusChange(e) => e.user_id,
            Event::UserStatusChange(e) => e.user_id,
            Event::GroupStatusChange(e) => e.user_id,
            Event::UserAdded(e) => e.user_id,
            Event::GroupAdded(e) => e.user_id,
        }
    }

    /// Decode a cache-queue payload into a concrete variant.
    pub fn from_json(raw: &str) -> Result<Event, MalformedEvent> {
        Ok(serde_json::from_str(raw)?)
    }
}
