//! Cache key namespaces
//!
//! One namespace per concern; every key is built here so the layout has a
//! single point of truth.

use crate::core_types::{GroupId, OrderId, UserId};

/// FIFO of serialized order events (external tail point).
pub const ORDER_EVENT_QUEUE: &str = "order:queue";
/// FIFO of serialized user/group status events (external tail point).
pub const STATUS_EVENT_QUEUE: &str = "events";
/// FIFO of delivery payloads for downstream notifiers.
pub const NOTIFICATIONS_QUEUE: &str = "notifications";
/// Hash of monitoring counters.
pub const STATS: &str = "monitor:stats";

const HEARTBEAT_PREFIX: &str = "monitor:heartbeat:";

pub fn user_status(user_id: UserId) -> String {
    format!("user:status:{user_id}")
}

pub fn group_status(group_id: GroupId) -> String {
    format!("group:status:{group_id}")
}

pub fn order_status(order_id: OrderId) -> String {
    format!("order:status:{order_id}")
}

pub fn order_processing(order_id: OrderId) -> String {
    format!("order:processing:{order_id}")
}

pub fn user_lock(user_id: UserId) -> String {
    format!("user:lock:{user_id}")
}

pub fn heartbeat(worker_id: &str) -> String {
    format!("{HEARTBEAT_PREFIX}{worker_id}")
}

/// Match pattern enumerating all live heartbeat keys.
pub fn heartbeat_pattern() -> String {
    format!("{HEARTBEAT_PREFIX}*")
}

/// Worker id embedded in a heartbeat key.
pub fn worker_from_heartbeat(key: &str) -> Option<&str> {
    key.strip_prefix(HEARTBEAT_PREFIX)
}
