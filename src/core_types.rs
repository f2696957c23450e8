//! Core id types used throughout the system
//!
//! Semantic aliases over the store's BIGINT keys. They provide meaning at call
//! sites and keep a future move to newtypes cheap.

/// User ID - primary key of the `users` table.
///
/// # Usage:
/// - Owner key for queues, locks, and per-user log sinks
/// - HashMap key in the scheduler registry
pub type UserId = i64;

/// Order group ID - primary key of the `order_groups` table.
pub type GroupId = i64;

/// Order ID - unique within the system.
pub type OrderId = i64;
