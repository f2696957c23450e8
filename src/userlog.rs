//! Per-user activity log contract
//!
//! Rotation, cleanup, and physical sinks live outside the core; the only
//! contract here is "emit one entry for event X, attributed to a user". The
//! default sink writes structured tracing records under a dedicated target so
//! a subscriber can split them per user.

use crate::core_types::UserId;

/// Target carrying per-user entries. [`crate::logging::init_logging`] routes
/// events on this target into their own sink, away from engine diagnostics.
pub const USER_ACTIVITY_TARGET: &str = "orderwatch::user";

pub trait UserLog: Send + Sync {
    fn entry(&self, user_id: UserId, message: &str);
}

/// Sink backed by the process-wide tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingUserLog;

impl UserLog for TracingUserLog {
    fn entry(&self, user_id: UserId, message: &str) {
        tracing::info!(target: USER_ACTIVITY_TARGET, user_id, "{message}");
    }
}
