//! Typed cache façade
//!
//! Every operation the rest of the core issues against the shared cache.
//! Transport errors never escape: reads degrade to `None`/empty, writes and
//! mutations report `false`, and the caller falls back to the authoritative
//! store. Lock and mark operations keep the compare-and-set discipline of the
//! transport (`set_nx` / `del_if_eq`).

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::keys;
use super::kv::Kv;
use crate::core_types::{GroupId, OrderId, UserId};
use crate::models::{GroupStatus, OrderStatus, UserStatus};

pub struct CacheGateway {
    kv: Arc<dyn Kv>,
}

impl CacheGateway {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    // ---- status hints -----------------------------------------------------

    /// `None` means unknown: a miss, an unparsable value, or a transport
    /// error. Callers read through to the store in that case.
    pub async fn get_user_status(&self, user_id: UserId) -> Option<UserStatus> {
        match self.kv.get(&keys::user_status(user_id)).await {
            Ok(value) => value
                .and_then(|v| v.parse::<i16>().ok())
                .and_then(UserStatus::from_code),
            Err(e) => {
                warn!(user_id, error = %e, "cache read failed for user status");
                None
            }
        }
    }

    pub async fn set_user_status(&self, user_id: UserId, status: UserStatus, ttl: Duration) -> bool {
        let result = self
            .kv
            .set(&keys::user_status(user_id), &status.code().to_string(), Some(ttl))
            .await;
        if let Err(e) = &result {
            warn!(user_id, error = %e, "cache write failed for user status");
        }
        result.is_ok()
    }

    pub async fn get_group_status(&self, group_id: GroupId) -> Option<GroupStatus> {
        match self.kv.get(&keys::group_status(group_id)).await {
            Ok(value) => value
                .and_then(|v| v.parse::<i16>().ok())
                .and_then(GroupStatus::from_code),
            Err(e) => {
                warn!(group_id, error = %e, "cache read failed for group status");
                None
            }
        }
    }

    pub async fn set_group_status(
        &self,
        group_id: GroupId,
        status: GroupStatus,
        ttl: Duration,
    ) -> bool {
        let result = self
            .kv
            .set(&keys::group_status(group_id), &status.code().to_string(), Some(ttl))
            .await;
        if let Err(e) = &result {
            warn!(group_id, error = %e, "cache write failed for group status");
        }
        result.is_ok()
    }

    /// Per-order status hint written by the order event handler.
    pub async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        filled_quantity: rust_decimal::Decimal,
        ttl: Duration,
    ) -> bool {
        let payload = serde_json::json!({
            "status": status,
            "filled_quantity": filled_quantity,
            "updated_at": Utc::now(),
        });
        let result = self
            .kv
            .set(&keys::order_status(order_id), &payload.to_string(), Some(ttl))
            .await;
        if let Err(e) = &result {
            warn!(order_id, error = %e, "cache write failed for order status");
        }
        result.is_ok()
    }

    // ---- user locks -------------------------------------------------------

    /// True iff this caller now holds the user's exclusive lock.
    pub async fn acquire_user_lock(&self, user_id: UserId, worker_id: &str, ttl: Duration) -> bool {
        match self.kv.set_nx(&keys::user_lock(user_id), worker_id, ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(user_id, worker_id, error = %e, "user lock acquire failed");
                false
            }
        }
    }

    /// Compare-and-delete: only the holder's release removes the lock. A
    /// non-holder release means the lock already expired (and may have been
    /// reacquired); it is logged and otherwise a no-op.
    pub async fn release_user_lock(&self, user_id: UserId, worker_id: &str) -> bool {
        match self.kv.del_if_eq(&keys::user_lock(user_id), worker_id).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    user_id,
                    worker_id, "user lock release was a no-op (expired or held elsewhere)"
                );
                false
            }
            Err(e) => {
                warn!(user_id, worker_id, error = %e, "user lock release failed");
                false
            }
        }
    }

    // ---- processing marks -------------------------------------------------

    pub async fn mark_order_processing(
        &self,
        order_id: OrderId,
        worker_id: &str,
        ttl: Duration,
    ) -> bool {
        match self
            .kv
            .set_nx(&keys::order_processing(order_id), worker_id, ttl)
            .await
        {
            Ok(marked) => marked,
            Err(e) => {
                warn!(order_id, worker_id, error = %e, "processing mark set failed");
                false
            }
        }
    }

    pub async fn clear_order_processing(&self, order_id: OrderId) -> bool {
        match self.kv.del(&keys::order_processing(order_id)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(order_id, error = %e, "processing mark clear failed");
                false
            }
        }
    }

    pub async fn is_order_processing(&self, order_id: OrderId) -> bool {
        match self.kv.exists(&keys::order_processing(order_id)).await {
            Ok(present) => present,
            Err(e) => {
                warn!(order_id, error = %e, "processing mark check failed");
                false
            }
        }
    }

    // ---- event queues -----------------------------------------------------

    /// Push a serialized payload onto a named FIFO. Returns false on
    /// serialization or transport failure.
    pub async fn push_event<T: Serialize + Sync>(&self, queue: &str, payload: &T) -> bool {
        let serialized = match serde_json::to_string(payload) {
            Ok(s) => s,
            Err(e) => {
                warn!(queue, error = %e, "event payload did not serialize");
                return false;
            }
        };
        match self.kv.lpush(queue, &serialized).await {
            Ok(_) => true,
            Err(e) => {
                warn!(queue, error = %e, "event push failed");
                false
            }
        }
    }

    /// Pop the oldest raw payload off a named FIFO; decoding is the caller's
    /// concern (see [`crate::events::Event::from_json`]).
    pub async fn pop_event(&self, queue: &str) -> Option<String> {
        match self.kv.rpop(queue).await {
            Ok(value) => value,
            Err(e) => {
                warn!(queue, error = %e, "event pop failed");
                None
            }
        }
    }

    pub async fn queue_len(&self, queue: &str) -> u64 {
        match self.kv.llen(queue).await {
            Ok(len) => len,
            Err(e) => {
                warn!(queue, error = %e, "queue length probe failed");
                0
            }
        }
    }

    // ---- heartbeats and counters ------------------------------------------

    pub async fn record_worker_heartbeat(&self, worker_id: &str, ttl: Duration) -> bool {
        let now = Utc::now().timestamp().to_string();
        let result = self
            .kv
            .set(&keys::heartbeat(worker_id), &now, Some(ttl))
            .await;
        if let Err(e) = &result {
            warn!(worker_id, error = %e, "heartbeat write failed");
        }
        result.is_ok()
    }

    /// Worker ids with a live heartbeat key.
    pub async fn list_live_workers(&self) -> Vec<String> {
        match self.kv.scan_match(&keys::heartbeat_pattern()).await {
            Ok(hits) => hits
                .iter()
                .filter_map(|k| keys::worker_from_heartbeat(k))
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!(error = %e, "heartbeat scan failed");
                Vec::new()
            }
        }
    }

    pub async fn update_counters(&self, counters: &[(String, i64)]) -> bool {
        let fields: Vec<(String, String)> = counters
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        let result = self.kv.hset_all(keys::STATS, &fields).await;
        if let Err(e) = &result {
            warn!(error = %e, "counter update failed");
        }
        result.is_ok()
    }

    /// Counter fields that parse as integers; anything else is skipped.
    pub async fn read_counters(&self) -> Vec<(String, i64)> {
        match self.kv.hget_all(keys::STATS).await {
            Ok(fields) => fields
                .into_iter()
                .filter_map(|(k, v)| v.parse::<i64>().ok().map(|n| (k, n)))
                .collect(),
            Err(e) => {
                warn!(error = %e, "counter read failed");
                Vec::new()
            }
        }
    }

    pub async fn ping(&self) -> bool {
        self.kv.ping().await.is_ok()
    }
}
