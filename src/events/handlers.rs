//! Built-in event handlers
//!
//! The handler set the host registers on the bus: order status changes feed
//! the per-user log, the order status hint, and the notifications queue; user
//! and group changes keep the eligibility hints coherent with the store.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::bus::{EventBus, EventHandler};
use super::{Event, EventKind};
use crate::cache::{CacheGateway, keys};
use crate::models::{GroupStatus, UserStatus};
use crate::store::OrderStore;
use crate::userlog::UserLog;

/// Register the standard handler set.
pub fn register_builtin_handlers(
    bus: &EventBus,
    store: Arc<dyn OrderStore>,
    cache: Arc<CacheGateway>,
    user_log: Arc<dyn UserLog>,
    status_ttl: Duration,
) {
    let order = Arc::new(OrderStatusHandler {
        cache: Arc::clone(&cache),
        user_log: Arc::clone(&user_log),
        status_ttl,
    });
    bus.register(EventKind::OrderStatusChange, order);

    let user = Arc::new(UserStatusHandler {
        store: Arc::clone(&store),
        cache: Arc::clone(&cache),
        user_log: Arc::clone(&user_log),
        status_ttl,
    });
    bus.register(EventKind::UserStatusChange, user.clone());
    bus.register(EventKind::UserAdded, user);

    let group = Arc::new(GroupStatusHandler {
        store,
        cache,
        user_log,
        status_ttl,
    });
    bus.register(EventKind::GroupStatusChange, group.clone());
    bus.register(EventKind::GroupAdded, group);
}

pub struct OrderStatusHandler {
    cache: Arc<CacheGateway>,
    user_log: Arc<dyn UserLog>,
    status_ttl: Duration,
}

#[async_trait]
impl EventHandler for OrderStatusHandler {
    fn name(&self) -> &'static str {
        "order_status"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let Event::OrderStatusChange(change) = event else {
            return Ok(());
        };

        self.user_log.entry(
            change.user_id,
            &format!(
                "order[{}] status change: {} -> {}, filled: {}, symbol: {}",
                change.order_id,
                change.old_status,
                change.new_status,
                change.filled_quantity,
                change.symbol
            ),
        );

        self.cache
            .set_order_status(
                change.order_id,
                change.new_status,
                change.filled_quantity,
                self.status_ttl,
            )
            .await;

        let notification = json!({
            "type": "order_status_change",
            "order_id": change.order_id,
            "user_id": change.user_id,
            "old_status": change.old_status,
            "new_status": change.new_status,
            "filled_quantity": change.filled_quantity,
            "timestamp": change.timestamp,
        });
        self.cache
            .push_event(keys::NOTIFICATIONS_QUEUE, &notification)
            .await;

        Ok(())
    }
}

pub struct UserStatusHandler {
    store: Arc<dyn OrderStore>,
    cache: Arc<CacheGateway>,
    user_log: Arc<dyn UserLog>,
    status_ttl: Duration,
}

#[async_trait]
impl EventHandler for UserStatusHandler {
    fn name(&self) -> &'static str {
        "user_status"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::UserStatusChange(change) => {
                self.cache
                    .set_user_status(change.user_id, change.new_status, self.status_ttl)
                    .await;
                self.user_log.entry(
                    change.user_id,
                    &format!(
                        "user status change: {} -> {}",
                        change.old_status, change.new_status
                    ),
                );

                match change.new_status {
                    UserStatus::Disabled => {
                        // Close every group hint so workers stop picking the
                        // user's orders even before the hints expire.
                        let groups = self.store.user_groups(change.user_id).await?;
                        for group in &groups {
                            self.cache
                                .set_group_status(group.id, GroupStatus::Closed, self.status_ttl)
                                .await;
                        }
                        info!(
                            user_id = change.user_id,
                            groups = groups.len(),
                            "user monitoring disabled"
                        );
                        self.user_log.entry(
                            change.user_id,
                            &format!("user monitoring disabled, affected groups: {}", groups.len()),
                        );
                    }
                    UserStatus::Enabled => {
                        // Reconcile hints back to whatever the store says.
                        let groups = self.store.user_groups(change.user_id).await?;
                        for group in &groups {
                            self.cache
                                .set_group_status(group.id, group.status, self.status_ttl)
                                .await;
                        }
                        info!(
                            user_id = change.user_id,
                            groups = groups.len(),
                            "user monitoring enabled"
                        );
                        self.user_log.entry(
                            change.user_id,
                            &format!("user monitoring enabled, groups reconciled: {}", groups.len()),
                        );
                    }
                }
            }
            Event::UserAdded(added) => {
                self.cache
                    .set_user_status(added.user_id, added.status, self.status_ttl)
                    .await;
            }
            _ => {}
        }
        Ok(())
    }
}

pub struct GroupStatusHandler {
    store: Arc<dyn OrderStore>,
    cache: Arc<CacheGateway>,
    user_log: Arc<dyn UserLog>,
    status_ttl: Duration,
}

#[async_trait]
impl EventHandler for GroupStatusHandler {
    fn name(&self) -> &'static str {
        "group_status"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::GroupStatusChange(change) => {
                self.cache
                    .set_group_status(change.group_id, change.new_status, self.status_ttl)
                    .await;

                let active = self.store.count_active_group_orders(change.group_id).await?;
                let message = match change.new_status {
                    GroupStatus::Closed => format!(
                        "group[{}] monitoring closed, affected orders: {active}",
                        change.group_name
                    ),
                    GroupStatus::Open => format!(
                        "group[{}] monitoring opened, active orders: {active}",
                        change.group_name
                    ),
                };
                info!(
                    group_id = change.group_id,
                    user_id = change.user_id,
                    status = %change.new_status,
                    active_orders = active,
                    "group status change handled"
                );
                self.user_log.entry(change.user_id, &message);
            }
            Event::GroupAdded(added) => {
                self.cache
                    .set_group_status(added.group_id, added.status, self.status_ttl)
                    .await;
            }
            _ => {}
        }
        Ok(())
    }
}
