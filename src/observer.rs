//! User and group status observation
//!
//! Periodically snapshots the status columns of the authoritative store,
//! diffs against the previous snapshot, and turns the differences into typed
//! events: a changed status emits `*StatusChange`, a newly observed row emits
//! `*Added` and primes its cache hint. Rows that disappear emit nothing; if
//! one reappears later it counts as added again.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheGateway, keys};
use crate::config::MonitorConfig;
use crate::core_types::{GroupId, UserId};
use crate::error::StoreError;
use crate::events::{Event, EventBus, GroupAdded, GroupStatusChange, UserAdded, UserStatusChange};
use crate::models::{GroupStatus, UserStatus};
use crate::store::OrderStore;

/// Stop-signal poll slice while waiting out the observer interval.
const STOP_POLL_SLICE: Duration = Duration::from_millis(50);

/// Status maps captured in one query round.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub users: HashMap<UserId, UserStatus>,
    pub groups: HashMap<GroupId, GroupStatus>,
    pub taken_at: DateTime<Utc>,
}

/// One difference between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    UserChanged {
        user_id: UserId,
        old: UserStatus,
        new: UserStatus,
    },
    UserAppeared {
        user_id: UserId,
        status: UserStatus,
    },
    GroupChanged {
        group_id: GroupId,
        old: GroupStatus,
        new: GroupStatus,
    },
    GroupAppeared {
        group_id: GroupId,
        status: GroupStatus,
    },
}

/// Snapshot differ. The first snapshot only primes state.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<StatusSnapshot>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detect(&mut self, current: StatusSnapshot) -> Vec<StatusChange> {
        let last = match self.last.take() {
            Some(last) => last,
            None => {
                self.last = Some(current);
                return Vec::new();
            }
        };

        let mut changes = Vec::new();

        for (user_id, status) in &current.users {
            match last.users.get(user_id) {
                Some(old) if old != status => changes.push(StatusChange::UserChanged {
                    user_id: *user_id,
                    old: *old,
                    new: *status,
                }),
                Some(_) => {}
                None => changes.push(StatusChange::UserAppeared {
                    user_id: *user_id,
                    status: *status,
                }),
            }
        }

        for (group_id, status) in &current.groups {
            match last.groups.get(group_id) {
                Some(old) if old != status => changes.push(StatusChange::GroupChanged {
                    group_id: *group_id,
                    old: *old,
                    new: *status,
                }),
                Some(_) => {}
                None => changes.push(StatusChange::GroupAppeared {
                    group_id: *group_id,
                    status: *status,
                }),
            }
        }

        self.last = Some(current);
        changes
    }
}

pub struct StatusObserver {
    store: Arc<dyn OrderStore>,
    cache: Arc<CacheGateway>,
    bus: Arc<EventBus>,
    config: Arc<MonitorConfig>,
    stop: Arc<AtomicBool>,
    detector: Mutex<ChangeDetector>,
    user_names: Mutex<HashMap<UserId, String>>,
    group_meta: Mutex<HashMap<GroupId, (UserId, String)>>,
}

impl StatusObserver {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<CacheGateway>,
        bus: Arc<EventBus>,
        config: Arc<MonitorConfig>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            config,
            stop,
            detector: Mutex::new(ChangeDetector::new()),
            user_names: Mutex::new(HashMap::new()),
            group_meta: Mutex::new(HashMap::new()),
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub async fn run(&self) {
        info!(
            interval_secs = self.config.observer_interval_secs,
            "status observer started"
        );
        while !self.stopping() {
            if let Err(e) = self.tick().await {
                error!(error = %e, "status snapshot round failed");
            }

            let deadline = Instant::now() + self.config.observer_interval();
            while Instant::now() < deadline && !self.stopping() {
                tokio::time::sleep(STOP_POLL_SLICE).await;
            }
        }
        info!("status observer stopped");
    }

    /// One snapshot-diff-emit round. Returns the number of changes handled.
    pub async fn tick(&self) -> Result<usize, StoreError> {
        let users = self.store.snapshot_users().await?;
        let groups = self.store.snapshot_groups().await?;

        {
            let mut names = self.user_names.lock().unwrap();
            for user in &users {
                names.insert(user.id, user.username.clone());
            }
        }
        {
            let mut meta = self.group_meta.lock().unwrap();
            for group in &groups {
                meta.insert(group.id, (group.user_id, group.group_name.clone()));
            }
        }

        let snapshot = StatusSnapshot {
            users: users.iter().map(|u| (u.id, u.status)).collect(),
            groups: groups.iter().map(|g| (g.id, g.status)).collect(),
            taken_at: Utc::now(),
        };

        let changes = self.detector.lock().unwrap().detect(snapshot);
        let count = changes.len();
        for change in changes {
            self.apply_change(change).await;
        }
        Ok(count)
    }

    async fn apply_change(&self, change: StatusChange) {
        match change {
            StatusChange::UserChanged { user_id, old, new } => {
                let username = self.username(user_id);
                info!(user_id, %username, %old, %new, "user status change detected");
                let event = Event::UserStatusChange(UserStatusChange {
                    event_id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    user_id,
                    username,
                    old_status: old,
                    new_status: new,
                });
                self.cache.push_event(keys::STATUS_EVENT_QUEUE, &event).await;
                self.publish(event);
            }
            StatusChange::GroupChanged { group_id, old, new } => {
                let (user_id, group_name) = self.group_info(group_id);
                info!(group_id, %group_name, %old, %new, "group status change detected");
                let event = Event::GroupStatusChange(GroupStatusChange {
                    event_id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    group_id,
                    user_id,
                    group_name,
                    old_status: old,
                    new_status: new,
                });
                self.cache.push_event(keys::STATUS_EVENT_QUEUE, &event).await;
                self.publish(event);
            }
            StatusChange::UserAppeared { user_id, status } => {
                let username = self.username(user_id);
                info!(user_id, %username, %status, "new user observed");
                // prime the hint before anything asks for it
                self.cache
                    .set_user_status(user_id, status, self.config.status_cache_ttl())
                    .await;
                self.publish(Event::UserAdded(UserAdded {
                    event_id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    user_id,
                    username,
                    status,
                }));
            }
            StatusChange::GroupAppeared { group_id, status } => {
                let (user_id, group_name) = self.group_info(group_id);
                info!(group_id, %group_name, %status, "new group observed");
                self.cache
                    .set_group_status(group_id, status, self.config.status_cache_ttl())
                    .await;
                self.publish(Event::GroupAdded(GroupAdded {
                    event_id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    group_id,
                    user_id,
                    group_name,
                    status,
                }));
            }
        }
    }

    fn publish(&self, event: Event) {
        if !self.bus.publish(event) {
            warn!("event bus rejected status event");
        }
    }

    fn username(&self, user_id: UserId) -> String {
        self.user_names
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| format!("user_{user_id}"))
    }

    fn group_info(&self, group_id: GroupId) -> (UserId, String) {
        self.group_meta
            .lock()
            .unwrap()
            .get(&group_id)
            .cloned()
            .unwrap_or_else(|| (0, format!("group_{group_id}")))
    }

    /// Reload every user and group status hint from the store. Run at
    /// startup so eligibility checks start warm.
    pub async fn reconcile_hints(&self) -> Result<(), StoreError> {
        let ttl = self.config.status_cache_ttl();
        let users = self.store.snapshot_users().await?;
        for user in &users {
            self.cache.set_user_status(user.id, user.status, ttl).await;
        }
        let groups = self.store.snapshot_groups().await?;
        for group in &groups {
            self.cache.set_group_status(group.id, group.status, ttl).await;
        }
        info!(
            users = users.len(),
            groups = groups.len(),
            "status hints reconciled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKv;
    use crate::events::EventKind;
    use crate::models::test_fixtures::{group, user};
    use async_trait::async_trait;
    use crate::store::MemoryStore;

    fn snapshot(
        users: &[(UserId, UserStatus)],
        groups: &[(GroupId, GroupStatus)],
    ) -> StatusSnapshot {
        StatusSnapshot {
            users: users.iter().copied().collect(),
            groups: groups.iter().copied().collect(),
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_snapshot_primes_only() {
        let mut detector = ChangeDetector::new();
        let changes = detector.detect(snapshot(&[(1, UserStatus::Enabled)], &[]));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_status_change_and_addition() {
        let mut detector = ChangeDetector::new();
        detector.detect(snapshot(
            &[(1, UserStatus::Enabled)],
            &[(10, GroupStatus::Open)],
        ));

        let changes = detector.detect(snapshot(
            &[(1, UserStatus::Disabled), (2, UserStatus::Enabled)],
            &[(10, GroupStatus::Closed), (11, GroupStatus::Open)],
        ));

        assert_eq!(changes.len(), 4);
        assert!(changes.contains(&StatusChange::UserChanged {
            user_id: 1,
            old: UserStatus::Enabled,
            new: UserStatus::Disabled
        }));
        assert!(changes.contains(&StatusChange::UserAppeared {
            user_id: 2,
            status: UserStatus::Enabled
        }));
        assert!(changes.contains(&StatusChange::GroupChanged {
            group_id: 10,
            old: GroupStatus::Open,
            new: GroupStatus::Closed
        }));
        assert!(changes.contains(&StatusChange::GroupAppeared {
            group_id: 11,
            status: GroupStatus::Open
        }));
    }

    #[test]
    fn test_disappearance_emits_nothing_but_reappearance_is_added() {
        let mut detector = ChangeDetector::new();
        detector.detect(snapshot(&[(1, UserStatus::Enabled)], &[]));

        // user 1 vanishes: silence
        assert!(detector.detect(snapshot(&[], &[])).is_empty());

        // and is re-added on return
        let changes = detector.detect(snapshot(&[(1, UserStatus::Enabled)], &[]));
        assert_eq!(
            changes,
            vec![StatusChange::UserAppeared {
                user_id: 1,
                status: UserStatus::Enabled
            }]
        );
    }

    #[test]
    fn test_unchanged_snapshot_is_silent() {
        let mut detector = ChangeDetector::new();
        let a = snapshot(&[(1, UserStatus::Enabled)], &[(10, GroupStatus::Open)]);
        detector.detect(a.clone());
        assert!(detector.detect(a).is_empty());
    }

    struct Recording {
        seen: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl crate::events::EventHandler for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle(&self, event: &Event) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tick_emits_user_status_change() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user(1, UserStatus::Enabled));
        store.insert_group(group(10, 1, GroupStatus::Open));

        let cache = Arc::new(CacheGateway::new(Arc::new(MemoryKv::new())));
        let bus = Arc::new(EventBus::new(16, 1, Duration::from_secs(1)));
        let recording = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        bus.register(EventKind::UserStatusChange, recording.clone());
        bus.start();

        let observer = StatusObserver::new(
            store.clone(),
            Arc::clone(&cache),
            Arc::clone(&bus),
            Arc::new(MonitorConfig::default()),
            Arc::new(AtomicBool::new(false)),
        );

        assert_eq!(observer.tick().await.unwrap(), 0);

        store.set_user_status(1, UserStatus::Disabled);
        assert_eq!(observer.tick().await.unwrap(), 1);

        bus.shutdown().await;

        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let Event::UserStatusChange(change) = &seen[0] else {
            panic!("wrong event kind");
        };
        assert_eq!(change.user_id, 1);
        assert_eq!(change.username, "user_1");
        assert_eq!(change.old_status, UserStatus::Enabled);
        assert_eq!(change.new_status, UserStatus::Disabled);

        // the serialized payload also reached the external tail queue
        assert_eq!(cache.queue_len(keys::STATUS_EVENT_QUEUE).await, 1);
        let raw = cache.pop_event(keys::STATUS_EVENT_QUEUE).await.unwrap();
        assert!(Event::from_json(&raw).is_ok());
    }

    #[tokio::test]
    async fn test_reconcile_hints_warms_cache() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user(1, UserStatus::Enabled));
        store.insert_group(group(10, 1, GroupStatus::Closed));

        let cache = Arc::new(CacheGateway::new(Arc::new(MemoryKv::new())));
        let bus = Arc::new(EventBus::new(16, 1, Duration::from_secs(1)));
        let observer = StatusObserver::new(
            store,
            Arc::clone(&cache),
            bus,
            Arc::new(MonitorConfig::default()),
            Arc::new(AtomicBool::new(false)),
        );

        observer.reconcile_hints().await.unwrap();
        assert_eq!(cache.get_user_status(1).await, Some(UserStatus::Enabled));
        assert_eq!(cache.get_group_status(10).await, Some(GroupStatus::Closed));
    }
}
