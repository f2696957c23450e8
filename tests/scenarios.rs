//! End-to-end scenarios over the in-memory store and cache fakes.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use orderwatch::cache::{CacheGateway, MemoryKv, keys};
use orderwatch::config::MonitorConfig;
use orderwatch::core_types::{GroupId, OrderId, UserId};
use orderwatch::engine::MonitorEngine;
use orderwatch::events::handlers::register_builtin_handlers;
use orderwatch::events::{Event, EventBus, EventHandler, EventKind};
use orderwatch::models::{GroupStatus, Order, OrderGroup, OrderStatus, User, UserStatus};
use orderwatch::observer::StatusObserver;
use orderwatch::scheduler::{Scheduler, SchedulerConfig};
use orderwatch::store::{MemoryStore, OrderStore};
use orderwatch::userlog::{TracingUserLog, UserLog};
use orderwatch::worker::{Execution, ExecutionAdapter, Worker, WorkerContext};

// ---- fixtures --------------------------------------------------------------

fn user(id: UserId, status: UserStatus) -> User {
    User {
        id,
        username: format!("user_{id}"),
        status,
    }
}

fn order_group(id: GroupId, user_id: UserId, status: GroupStatus) -> OrderGroup {
    OrderGroup {
        id,
        user_id,
        group_name: format!("group_{id}"),
        status,
    }
}

fn pending_order(id: OrderId, user_id: UserId, group_id: GroupId, quantity: u64) -> Order {
    let created = Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap();
    Order {
        id,
        user_id,
        group_id,
        order_no: format!("ORD-{id}"),
        symbol: "BTCUSDT".to_string(),
        order_type: "LIMIT".to_string(),
        price: Decimal::from(100),
        quantity: Decimal::from(quantity),
        filled_quantity: Decimal::ZERO,
        status: OrderStatus::Pending,
        priority: 0,
        created_at: created,
        updated_at: created,
        filled_at: None,
    }
}

/// Fast cadences so scenarios finish in well under a second of idle time.
/// The observer keeps a non-zero interval; its wait is also the loop's yield
/// point.
fn fast_config(worker_count: usize) -> MonitorConfig {
    MonitorConfig {
        worker_count,
        batch_size: 10,
        check_interval_ms: 10,
        queue_refresh_interval_secs: 0,
        active_refresh_interval_secs: 0,
        observer_interval_secs: 1,
        event_bus_workers: 1,
        stats_interval_secs: 1,
        ..Default::default()
    }
}

// ---- scripted execution adapter -------------------------------------------

/// Replays a per-order script of outcomes; unscripted orders are left alone.
struct ScriptedExecution {
    scripts: Mutex<std::collections::HashMap<OrderId, VecDeque<Execution>>>,
}

impl ScriptedExecution {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn script(self, order_id: OrderId, outcomes: Vec<Execution>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(order_id, outcomes.into());
        self
    }

    fn fill(quantity: u64) -> Execution {
        Execution::Progress {
            status: OrderStatus::Filled,
            filled_quantity: Decimal::from(quantity),
        }
    }

    fn partial(quantity: u64) -> Execution {
        Execution::Progress {
            status: OrderStatus::Partial,
            filled_quantity: Decimal::from(quantity),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for ScriptedExecution {
    async fn execute(&self, order: &Order) -> anyhow::Result<Execution> {
        Ok(self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&order.id)
            .and_then(|outcomes| outcomes.pop_front())
            .unwrap_or(Execution::Unchanged))
    }
}

/// Fills every order it sees in one shot.
struct FillAll;

#[async_trait]
impl ExecutionAdapter for FillAll {
    async fn execute(&self, order: &Order) -> anyhow::Result<Execution> {
        Ok(Execution::Progress {
            status: OrderStatus::Filled,
            filled_quantity: order.quantity,
        })
    }
}

// ---- recording handler -----------------------------------------------------

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.seen.lock().unwrap().clone()
    }

    fn order_changes(&self) -> Vec<orderwatch::events::OrderStatusChange> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::OrderStatusChange(change) => Some(change),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---- engine harness --------------------------------------------------------

struct Harness {
    store: Arc<MemoryStore>,
    cache: Arc<CacheGateway>,
    engine: MonitorEngine,
    recorder: Arc<Recorder>,
}

fn harness(adapter: Arc<dyn ExecutionAdapter>, config: MonitorConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(CacheGateway::new(Arc::new(MemoryKv::new())));
    let user_log: Arc<dyn UserLog> = Arc::new(TracingUserLog);
    let status_ttl = config.status_cache_ttl();

    let engine = MonitorEngine::new(
        store.clone() as Arc<dyn OrderStore>,
        Arc::clone(&cache),
        adapter,
        Arc::clone(&user_log),
        config,
    );

    register_builtin_handlers(
        engine.bus(),
        store.clone() as Arc<dyn OrderStore>,
        Arc::clone(&cache),
        user_log,
        status_ttl,
    );

    let recorder = Arc::new(Recorder::default());
    engine
        .bus()
        .register(EventKind::OrderStatusChange, recorder.clone());
    engine
        .bus()
        .register(EventKind::UserStatusChange, recorder.clone());

    Harness {
        store,
        cache,
        engine,
        recorder,
    }
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let stop_at = Instant::now() + deadline;
    while Instant::now() < stop_at {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// ---- S1: single pending order completes ------------------------------------

#[tokio::test]
async fn s1_single_pending_order_completes() {
    let adapter = Arc::new(ScriptedExecution::new().script(100, vec![ScriptedExecution::fill(10)]));
    let hx = harness(adapter, fast_config(2));
    hx.store.insert_user(user(1, UserStatus::Enabled));
    hx.store.insert_group(order_group(10, 1, GroupStatus::Open));
    hx.store.insert_order(pending_order(100, 1, 10, 10));

    hx.engine.start().await;
    let filled = wait_until(Duration::from_secs(5), || {
        hx.store.order(100).unwrap().status == OrderStatus::Filled
    })
    .await;
    assert!(filled, "order 100 never filled");
    hx.engine.stop().await;

    let row = hx.store.order(100).unwrap();
    assert_eq!(row.status, OrderStatus::Filled);
    assert_eq!(row.filled_quantity, Decimal::from(10));
    assert!(row.filled_at.is_some());

    let logs = hx.store.status_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].entry.order_id, 100);
    assert_eq!(logs[0].entry.old_status, OrderStatus::Pending);
    assert_eq!(logs[0].entry.new_status, OrderStatus::Filled);
    assert_eq!(logs[0].entry.old_filled_quantity, Decimal::ZERO);
    assert_eq!(logs[0].entry.new_filled_quantity, Decimal::from(10));

    let changes = hx.recorder.order_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].order_id, 100);
    assert_eq!(changes[0].user_id, 1);
    assert_eq!(changes[0].group_id, 10);
    assert_eq!(changes[0].new_status, OrderStatus::Filled);
    assert_eq!(changes[0].symbol, "BTCUSDT");

    let processed: i64 = hx
        .cache
        .read_counters()
        .await
        .iter()
        .filter(|(k, _)| k.starts_with("worker_") && k.ends_with("_processed"))
        .map(|(_, v)| *v)
        .sum();
    assert!(processed >= 1, "no worker counter recorded");

    // the built-in handler pushed a delivery payload
    assert!(hx.cache.queue_len(keys::NOTIFICATIONS_QUEUE).await >= 1);
}

// ---- S2: partial then fill --------------------------------------------------

#[tokio::test]
async fn s2_partial_then_fill() {
    let adapter = Arc::new(ScriptedExecution::new().script(
        200,
        vec![ScriptedExecution::partial(40), ScriptedExecution::fill(100)],
    ));
    let hx = harness(adapter, fast_config(1));
    hx.store.insert_user(user(1, UserStatus::Enabled));
    hx.store.insert_group(order_group(10, 1, GroupStatus::Open));
    hx.store.insert_order(pending_order(200, 1, 10, 100));

    hx.engine.start().await;
    let filled = wait_until(Duration::from_secs(5), || {
        hx.store.order(200).unwrap().status == OrderStatus::Filled
    })
    .await;
    assert!(filled, "order 200 never filled");
    hx.engine.stop().await;

    let logs = hx.store.status_logs();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].entry.old_status, OrderStatus::Pending);
    assert_eq!(logs[0].entry.new_status, OrderStatus::Partial);
    assert_eq!(logs[0].entry.old_filled_quantity, Decimal::ZERO);
    assert_eq!(logs[0].entry.new_filled_quantity, Decimal::from(40));
    assert_eq!(logs[1].entry.old_status, OrderStatus::Partial);
    assert_eq!(logs[1].entry.new_status, OrderStatus::Filled);
    assert_eq!(logs[1].entry.old_filled_quantity, Decimal::from(40));
    assert_eq!(logs[1].entry.new_filled_quantity, Decimal::from(100));

    let changes = hx.recorder.order_changes();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].new_status, OrderStatus::Partial);
    assert_eq!(changes[1].new_status, OrderStatus::Filled);
}

// ---- S3: disabled user mid-flight -------------------------------------------

#[tokio::test]
async fn s3_disabled_user_mid_flight() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(user(1, UserStatus::Enabled));
    store.insert_group(order_group(10, 1, GroupStatus::Open));
    store.insert_order(pending_order(300, 1, 10, 10));

    let cache = Arc::new(CacheGateway::new(Arc::new(MemoryKv::new())));
    let config = Arc::new(fast_config(1));
    let user_log: Arc<dyn UserLog> = Arc::new(TracingUserLog);

    let bus = Arc::new(EventBus::new(64, 1, Duration::from_secs(5)));
    register_builtin_handlers(
        &bus,
        store.clone() as Arc<dyn OrderStore>,
        Arc::clone(&cache),
        Arc::clone(&user_log),
        config.status_cache_ttl(),
    );
    let recorder = Arc::new(Recorder::default());
    bus.register(EventKind::UserStatusChange, recorder.clone());
    bus.register(EventKind::OrderStatusChange, recorder.clone());
    bus.start();

    let scheduler = Arc::new(Scheduler::new(
        store.clone() as Arc<dyn OrderStore>,
        Arc::clone(&cache),
        SchedulerConfig {
            active_refresh_interval: Duration::ZERO,
            queue_refresh_interval: Duration::ZERO,
            ..Default::default()
        },
    ));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let observer = StatusObserver::new(
        store.clone() as Arc<dyn OrderStore>,
        Arc::clone(&cache),
        Arc::clone(&bus),
        Arc::clone(&config),
        Arc::clone(&stop),
    );
    let worker = Worker::new(
        "worker_0_scenario".to_string(),
        Arc::new(WorkerContext {
            store: store.clone() as Arc<dyn OrderStore>,
            cache: Arc::clone(&cache),
            scheduler: Arc::clone(&scheduler),
            bus: Arc::clone(&bus),
            adapter: Arc::new(FillAll),
            user_log,
            config,
            stop,
        }),
    );

    // prime the observer, then lease the user's batch
    observer.tick().await.unwrap();
    let (user_id, batch) = scheduler
        .lease_batch("worker_0_scenario", 10)
        .await
        .expect("initial lease");
    assert_eq!(user_id, 1);
    assert_eq!(batch.len(), 1);

    // the user is disabled while the lease is held
    store.set_user_status(1, UserStatus::Disabled);
    assert_eq!(observer.tick().await.unwrap(), 1);

    // the disable event propagates to the cache hint through the handler
    let mut hint_updated = false;
    for _ in 0..200 {
        if cache.get_user_status(1).await == Some(UserStatus::Disabled) {
            hint_updated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(hint_updated, "disable hint never propagated");

    // processing the leased batch now drops the order via the eligibility check
    worker.process_batch(user_id, &batch).await;
    scheduler.release(user_id, "worker_0_scenario").await;

    assert_eq!(store.order(300).unwrap().status, OrderStatus::Pending);
    assert!(store.status_logs().is_empty());

    // a later lease pass skips the user entirely: the active-user query
    // excludes disabled owners
    assert!(scheduler.lease_batch("worker_0_scenario", 10).await.is_none());

    bus.shutdown().await;

    let events = recorder.events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::UserStatusChange(c) if c.new_status == UserStatus::Disabled)),
        "no user disable event observed"
    );
    assert_eq!(
        recorder.order_changes().len(),
        0,
        "order events emitted for a disabled user"
    );
}

// ---- S4: worker crash recovery ----------------------------------------------

#[tokio::test]
async fn s4_lock_expiry_frees_crashed_workers_user() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(user(42, UserStatus::Enabled));
    store.insert_group(order_group(10, 42, GroupStatus::Open));
    store.insert_order(pending_order(400, 42, 10, 10));

    let cache = Arc::new(CacheGateway::new(Arc::new(MemoryKv::new())));
    let lock_ttl = Duration::from_millis(200);
    let scheduler = Scheduler::new(
        store as Arc<dyn OrderStore>,
        Arc::clone(&cache),
        SchedulerConfig {
            active_refresh_interval: Duration::ZERO,
            queue_refresh_interval: Duration::ZERO,
            user_lock_ttl: lock_ttl,
            max_in_flight_per_user: 3,
        },
    );

    // worker A takes the lock and dies without releasing
    assert!(cache.acquire_user_lock(42, "worker_a_dead", lock_ttl).await);

    // while the lock is live the user is skipped
    assert!(scheduler.lease_batch("worker_b_alive", 10).await.is_none());

    // after the TTL some other worker leases the same user
    let started = Instant::now();
    let mut leased = None;
    while started.elapsed() < Duration::from_secs(5) {
        if let Some(grant) = scheduler.lease_batch("worker_b_alive", 10).await {
            leased = Some(grant);
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let (user_id, batch) = leased.expect("lock never expired");
    assert_eq!(user_id, 42);
    assert_eq!(batch.len(), 1);
    assert!(started.elapsed() >= lock_ttl - Duration::from_millis(25));
}

// ---- S5: two workers contend ------------------------------------------------

#[tokio::test]
async fn s5_two_workers_one_user_ten_orders() {
    let hx = harness(Arc::new(FillAll), fast_config(2));
    hx.store.insert_user(user(1, UserStatus::Enabled));
    hx.store.insert_group(order_group(10, 1, GroupStatus::Open));
    for id in 0..10 {
        hx.store.insert_order(pending_order(500 + id, 1, 10, 10));
    }

    hx.engine.start().await;
    let all_filled = wait_until(Duration::from_secs(10), || {
        (0..10).all(|id| hx.store.order(500 + id).unwrap().status == OrderStatus::Filled)
    })
    .await;
    assert!(all_filled, "not every order filled");
    hx.engine.stop().await;

    let logs = hx.store.status_logs();
    assert_eq!(logs.len(), 10, "exactly one transition per order");

    // no order id appears twice for the same transition
    let mut seen = HashSet::new();
    for log in &logs {
        let key = (log.entry.order_id, log.entry.old_status, log.entry.new_status);
        assert!(seen.insert(key), "duplicate transition for order {}", log.entry.order_id);
    }

    let status = hx.engine.status().await;
    assert_eq!(status.processed, 10);
    assert_eq!(status.errors, 0);
}

// ---- S6: event bus overflow --------------------------------------------------

#[tokio::test]
async fn s6_event_bus_overflow_returns_false() {
    let queue_size = 8;
    let bus = EventBus::new(queue_size, 1, Duration::from_secs(1));
    let recorder = Arc::new(Recorder::default());
    bus.register(EventKind::UserStatusChange, recorder.clone());

    let event = |i: i64| {
        Event::UserStatusChange(orderwatch::events::UserStatusChange {
            event_id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: i,
            username: format!("user_{i}"),
            old_status: UserStatus::Enabled,
            new_status: UserStatus::Disabled,
        })
    };

    // dispatch workers are not running yet, so the bounded queue is the only
    // sink: queue_size publishes succeed, the next one is rejected
    let mut results = Vec::new();
    for i in 0..=queue_size as i64 {
        results.push(bus.publish(event(i)));
    }
    assert!(results[..queue_size].iter().all(|ok| *ok));
    assert!(!results[queue_size], "overflow publish must return false");

    // nothing accepted was silently dropped: draining delivers all of them
    bus.start();
    bus.shutdown().await;
    assert_eq!(recorder.events().len(), queue_size);
    assert_eq!(bus.delivered_count(), queue_size as u64);
}
