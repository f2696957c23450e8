//! orderwatch - Concurrent Order Life-Cycle Monitor
//!
//! Watches the outstanding orders of many independent users, fairly assigns
//! per-user batches to a pool of workers under a distributed mutual-exclusion
//! contract, and fans out status-change events to registered handlers.
//!
//! # Modules
//!
//! - [`core_types`] - Id aliases (UserId, GroupId, OrderId)
//! - [`config`] - Settings and tunables
//! - [`models`] - Orders, users, groups, and the status DAG
//! - [`store`] - Authoritative store seam (PostgreSQL + in-memory double)
//! - [`cache`] - Shared key-value cache: locks, hints, queues, heartbeats
//! - [`queue`] - Per-user working-set queue
//! - [`scheduler`] - Active-user registry and batch leasing
//! - [`worker`] - Order workers and the execution adapter seam
//! - [`events`] - Event types, bus, and built-in handlers
//! - [`observer`] - Store snapshot diffing
//! - [`engine`] - Explicitly constructed core and lifecycle

// Core types - must be first!
pub mod core_types;

// Configuration and ambient concerns
pub mod config;
pub mod error;
pub mod logging;
pub mod userlog;

// Domain and persistence
pub mod cache;
pub mod models;
pub mod store;

// Scheduling and processing
pub mod engine;
pub mod events;
pub mod observer;
pub mod queue;
pub mod scheduler;
pub mod worker;

// Convenient re-exports at crate root
pub use cache::CacheGateway;
pub use config::{MonitorConfig, Settings};
pub use core_types::{GroupId, OrderId, UserId};
pub use engine::{EngineStatus, MonitorEngine};
pub use error::{MonitorError, StoreError};
pub use events::{Event, EventBus, EventHandler, EventKind};
pub use models::{GroupStatus, Order, OrderGroup, OrderStatus, User, UserStatus};
pub use observer::{StatusObserver, StatusSnapshot};
pub use queue::UserQueue;
pub use scheduler::Scheduler;
pub use store::OrderStore;
pub use worker::{Execution, ExecutionAdapter, WorkerPool};
