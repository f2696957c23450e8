//! In-process event bus
//!
//! Bounded intake queue served by a small pool of dispatch workers. Handlers
//! are registered per event kind; all handlers of one event run in parallel,
//! each under its own timeout. An event counts as delivered when at least one
//! handler succeeds; there is no retry. Publish never blocks: a full queue
//! fails the publish and the caller decides whether to drop or retry.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Event, EventKind};

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

type HandlerMap = HashMap<EventKind, Vec<Arc<dyn EventHandler>>>;

pub struct EventBus {
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
    handlers: Arc<RwLock<HandlerMap>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    handler_timeout: Duration,
    delivered: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(queue_size: usize, worker_count: usize, handler_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(queue_size);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
            worker_count,
            handler_timeout,
            delivered: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a handler for one event kind. Multiple handlers per kind are
    /// allowed; the same handler may be registered under several kinds.
    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        info!(?kind, handler = handler.name(), "event handler registered");
        self.handlers
            .write()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Enqueue an event for dispatch. Returns false when the bus is shut down
    /// or the queue is full; the event is NOT silently dropped in either case.
    pub fn publish(&self, event: Event) -> bool {
        let sender = match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.clone(),
            None => {
                warn!(kind = ?event.kind(), "publish after shutdown rejected");
                return false;
            }
        };
        match sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(kind = ?event.kind(), "event queue full, publish rejected");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(kind = ?event.kind(), "event queue closed, publish rejected");
                false
            }
        }
    }

    /// Spawn the dispatch workers.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            warn!("event bus already started");
            return;
        }
        for index in 0..self.worker_count {
            let rx = Arc::clone(&self.rx);
            let handlers = Arc::clone(&self.handlers);
            let timeout = self.handler_timeout;
            let delivered = Arc::clone(&self.delivered);
            let failed = Arc::clone(&self.failed);
            workers.push(tokio::spawn(async move {
                debug!(index, "event dispatch worker started");
                loop {
                    let event = { rx.lock().await.recv().await };
                    match event {
                        Some(event) => {
                            let ok =
                                Self::dispatch_one(&handlers, &event, timeout).await;
                            if ok {
                                delivered.fetch_add(1, Ordering::Relaxed);
                            } else {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        None => break,
                    }
                }
                debug!(index, "event dispatch worker drained and stopped");
            }));
        }
        info!(workers = self.worker_count, "event bus started");
    }

    /// Run every registered handler for the event in parallel, each under the
    /// per-invocation timeout. True iff at least one handler succeeded.
    async fn dispatch_one(
        handlers: &RwLock<HandlerMap>,
        event: &Event,
        timeout: Duration,
    ) -> bool {
        let selected: Vec<Arc<dyn EventHandler>> = handlers
            .read()
            .unwrap()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        if selected.is_empty() {
            warn!(kind = ?event.kind(), "no handler registered for event kind");
            return false;
        }

        let invocations = selected.iter().map(|handler| {
            let handler = Arc::clone(handler);
            async move {
                match tokio::time::timeout(timeout, handler.handle(event)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        error!(handler = handler.name(), error = %e, "event handler failed");
                        false
                    }
                    Err(_) => {
                        error!(handler = handler.name(), "event handler timed out");
                        false
                    }
                }
            }
        });

        let results = join_all(invocations).await;
        results.iter().any(|ok| *ok)
    }

    /// Stop accepting publishes, drain the queue with the normal delivery
    /// rules, then join the workers.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap().take());
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "event dispatch worker panicked");
            }
        }
        info!(
            delivered = self.delivered.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            "event bus stopped"
        );
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
