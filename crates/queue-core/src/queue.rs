//! Composition root and producer-facing API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::{EnqueueError, StorageError};
use crate::events::{EventKind, EventSink, QueueEvent};
use crate::executor::Executor;
use crate::job::{EnqueueOptions, Job};
use crate::network::NetworkMonitor;
use crate::processor::Processor;
use crate::registry::{Registry, Worker, WorkerOptions};
use crate::store::{JobStore, MemoryJobStore};

struct Inner {
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    events: EventSink,
    processor: Arc<Processor>,
    // Guards the recovery window so a concurrent `start()` only runs
    // `adapter.recover()` once, and so `stop()` during that window can
    // abort the in-flight `start()`.
    starting: AtomicBool,
    stop_during_start: AtomicBool,
}

/// Builds a [`Queue`] over a chosen adapter, concurrency budget, and
/// optional network monitor.
pub struct QueueBuilder {
    store: Arc<dyn JobStore>,
    concurrency: usize,
    monitor: Option<Arc<dyn NetworkMonitor>>,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryJobStore::new()),
            concurrency: 1,
            monitor: None,
        }
    }
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Providing a monitor is what turns on network gating — there is no
    /// separate boolean, since without a monitor there is nothing to
    /// subscribe to.
    pub fn with_network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn build(self) -> Queue {
        let registry = Arc::new(Registry::new());
        let events = EventSink::new();
        let executor = Arc::new(Executor::new(self.store.clone(), events.clone()));
        let processor = Arc::new(Processor::new(
            self.store.clone(),
            registry.clone(),
            executor,
            self.concurrency,
            self.monitor,
        ));
        Queue(Arc::new(Inner {
            store: self.store,
            registry,
            events,
            processor,
            starting: AtomicBool::new(false),
            stop_during_start: AtomicBool::new(false),
        }))
    }
}

/// The facade producers talk to: composition of registry, executor, and
/// processor over an adapter, plus the event sink. Cheaply cloneable — all
/// state lives behind the shared `Inner`.
#[derive(Clone)]
pub struct Queue(Arc<Inner>);

impl Default for Queue {
    fn default() -> Self {
        QueueBuilder::default().build()
    }
}

impl Queue {
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    /// A queue with every default: in-memory adapter, concurrency 1, no
    /// network monitor.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker(&self, name: impl Into<String>, worker: Arc<dyn Worker>, options: WorkerOptions) {
        self.0.registry.add_worker(name, worker, options);
    }

    pub fn remove_worker(&self, name: &str) {
        self.0.registry.remove_worker(name);
    }

    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.0.events.on(kind, listener);
    }

    /// The underlying event sink, for wiring up cross-cutting listeners
    /// such as [`crate::audit::install`].
    pub fn events(&self) -> &EventSink {
        &self.0.events
    }

    /// Build the job via the factory and persist it. If
    /// `options.auto_start` is set (the default), kicks off `start()` in
    /// the background without waiting on it.
    pub async fn enqueue(
        &self,
        name: impl Into<String>,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, EnqueueError> {
        let auto_start = options.auto_start;
        let job = Job::new(name, payload, options);
        let id = job.id;
        self.0
            .store
            .add_job(job)
            .await
            .map_err(|source| EnqueueError { source })?;

        if auto_start {
            let queue = self.clone();
            tokio::spawn(async move { queue.start().await });
        }

        Ok(id)
    }

    /// Idempotent. Runs `adapter.recover()` once (resetting ghost `active`
    /// records left by a crash) before handing control to the processor. A
    /// `stop()` that lands while recovery is in flight aborts the start.
    pub async fn start(&self) {
        if self.0.processor.is_active() {
            return;
        }
        if self.0.starting.swap(true, Ordering::SeqCst) {
            return;
        }
        self.0.stop_during_start.store(false, Ordering::SeqCst);

        if let Err(e) = self.0.store.recover().await {
            warn!(error = %e, "adapter recover() failed; ghost jobs may remain active");
        }

        if self.0.stop_during_start.swap(false, Ordering::SeqCst) {
            self.0.starting.store(false, Ordering::SeqCst);
            return;
        }

        self.0.processor.start().await;
        self.0.starting.store(false, Ordering::SeqCst);
    }

    pub async fn stop(&self) {
        self.0.stop_during_start.store(true, Ordering::SeqCst);
        self.0.processor.stop().await;
    }

    pub fn pause_job(&self, name: &str) {
        self.0.processor.pause_job(name);
    }

    pub fn resume_job(&self, name: &str) {
        self.0.processor.resume_job(name);
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError> {
        self.0.store.get_job(id).await
    }

    pub async fn get_jobs(&self) -> Result<Vec<Job>, StorageError> {
        self.0.store.get_jobs().await
    }
}
