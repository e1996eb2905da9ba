//! Name → worker mapping. No ownership of jobs, lookup only.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::error::WorkerError;
use crate::job::Job;

/// The callback a registered name dispatches to. `call` receives the job id
/// and payload (opaque to the core) and returns an optional result value on
/// success.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn call(&self, id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError>;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Adapts a plain async closure into a [`Worker`], so callers don't need to
/// define a struct for simple jobs.
pub struct FnWorker<F> {
    f: F,
}

impl<F> FnWorker<F>
where
    F: Fn(Uuid, Value) -> BoxFuture<'static, Result<Option<Value>, WorkerError>>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Worker for FnWorker<F>
where
    F: Fn(Uuid, Value) -> BoxFuture<'static, Result<Option<Value>, WorkerError>>
        + Send
        + Sync,
{
    async fn call(&self, id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
        (self.f)(id, payload).await
    }
}

/// Lifecycle hooks invoked alongside the corresponding events. All
/// optional; a worker that only cares about the result can ignore them
/// entirely.
#[derive(Default)]
pub struct WorkerOptions {
    pub on_start: Option<Box<dyn Fn(&Job) + Send + Sync>>,
    pub on_success: Option<Box<dyn Fn(&Job, Option<&Value>) + Send + Sync>>,
    pub on_failure: Option<Box<dyn Fn(&Job, &str) + Send + Sync>>,
    pub on_failed: Option<Box<dyn Fn(&Job, &str) + Send + Sync>>,
    pub on_complete: Option<Box<dyn Fn(&Job) + Send + Sync>>,
}

pub struct WorkerEntry {
    pub worker: Arc<dyn Worker>,
    pub options: WorkerOptions,
}

/// `name → { fn, options }`. Repeated `add_worker` calls for the same name
/// replace the prior entry.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<String, Arc<WorkerEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker(&self, name: impl Into<String>, worker: Arc<dyn Worker>, options: WorkerOptions) {
        self.entries.insert(
            name.into(),
            Arc::new(WorkerEntry { worker, options }),
        );
    }

    pub fn remove_worker(&self, name: &str) {
        self.entries.remove(name);
    }

    pub fn get_worker(&self, name: &str) -> Option<Arc<WorkerEntry>> {
        self.entries.get(name).map(|e| e.clone())
    }

    pub fn has_worker(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
