//! The facade's event sink: a simple observer list keyed by event name,
//! invoked synchronously in registration order. Listener panics are caught
//! so they never propagate into the executor.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use crate::job::Job;

/// The four event kinds the facade emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Success,
    Failure,
    Failed,
}

/// A fact about a job's execution, handed to listeners.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Start(Job),
    Success(Job, Option<Value>),
    /// Non-terminal failure: the job was retried.
    Failure(Job, String),
    /// Terminal failure: `attempts == max_attempts`.
    Failed(Job, String),
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::Start(_) => EventKind::Start,
            QueueEvent::Success(..) => EventKind::Success,
            QueueEvent::Failure(..) => EventKind::Failure,
            QueueEvent::Failed(..) => EventKind::Failed,
        }
    }
}

type Listener = Box<dyn Fn(&QueueEvent) + Send + Sync>;

/// Fan-out sink for the four event kinds. Cheaply cloneable (shares the
/// underlying listener map), so the executor and processor can each hold a
/// handle without owning the facade.
#[derive(Clone, Default)]
pub struct EventSink {
    listeners: Arc<DashMap<EventKind, Vec<Listener>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `kind`. Listeners for the same kind run in
    /// registration order.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.listeners
            .entry(kind)
            .or_default()
            .push(Box::new(listener));
    }

    /// Invoke every listener registered for `event`'s kind, synchronously,
    /// in registration order. A panicking listener is logged and skipped;
    /// it does not abort the remaining listeners or the caller.
    pub fn emit(&self, event: QueueEvent) {
        let kind = event.kind();
        if let Some(listeners) = self.listeners.get(&kind) {
            for listener in listeners.iter() {
                if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    warn!(?kind, "event listener panicked; continuing");
                }
            }
        }
    }
}
