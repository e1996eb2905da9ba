//! # queue-core
//!
//! A persistent, adapter-backed job queue for mobile and edge environments.
//! Producers enqueue jobs tagged with a name; a single processing loop
//! claims work from durable storage under a concurrency budget and hands
//! each job to a registered worker.
//!
//! ## Architecture
//!
//! ```text
//! Producer
//!     │ enqueue()
//!     ▼
//! Queue (facade) ──persist──► JobStore (adapter)
//!     │                            ▲
//!     │ start()                    │ claim_concurrent_jobs()
//!     ▼                            │
//! Processor.tick() ────────────────┘
//!     │  filter: paused? expired? backing off? online-only?
//!     ▼
//! Executor.execute(job, worker) ──► Worker.call(id, payload)
//!     │
//!     └─► emit start/success/failure/failed on EventSink
//! ```
//!
//! ## Key invariants
//!
//! 1. `0 ≤ attempts ≤ max_attempts` for every job at rest.
//! 2. At most `concurrency` worker invocations are in flight at once.
//! 3. A job that succeeds is deleted from the adapter.
//! 4. A job that exhausts its attempts fires exactly one `failed` event.
//! 5. The adapter's `claim_concurrent_jobs` is the only operation whose
//!    concurrency correctness is non-local — it must be atomic.
//!
//! ## Guarantees
//!
//! - At-least-once delivery; worker idempotency is the producer's concern.
//! - Single process per storage namespace — no distributed coordination.
//! - Ghost `active` records left by a crash are reset to pending exactly
//!   once, at the next `start()`.
//!
//! ## What this is not
//!
//! - Not a distributed task queue — one process owns one storage namespace.
//! - Not exactly-once — retries can re-run a job that partially succeeded.
//! - Not a cron scheduler — no future-dated or recurring jobs, only retry
//!   backoff on failure.

mod error;
mod events;
mod executor;
mod job;
mod network;
mod processor;
mod queue;
mod registry;
mod store;

#[cfg(debug_assertions)]
pub mod audit;



pub use error::{EnqueueError, MissingWorkerError, StorageError, WorkerError};
pub use events::{EventKind, EventSink, QueueEvent};
pub use job::{EnqueueOptions, Job, DEFAULT_TIMEOUT_MS, DEFAULT_TTL_MS};
pub use network::{AlwaysOnline, NetworkMonitor, WatchNetworkMonitor};
pub use queue::{Queue, QueueBuilder};
pub use registry::{FnWorker, Registry, Worker, WorkerEntry, WorkerOptions};
pub use store::{DeadLetterRecord, JobStore, MemoryJobStore};

pub use async_trait::async_trait;
