//! The main loop: budget accounting, claim, filter, dispatch, wake-up
//! scheduling, network subscription.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::executor::Executor;
use crate::job::Job;
use crate::network::NetworkMonitor;
use crate::registry::Registry;
use crate::store::JobStore;

/// How long to wait before retrying after a `StorageError` during claim.
/// Chosen short enough that a transient adapter hiccup doesn't stall the
/// queue for long, long enough not to hammer a struggling store.
const STORAGE_ERROR_RETRY_DELAY: Duration = Duration::from_millis(500);

const TICK_IDLE: u8 = 0;
const TICK_RUNNING: u8 = 1;
const TICK_RUNNING_PENDING: u8 = 2;

pub struct Processor {
    store: Arc<dyn JobStore>,
    registry: Arc<Registry>,
    executor: Arc<Executor>,
    concurrency: usize,
    running_jobs: AtomicUsize,
    active: AtomicBool,
    tick_state: AtomicU8,
    paused_names: DashSet<String>,
    monitor: Option<Arc<dyn NetworkMonitor>>,
    is_connected: AtomicBool,
    network_task: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<Registry>,
        executor: Arc<Executor>,
        concurrency: usize,
        monitor: Option<Arc<dyn NetworkMonitor>>,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
            concurrency: concurrency.max(1),
            running_jobs: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            tick_state: AtomicU8::new(TICK_IDLE),
            paused_names: DashSet::new(),
            monitor,
            is_connected: AtomicBool::new(true),
            network_task: AsyncMutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Idempotent: returns immediately if already active.
    pub async fn start(self: &Arc<Self>) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(monitor) = &self.monitor {
            self.is_connected.store(monitor.is_connected(), Ordering::SeqCst);
            let mut rx = monitor.watch();
            let this = self.clone();
            let handle = tokio::spawn(async move {
                let mut was_connected = this.is_connected.load(Ordering::SeqCst);
                loop {
                    if rx.changed().await.is_err() {
                        break;
                    }
                    let now_connected = *rx.borrow();
                    this.is_connected.store(now_connected, Ordering::SeqCst);
                    if !was_connected && now_connected {
                        this.request_tick();
                    }
                    was_connected = now_connected;
                }
            });
            *self.network_task.lock().await = Some(handle);
        } else {
            self.is_connected.store(true, Ordering::SeqCst);
        }

        self.request_tick();
    }

    /// Flips to inactive, unsubscribes, detaches the network source. New
    /// claims cease; in-flight executions finish on their own.
    pub async fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.network_task.lock().await.take() {
            handle.abort();
        }
    }

    pub fn pause_job(&self, name: &str) {
        self.paused_names.insert(name.to_string());
    }

    pub fn resume_job(self: &Arc<Self>, name: &str) {
        self.paused_names.remove(name);
        if self.is_active() {
            self.request_tick();
        }
    }

    /// Re-entrant-safe scheduling entry point. If a tick is already
    /// in-flight, marks a follow-up pass pending instead of running
    /// concurrently with it.
    pub fn request_tick(self: &Arc<Self>) {
        loop {
            match self.tick_state.load(Ordering::SeqCst) {
                TICK_IDLE => {
                    if self
                        .tick_state
                        .compare_exchange(TICK_IDLE, TICK_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        let this = self.clone();
                        tokio::spawn(async move { this.drive().await });
                        return;
                    }
                }
                TICK_RUNNING => {
                    if self
                        .tick_state
                        .compare_exchange(
                            TICK_RUNNING,
                            TICK_RUNNING_PENDING,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    async fn drive(self: Arc<Self>) {
        loop {
            let loop_again = self.tick_once().await;
            if loop_again {
                self.tick_state.store(TICK_RUNNING, Ordering::SeqCst);
                continue;
            }
            match self.tick_state.compare_exchange(
                TICK_RUNNING,
                TICK_IDLE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(_) => {
                    // A follow-up request arrived mid-tick; consume it.
                    self.tick_state.store(TICK_RUNNING, Ordering::SeqCst);
                    continue;
                }
            }
        }
    }

    /// One iteration of the scheduling loop. Returns `true` when the
    /// caller should immediately run another pass (a batch was dispatched
    /// and capacity may remain).
    async fn tick_once(self: &Arc<Self>) -> bool {
        if !self.is_active() || self.running_jobs.load(Ordering::SeqCst) >= self.concurrency {
            return false;
        }

        let slots = self.concurrency - self.running_jobs.load(Ordering::SeqCst);
        let jobs = match self.store.claim_concurrent_jobs(slots).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "claim_concurrent_jobs failed; retrying next tick");
                self.schedule_wake(STORAGE_ERROR_RETRY_DELAY);
                return false;
            }
        };

        if jobs.is_empty() && self.running_jobs.load(Ordering::SeqCst) == 0 {
            self.active.store(false, Ordering::SeqCst);
            return false;
        }

        let now = Utc::now();
        let mut started_this_batch = 0usize;
        let mut has_backoff = false;
        let mut next_wake: Option<Duration> = None;

        for job in jobs {
            if !self.is_active()
                || self.running_jobs.load(Ordering::SeqCst) >= self.concurrency
                || self.paused_names.contains(&job.name)
            {
                self.unclaim(job).await;
                continue;
            }

            if job.is_expired(now) {
                if let Err(e) = self.store.remove_job(job.id).await {
                    warn!(error = %e, job_id = %job.id, "failed to remove expired job");
                }
                continue;
            }

            if let Some(remaining) = job.backoff_remaining(now) {
                has_backoff = true;
                next_wake = Some(next_wake.map_or(remaining, |cur| cur.min(remaining)));
                self.unclaim(job).await;
                continue;
            }

            if job.online_only && !self.is_connected.load(Ordering::SeqCst) {
                self.unclaim(job).await;
                continue;
            }

            if job.is_terminal() {
                self.unclaim(job).await;
                continue;
            }

            let Some(entry) = self.registry.get_worker(&job.name) else {
                let missing = crate::error::MissingWorkerError(job.name.clone());
                warn!(error = %missing, job_id = %job.id, "dropping claimed job");
                let mut job = job;
                job.active = false;
                job.failed = Some(now);
                job.meta_data.insert(
                    "lastError".to_string(),
                    serde_json::Value::String(crate::error::MISSING_WORKER_MESSAGE.to_string()),
                );
                if let Err(e) = self.store.update_job(job.clone()).await {
                    warn!(error = %e, job_id = %job.id, "failed to persist missing-worker state");
                }
                continue;
            };

            self.running_jobs.fetch_add(1, Ordering::SeqCst);
            started_this_batch += 1;
            let this = self.clone();
            let executor = self.executor.clone();
            tokio::spawn(async move {
                executor.execute(job, entry).await;
                this.running_jobs.fetch_sub(1, Ordering::SeqCst);
                this.request_tick();
            });
        }

        if started_this_batch > 0 {
            true
        } else if has_backoff {
            if let Some(delay) = next_wake {
                self.schedule_wake(delay);
            }
            false
        } else if self.running_jobs.load(Ordering::SeqCst) == 0 {
            self.active.store(false, Ordering::SeqCst);
            false
        } else {
            false
        }
    }

    async fn unclaim(&self, mut job: Job) {
        job.active = false;
        if let Err(e) = self.store.update_job(job.clone()).await {
            warn!(error = %e, job_id = %job.id, "failed to unclaim job");
        }
    }

    fn schedule_wake(self: &Arc<Self>, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(?delay, "backoff wake firing");
            this.request_tick();
        });
    }
}
