//! Single-job lifecycle: persist active, invoke the worker under its time
//! budget, persist the result, emit events, route terminal failures to the
//! dead-letter sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::error::WorkerError;
use crate::events::{EventSink, QueueEvent};
use crate::job::Job;
use crate::registry::WorkerEntry;
use crate::store::JobStore;

pub struct Executor {
    store: Arc<dyn JobStore>,
    events: EventSink,
}

impl Executor {
    pub fn new(store: Arc<dyn JobStore>, events: EventSink) -> Self {
        Self { store, events }
    }

    /// Run one job to completion. Exactly one of `{success, failed}` is
    /// emitted, plus zero-or-one `failure`, always followed by one
    /// `complete` hook invocation.
    #[instrument(skip(self, job, entry), fields(job_id = %job.id, job_name = %job.name))]
    pub async fn execute(&self, mut job: Job, entry: Arc<WorkerEntry>) {
        job.mark_active();
        if let Err(e) = self.store.update_job(job.clone()).await {
            warn!(error = %e, "failed to persist active state before running job");
        }

        self.events.emit(QueueEvent::Start(job.clone()));
        if let Some(on_start) = &entry.options.on_start {
            on_start(&job);
        }

        let timeout = Duration::from_millis(job.timeout_ms);
        let outcome = match tokio::time::timeout(timeout, entry.worker.call(job.id, job.payload.clone())).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(job.timeout_ms)),
        };

        match outcome {
            Ok(result) => self.succeed(job, entry, result).await,
            Err(err) => self.fail(job, entry, err).await,
        }
    }

    async fn succeed(&self, job: Job, entry: Arc<WorkerEntry>, result: Option<serde_json::Value>) {
        if let Err(e) = self.store.remove_job(job.id).await {
            warn!(error = %e, "failed to remove succeeded job");
        }
        info!("job succeeded");
        self.events.emit(QueueEvent::Success(job.clone(), result.clone()));
        if let Some(on_success) = &entry.options.on_success {
            on_success(&job, result.as_ref());
        }
        if let Some(on_complete) = &entry.options.on_complete {
            on_complete(&job);
        }
    }

    async fn fail(&self, mut job: Job, entry: Arc<WorkerEntry>, err: WorkerError) {
        let message = err.message();
        let terminal = job.record_failure(message.clone(), Utc::now());

        if terminal {
            error!(%message, "job failed terminally");
            self.events.emit(QueueEvent::Failed(job.clone(), message.clone()));
            if let Some(on_failed) = &entry.options.on_failed {
                on_failed(&job, &message);
            }

            match self.store.move_to_dlq(&job).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = self.store.update_job(job.clone()).await {
                        warn!(error = %e, "failed to persist terminal job without DLQ support");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "dead-letter move failed; leaving job attempts exhausted in place");
                    if let Err(e) = self.store.update_job(job.clone()).await {
                        warn!(error = %e, "failed to persist terminal job after DLQ move failure");
                    }
                }
            }
        } else {
            warn!(%message, attempts = job.attempts, "job failed, will retry");
            self.events.emit(QueueEvent::Failure(job.clone(), message.clone()));
            if let Some(on_failure) = &entry.options.on_failure {
                on_failure(&job, &message);
            }
            if let Err(e) = self.store.update_job(job.clone()).await {
                warn!(error = %e, "failed to persist retry state");
            }
        }

        if let Some(on_complete) = &entry.options.on_complete {
            on_complete(&job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::job::EnqueueOptions;
    use crate::registry::{FnWorker, WorkerOptions};
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct AlwaysOk;
    #[async_trait]
    impl crate::registry::Worker for AlwaysOk {
        async fn call(&self, _id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
            Ok(Some(payload))
        }
    }

    struct AlwaysFail;
    #[async_trait]
    impl crate::registry::Worker for AlwaysFail {
        async fn call(&self, _id: Uuid, _payload: Value) -> Result<Option<Value>, WorkerError> {
            Err(WorkerError::Failed("boom".into()))
        }
    }

    struct NeverReturns;
    #[async_trait]
    impl crate::registry::Worker for NeverReturns {
        async fn call(&self, _id: Uuid, _payload: Value) -> Result<Option<Value>, WorkerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn job_with(max_attempts: u32, timeout_ms: u64) -> Job {
        Job::new(
            "t",
            Value::Null,
            EnqueueOptions {
                attempts: Some(max_attempts),
                timeout_ms,
                ..Default::default()
            },
        )
    }

    fn entry(worker: Arc<dyn crate::registry::Worker>) -> Arc<WorkerEntry> {
        Arc::new(WorkerEntry { worker, options: WorkerOptions::default() })
    }

    #[tokio::test]
    async fn success_removes_job_and_emits_success() {
        let store = Arc::new(MemoryJobStore::new());
        let events = EventSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        events.on(EventKind::Success, move |e| s.lock().unwrap().push(format!("{:?}", e)));
        let completed = Arc::new(AtomicUsize::new(0));
        let c = completed.clone();

        let job = job_with(1, 1000);
        let id = job.id;
        store.add_job(job.clone()).await.unwrap();

        let exec = Executor::new(store.clone(), events);
        let mut options = WorkerOptions::default();
        options.on_complete = Some(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let entry = Arc::new(WorkerEntry { worker: Arc::new(AlwaysOk), options });
        exec.execute(job, entry).await;

        assert!(store.get_job(id).await.unwrap().is_none());
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_terminal_failure_retains_job_and_emits_failure() {
        let store = Arc::new(MemoryJobStore::new());
        let events = EventSink::new();
        let seen = Arc::new(Mutex::new(0usize));
        let s = seen.clone();
        events.on(EventKind::Failure, move |_| *s.lock().unwrap() += 1);

        let job = job_with(3, 1000);
        let id = job.id;
        store.add_job(job.clone()).await.unwrap();

        let exec = Executor::new(store.clone(), events);
        exec.execute(job, entry(Arc::new(AlwaysFail))).await;

        let persisted = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(persisted.attempts, 1);
        assert!(!persisted.active);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn terminal_failure_without_dlq_stays_in_place_and_emits_failed() {
        let store = Arc::new(MemoryJobStore::new());
        let events = EventSink::new();
        let failed_count = Arc::new(Mutex::new(0usize));
        let f = failed_count.clone();
        events.on(EventKind::Failed, move |_| *f.lock().unwrap() += 1);
        let failure_count = Arc::new(Mutex::new(0usize));
        let ff = failure_count.clone();
        events.on(EventKind::Failure, move |_| *ff.lock().unwrap() += 1);

        let mut job = job_with(1, 1000);
        job.attempts = 0;
        let id = job.id;
        store.add_job(job.clone()).await.unwrap();

        let exec = Executor::new(store.clone(), events);
        exec.execute(job, entry(Arc::new(AlwaysFail))).await;

        let persisted = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(persisted.attempts, 1);
        assert!(persisted.is_terminal());
        assert_eq!(*failed_count.lock().unwrap(), 1);
        assert_eq!(*failure_count.lock().unwrap(), 0, "failure must not fire on the terminal attempt");
    }

    #[tokio::test]
    async fn terminal_failure_with_dlq_moves_job_and_leaves_live_set_empty() {
        let store = Arc::new(MemoryJobStore::new());
        let events = EventSink::new();
        let job = job_with(1, 1000);
        let id = job.id;
        store.add_job(job.clone()).await.unwrap();

        let exec = Executor::new(store.clone(), events);
        exec.execute(job, entry(Arc::new(AlwaysFail))).await;

        assert!(store.get_job(id).await.unwrap().is_none());
        let dead = store.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_treated_as_worker_failure() {
        let store = Arc::new(MemoryJobStore::new());
        let events = EventSink::new();
        let job = job_with(2, 10);
        let id = job.id;
        store.add_job(job.clone()).await.unwrap();

        let exec = Executor::new(store.clone(), events);
        let handle = tokio::spawn(async move {
            exec.execute(job, entry(Arc::new(NeverReturns))).await;
        });
        tokio::time::advance(Duration::from_millis(20)).await;
        handle.await.unwrap();

        let persisted = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(persisted.attempts, 1);
        assert_eq!(
            persisted.meta_data.get("lastError").and_then(|v| v.as_str()),
            Some("worker timed out after 10ms")
        );
    }
}
