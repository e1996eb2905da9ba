//! End-to-end scenarios exercised through the public `Queue` API only:
//! happy path, retry-to-success, terminal failure to the dead-letter sink,
//! TTL expiry, concurrency capping, pause/resume, ghost recovery, and
//! online gating.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use queue_core::{
    EnqueueOptions, EventKind, Job, JobStore, MemoryJobStore, Queue, QueueBuilder, QueueEvent,
    Worker, WorkerError, WorkerOptions, WatchNetworkMonitor,
};
use serde_json::{json, Value};
use uuid::Uuid;

fn record_events(queue: &Queue) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Start, EventKind::Success, EventKind::Failure, EventKind::Failed] {
        let l = log.clone();
        queue.on(kind, move |event: &QueueEvent| {
            let tag = match event {
                QueueEvent::Start(_) => "start",
                QueueEvent::Success(..) => "success",
                QueueEvent::Failure(..) => "failure",
                QueueEvent::Failed(..) => "failed",
            };
            l.lock().unwrap().push(tag.to_string());
        });
    }
    log
}

async fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

struct EchoWorker;
#[async_trait]
impl Worker for EchoWorker {
    async fn call(&self, _id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
        Ok(Some(payload))
    }
}

#[tokio::test]
async fn happy_path() {
    let queue = QueueBuilder::new().build();
    let log = record_events(&queue);
    queue.add_worker("echo", Arc::new(EchoWorker), WorkerOptions::default());

    let id = queue
        .enqueue("echo", json!({"msg": "hi"}), EnqueueOptions::default())
        .await
        .unwrap();

    assert!(wait_until(|| log.lock().unwrap().len() >= 2, Duration::from_secs(2)).await);
    assert_eq!(*log.lock().unwrap(), vec!["start", "success"]);
    assert!(queue.get_job(id).await.unwrap().is_none());
}

struct FailOnceThenSucceed {
    calls: AtomicUsize,
}
#[async_trait]
impl Worker for FailOnceThenSucceed {
    async fn call(&self, _id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(WorkerError::Failed("not yet".into()))
        } else {
            Ok(Some(payload))
        }
    }
}

#[tokio::test]
async fn retry_to_success() {
    let queue = QueueBuilder::new().build();
    let log = record_events(&queue);
    let last_success_attempts = Arc::new(Mutex::new(None));
    let lsa = last_success_attempts.clone();
    queue.on(EventKind::Success, move |event| {
        if let QueueEvent::Success(job, _) = event {
            *lsa.lock().unwrap() = Some(job.attempts);
        }
    });

    queue.add_worker(
        "flaky",
        Arc::new(FailOnceThenSucceed { calls: AtomicUsize::new(0) }),
        WorkerOptions::default(),
    );

    let id = queue
        .enqueue(
            "flaky",
            Value::Null,
            EnqueueOptions { attempts: Some(3), time_interval_ms: 10, ..Default::default() },
        )
        .await
        .unwrap();

    assert!(wait_until(|| log.lock().unwrap().len() >= 4, Duration::from_secs(2)).await);
    assert_eq!(*log.lock().unwrap(), vec!["start", "failure", "start", "success"]);
    assert_eq!(*last_success_attempts.lock().unwrap(), Some(1));
    assert!(queue.get_job(id).await.unwrap().is_none());
}

struct AlwaysFails;
#[async_trait]
impl Worker for AlwaysFails {
    async fn call(&self, _id: Uuid, _payload: Value) -> Result<Option<Value>, WorkerError> {
        Err(WorkerError::Failed("boom".into()))
    }
}

#[tokio::test]
async fn terminal_failure_routes_to_dead_letter() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = QueueBuilder::new().with_adapter(store.clone()).build();
    let log = record_events(&queue);
    queue.add_worker("doomed", Arc::new(AlwaysFails), WorkerOptions::default());

    let id = queue
        .enqueue(
            "doomed",
            Value::Null,
            EnqueueOptions { attempts: Some(2), time_interval_ms: 0, ..Default::default() },
        )
        .await
        .unwrap();

    assert!(wait_until(|| log.lock().unwrap().len() >= 4, Duration::from_secs(2)).await);
    assert_eq!(*log.lock().unwrap(), vec!["start", "failure", "start", "failed"]);

    let dead = store.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, id);
    assert!(store.get_job(id).await.unwrap().is_none());
}

#[tokio::test]
async fn ttl_expiry_skips_the_worker_entirely() {
    let queue = QueueBuilder::new().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    queue.add_worker(
        "should-not-run",
        Arc::new(FnCounter { calls: c }),
        WorkerOptions::default(),
    );

    let id = queue
        .enqueue(
            "should-not-run",
            Value::Null,
            EnqueueOptions { ttl_ms: 50, auto_start: false, ..Default::default() },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.start().await;

    // Give the processor a tick to observe and discard the expired job.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(queue.get_job(id).await.unwrap().is_none());
}

struct FnCounter {
    calls: Arc<AtomicUsize>,
}
#[async_trait]
impl Worker for FnCounter {
    async fn call(&self, _id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(payload))
    }
}

struct SleepyWorker {
    sleep_ms: u64,
    in_flight: Arc<AtomicUsize>,
    max_observed: Arc<AtomicUsize>,
}
#[async_trait]
impl Worker for SleepyWorker {
    async fn call(&self, _id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(payload))
    }
}

#[tokio::test]
async fn concurrency_cap_bounds_in_flight_execution() {
    let queue = QueueBuilder::new().with_concurrency(2).build();
    let log = record_events(&queue);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_observed = Arc::new(AtomicUsize::new(0));
    queue.add_worker(
        "sleepy",
        Arc::new(SleepyWorker { sleep_ms: 50, in_flight: in_flight.clone(), max_observed: max_observed.clone() }),
        WorkerOptions::default(),
    );

    let started = tokio::time::Instant::now();
    for _ in 0..3 {
        queue.enqueue("sleepy", Value::Null, EnqueueOptions::default()).await.unwrap();
    }

    let success_count = || log.lock().unwrap().iter().filter(|e| *e == "success").count();
    assert!(wait_until(|| success_count() == 3, Duration::from_secs(5)).await);
    let elapsed = started.elapsed();

    assert!(max_observed.load(Ordering::SeqCst) <= 2);
    assert!(elapsed >= Duration::from_millis(95), "elapsed was {:?}", elapsed);
}

#[tokio::test]
async fn pause_then_resume_restores_eligibility() {
    let queue = QueueBuilder::new().build();
    let log = record_events(&queue);
    queue.add_worker("x", Arc::new(EchoWorker), WorkerOptions::default());

    queue.pause_job("x");
    queue.enqueue("x", Value::Null, EnqueueOptions::default()).await.unwrap();
    queue.enqueue("x", Value::Null, EnqueueOptions::default()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(log.lock().unwrap().iter().filter(|e| *e == "start").count(), 0);

    queue.resume_job("x");
    let success_count = || log.lock().unwrap().iter().filter(|e| *e == "success").count();
    assert!(wait_until(|| success_count() == 2, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn ghost_active_job_is_recovered_and_runs_once() {
    let store = Arc::new(MemoryJobStore::new());
    let mut ghost = Job::new("echo", Value::Null, EnqueueOptions::default());
    ghost.active = true;
    let id = ghost.id;
    store.add_job(ghost).await.unwrap();

    let queue = QueueBuilder::new().with_adapter(store.clone()).build();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    queue.add_worker("echo", Arc::new(FnCounter { calls: c }), WorkerOptions::default());

    queue.start().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if store.get_job(id).await.unwrap().is_none() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "ghost job was never claimed and completed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn online_gating_blocks_until_connected() {
    let monitor = Arc::new(WatchNetworkMonitor::new(false));
    let queue = QueueBuilder::new().with_network_monitor(monitor.clone()).build();
    let log = record_events(&queue);
    queue.add_worker("needs-network", Arc::new(EchoWorker), WorkerOptions::default());

    queue
        .enqueue(
            "needs-network",
            Value::Null,
            EnqueueOptions { online_only: true, ..Default::default() },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(log.lock().unwrap().iter().filter(|e| *e == "start").count(), 0);

    monitor.set_connected(true);
    let success_count = || log.lock().unwrap().iter().filter(|e| *e == "success").count();
    assert!(wait_until(|| success_count() == 1, Duration::from_secs(2)).await);
}
