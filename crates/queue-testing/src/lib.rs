//! Adapter conformance suite and small worker/test doubles shared by
//! `queue-core` and `queue-postgres` test suites.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use queue_core::{EnqueueOptions, Job, JobStore, Worker, WorkerError};
use serde_json::Value;
use uuid::Uuid;

/// Runs the adapter contract against any [`JobStore`] implementation:
/// add/get round-trip, claim atomicity (exclusion of active and terminal
/// jobs, priority/created ordering), recover resetting ghosts, and —
/// when supported — dead-letter routing. Call this from each adapter
/// crate's own test suite against a freshly constructed, empty store.
pub async fn run_adapter_conformance_suite(store: Arc<dyn JobStore>) -> Result<()> {
    store.delete_all().await?;

    roundtrips(&store).await?;
    claim_excludes_active_and_terminal(&store).await?;
    claim_orders_by_priority_then_created(&store).await?;
    recover_clears_ghosts(&store).await?;

    store.delete_all().await?;
    Ok(())
}

async fn roundtrips(store: &Arc<dyn JobStore>) -> Result<()> {
    let job = Job::new("conformance", Value::Null, EnqueueOptions::default());
    let id = job.id;
    store.add_job(job.clone()).await?;
    let fetched = store
        .get_job(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("add_job then get_job returned nothing"))?;
    if fetched.name != job.name || fetched.id != job.id {
        bail!("round-tripped job does not match the input");
    }
    store.remove_job(id).await?;
    if store.get_job(id).await?.is_some() {
        bail!("remove_job did not delete the record");
    }
    Ok(())
}

async fn claim_excludes_active_and_terminal(store: &Arc<dyn JobStore>) -> Result<()> {
    store.delete_all().await?;

    let mut terminal = Job::new("conformance", Value::Null, EnqueueOptions::default());
    terminal.attempts = terminal.max_attempts;
    store.add_job(terminal).await?;

    let pending = Job::new("conformance", Value::Null, EnqueueOptions::default());
    let pending_id = pending.id;
    store.add_job(pending).await?;

    let claimed = store.claim_concurrent_jobs(10).await?;
    if claimed.len() != 1 || claimed[0].id != pending_id {
        bail!("claim_concurrent_jobs returned a terminal or unexpected job");
    }
    if !claimed[0].active {
        bail!("claimed job was not marked active");
    }

    let again = store.claim_concurrent_jobs(10).await?;
    if !again.is_empty() {
        bail!("a second claim returned an already-active job");
    }
    Ok(())
}

async fn claim_orders_by_priority_then_created(store: &Arc<dyn JobStore>) -> Result<()> {
    store.delete_all().await?;

    let low = Job::new("conformance", Value::Null, EnqueueOptions::default());
    let low_id = low.id;
    store.add_job(low).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let high = Job::new(
        "conformance",
        Value::Null,
        EnqueueOptions { priority: 10, ..Default::default() },
    );
    let high_id = high.id;
    store.add_job(high).await?;

    let claimed = store.claim_concurrent_jobs(10).await?;
    if claimed.first().map(|j| j.id) != Some(high_id) {
        bail!("higher priority job was not claimed first");
    }
    if claimed.get(1).map(|j| j.id) != Some(low_id) {
        bail!("lower priority job was not claimed second");
    }
    Ok(())
}

async fn recover_clears_ghosts(store: &Arc<dyn JobStore>) -> Result<()> {
    store.delete_all().await?;

    let mut ghost = Job::new("conformance", Value::Null, EnqueueOptions::default());
    ghost.active = true;
    let id = ghost.id;
    store.add_job(ghost).await?;

    store.recover().await?;
    let recovered = store
        .get_job(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("ghost job vanished during recover"))?;
    if recovered.active {
        bail!("recover() did not clear the ghost active flag");
    }
    Ok(())
}

/// A worker that records every call it receives and replays a scripted
/// sequence of outcomes, one per call, repeating the last outcome once the
/// script is exhausted.
pub struct ScriptedWorker {
    calls: Mutex<Vec<(Uuid, Value)>>,
    outcomes: Mutex<Vec<Result<Option<Value>, String>>>,
}

impl ScriptedWorker {
    pub fn new(outcomes: Vec<Result<Option<Value>, String>>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            outcomes: Mutex::new(outcomes),
        }
    }

    pub fn calls(&self) -> Vec<(Uuid, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn call(&self, id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
        self.calls.lock().unwrap().push((id, payload));
        let mut outcomes = self.outcomes.lock().unwrap();
        let outcome = if outcomes.len() > 1 {
            outcomes.remove(0)
        } else if let Some(last) = outcomes.last() {
            last.clone()
        } else {
            Ok(None)
        };
        outcome.map_err(WorkerError::Failed)
    }
}

/// A worker that always succeeds, echoing the payload back as the result.
pub fn echo_worker() -> Arc<dyn Worker> {
    struct Echo;
    #[async_trait]
    impl Worker for Echo {
        async fn call(&self, _id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
            Ok(Some(payload))
        }
    }
    Arc::new(Echo)
}

/// A worker that always fails with the given message.
pub fn failing_worker(message: impl Into<String> + Send + Sync + 'static) -> Arc<dyn Worker> {
    struct Fail<M>(M);
    #[async_trait]
    impl<M: Into<String> + Clone + Send + Sync + 'static> Worker for Fail<M> {
        async fn call(&self, _id: Uuid, _payload: Value) -> Result<Option<Value>, WorkerError> {
            Err(WorkerError::Failed(self.0.clone().into()))
        }
    }
    Arc::new(Fail(message.into()))
}
