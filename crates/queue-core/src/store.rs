//! The adapter contract, and the in-memory default adapter a `Queue` uses
//! when no other backing store is supplied.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;
use crate::job::Job;

/// A record moved to the dead-letter sink. Storage shape is adapter-defined
/// but MUST preserve these fields. `priority` and `created` are carried
/// too: they're the only durable copy left of a terminally-failed job, and
/// dropping them would be a regression rather than a simplification.
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub name: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub attempts: u32,
    pub created: DateTime<Utc>,
    pub failed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&Job> for DeadLetterRecord {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            payload: job.payload.clone(),
            priority: job.priority,
            attempts: job.attempts,
            created: job.created,
            failed: job.failed,
            last_error: job
                .meta_data
                .get("lastError")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }
    }
}

/// Durable CRUD plus the one semantically non-trivial operation: an atomic
/// claim. Implementations MUST provide every method below except `recover`
/// and `move_to_dlq`, which are capability probes the facade feature-detects
/// via their default (no-op / unsupported) bodies.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record. If the id already exists, replace it.
    async fn add_job(&self, job: Job) -> Result<(), StorageError>;

    /// Persist state for an existing id. No-op if absent.
    async fn update_job(&self, job: Job) -> Result<(), StorageError>;

    /// Delete by id.
    async fn remove_job(&self, id: Uuid) -> Result<(), StorageError>;

    /// Fetch one record, or `None` if absent.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError>;

    /// Enumerate all records. No ordering contract.
    async fn get_jobs(&self) -> Result<Vec<Job>, StorageError>;

    /// Wipe all records in the namespace.
    async fn delete_all(&self) -> Result<(), StorageError>;

    /// Atomically select up to `limit` eligible records (`active == false`,
    /// `attempts < max_attempts`), ordered by `priority` desc then `created`
    /// asc, mark them `active = true`, and return the now-active copies.
    /// The select-and-mark step MUST be serialized against concurrent
    /// claims so that no two callers ever receive the same id.
    async fn claim_concurrent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError>;

    /// Reset every `active == true` record to `active = false`. Called once
    /// at process start to clear ghosts left by a crash.
    /// Adapters that cannot persist ghosts (e.g. a process-local store with
    /// no prior instance) may accept the default no-op.
    async fn recover(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Move a terminal job to a dead-letter sink and remove it from the
    /// live set. Returns `false` when the adapter doesn't support a DLQ, in
    /// which case the executor leaves the record in place relying on
    /// `attempts == max_attempts` to keep it off the claim path.
    async fn move_to_dlq(&self, _job: &Job) -> Result<bool, StorageError> {
        Ok(false)
    }
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    dead_letters: Vec<DeadLetterRecord>,
}

/// Default process-local adapter: a single `tokio::sync::Mutex`-guarded
/// map. The mutex is the entire claim-atomicity story — within one process
/// it is sufficient as long as the process guarantees serial execution of
/// adapter calls.
pub struct MemoryJobStore {
    state: Arc<tokio::sync::Mutex<MemoryState>>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(MemoryState::default())),
        }
    }

    /// Read-only snapshot of jobs routed to the dead-letter sink, for tests
    /// and operators inspecting terminal failures.
    pub async fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.state.lock().await.dead_letters.clone()
    }
}

impl Clone for MemoryJobStore {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add_job(&self, job: Job) -> Result<(), StorageError> {
        self.state.lock().await.jobs.insert(job.id, job);
        Ok(())
    }

    async fn update_job(&self, job: Job) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.jobs.get_mut(&job.id) {
            *existing = job;
        }
        Ok(())
    }

    async fn remove_job(&self, id: Uuid) -> Result<(), StorageError> {
        self.state.lock().await.jobs.remove(&id);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn get_jobs(&self) -> Result<Vec<Job>, StorageError> {
        Ok(self.state.lock().await.jobs.values().cloned().collect())
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.jobs.clear();
        state.dead_letters.clear();
        Ok(())
    }

    async fn claim_concurrent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let mut state = self.state.lock().await;
        let mut candidates: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|j| !j.active && !j.is_terminal())
            .map(|j| j.id)
            .collect();

        candidates.sort_by(|a, b| {
            let ja = &state.jobs[a];
            let jb = &state.jobs[b];
            jb.priority
                .cmp(&ja.priority)
                .then_with(|| ja.created.cmp(&jb.created))
        });
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let job = state.jobs.get_mut(&id).expect("candidate id must exist");
            job.active = true;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn recover(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        for job in state.jobs.values_mut() {
            job.active = false;
        }
        Ok(())
    }

    async fn move_to_dlq(&self, job: &Job) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        state.jobs.remove(&job.id);
        state.dead_letters.push(job.into());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::EnqueueOptions;
    use serde_json::Value;

    fn job(priority: i32) -> Job {
        Job::new("t", Value::Null, EnqueueOptions { priority, ..Default::default() })
    }

    #[tokio::test]
    async fn add_then_get_roundtrips() {
        let store = MemoryJobStore::new();
        let j = job(0);
        let id = j.id;
        store.add_job(j.clone()).await.unwrap();
        let fetched = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, j.id);
        assert_eq!(fetched.name, j.name);
    }

    #[tokio::test]
    async fn claim_marks_active_and_excludes_terminal() {
        let store = MemoryJobStore::new();
        let mut terminal = job(0);
        terminal.attempts = terminal.max_attempts;
        store.add_job(terminal).await.unwrap();
        let pending = job(0);
        let pending_id = pending.id;
        store.add_job(pending).await.unwrap();

        let claimed = store.claim_concurrent_jobs(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, pending_id);
        assert!(claimed[0].active);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_created() {
        let store = MemoryJobStore::new();
        let low = job(0);
        let low_id = low.id;
        store.add_job(low).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let high = job(5);
        let high_id = high.id;
        store.add_job(high).await.unwrap();

        let claimed = store.claim_concurrent_jobs(10).await.unwrap();
        assert_eq!(claimed[0].id, high_id);
        assert_eq!(claimed[1].id, low_id);
    }

    #[tokio::test]
    async fn claim_never_returns_same_id_twice_concurrently() {
        let store = MemoryJobStore::new();
        for _ in 0..20 {
            store.add_job(job(0)).await.unwrap();
        }

        let a = store.clone();
        let b = store.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.claim_concurrent_jobs(15).await.unwrap() }),
            tokio::spawn(async move { b.claim_concurrent_jobs(15).await.unwrap() }),
        );
        let ra = ra.unwrap();
        let rb = rb.unwrap();
        let mut ids: Vec<Uuid> = ra.iter().chain(rb.iter()).map(|j| j.id).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total, "claim returned overlapping ids");
    }

    #[tokio::test]
    async fn recover_clears_ghost_active_flags() {
        let store = MemoryJobStore::new();
        let mut ghost = job(0);
        ghost.active = true;
        let id = ghost.id;
        store.add_job(ghost).await.unwrap();

        store.recover().await.unwrap();
        let recovered = store.get_job(id).await.unwrap().unwrap();
        assert!(!recovered.active);
    }

    #[tokio::test]
    async fn move_to_dlq_removes_from_live_set_and_preserves_fields() {
        let store = MemoryJobStore::new();
        let mut j = job(0);
        j.attempts = j.max_attempts;
        j.meta_data
            .insert("lastError".into(), Value::String("boom".into()));
        let id = j.id;
        store.add_job(j).await.unwrap();

        let moved = store.move_to_dlq(&store.get_job(id).await.unwrap().unwrap()).await.unwrap();
        assert!(moved);
        assert!(store.get_job(id).await.unwrap().is_none());
        let dead = store.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, id);
        assert_eq!(dead[0].last_error.as_deref(), Some("boom"));
    }
}
