//! PostgreSQL-backed [`JobStore`](queue_core::JobStore) for `queue-core`.
//!
//! This is the one concrete adapter for environments where the queue lives
//! outside a single mobile/edge process — a backend worker fleet, for
//! example — and needs the durability and claim-atomicity the core
//! contract requires without inventing its own storage layer.
//!
//! # Claim atomicity
//!
//! `claim_concurrent_jobs` is a single statement: a `FOR UPDATE SKIP LOCKED`
//! CTE selects the eligible rows, and the enclosing `UPDATE` marks them
//! active and returns the new state. Two pool connections racing the same
//! call each lock a disjoint row set; neither blocks on the other and
//! neither can observe a row the other already claimed.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE queue_jobs (
//!     id              UUID PRIMARY KEY,
//!     name            TEXT NOT NULL,
//!     payload         JSONB NOT NULL,
//!     meta_data       JSONB NOT NULL DEFAULT '{}',
//!     priority        INTEGER NOT NULL DEFAULT 0,
//!     attempts        INTEGER NOT NULL DEFAULT 0,
//!     max_attempts    INTEGER NOT NULL DEFAULT 1,
//!     time_interval_ms BIGINT NOT NULL DEFAULT 0,
//!     ttl_ms          BIGINT NOT NULL DEFAULT 0,
//!     online_only     BOOLEAN NOT NULL DEFAULT FALSE,
//!     active          BOOLEAN NOT NULL DEFAULT FALSE,
//!     timeout_ms      BIGINT NOT NULL DEFAULT 25000,
//!     created         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     failed          TIMESTAMPTZ,
//!     worker_name     TEXT
//! );
//!
//! CREATE INDEX idx_queue_jobs_claimable ON queue_jobs (priority DESC, created ASC)
//!     WHERE active = FALSE;
//!
//! CREATE TABLE queue_dead_letters (
//!     id          UUID PRIMARY KEY,
//!     name        TEXT NOT NULL,
//!     payload     JSONB NOT NULL,
//!     priority    INTEGER NOT NULL,
//!     attempts    INTEGER NOT NULL,
//!     created     TIMESTAMPTZ NOT NULL,
//!     failed      TIMESTAMPTZ,
//!     last_error  TEXT,
//!     routed_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use queue_postgres::PgJobStore;
//! use queue_core::QueueBuilder;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/mydb").await?;
//! let store = std::sync::Arc::new(PgJobStore::new(pool));
//! let queue = QueueBuilder::new().with_adapter(store).build();
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use queue_core::{DeadLetterRecord, Job, JobStore, StorageError};
use sqlx::{PgPool, Row};
use uuid::Uuid;

fn storage_err(context: &str, err: sqlx::Error) -> StorageError {
    StorageError::new(format!("{context}: {err}"))
}

/// PostgreSQL-backed adapter over the `queue_jobs` / `queue_dead_letters`
/// tables described in the module docs.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, StorageError> {
        let meta_data: serde_json::Value = row.try_get("meta_data").map_err(|e| storage_err("decode meta_data", e))?;
        let meta_data = match meta_data {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(Job {
            id: row.try_get("id").map_err(|e| storage_err("decode id", e))?,
            name: row.try_get("name").map_err(|e| storage_err("decode name", e))?,
            payload: row.try_get("payload").map_err(|e| storage_err("decode payload", e))?,
            meta_data,
            priority: row.try_get("priority").map_err(|e| storage_err("decode priority", e))?,
            attempts: {
                let v: i32 = row.try_get("attempts").map_err(|e| storage_err("decode attempts", e))?;
                v as u32
            },
            max_attempts: {
                let v: i32 = row.try_get("max_attempts").map_err(|e| storage_err("decode max_attempts", e))?;
                v as u32
            },
            time_interval_ms: {
                let v: i64 = row.try_get("time_interval_ms").map_err(|e| storage_err("decode time_interval_ms", e))?;
                v as u64
            },
            ttl_ms: {
                let v: i64 = row.try_get("ttl_ms").map_err(|e| storage_err("decode ttl_ms", e))?;
                v as u64
            },
            online_only: row.try_get("online_only").map_err(|e| storage_err("decode online_only", e))?,
            active: row.try_get("active").map_err(|e| storage_err("decode active", e))?,
            timeout_ms: {
                let v: i64 = row.try_get("timeout_ms").map_err(|e| storage_err("decode timeout_ms", e))?;
                v as u64
            },
            created: row.try_get("created").map_err(|e| storage_err("decode created", e))?,
            failed: row.try_get("failed").map_err(|e| storage_err("decode failed", e))?,
            worker_name: row.try_get("worker_name").map_err(|e| storage_err("decode worker_name", e))?,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn add_job(&self, job: Job) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO queue_jobs
                (id, name, payload, meta_data, priority, attempts, max_attempts,
                 time_interval_ms, ttl_ms, online_only, active, timeout_ms, created, failed, worker_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                payload = EXCLUDED.payload,
                meta_data = EXCLUDED.meta_data,
                priority = EXCLUDED.priority,
                attempts = EXCLUDED.attempts,
                max_attempts = EXCLUDED.max_attempts,
                time_interval_ms = EXCLUDED.time_interval_ms,
                ttl_ms = EXCLUDED.ttl_ms,
                online_only = EXCLUDED.online_only,
                active = EXCLUDED.active,
                timeout_ms = EXCLUDED.timeout_ms,
                created = EXCLUDED.created,
                failed = EXCLUDED.failed,
                worker_name = EXCLUDED.worker_name
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.payload)
        .bind(serde_json::Value::Object(job.meta_data.clone()))
        .bind(job.priority)
        .bind(job.attempts as i32)
        .bind(job.max_attempts as i32)
        .bind(job.time_interval_ms as i64)
        .bind(job.ttl_ms as i64)
        .bind(job.online_only)
        .bind(job.active)
        .bind(job.timeout_ms as i64)
        .bind(job.created)
        .bind(job.failed)
        .bind(&job.worker_name)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("add_job", e))?;
        Ok(())
    }

    async fn update_job(&self, job: Job) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE queue_jobs SET
                name = $2, payload = $3, meta_data = $4, priority = $5, attempts = $6,
                max_attempts = $7, time_interval_ms = $8, ttl_ms = $9, online_only = $10,
                active = $11, timeout_ms = $12, created = $13, failed = $14, worker_name = $15
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.payload)
        .bind(serde_json::Value::Object(job.meta_data.clone()))
        .bind(job.priority)
        .bind(job.attempts as i32)
        .bind(job.max_attempts as i32)
        .bind(job.time_interval_ms as i64)
        .bind(job.ttl_ms as i64)
        .bind(job.online_only)
        .bind(job.active)
        .bind(job.timeout_ms as i64)
        .bind(job.created)
        .bind(job.failed)
        .bind(&job.worker_name)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("update_job", e))?;
        Ok(())
    }

    async fn remove_job(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("remove_job", e))?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError> {
        let row = sqlx::query("SELECT * FROM queue_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("get_job", e))?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn get_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query("SELECT * FROM queue_jobs")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("get_jobs", e))?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(|e| storage_err("delete_all begin", e))?;
        sqlx::query("DELETE FROM queue_jobs")
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("delete_all jobs", e))?;
        sqlx::query("DELETE FROM queue_dead_letters")
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("delete_all dead letters", e))?;
        tx.commit().await.map_err(|e| storage_err("delete_all commit", e))?;
        Ok(())
    }

    async fn claim_concurrent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM queue_jobs
                WHERE active = FALSE AND attempts < max_attempts
                ORDER BY priority DESC, created ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_jobs
            SET active = TRUE
            WHERE id IN (SELECT id FROM claimable)
            RETURNING *
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("claim_concurrent_jobs", e))?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn recover(&self) -> Result<(), StorageError> {
        sqlx::query("UPDATE queue_jobs SET active = FALSE WHERE active = TRUE")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("recover", e))?;
        Ok(())
    }

    async fn move_to_dlq(&self, job: &Job) -> Result<bool, StorageError> {
        let record: DeadLetterRecord = job.into();
        let mut tx = self.pool.begin().await.map_err(|e| storage_err("move_to_dlq begin", e))?;
        sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
            .bind(job.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("move_to_dlq delete", e))?;
        sqlx::query(
            r#"
            INSERT INTO queue_dead_letters (id, name, payload, priority, attempts, created, failed, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.payload)
        .bind(record.priority)
        .bind(record.attempts as i32)
        .bind(record.created)
        .bind(record.failed)
        .bind(&record.last_error)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("move_to_dlq insert", e))?;
        tx.commit().await.map_err(|e| storage_err("move_to_dlq commit", e))?;
        Ok(true)
    }
}

/// Maintenance operations with no counterpart on the [`JobStore`] trait:
/// periodic housekeeping a deployment runs out-of-band from the processor
/// loop.
impl PgJobStore {
    /// Force-clears `active` rows that have been claimed for longer than
    /// `stale_after`, for the multi-process deployments where a crashed
    /// worker's `recover()` never runs because no new process ever starts
    /// against that instance. A single-process deployment does not need
    /// this; `Queue::start()` already calls `recover()` once at boot.
    pub async fn reclaim_stale_claims(&self, stale_after: Duration) -> Result<u64, StorageError> {
        let threshold = Utc::now() - stale_after;
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET active = FALSE
            WHERE active = TRUE AND created < $1 AND (failed IS NULL OR failed < $1)
            "#,
        )
        .bind(threshold)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("reclaim_stale_claims", e))?;
        Ok(result.rows_affected())
    }

    /// Deletes dead-letter records older than `older_than`, so the sink
    /// doesn't grow without bound in long-lived deployments.
    pub async fn purge_dead_letters_older_than(&self, older_than: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM queue_dead_letters WHERE routed_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("purge_dead_letters_older_than", e))?;
        Ok(result.rows_affected())
    }

    /// A cheap snapshot of queue health for dashboards and alerts.
    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE active = FALSE AND attempts < max_attempts) AS pending,
                COUNT(*) FILTER (WHERE active = TRUE) AS active,
                COUNT(*) FILTER (WHERE attempts >= max_attempts) AS terminal
            FROM queue_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_err("stats", e))?;
        let dead_letters: i64 = sqlx::query("SELECT COUNT(*) AS n FROM queue_dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_err("stats dead letters", e))?
            .try_get("n")
            .map_err(|e| storage_err("stats decode dead letters", e))?;

        Ok(QueueStats {
            pending: row.try_get::<i64, _>("pending").map_err(|e| storage_err("stats decode pending", e))?,
            active: row.try_get::<i64, _>("active").map_err(|e| storage_err("stats decode active", e))?,
            terminal: row.try_get::<i64, _>("terminal").map_err(|e| storage_err("stats decode terminal", e))?,
            dead_letters,
        })
    }
}

/// Snapshot counters returned by [`PgJobStore::stats`].
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub pending: i64,
    pub active: i64,
    pub terminal: i64,
    pub dead_letters: i64,
}

/// Convenience constructor for wiring a `PgJobStore` straight into a
/// [`queue_core::QueueBuilder`] as a trait object.
pub fn adapter(pool: PgPool) -> Arc<dyn JobStore> {
    Arc::new(PgJobStore::new(pool))
}
