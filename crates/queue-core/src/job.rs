//! The job record, its factory defaults, and the pure helpers the processor
//! uses for TTL and backoff decisions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default time-to-live: 7 days.
pub const DEFAULT_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;
/// Default per-run worker time budget.
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;

/// A durable work item. Immutable apart from the small mutable state block
/// (`attempts`, `active`, `failed`, `meta_data`) the core mutates as the job
/// moves through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub payload: Value,
    pub meta_data: Map<String, Value>,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub time_interval_ms: u64,
    pub ttl_ms: u64,
    pub online_only: bool,
    pub active: bool,
    pub timeout_ms: u64,
    pub created: DateTime<Utc>,
    pub failed: Option<DateTime<Utc>>,
    pub worker_name: Option<String>,
}

/// Producer-supplied enqueue options. Every field has a sensible default;
/// `attempts` wins over `retries` when both are set.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: i32,
    pub attempts: Option<u32>,
    pub retries: Option<u32>,
    pub time_interval_ms: u64,
    pub ttl_ms: u64,
    pub online_only: bool,
    pub timeout_ms: u64,
    pub meta_data: Map<String, Value>,
    pub auto_start: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            attempts: None,
            retries: None,
            time_interval_ms: 0,
            ttl_ms: DEFAULT_TTL_MS,
            online_only: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            meta_data: Map::new(),
            auto_start: true,
        }
    }
}

impl EnqueueOptions {
    fn resolved_max_attempts(&self) -> u32 {
        self.attempts
            .or_else(|| self.retries.map(|r| r.saturating_add(1)))
            .unwrap_or(1)
            .max(1)
    }
}

impl Job {
    /// Build a new job at creation time: `attempts = 0`, `active = false`,
    /// `failed = None` (invariant 1 and 2 hold trivially at rest).
    pub fn new(name: impl Into<String>, payload: Value, options: EnqueueOptions) -> Self {
        let name = name.into();
        let max_attempts = options.resolved_max_attempts();
        Self {
            id: Uuid::new_v4(),
            worker_name: Some(name.clone()),
            name,
            payload,
            meta_data: options.meta_data,
            priority: options.priority,
            attempts: 0,
            max_attempts,
            time_interval_ms: options.time_interval_ms,
            ttl_ms: options.ttl_ms,
            online_only: options.online_only,
            active: false,
            timeout_ms: options.timeout_ms,
            created: Utc::now(),
            failed: None,
        }
    }

    /// A job at `attempts == max_attempts` is terminal and must never be
    /// returned by `claim_concurrent_jobs` (invariant 1).
    pub fn is_terminal(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// `ttl_ms == 0` means "never expire".
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.ttl_ms == 0 {
            return false;
        }
        let age = now.signed_duration_since(self.created);
        age.num_milliseconds() > self.ttl_ms as i64
    }

    /// `timeInterval * 2^attempts + Uniform(0, timeInterval)`. Zero
    /// `time_interval_ms` collapses to zero delay (and no jitter spread).
    pub fn backoff_delay(&self) -> Duration {
        let base = self
            .time_interval_ms
            .saturating_mul(1u64 << self.attempts.min(63));
        let jitter = if self.time_interval_ms == 0 {
            0
        } else {
            fastrand::u64(0..=self.time_interval_ms)
        };
        Duration::from_millis(base.saturating_add(jitter))
    }

    /// Returns `Some(remaining)` if the job should still be held back by
    /// backoff, `None` if it is clear to run.
    pub fn backoff_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let failed_at = self.failed?;
        if self.is_terminal() {
            return None;
        }
        let delay = self.backoff_delay();
        let elapsed = now.signed_duration_since(failed_at);
        let elapsed_ms = elapsed.num_milliseconds().max(0) as u64;
        let delay_ms = delay.as_millis() as u64;
        if elapsed_ms < delay_ms {
            Some(Duration::from_millis(delay_ms - elapsed_ms))
        } else {
            None
        }
    }

    /// Failure transition: increments `attempts`,
    /// clears `active`, stamps `failed`, records `lastError`. Returns
    /// `true` when this attempt made the job terminal.
    pub fn record_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> bool {
        self.attempts += 1;
        self.active = false;
        self.failed = Some(now);
        self.meta_data
            .insert("lastError".to_string(), Value::String(message.into()));
        self.is_terminal()
    }

    /// Start-of-attempt transition: mark active,
    /// clear the prior failure stamp.
    pub fn mark_active(&mut self) {
        self.active = true;
        self.failed = None;
    }
}
