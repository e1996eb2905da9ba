//! Fetches a handful of URLs as queued jobs instead of firing them off
//! directly, so a flaky endpoint gets the queue's retry and backoff for
//! free. Run with `RUST_LOG=queue_core=debug` to see the audit trail.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use queue_core::{EnqueueOptions, EventKind, Queue, QueueEvent, Worker, WorkerError, WorkerOptions};
use serde_json::{json, Value};
use uuid::Uuid;

struct FetchWorker {
    client: reqwest::Client,
}

#[async_trait]
impl Worker for FetchWorker {
    async fn call(&self, _id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
        let url = payload
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkerError::Failed("payload missing \"url\"".into()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WorkerError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::Failed(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WorkerError::Failed(e.to_string()))?;

        Ok(Some(json!({ "status": status.as_u16(), "bytes": body.len() })))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let queue = Queue::builder().with_concurrency(3).build();
    queue.add_worker("fetch", Arc::new(FetchWorker { client }), WorkerOptions::default());

    for kind in [EventKind::Success, EventKind::Failure, EventKind::Failed] {
        queue.on(kind, |event: &QueueEvent| match event {
            QueueEvent::Success(job, _) => println!("ok: {} ({})", job.payload, job.id),
            QueueEvent::Failure(job, err) => println!("retrying {}: {}", job.payload, err),
            QueueEvent::Failed(job, err) => println!("gave up on {}: {}", job.payload, err),
            QueueEvent::Start(_) => {}
        });
    }

    let urls = [
        "https://example.com",
        "https://httpbin.org/status/200",
        "https://httpbin.org/status/500",
    ];

    for url in urls {
        queue
            .enqueue(
                "fetch",
                json!({ "url": url }),
                EnqueueOptions {
                    retries: Some(2),
                    time_interval_ms: 200,
                    ..Default::default()
                },
            )
            .await?;
    }

    // Give the queue a moment to drain before the process exits; a long-lived
    // host would just keep `queue` alive instead.
    tokio::time::sleep(Duration::from_secs(3)).await;
    queue.stop().await;
    Ok(())
}
