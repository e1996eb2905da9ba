//! Summarizes a block of text via the Anthropic API as a single queued job,
//! using `online_only` so the job sits pending instead of burning an attempt
//! while the network monitor reports offline.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use queue_core::{EnqueueOptions, EventKind, Queue, QueueEvent, Worker, WorkerError, WorkerOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

struct SummarizeWorker {
    client: reqwest::Client,
    api_key: String,
}

#[async_trait]
impl Worker for SummarizeWorker {
    async fn call(&self, _id: Uuid, payload: Value) -> Result<Option<Value>, WorkerError> {
        let text = payload
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkerError::Failed("payload missing \"text\"".into()))?;

        let request = AnthropicRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1024,
            messages: vec![Message {
                role: "user".to_string(),
                content: format!("Summarize this text in 2-3 sentences:\n\n{text}"),
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Failed(format!("API error {status}: {body}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::Failed(e.to_string()))?;

        let summary = parsed
            .content
            .first()
            .and_then(|c| c.text.clone())
            .unwrap_or_default();

        Ok(Some(json!({
            "summary": summary,
            "tokens_used": parsed.usage.input_tokens + parsed.usage.output_tokens,
        })))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let api_key =
        env::var("ANTHROPIC_API_KEY").expect("ANTHROPIC_API_KEY environment variable required");

    let queue = Queue::new();
    queue.add_worker(
        "summarize",
        Arc::new(SummarizeWorker { client: reqwest::Client::new(), api_key }),
        WorkerOptions::default(),
    );

    queue.on(EventKind::Success, |event| {
        if let QueueEvent::Success(_, Some(result)) = event {
            println!("summary: {}", result["summary"].as_str().unwrap_or(""));
        }
    });
    queue.on(EventKind::Failed, |event| {
        if let QueueEvent::Failed(_, err) = event {
            println!("summarization gave up: {err}");
        }
    });

    let text = "Rust is a multi-paradigm, general-purpose programming language that \
        emphasizes performance, type safety, and concurrency. It enforces memory \
        safety without a garbage collector by tracking the lifetime of every \
        reference at compile time through its borrow checker.";

    queue
        .enqueue(
            "summarize",
            json!({ "text": text }),
            EnqueueOptions { online_only: true, retries: Some(2), ..Default::default() },
        )
        .await?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    queue.stop().await;
    Ok(())
}
