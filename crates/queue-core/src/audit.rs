//! Debug-only lifecycle tracing. Not a metrics or reporting product — just
//! a trace-level log of `start → success|failure|failed → complete` so a
//! developer can see a job's path through the queue without instrumenting
//! their own worker.

use crate::events::{EventKind, EventSink, QueueEvent};

/// Wire trace-level logging onto every event kind an [`EventSink`] emits.
/// Call once after building a [`crate::Queue`], e.g.
/// `#[cfg(debug_assertions)] audit::install(queue.events());`
pub fn install(events: &EventSink) {
    for kind in [
        EventKind::Start,
        EventKind::Success,
        EventKind::Failure,
        EventKind::Failed,
    ] {
        events.on(kind, |event: &QueueEvent| match event {
            QueueEvent::Start(job) => {
                tracing::trace!(job_id = %job.id, job_name = %job.name, attempt = job.attempts, "audit: start")
            }
            QueueEvent::Success(job, _) => {
                tracing::trace!(job_id = %job.id, job_name = %job.name, "audit: success")
            }
            QueueEvent::Failure(job, err) => {
                tracing::trace!(job_id = %job.id, job_name = %job.name, attempt = job.attempts, %err, "audit: failure")
            }
            QueueEvent::Failed(job, err) => {
                tracing::trace!(job_id = %job.id, job_name = %job.name, %err, "audit: failed")
            }
        });
    }
}
