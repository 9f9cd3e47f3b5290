//! SSE gateway: `GET /jobs/{id}`.
//!
//! A viewer first receives the job's buffered output, then live output until
//! the job's terminal event, after which the stream ends.
//!
//! | Event name | Data                                           |
//! |------------|------------------------------------------------|
//! | `message`  | `{"type": "stdout" \| "stderr", "message": …}` |
//! | `complete` | the stored result (artifact reference)         |
//! | `error`    | the stored failure or cancellation message     |

use std::collections::HashSet;
use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use sdjobs_core::types::JobId;
use sdjobs_events::{JobEvent, LogEntry};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /jobs/{id}
pub async fn stream_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before reading any state so nothing published from here on
    // can fall between the replay and the live feed.
    let mut rx = state.event_bus.subscribe();

    let job = state.engine.get(&job_id).await?;
    let history = state.log_buffer.get(&job_id).unwrap_or_default();
    let finished = JobEvent::terminal(&job.id, job.status, job.result.unwrap_or_default());

    tracing::debug!(
        job_id = %job_id,
        replay = history.len(),
        finished = finished.is_some(),
        viewers = state.event_bus.subscriber_count(),
        "SSE viewer connected"
    );

    let engine = state.engine.clone();
    let log_buffer = state.log_buffer.clone();

    let stream = async_stream::stream! {
        for entry in &history {
            yield Ok(message_event(entry));
        }
        // stdout and stderr are published from separate tasks, so live
        // sequence numbers can arrive slightly out of order.
        let replayed = history.len() as u64;
        let mut delivered = HashSet::new();

        if let Some(event) = finished {
            yield Ok(to_sse(&event));
        } else {
            loop {
                match rx.recv().await {
                    Ok(event) if event.job_id() != job_id => {}
                    Ok(JobEvent::Log(entry)) => {
                        if entry.seq >= replayed && delivered.insert(entry.seq) {
                            yield Ok(message_event(&entry));
                        }
                    }
                    Ok(event) => {
                        yield Ok(to_sse(&event));
                        break;
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(job_id = %job_id, skipped = n, "SSE viewer lagged, catching up from buffer");
                        for entry in log_buffer.get(&job_id).unwrap_or_default() {
                            if entry.seq >= replayed && delivered.insert(entry.seq) {
                                yield Ok(message_event(&entry));
                            }
                        }
                        // The terminal event may have been among the skipped ones.
                        match engine.get(&job_id).await {
                            Ok(job) => {
                                let result = job.result.unwrap_or_default();
                                if let Some(event) = JobEvent::terminal(&job_id, job.status, result) {
                                    yield Ok(to_sse(&event));
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(job_id = %job_id, error = %e, "Job vanished during SSE stream");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn message_event(entry: &LogEntry) -> Event {
    let data = json!({
        "type": entry.stream.as_str(),
        "message": entry.message,
    });
    Event::default().event("message").data(data.to_string())
}

fn to_sse(event: &JobEvent) -> Event {
    match event {
        JobEvent::Log(entry) => message_event(entry),
        JobEvent::Complete { result, .. } => Event::default().event("complete").data(result),
        JobEvent::Error { result, .. } => Event::default().event("error").data(result),
    }
}
