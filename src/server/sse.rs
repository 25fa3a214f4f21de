use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::AppState;
use crate::daemon::events::JobEvent;
use crate::models::JobId;

#[derive(Debug, Deserialize, Default)]
pub struct SseParams {
    pub job_id: Option<u64>,
}

/// Logs when the client goes away and the stream is dropped.
struct SseDropGuard;

impl Drop for SseDropGuard {
    fn drop(&mut self) {
        tracing::debug!("SSE client disconnected");
    }
}

fn event_name(event: &JobEvent) -> &'static str {
    match event {
        JobEvent::Submitted { .. } => "submitted",
        JobEvent::Progressed { .. } => "progressed",
        JobEvent::PhaseChanged { .. } => "phase_changed",
        JobEvent::Finished { .. } => "finished",
        JobEvent::Removed { .. } => "removed",
    }
}

/// GET /events[?job_id=N]
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SseParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("SSE client connected");

    let rx = state.coordinator.subscribe();
    let filter = params.job_id.map(JobId);
    let _drop_guard = SseDropGuard;

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let _ = &_drop_guard;
        match result {
            Ok(event) => {
                if filter.is_some_and(|id| event.job_id() != id) {
                    return None;
                }
                match serde_json::to_string(&event) {
                    Ok(data) => Some(Ok(Event::default().event(event_name(&event)).data(data))),
                    Err(_) => None,
                }
            }
            Err(_) => Some(Ok(
                Event::default().comment("lagged: some events were missed")
            )),
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{Phase, TerminationStatus};

    #[test]
    fn test_event_names_are_snake_case() {
        let now = Utc::now();
        assert_eq!(
            event_name(&JobEvent::PhaseChanged {
                job_id: JobId(1),
                from: Phase::Map,
                to: Phase::Reduce,
                timestamp: now,
            }),
            "phase_changed"
        );
        assert_eq!(
            event_name(&JobEvent::Finished {
                job_id: JobId(1),
                termination_status: TerminationStatus::Ok,
                error: None,
                timestamp: now,
            }),
            "finished"
        );
    }
}
