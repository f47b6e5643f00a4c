//! Server-sent event streams.
//!
//! `GET /jobs/:job_id/stream` opens with a full snapshot of the job, then
//! carries its patches and closes after the terminal one.
//! `GET /queue/status/stream` carries every job's patches plus periodic
//! queue counters. A subscriber that falls behind the broadcast buffer gets
//! a fresh snapshot in place of the events it missed.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use vgen_models::{JobId, StreamEvent};
use vgen_worker::Scheduler;

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Updates the active-connection gauge when the stream is dropped.
struct ConnectionGuard(&'static str);

impl ConnectionGuard {
    fn open(endpoint: &'static str) -> Self {
        metrics::record_sse_connection(endpoint);
        Self(endpoint)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::record_sse_disconnect(self.0);
    }
}

fn to_sse(endpoint: &'static str, event: &StreamEvent) -> Option<Event> {
    match Event::default().event(event.event_name()).json_data(event) {
        Ok(sse) => {
            metrics::record_sse_event(endpoint, event.event_name());
            Some(sse)
        }
        Err(e) => {
            warn!(error = %e, "Failed to encode stream event");
            None
        }
    }
}

fn into_sse(endpoint: &'static str, events: BoxStream<'static, StreamEvent>) -> EventStream {
    let guard = ConnectionGuard::open(endpoint);
    events
        .filter_map(move |event| {
            let _guard = &guard;
            let sse = to_sse(endpoint, &event);
            async move { sse.map(Ok) }
        })
        .boxed()
}

struct JobFeed {
    rx: broadcast::Receiver<StreamEvent>,
    scheduler: Arc<Scheduler>,
    job_id: JobId,
}

impl JobFeed {
    /// Next patch, and whether the stream continues after it.
    async fn next(mut self) -> Option<(StreamEvent, Option<Self>)> {
        match self.rx.recv().await {
            Ok(event) => {
                let more = !event.is_terminal();
                Some((event, more.then_some(self)))
            }
            Err(RecvError::Lagged(skipped)) => {
                metrics::record_sse_lagged("job", skipped);
                debug!(job_id = %self.job_id, skipped, "Job stream lagged, resending snapshot");
                let job = self.scheduler.get(&self.job_id).await.ok()?;
                let more = !job.is_terminal();
                Some((StreamEvent::snapshot(&job), more.then_some(self)))
            }
            Err(RecvError::Closed) => None,
        }
    }
}

/// GET /jobs/:job_id/stream
pub async fn job_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<EventStream>> {
    let job_id = JobId::from(job_id);
    // Subscribe before reading so nothing falls between snapshot and feed
    let rx = state.scheduler.broadcaster().subscribe_job(&job_id);
    let job = state.scheduler.get(&job_id).await?;

    let feed = (!job.is_terminal()).then(|| JobFeed {
        rx,
        scheduler: state.scheduler.clone(),
        job_id: job_id.clone(),
    });
    let live = stream::unfold(feed, |feed| async move { feed?.next().await });
    let events = stream::once(async move { StreamEvent::snapshot(&job) })
        .chain(live)
        .boxed();

    debug!(job_id = %job_id, "Job stream opened");
    Ok(Sse::new(into_sse("job", events)).keep_alive(KeepAlive::new().interval(state.config.sse_keepalive)))
}

struct QueueFeed {
    rx: broadcast::Receiver<StreamEvent>,
    scheduler: Arc<Scheduler>,
}

impl QueueFeed {
    async fn next(mut self) -> Option<(StreamEvent, Self)> {
        match self.rx.recv().await {
            Ok(event) => Some((event, self)),
            Err(RecvError::Lagged(skipped)) => {
                metrics::record_sse_lagged("queue", skipped);
                let status = self.scheduler.queue_status().await.ok()?;
                Some((StreamEvent::queue_status(status), self))
            }
            Err(RecvError::Closed) => None,
        }
    }
}

/// GET /queue/status/stream
pub async fn queue_stream(State(state): State<AppState>) -> ApiResult<Sse<EventStream>> {
    let rx = state.scheduler.broadcaster().subscribe_global();
    let status = state.scheduler.queue_status().await?;

    let feed = QueueFeed {
        rx,
        scheduler: state.scheduler.clone(),
    };
    let live = stream::unfold(feed, |feed| feed.next());
    let events = stream::once(async move { StreamEvent::queue_status(status) })
        .chain(live)
        .boxed();

    Ok(Sse::new(into_sse("queue", events)).keep_alive(KeepAlive::new().interval(state.config.sse_keepalive)))
}
