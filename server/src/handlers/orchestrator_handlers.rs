// server/src/handlers/orchestrator_handlers.rs
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, BoxStream, StreamExt};
use orchestrator_client::steps::FINAL_STEP_FN;
use orchestrator_client::wire::{
    CancelRequest, CancelResponse, InitResponse, StartPipelineRequest, StartPipelineResponse,
    StatusSnapshot, WireEvent,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::{detail, ApiError};
use crate::pipeline;
use crate::state::{AppState, Subscription};

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
pub struct JobQuery {
    #[serde(rename = "jobId", default)]
    pub job_id: String,
}

fn require_job_id(job_id: &str) -> Result<String, ApiError> {
    let job_id = job_id.trim();
    if job_id.is_empty() {
        tracing::warn!("request missing jobId");
        return Err(detail(StatusCode::BAD_REQUEST, "Job ID is required."));
    }
    Ok(job_id.to_string())
}

/// POST /api/orchestrator/init
pub async fn init_job(State(state): State<AppState>) -> Json<InitResponse> {
    let job_id = Uuid::new_v4().to_string();
    state.register(&job_id);
    tracing::info!(%job_id, "job initialized");
    Json(InitResponse { job_id })
}

/// POST /api/orchestrator/start-pipeline/{jobId}
pub async fn start_pipeline(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(payload): Json<StartPipelineRequest>,
) -> Result<Json<StartPipelineResponse>, ApiError> {
    let job_id = require_job_id(&job_id)?;
    tokio::spawn(pipeline::run_job(state, job_id.clone(), payload));

    Ok(Json(StartPipelineResponse {
        status: "started".to_string(),
        job_id,
    }))
}

/// POST /api/orchestrator/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let job_id = require_job_id(&payload.job_id)?;
    if state.mark_cancelled(&job_id) {
        tracing::info!(%job_id, "job marked as cancelled");
    } else {
        tracing::info!(%job_id, "cancel for unknown or finished job ignored");
    }

    Ok(Json(CancelResponse {
        status: "cancelled".to_string(),
        job_id,
    }))
}

/// GET /api/orchestrator/status?jobId=
pub async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    let job_id = require_job_id(&query.job_id)?;
    Ok(Json(state.status(&job_id)))
}

/// GET /api/orchestrator/events?jobId=
pub async fn job_events(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Response, ApiError> {
    let job_id = require_job_id(&query.job_id)?;
    if !state.options.sse_enabled {
        return Err(detail(StatusCode::SERVICE_UNAVAILABLE, "Event stream disabled."));
    }

    tracing::info!(%job_id, "event stream opened");
    let subscription = state.subscribe(&job_id);
    let sse = Sse::new(event_stream(job_id, subscription))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keep-alive"));

    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

fn to_sse(job_id: &str, event: &WireEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().data(data)),
        Err(e) => {
            tracing::error!(%job_id, error = %e, "could not encode event");
            None
        }
    }
}

/// Padding and a `ping` first, then job events until the terminal one.
/// A finished job replays its status table and closes.
fn event_stream(
    job_id: String,
    subscription: Subscription,
) -> BoxStream<'static, Result<Event, Infallible>> {
    let intro = stream::iter(vec![
        Ok(Event::default().comment(" ".repeat(2048))),
        Ok(Event::default().event("ping").data("connected")),
    ]);

    let rx = match subscription {
        Subscription::Live(rx) => rx,
        Subscription::Finished(snapshot) => {
            tracing::info!(%job_id, "job already finished, replaying final status");
            return intro.chain(stream::iter(replay(&job_id, snapshot))).boxed();
        }
    };

    let updates = stream::unfold((rx, job_id, false), |(mut rx, job_id, finished)| async move {
        if finished {
            tracing::info!(%job_id, "event stream closed after final event");
            return None;
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Some(sse) = to_sse(&job_id, &event) else {
                        continue;
                    };
                    let finished = event.is_terminal();
                    return Some((Ok(sse), (rx, job_id, finished)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%job_id, skipped, "event stream subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    intro.chain(updates).boxed()
}

fn replay(job_id: &str, snapshot: StatusSnapshot) -> Vec<Result<Event, Infallible>> {
    snapshot
        .steps
        .iter()
        .filter_map(|(function, status)| {
            let report_url = (function == FINAL_STEP_FN)
                .then(|| snapshot.report_url.clone())
                .flatten();
            to_sse(job_id, &WireEvent::step(function, status).with_report_url(report_url))
        })
        .map(Ok)
        .collect()
}
