use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::job::{CancelOnDrop, Job, Priority};
use crate::node_pool::NodePool;
use crate::queue::PrioQueue;

// Profiling headers attached to successful responses. HTTP header names are
// case-insensitive; these are the canonical X-PrioLB-* names.
const HEADER_QUEUE_DURATION_US: &str = "x-priolb-queuedurationus";
const HEADER_SIM_DURATION_US: &str = "x-priolb-simdurationus";
const HEADER_TOTAL_DURATION_US: &str = "x-priolb-totaldurationus";
const HEADER_QUEUE_SIZE_START: &str = "x-priolb-queuesizestart";
const HEADER_QUEUE_SIZE_END: &str = "x-priolb-queuesizeend";

/// Shared state of all frontend handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<PrioQueue>,
    pub pool: Arc<NodePool>,
    pub config: Arc<Config>,
}

/// Builds the frontend router: job admission, node management, liveness.
/// Panicking handlers are reported as 500, requests are trace-logged.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root).post(handle_job))
        .route("/sim", post(handle_job))
        .route(
            "/nodes",
            get(handle_list_nodes)
                .post(handle_add_node)
                .delete(handle_remove_node),
        )
        // The payload cap is enforced by the job handler so oversized
        // bodies get the documented 400, not a generic 413.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn handle_root() -> &'static str {
    "priolb\n"
}

/// Admits a job, waits for its result and writes the client response.
/// Retriable errors are re-queued up to the configured number of tries.
async fn handle_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > state.config.payload_max_bytes {
        return (StatusCode::BAD_REQUEST, "payload too large").into_response();
    }

    let priority = priority_from_headers(&headers);
    let id = header_string(&headers, "x-request-id")
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let target_path = header_string(&headers, "x-target-path");

    let (job, mut result_rx) = Job::new(id, priority, body, target_path);
    if !state.queue.push(job.clone()).await {
        error!("couldn't add request, queue is full");
        return (StatusCode::INTERNAL_SERVER_ERROR, "queue full").into_response();
    }

    let (fast_track, high_prio, low_prio) = state.queue.len().await;
    let queue_size_start = fast_track + high_prio + low_prio;
    info!(
        id = %job.id,
        priority = ?job.priority,
        fast_track,
        high_prio,
        low_prio,
        "request added to queue",
    );

    // If the client disconnects, this handler future is dropped and the
    // guard marks the job so dispatcher and workers discard it.
    let guard = CancelOnDrop::arm(job.clone());

    loop {
        let Some(result) = result_rx.recv().await else {
            // Unreachable while `job` holds the sending half; kept so a
            // logic error shows up as a 500 instead of a hang.
            return (StatusCode::INTERNAL_SERVER_ERROR, "response channel closed")
                .into_response();
        };

        if let Some(job_error) = &result.error {
            info!(
                id = %job.id,
                err = %job_error,
                tries = job.tries(),
                should_retry = result.should_retry,
                "job attempt failed",
            );

            if result.should_retry && job.tries() < state.config.request_max_tries {
                if state.queue.push(job.clone()).await {
                    continue;
                }
                error!(id = %job.id, "couldn't re-queue request for retry");
            }

            guard.disarm();
            let status = promote_status(result.status_code, StatusCode::INTERNAL_SERVER_ERROR);
            if !result.payload.is_empty() {
                return (status, result.payload).into_response();
            }
            return (status, job_error.to_string()).into_response();
        }

        guard.disarm();
        let status = promote_status(result.status_code, StatusCode::OK);

        let total = job.age();
        let queue_duration = total.saturating_sub(result.sim_duration);
        let (fast_track, high_prio, low_prio) = state.queue.len().await;
        let queue_size_end = fast_track + high_prio + low_prio;

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response_headers.insert(
            HEADER_QUEUE_DURATION_US,
            HeaderValue::from(queue_duration.as_micros() as u64),
        );
        response_headers.insert(
            HEADER_SIM_DURATION_US,
            HeaderValue::from(result.sim_duration.as_micros() as u64),
        );
        response_headers.insert(
            HEADER_TOTAL_DURATION_US,
            HeaderValue::from(total.as_micros() as u64),
        );
        response_headers.insert(
            HEADER_QUEUE_SIZE_START,
            HeaderValue::from(queue_size_start as u64),
        );
        response_headers.insert(
            HEADER_QUEUE_SIZE_END,
            HeaderValue::from(queue_size_end as u64),
        );

        return (status, response_headers, result.payload).into_response();
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeUriPayload {
    pub uri: String,
}

async fn handle_list_nodes(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.pool.node_uris().await)
}

async fn handle_add_node(
    State(state): State<AppState>,
    Json(payload): Json<NodeUriPayload>,
) -> Response {
    match state.pool.add_node(&payload.uri).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn handle_remove_node(
    State(state): State<AppState>,
    Json(payload): Json<NodeUriPayload>,
) -> Response {
    if state.pool.remove_node(&payload.uri).await {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::BAD_REQUEST, "node not found").into_response()
    }
}

/// Class derivation: `X-Fast-Track: true` wins, then `X-High-Priority: true`
/// (or the legacy `high_prio: true`), everything else is low-prio.
fn priority_from_headers(headers: &HeaderMap) -> Priority {
    if header_is_true(headers, "x-fast-track") {
        Priority::FastTrack
    } else if header_is_true(headers, "x-high-priority") || header_is_true(headers, "high_prio") {
        Priority::High
    } else {
        Priority::Low
    }
}

fn header_is_true(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == "true")
        .unwrap_or(false)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

fn promote_status(code: u16, unset: StatusCode) -> StatusCode {
    if code == 0 {
        return unset;
    }
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_priority_from_headers() {
        assert_eq!(priority_from_headers(&headers(&[])), Priority::Low);
        assert_eq!(
            priority_from_headers(&headers(&[("x-fast-track", "true")])),
            Priority::FastTrack
        );
        assert_eq!(
            priority_from_headers(&headers(&[("x-high-priority", "true")])),
            Priority::High
        );
        assert_eq!(
            priority_from_headers(&headers(&[("high_prio", "true")])),
            Priority::High
        );
        // Fast-track wins over high-prio.
        assert_eq!(
            priority_from_headers(&headers(&[
                ("x-fast-track", "true"),
                ("x-high-priority", "true")
            ])),
            Priority::FastTrack
        );
        // Anything but the literal "true" is ignored.
        assert_eq!(
            priority_from_headers(&headers(&[("x-high-priority", "1")])),
            Priority::Low
        );
    }

    #[test]
    fn test_promote_status() {
        assert_eq!(promote_status(0, StatusCode::OK), StatusCode::OK);
        assert_eq!(
            promote_status(0, StatusCode::INTERNAL_SERVER_ERROR),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(promote_status(479, StatusCode::OK).as_u16(), 479);
    }
}
