//! Operator-facing approval endpoints. No caller auth: these are reachable
//! only on the operator's own machine in the intended localhost deployment,
//! and they are mounted only when web confirmation is enabled.

use super::AppState;
use crate::approval::{QueueEvent, QueueEventKind, WebApprovalQueue};
use crate::error::ErrorBody;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Idle gap before an SSE comment keeps the connection alive.
const KEEPALIVE_SECS: u64 = 30;

#[derive(Serialize)]
struct QueueResponse {
    pending: Vec<crate::approval::PendingSnapshot>,
}

#[derive(Serialize)]
struct ActionResponse {
    success: bool,
    message: &'static str,
}

fn queue_unavailable() -> Response {
    let body = ErrorBody::new("proxy_error", "Web confirmation is not enabled");
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

fn request_not_found() -> Response {
    let body = ErrorBody::new("proxy_error", "Request not found or already processed");
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// Minimal page pointing the operator at the JSON/SSE API.
pub async fn approval_ui() -> Html<&'static str> {
    Html(
        "<!doctype html><html><head><title>Pending approvals</title></head>\
         <body><h1>Pending approvals</h1>\
         <p>Poll <code>GET /approval/api/queue</code>, subscribe to \
         <code>GET /approval/api/events</code>, settle with \
         <code>POST /approval/api/{id}/approve</code> or \
         <code>POST /approval/api/{id}/reject</code>.</p></body></html>",
    )
}

pub async fn get_queue(State(state): State<AppState>) -> Response {
    let Some(queue) = state.queue.as_ref() else {
        return queue_unavailable();
    };
    let pending = queue.get_pending().await;
    Json(QueueResponse { pending }).into_response()
}

pub async fn approve_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    settle(state, &request_id, true).await
}

pub async fn reject_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    settle(state, &request_id, false).await
}

async fn settle(state: AppState, request_id: &str, approve: bool) -> Response {
    let Some(queue) = state.queue.as_ref() else {
        return queue_unavailable();
    };
    let settled = if approve {
        queue.approve(request_id).await
    } else {
        queue.reject(request_id).await
    };
    if !settled {
        tracing::warn!(
            id = request_id,
            "settlement failed: not found or already processed"
        );
        return request_not_found();
    }
    Json(ActionResponse {
        success: true,
        message: if approve {
            "Request approved"
        } else {
            "Request rejected"
        },
    })
    .into_response()
}

/// SSE stream of queue changes: a `connected` event with the current
/// snapshot, then one event per change, with keepalive comments in between.
pub async fn event_stream(State(state): State<AppState>) -> Response {
    let Some(queue) = state.queue.clone() else {
        return queue_unavailable();
    };
    build_event_stream(queue).await
}

/// One `data:` frame per event; serialization failures drop the frame
/// rather than the connection.
fn data_frame(event: &QueueEvent) -> Option<String> {
    serde_json::to_string(event)
        .ok()
        .map(|json| format!("data: {json}\n\n"))
}

async fn build_event_stream(queue: Arc<WebApprovalQueue>) -> Response {
    // Subscribe before snapshotting so no change can fall in the gap.
    let mut events = queue.subscribe().await;
    let pending = queue.get_pending().await;

    let stream = async_stream::stream! {
        let connected = QueueEvent {
            event: QueueEventKind::Connected,
            pending,
        };
        if let Some(frame) = data_frame(&connected) {
            yield Ok::<_, Infallible>(frame);
        }
        loop {
            match tokio::time::timeout(Duration::from_secs(KEEPALIVE_SECS), events.recv()).await {
                Ok(Some(event)) => {
                    if let Some(frame) = data_frame(&event) {
                        yield Ok(frame);
                    }
                }
                // Queue dropped: server shutting down.
                Ok(None) => break,
                Err(_) => yield Ok(": keepalive\n\n".to_string()),
            }
        }
    };

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    response
}
