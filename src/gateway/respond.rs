//! Translation of backend responses onto the gateway's wire contract.

use crate::error::ErrorBody;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Forward a backend response to the caller.
///
/// 204 passes through bodyless. Backend errors (≥400) are wrapped in the
/// uniform envelope with the raw payload under `details`; a body that is not
/// JSON becomes a generic `backend_error` under the backend's status.
/// Success bodies pass through untouched with the upstream status.
pub async fn forward_response(upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);

    if status == StatusCode::NO_CONTENT {
        return status.into_response();
    }

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(%status, "failed to read backend response body: {error}");
            let body = ErrorBody::new("backend_error", "Failed to read backend response");
            return (StatusCode::BAD_GATEWAY, Json(body)).into_response();
        }
    };

    let Ok(content) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        tracing::warn!(%status, "non-JSON response from backend");
        let body = ErrorBody::new("backend_error", "Invalid JSON response from backend");
        return (status, Json(body)).into_response();
    };

    if status.as_u16() >= 400 {
        let message = content
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .unwrap_or("Backend API error")
            .to_owned();
        return (status, Json(ErrorBody::backend(message, content))).into_response();
    }

    (status, Json(content)).into_response()
}
