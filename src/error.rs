use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

// ─── Error taxonomy ──────────────────────────────────────────────────────────

/// Structured error hierarchy for `Wardgate`.
///
/// Every variant maps onto the uniform error envelope returned to callers,
/// so an unexpected failure can never surface as a blank 500. Startup and
/// CLI paths continue to use `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum GateError {
    // ── Caller authentication ────────────────────────────────────────────
    #[error("{0}")]
    Auth(String),

    #[error("API key is disabled")]
    KeyDisabled,

    // ── Capability policy / operator decision ───────────────────────────
    #[error("This operation is not allowed")]
    Forbidden,

    #[error("Request rejected by operator")]
    ConfirmationRejected,

    // ── Request shape ───────────────────────────────────────────────────
    #[error("{0}")]
    Validation(String),

    // ── Backend side ────────────────────────────────────────────────────
    #[error("Backend authentication failed")]
    BackendAuth,

    #[error("{0}")]
    Backend(String),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::KeyDisabled | Self::Forbidden | Self::ConfirmationRejected => {
                StatusCode::FORBIDDEN
            }
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::BackendAuth | Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) | Self::KeyDisabled => "auth_error",
            Self::Forbidden | Self::ConfirmationRejected => "forbidden",
            Self::Validation(_) | Self::Internal(_) => "proxy_error",
            Self::BackendAuth | Self::Backend(_) => "backend_error",
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        if let Self::Internal(error) = &self {
            tracing::error!("internal gateway error: {error:#}");
            // Internal details stay in the logs, not in the envelope.
            let body = ErrorBody::new("proxy_error", "Internal proxy error");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
        let body = ErrorBody::new(self.kind(), self.to_string());
        (self.status(), Json(body)).into_response()
    }
}

// ─── Error envelope ──────────────────────────────────────────────────────────

/// Uniform JSON envelope for every non-2xx response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn backend(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            error: "backend_error".into(),
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn forbidden() -> Self {
        Self::new("forbidden", "This operation is not allowed")
    }
}

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, GateError>;
