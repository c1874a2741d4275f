//! Gateway assembly: state construction, routing, middleware and the serve
//! loop with graceful shutdown.

use super::{AppState, MAX_BODY_SIZE, approval_api, calendar, mail};
use crate::approval::{ApprovalBackend, ConfirmationMode, ConsoleApprover, WebApprovalQueue};
use crate::backend::BackendClient;
use crate::config::Config;
use crate::error::{ErrorBody, GateError};
use crate::security::keys::ApiKeyStore;
use crate::security::policy::{Decision, PolicyGate};
use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Run the HTTP gateway.
pub async fn run_gateway(config: Arc<Config>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("parse gateway bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind gateway socket")?;

    run_gateway_with_listener(listener, config).await
}

/// Run the HTTP gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    listener: tokio::net::TcpListener,
    config: Arc<Config>,
) -> Result<()> {
    let actual_port = listener
        .local_addr()
        .context("get gateway listener local address")?
        .port();
    let display_addr = format!("{}:{}", config.host, actual_port);

    let state = build_state(Arc::clone(&config));
    print_gateway_banner(&display_addr, &config);

    let app = build_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP gateway")?;

    tracing::info!("gateway stopped");
    Ok(())
}

/// Assemble the shared state from configuration. Public so integration
/// tests can drive the full router without binding a socket.
pub fn build_state(config: Arc<Config>) -> AppState {
    let queue = config
        .web_confirmation
        .then(|| Arc::new(WebApprovalQueue::new(config.confirmation_timeout)));
    let approver = match &queue {
        Some(queue) => ApprovalBackend::Web(Arc::clone(queue)),
        None => ApprovalBackend::Console(ConsoleApprover::new(config.confirmation_timeout)),
    };

    AppState {
        policy: Arc::new(PolicyGate::new()),
        keys: Arc::new(ApiKeyStore::new(config.api_keys_file.clone())),
        approver: Arc::new(approver),
        queue,
        mail: Arc::new(BackendClient::new(
            "mail",
            config.mail_base_url.clone(),
            config.mail_token_file.clone(),
        )),
        calendar: Arc::new(BackendClient::new(
            "calendar",
            config.calendar_base_url.clone(),
            config.calendar_token_file.clone(),
        )),
        config,
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Machine-readable catalog of what this gateway will and will not proxy.
async fn handle_docs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let allowed: Vec<serde_json::Value> = state
        .policy
        .allowed_operations()
        .map(|(method, pattern)| serde_json::json!({ "method": method, "path": pattern }))
        .collect();
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "description": "Capability-restricting gateway. Operations absent from allowed_operations are denied.",
        "allowed_operations": allowed,
    }))
}

/// Everything routable that the policy let through but no handler serves.
async fn handle_fallback() -> Response {
    let body = ErrorBody::new("proxy_error", "Not found");
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// Deny blocked and uncataloged operations before any routing or auth runs.
async fn policy_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_owned();
    let path = request.uri().path().to_owned();
    match state.policy.decide(&method, &path) {
        Decision::Allow => next.run(request).await,
        Decision::Block => GateError::Forbidden.into_response(),
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let response = next.run(request).await;
    tracing::info!(%method, path, status = response.status().as_u16(), "request");
    response
}

pub fn build_app(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/docs", get(handle_docs))
        // Mail
        .route("/mail/users/{user_id}/messages", get(mail::list_messages))
        .route(
            "/mail/users/{user_id}/messages/{message_id}",
            get(mail::get_message),
        )
        .route("/mail/users/{user_id}/labels", get(mail::list_labels))
        .route(
            "/mail/users/{user_id}/labels/{label_id}",
            get(mail::get_label),
        )
        .route(
            "/mail/users/{user_id}/messages/{message_id}/modify",
            post(mail::modify_message),
        )
        .route(
            "/mail/users/{user_id}/messages/{message_id}/trash",
            post(mail::trash_message),
        )
        .route(
            "/mail/users/{user_id}/messages/{message_id}/untrash",
            post(mail::untrash_message),
        )
        // Calendar
        .route("/calendar/users/me/calendarList", get(calendar::list_calendars))
        .route(
            "/calendar/calendars/{calendar_id}",
            get(calendar::get_calendar),
        )
        .route(
            "/calendar/calendars/{calendar_id}/events",
            get(calendar::list_events).post(calendar::create_event),
        )
        .route(
            "/calendar/calendars/{calendar_id}/events/{event_id}",
            get(calendar::get_event)
                .put(calendar::update_event)
                .patch(calendar::patch_event)
                .delete(calendar::delete_event),
        )
        .fallback(handle_fallback);

    if state.queue.is_some() {
        app = app
            .route("/approval/", get(approval_api::approval_ui))
            .route("/approval/api/queue", get(approval_api::get_queue))
            .route(
                "/approval/api/{request_id}/approve",
                post(approval_api::approve_request),
            )
            .route(
                "/approval/api/{request_id}/reject",
                post(approval_api::reject_request),
            )
            .route("/approval/api/events", get(approval_api::event_stream));
    }

    let cors_origins = state.config.cors_origins.clone();
    // Handlers can be parked on an operator decision for the whole
    // confirmation window, so the request timeout sits above it. With no
    // confirmation deadline configured there is no sane cap to enforce.
    let request_timeout = state
        .config
        .confirmation_timeout
        .map(|timeout| timeout + Duration::from_secs(30));

    // Logging wraps the policy gate so denials show up in the request log.
    let mut app = app
        .layer(middleware::from_fn_with_state(
            state.clone(),
            policy_middleware,
        ))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE));

    if let Some(timeout) = request_timeout {
        app = app.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ));
    }

    if !cors_origins.is_empty() {
        let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ]),
        );
    }

    app
}

fn print_gateway_banner(display_addr: &str, config: &Config) {
    println!("Wardgate listening on {display_addr}");
    println!("  GET  /health");
    println!("  GET  /docs");
    println!("  *    /mail/...      (allowlisted operations only)");
    println!("  *    /calendar/...  (allowlisted operations only)");
    println!("  Confirmation mode: {}", config.confirmation_mode);
    if config.web_confirmation {
        let host = if config.host == "0.0.0.0" {
            "localhost"
        } else {
            &config.host
        };
        println!("  Approval queue: http://{host}:{}/approval/", config.port);
    }
    println!("  API keys file: {}", config.api_keys_file.display());
    println!("  Mail token file: {}", config.mail_token_file.display());
    println!(
        "  Calendar token file: {}",
        config.calendar_token_file.display()
    );
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(error) => tracing::error!("failed to listen for shutdown signal: {error}"),
    }
}

// Keep the banner honest about the default mode.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_uses_console_confirmation() {
        let state = build_state(Arc::new(Config::default()));
        assert!(state.queue.is_none());
        assert!(matches!(
            *state.approver,
            ApprovalBackend::Console(_)
        ));
    }

    #[test]
    fn web_confirmation_mounts_the_queue() {
        let config = Config {
            web_confirmation: true,
            ..Config::default()
        };
        let state = build_state(Arc::new(config));
        assert!(state.queue.is_some());
        assert!(matches!(*state.approver, ApprovalBackend::Web(_)));
    }

    #[test]
    fn confirmation_mode_displays_snake_case() {
        assert_eq!(ConfirmationMode::MutatingOnly.to_string(), "mutating_only");
    }
}
