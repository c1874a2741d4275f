//! Calendar proxy handlers. Reads pass through; event deletion always goes
//! through confirmation, and create/update/patch do exactly when they would
//! notify attendees (`sendUpdates=all|externalOnly`).

use super::respond::forward_response;
use super::validate::{validate_calendar_id, validate_resource_id};
use super::{AppState, parse_query, query_map};
use crate::approval::{ApprovalContext, sends_notifications};
use crate::error::Result;
use crate::security::auth::verify_api_key;
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Response;
use reqwest::Method;

fn query_value<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Event summary and attendee emails from an opaque event body, for the
/// operator prompt. The body is otherwise passed through untouched.
fn event_context(body: &serde_json::Value) -> (Option<String>, Option<Vec<String>>) {
    let summary = body
        .get("summary")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let attendees = body.get("attendees").and_then(|v| v.as_array()).map(|list| {
        list.iter()
            .filter_map(|attendee| attendee.get("email").and_then(|v| v.as_str()))
            .map(str::to_owned)
            .collect()
    });
    (summary, attendees)
}

pub async fn list_calendars(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    let params = parse_query(raw_query.as_deref());
    let path = "/calendar/users/me/calendarList";

    if state.needs_confirmation(false) {
        state
            .confirm(ApprovalContext::new("GET", path).with_query(query_map(&params)))
            .await?;
    }

    let upstream = state
        .calendar
        .request(Method::GET, "/users/me/calendarList", &params, None)
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn get_calendar(
    State(state): State<AppState>,
    Path(calendar_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_calendar_id(&calendar_id)?;

    if state.needs_confirmation(false) {
        state
            .confirm(ApprovalContext::new(
                "GET",
                format!("/calendar/calendars/{calendar_id}"),
            ))
            .await?;
    }

    let upstream = state
        .calendar
        .request(Method::GET, &format!("/calendars/{calendar_id}"), &[], None)
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn list_events(
    State(state): State<AppState>,
    Path(calendar_id): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_calendar_id(&calendar_id)?;
    let params = parse_query(raw_query.as_deref());
    let path = format!("/calendar/calendars/{calendar_id}/events");

    if state.needs_confirmation(false) {
        state
            .confirm(ApprovalContext::new("GET", &path).with_query(query_map(&params)))
            .await?;
    }

    let upstream = state
        .calendar
        .request(
            Method::GET,
            &format!("/calendars/{calendar_id}/events"),
            &params,
            None,
        )
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn get_event(
    State(state): State<AppState>,
    Path((calendar_id, event_id)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_calendar_id(&calendar_id)?;
    validate_resource_id(&event_id, "event")?;
    let params = parse_query(raw_query.as_deref());
    let path = format!("/calendar/calendars/{calendar_id}/events/{event_id}");

    if state.needs_confirmation(false) {
        state
            .confirm(ApprovalContext::new("GET", &path).with_query(query_map(&params)))
            .await?;
    }

    let upstream = state
        .calendar
        .request(
            Method::GET,
            &format!("/calendars/{calendar_id}/events/{event_id}"),
            &params,
            None,
        )
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn create_event(
    State(state): State<AppState>,
    Path(calendar_id): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_calendar_id(&calendar_id)?;
    let params = parse_query(raw_query.as_deref());
    let path = format!("/calendars/{calendar_id}/events");

    write_event(state, Method::POST, path, params, body).await
}

pub async fn update_event(
    State(state): State<AppState>,
    Path((calendar_id, event_id)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_calendar_id(&calendar_id)?;
    validate_resource_id(&event_id, "event")?;
    let params = parse_query(raw_query.as_deref());
    let path = format!("/calendars/{calendar_id}/events/{event_id}");

    write_event(state, Method::PUT, path, params, body).await
}

pub async fn patch_event(
    State(state): State<AppState>,
    Path((calendar_id, event_id)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_calendar_id(&calendar_id)?;
    validate_resource_id(&event_id, "event")?;
    let params = parse_query(raw_query.as_deref());
    let path = format!("/calendars/{calendar_id}/events/{event_id}");

    write_event(state, Method::PATCH, path, params, body).await
}

/// Shared core for create/update/patch: confirmation is keyed on whether
/// the write would notify attendees, then the opaque body is forwarded.
async fn write_event(
    state: AppState,
    method: Method,
    backend_path: String,
    params: Vec<(String, String)>,
    body: serde_json::Value,
) -> Result<Response> {
    let send_updates = query_value(&params, "sendUpdates");
    let notifies = sends_notifications(send_updates);

    if state.needs_confirmation(notifies) {
        let (summary, attendees) = event_context(&body);
        let ctx = ApprovalContext {
            event_summary: summary,
            event_attendees: attendees,
            send_updates: notifies.then(|| send_updates.unwrap_or_default().to_owned()),
            ..ApprovalContext::new(method.as_str(), format!("/calendar{backend_path}"))
                .with_query(query_map(&params))
        };
        state.confirm(ctx).await?;
    }

    let upstream = state
        .calendar
        .request(method, &backend_path, &params, Some(&body))
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn delete_event(
    State(state): State<AppState>,
    Path((calendar_id, event_id)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_calendar_id(&calendar_id)?;
    validate_resource_id(&event_id, "event")?;
    let params = parse_query(raw_query.as_deref());
    let path = format!("/calendar/calendars/{calendar_id}/events/{event_id}");

    // Deleting is always mutating, whatever sendUpdates says.
    if state.needs_confirmation(true) {
        let ctx = ApprovalContext {
            event_summary: Some(format!("Event ID: {event_id}")),
            send_updates: query_value(&params, "sendUpdates").map(str::to_owned),
            ..ApprovalContext::new("DELETE", &path).with_query(query_map(&params))
        };
        state.confirm(ctx).await?;
    }

    let upstream = state
        .calendar
        .request(
            Method::DELETE,
            &format!("/calendars/{calendar_id}/events/{event_id}"),
            &params,
            None,
        )
        .await?;
    Ok(forward_response(upstream).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_context_extracts_summary_and_attendee_emails() {
        let body = serde_json::json!({
            "summary": "Quarterly review",
            "attendees": [
                {"email": "a@example.com", "optional": true},
                {"displayName": "No address"},
                {"email": "b@example.com"},
            ],
        });
        let (summary, attendees) = event_context(&body);
        assert_eq!(summary.as_deref(), Some("Quarterly review"));
        assert_eq!(
            attendees.unwrap(),
            vec!["a@example.com".to_owned(), "b@example.com".to_owned()]
        );
    }

    #[test]
    fn event_context_tolerates_opaque_bodies() {
        let (summary, attendees) = event_context(&serde_json::json!({"start": {}}));
        assert!(summary.is_none());
        assert!(attendees.is_none());
    }
}
