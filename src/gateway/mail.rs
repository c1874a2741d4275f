//! Mail proxy handlers. Read operations pass straight through; label
//! modification and trash/untrash are mutating and go through confirmation.

use super::respond::forward_response;
use super::validate::{validate_resource_id, validate_user_id};
use super::{AppState, parse_query, query_map};
use crate::approval::ApprovalContext;
use crate::backend::BackendClient;
use crate::error::Result;
use crate::security::auth::verify_api_key;
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Response;
use reqwest::Method;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyMessageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_label_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_label_ids: Option<Vec<String>>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_user_id(&user_id)?;
    let params = parse_query(raw_query.as_deref());
    let path = format!("/mail/users/{user_id}/messages");

    if state.needs_confirmation(false) {
        state
            .confirm(ApprovalContext::new("GET", &path).with_query(query_map(&params)))
            .await?;
    }

    let upstream = state
        .mail
        .request(
            Method::GET,
            &format!("/users/{user_id}/messages"),
            &params,
            None,
        )
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn get_message(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_user_id(&user_id)?;
    validate_resource_id(&message_id, "message")?;
    let params = parse_query(raw_query.as_deref());
    let path = format!("/mail/users/{user_id}/messages/{message_id}");

    if state.needs_confirmation(false) {
        state
            .confirm(ApprovalContext::new("GET", &path).with_query(query_map(&params)))
            .await?;
    }

    let upstream = state
        .mail
        .request(
            Method::GET,
            &format!("/users/{user_id}/messages/{message_id}"),
            &params,
            None,
        )
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn list_labels(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_user_id(&user_id)?;

    if state.needs_confirmation(false) {
        state
            .confirm(ApprovalContext::new(
                "GET",
                format!("/mail/users/{user_id}/labels"),
            ))
            .await?;
    }

    let upstream = state
        .mail
        .request(Method::GET, &format!("/users/{user_id}/labels"), &[], None)
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn get_label(
    State(state): State<AppState>,
    Path((user_id, label_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_user_id(&user_id)?;
    validate_resource_id(&label_id, "label")?;

    if state.needs_confirmation(false) {
        state
            .confirm(ApprovalContext::new(
                "GET",
                format!("/mail/users/{user_id}/labels/{label_id}"),
            ))
            .await?;
    }

    let upstream = state
        .mail
        .request(
            Method::GET,
            &format!("/users/{user_id}/labels/{label_id}"),
            &[],
            None,
        )
        .await?;
    Ok(forward_response(upstream).await)
}

/// Label changes rewrite how the agent's whole pipeline sees the mailbox, so
/// they count as mutating and go through confirmation like trash does.
pub async fn modify_message(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(String, String)>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<ModifyMessageRequest>,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_user_id(&user_id)?;
    validate_resource_id(&message_id, "message")?;
    let path = format!("/mail/users/{user_id}/messages/{message_id}/modify");

    if state.needs_confirmation(true) {
        let (subject, from, snippet) =
            fetch_message_context(&state.mail, &user_id, &message_id).await;
        let ctx = ApprovalContext {
            labels_to_add: body.add_label_ids.clone(),
            labels_to_remove: body.remove_label_ids.clone(),
            message_subject: subject,
            message_from: from,
            message_snippet: snippet,
            ..ApprovalContext::new("POST", &path)
        };
        state.confirm(ctx).await?;
    }

    let payload = serde_json::to_value(&body).map_err(anyhow::Error::from)?;
    let upstream = state
        .mail
        .request(
            Method::POST,
            &format!("/users/{user_id}/messages/{message_id}/modify"),
            &[],
            Some(&payload),
        )
        .await?;
    Ok(forward_response(upstream).await)
}

pub async fn trash_message(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    trash_or_untrash(state, user_id, message_id, headers, "trash").await
}

pub async fn untrash_message(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    trash_or_untrash(state, user_id, message_id, headers, "untrash").await
}

async fn trash_or_untrash(
    state: AppState,
    user_id: String,
    message_id: String,
    headers: HeaderMap,
    action: &str,
) -> Result<Response> {
    verify_api_key(&state.keys, &headers)?;
    validate_user_id(&user_id)?;
    validate_resource_id(&message_id, "message")?;
    let path = format!("/mail/users/{user_id}/messages/{message_id}/{action}");

    if state.needs_confirmation(true) {
        let (subject, from, snippet) =
            fetch_message_context(&state.mail, &user_id, &message_id).await;
        let ctx = ApprovalContext {
            message_subject: subject,
            message_from: from,
            message_snippet: snippet,
            ..ApprovalContext::new("POST", &path)
        };
        state.confirm(ctx).await?;
    }

    let upstream = state
        .mail
        .request(
            Method::POST,
            &format!("/users/{user_id}/messages/{message_id}/{action}"),
            &[],
            None,
        )
        .await?;
    Ok(forward_response(upstream).await)
}

/// Subject, sender and snippet for the operator prompt. Any failure degrades
/// to a context-less prompt; it never blocks the confirmation flow.
async fn fetch_message_context(
    mail: &BackendClient,
    user_id: &str,
    message_id: &str,
) -> (Option<String>, Option<String>, Option<String>) {
    let params = vec![
        ("format".to_owned(), "metadata".to_owned()),
        ("metadataHeaders".to_owned(), "Subject".to_owned()),
        ("metadataHeaders".to_owned(), "From".to_owned()),
    ];
    let response = match mail
        .request(
            Method::GET,
            &format!("/users/{user_id}/messages/{message_id}"),
            &params,
            None,
        )
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            tracing::warn!(
                status = %response.status(),
                "message context fetch failed, prompting without context"
            );
            return (None, None, None);
        }
        Err(error) => {
            tracing::warn!("message context fetch failed: {error}");
            return (None, None, None);
        }
    };

    let Ok(data) = response.json::<serde_json::Value>().await else {
        return (None, None, None);
    };
    let mut subject = None;
    let mut from = None;
    if let Some(message_headers) = data.pointer("/payload/headers").and_then(|v| v.as_array()) {
        for header in message_headers {
            let name = header.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let value = header.get("value").and_then(|v| v.as_str());
            if name.eq_ignore_ascii_case("subject") {
                subject = value.map(str::to_owned);
            } else if name.eq_ignore_ascii_case("from") {
                from = value.map(str::to_owned);
            }
        }
    }
    let snippet = data
        .get("snippet")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    (subject, from, snippet)
}
