//! Bearer-token authentication against the on-disk API key store.

use super::keys::{ApiKeyStore, KeyRecord};
use crate::error::GateError;
use axum::http::{HeaderMap, header};

/// Verify the `Authorization: Bearer` header against the key store.
///
/// Returns the key's record so callers can attribute the request in logs.
/// Missing/malformed/unknown keys are a 401; a known-but-disabled key is a 403.
pub fn verify_api_key(keys: &ApiKeyStore, headers: &HeaderMap) -> Result<KeyRecord, GateError> {
    let Some(raw) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!("request missing Authorization header");
        return Err(GateError::Auth("Missing Authorization header".into()));
    };

    let mut parts = raw.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().map(str::trim).unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("bearer") {
        tracing::warn!("invalid Authorization header format");
        return Err(GateError::Auth("Invalid Authorization header format".into()));
    }
    if token.is_empty() {
        tracing::warn!("empty API key in Authorization header");
        return Err(GateError::Auth("Invalid API key".into()));
    }

    let Some(record) = keys.validate(token) else {
        // Log only a prefix so an almost-valid key never lands in the logs.
        let preview: String = token.chars().take(10).collect();
        tracing::warn!("invalid API key attempted: {preview}...");
        return Err(GateError::Auth("Invalid API key".into()));
    };

    if !record.enabled {
        tracing::warn!(key = %record.name, "disabled API key used");
        return Err(GateError::KeyDisabled);
    }

    keys.touch_last_used(token);
    tracing::debug!(key = %record.name, "request authenticated");
    Ok(record)
}
