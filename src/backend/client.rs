//! Authenticated request forwarding to one backend API, with a single
//! refresh-and-retry on 401.

use super::session::SessionManager;
use crate::error::{GateError, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::time::Duration;

const BACKEND_TIMEOUT_SECS: u64 = 30;

/// One upstream API: a base URL plus the credential session that signs
/// requests to it.
pub struct BackendClient {
    backend: &'static str,
    base_url: String,
    session: SessionManager,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(backend: &'static str, base_url: String, token_file: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            base_url,
            session: SessionManager::new(backend, token_file),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(BACKEND_TIMEOUT_SECS))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Forward one request to `{base_url}{path}`.
    ///
    /// No credential is a hard failure before any bytes leave. An upstream
    /// 401 triggers exactly one forced token refresh and one retry; if the
    /// refresh fails, the original 401 is returned untouched for the caller
    /// to translate. Any other upstream status, including a second 401, is
    /// final.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let credential = self
            .session
            .get_credential()
            .await
            .ok_or(GateError::BackendAuth)?;

        tracing::debug!(backend = self.backend, %method, path, "forwarding request");
        let response = self
            .send(method.clone(), path, params, body, &credential.access_token)
            .await?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(
            backend = self.backend,
            path,
            "got 401 from backend, attempting token refresh"
        );
        let Some(refreshed) = self.session.force_refresh(&credential.access_token).await else {
            return Ok(response);
        };
        let retried = self
            .send(method, path, params, body, &refreshed.access_token)
            .await?;
        tracing::debug!(
            backend = self.backend,
            status = %retried.status(),
            "retry after refresh"
        );
        Ok(retried)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<&serde_json::Value>,
        access_token: &str,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url).bearer_auth(access_token);
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|error| GateError::Backend(format!("Backend request failed: {error}")))
    }
}
