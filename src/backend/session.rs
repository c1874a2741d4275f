//! OAuth credential lifecycle for one backend: lazy disk load, expiry-driven
//! refresh, forced refresh after an upstream 401, and persistence that never
//! clobbers fields this gateway does not manage.

use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REFRESH_TIMEOUT_SECS: u64 = 30;

/// Tokens are treated as expired slightly early so a request never departs
/// with a token that dies in flight.
const EXPIRY_SKEW_SECS: i64 = 30;

/// In-memory view of one backend's OAuth state.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    fn expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECS),
            // No self-reported expiry: assume valid until the backend says
            // otherwise with a 401.
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Cached credentials for one backend, mirrored to a JSON token file.
///
/// The file is the same document the OAuth bootstrap tooling writes; this
/// manager updates only the token fields it owns and leaves everything else
/// (scopes, account, custom annotations) byte-for-byte intact.
pub struct SessionManager {
    backend: &'static str,
    token_file: PathBuf,
    http: reqwest::Client,
    state: Mutex<Option<Credential>>,
}

impl SessionManager {
    pub fn new(backend: &'static str, token_file: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            token_file: token_file.into(),
            http: build_refresh_client(),
            state: Mutex::new(None),
        }
    }

    /// A credential fit for use: loaded from disk on first call, refreshed
    /// when self-reported expired. `None` means the backend is unreachable
    /// until an operator re-runs the OAuth bootstrap.
    pub async fn get_credential(&self) -> Option<Credential> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);
        let credential = state.as_mut()?;

        if credential.expired() && credential.refresh_token.is_some() {
            match self.refresh(credential).await {
                Ok(()) => tracing::info!(backend = self.backend, "refreshed expired credentials"),
                Err(error) => {
                    tracing::error!(
                        backend = self.backend,
                        "failed to refresh credentials: {error:#}"
                    );
                    return None;
                }
            }
        }
        Some(credential.clone())
    }

    /// Unconditional refresh after the backend rejected `stale_token` with a
    /// 401. Coalesced: when the cached token already differs from the one the
    /// caller observed failing, another caller refreshed in the meantime and
    /// the cached credential is returned as-is.
    pub async fn force_refresh(&self, stale_token: &str) -> Option<Credential> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);
        let credential = state.as_mut()?;

        if credential.access_token != stale_token {
            tracing::debug!(
                backend = self.backend,
                "refresh already performed by a concurrent request"
            );
            return Some(credential.clone());
        }
        credential.refresh_token.as_ref()?;

        match self.refresh(credential).await {
            Ok(()) => {
                tracing::info!(backend = self.backend, "force-refreshed credentials after 401");
                Some(credential.clone())
            }
            Err(error) => {
                tracing::error!(
                    backend = self.backend,
                    "failed to force-refresh credentials: {error:#}"
                );
                None
            }
        }
    }

    fn ensure_loaded(&self, state: &mut Option<Credential>) {
        if state.is_none() {
            *state = self.load_from_disk();
        }
    }

    fn load_from_disk(&self) -> Option<Credential> {
        let raw = match fs::read_to_string(&self.token_file) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::error!(
                    backend = self.backend,
                    path = %self.token_file.display(),
                    "token file unreadable: {error}"
                );
                return None;
            }
        };
        let doc: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(error) => {
                tracing::error!(
                    backend = self.backend,
                    path = %self.token_file.display(),
                    "token file is not valid JSON: {error}"
                );
                return None;
            }
        };

        let field = |name: &str| doc.get(name).and_then(|v| v.as_str()).map(str::to_owned);
        let Some(access_token) = field("token") else {
            tracing::error!(
                backend = self.backend,
                path = %self.token_file.display(),
                "token file is missing the `token` field"
            );
            return None;
        };
        Some(Credential {
            access_token,
            refresh_token: field("refresh_token"),
            token_uri: field("token_uri").unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
            client_id: field("client_id"),
            client_secret: field("client_secret"),
            expiry: field("expiry").as_deref().and_then(parse_expiry),
        })
    }

    /// Exchange the refresh token at the token endpoint and update both the
    /// in-memory credential and the on-disk document.
    async fn refresh(&self, credential: &mut Credential) -> anyhow::Result<()> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or_else(|| anyhow!("no refresh token available"))?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        if let Some(client_id) = credential.client_id.as_deref() {
            form.push(("client_id", client_id));
        }
        if let Some(client_secret) = credential.client_secret.as_deref() {
            form.push(("client_secret", client_secret));
        }

        let response = self
            .http
            .post(&credential.token_uri)
            .form(&form)
            .send()
            .await
            .context("token endpoint unreachable")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("token endpoint returned {status}: {body}"));
        }
        let refreshed: RefreshResponse = response
            .json()
            .await
            .context("token endpoint returned malformed JSON")?;

        credential.access_token = refreshed.access_token;
        if let Some(rotated) = refreshed.refresh_token {
            credential.refresh_token = Some(rotated);
        }
        credential.expiry = refreshed
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));

        if let Err(error) = persist(&self.token_file, credential) {
            // The refreshed token still works for this process lifetime.
            tracing::warn!(
                backend = self.backend,
                "failed to save refreshed credentials: {error:#}"
            );
        }
        Ok(())
    }
}

fn build_refresh_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REFRESH_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// The bootstrap tooling writes timezone-qualified RFC 3339; older files
/// carry a naive isoformat timestamp which is taken as UTC.
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Read-modify-write of the token document: only the fields this gateway
/// manages change, everything else survives. Write via temp file + rename.
fn persist(path: &Path, credential: &Credential) -> anyhow::Result<()> {
    let mut doc = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
        Err(_) => serde_json::Value::Null,
    };
    if !doc.is_object() {
        doc = serde_json::json!({});
    }
    let object = doc.as_object_mut().context("token document is not an object")?;

    object.insert("token".into(), credential.access_token.clone().into());
    if let Some(refresh_token) = &credential.refresh_token {
        object.insert("refresh_token".into(), refresh_token.clone().into());
    }
    match &credential.expiry {
        Some(expiry) => {
            object.insert("expiry".into(), expiry.to_rfc3339().into());
        }
        // A leftover expiry from before the refresh would make the next
        // process start treat a live token as stale.
        None => {
            object.remove("expiry");
        }
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context("create token file directory")?;
    }
    let tmp = path.with_extension("tmp");
    let raw = serde_json::to_string_pretty(&doc).context("serialize token document")?;
    fs::write(&tmp, raw).context("write token temp file")?;
    fs::rename(&tmp, path).context("replace token file")?;
    Ok(())
}
