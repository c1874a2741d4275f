//! The HTTP surface: axum routes for the mail and calendar proxies, the
//! approval API, and the policy/logging middleware wrapped around them.

pub mod approval_api;
pub mod calendar;
pub mod mail;
pub mod respond;
pub mod server;
pub mod validate;

pub use server::{run_gateway, run_gateway_with_listener};

use crate::approval::{ApprovalBackend, ApprovalContext, WebApprovalQueue, requires_confirmation};
use crate::backend::BackendClient;
use crate::config::Config;
use crate::error::{GateError, Result};
use crate::security::keys::ApiKeyStore;
use crate::security::policy::PolicyGate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maximum request body size (64KB). The proxied APIs never need more and a
/// cap prevents memory exhaustion.
pub const MAX_BODY_SIZE: usize = 65_536;

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub policy: Arc<PolicyGate>,
    pub keys: Arc<ApiKeyStore>,
    pub approver: Arc<ApprovalBackend>,
    /// Present only in web confirmation mode; the approval API routes are
    /// mounted iff this is `Some`.
    pub queue: Option<Arc<WebApprovalQueue>>,
    pub mail: Arc<BackendClient>,
    pub calendar: Arc<BackendClient>,
}

/// Decode a raw query string into ordered pairs. The backends accept
/// repeated keys (`metadataHeaders`, `labelIds`) so a map would lose values.
pub(crate) fn parse_query(raw: Option<&str>) -> Vec<(String, String)> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Collapse query pairs into a map for the operator prompt, joining repeated
/// keys so nothing disappears from the context.
pub(crate) fn query_map(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in pairs {
        map.entry(key.clone())
            .and_modify(|joined| {
                joined.push(',');
                joined.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    map
}

impl AppState {
    /// Whether this operation needs an operator decision under the current
    /// mode. Handlers check this before assembling context, so the mail
    /// metadata fetch only happens when a prompt will actually be shown.
    pub(crate) fn needs_confirmation(&self, is_mutating: bool) -> bool {
        requires_confirmation(self.config.confirmation_mode, is_mutating)
    }

    /// Put the context in front of the operator; rejection and timeout both
    /// surface as the 403 rejection error.
    pub(crate) async fn confirm(&self, ctx: ApprovalContext) -> Result<()> {
        if self.approver.decide(ctx).await {
            Ok(())
        } else {
            Err(GateError::ConfirmationRejected)
        }
    }
}
