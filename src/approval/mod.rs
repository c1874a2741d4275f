//! Human-in-the-loop confirmation: the mode resolver, the canonical
//! confirmation context, and the two delivery backends (console prompt and
//! web approval queue).

pub mod console;
pub mod queue;

pub use console::ConsoleApprover;
pub use queue::{PendingSnapshot, QueueEvent, QueueEventKind, WebApprovalQueue};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Global confirmation mode, set once at startup and read by every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationMode {
    /// Never ask for confirmation.
    None,
    /// Ask only for mutating operations (the default).
    MutatingOnly,
    /// Ask for every operation, reads included.
    All,
}

/// Pure resolver: does this operation need an operator decision?
///
/// `is_mutating` is a static property of the operation type, supplied by the
/// handler, with one exception resolved there: sending calendar notifications
/// counts as mutating only when `sendUpdates` is `all` or `externalOnly`.
pub fn requires_confirmation(mode: ConfirmationMode, is_mutating: bool) -> bool {
    match mode {
        ConfirmationMode::None => false,
        ConfirmationMode::All => true,
        ConfirmationMode::MutatingOnly => is_mutating,
    }
}

/// Whether a `sendUpdates` value means attendees get notified.
pub fn sends_notifications(send_updates: Option<&str>) -> bool {
    matches!(send_updates, Some("all") | Some("externalOnly"))
}

/// Canonical context shown to the operator, one union schema across all
/// operation families (mail label changes, message metadata, event metadata).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApprovalContext {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels_to_add: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels_to_remove: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_attendees: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_updates: Option<String>,
}

impl ApprovalContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query_params: BTreeMap<String, String>) -> Self {
        self.query_params = query_params;
        self
    }
}

/// Runtime-selected confirmation delivery. The rest of the pipeline only
/// sees `decide`; it never knows which backend is active.
pub enum ApprovalBackend {
    Console(ConsoleApprover),
    Web(Arc<WebApprovalQueue>),
}

impl ApprovalBackend {
    /// Ask the operator. `true` means proceed; rejection and timeout are
    /// both `false`.
    pub async fn decide(&self, ctx: ApprovalContext) -> bool {
        let method = ctx.method.clone();
        let path = ctx.path.clone();
        let approved = match self {
            Self::Console(console) => console.confirm(&ctx).await,
            Self::Web(queue) => queue.add_request(ctx).await,
        };
        if approved {
            tracing::info!(%method, %path, "request approved by operator");
        } else {
            tracing::info!(%method, %path, "request rejected by operator");
        }
        approved
    }
}
