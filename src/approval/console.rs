//! Synchronous, single-flight confirmation on the operator's console.

use super::ApprovalContext;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct ConsoleApprover {
    // Held across the whole prompt/read so a second confirmation can never
    // interleave its prompt with an outstanding one.
    prompt_lock: Mutex<()>,
    timeout: Option<Duration>,
}

impl ConsoleApprover {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            prompt_lock: Mutex::new(()),
            timeout,
        }
    }

    /// Prompt the operator and await a line of input. `y`/`yes`
    /// (case-insensitive, trimmed) approves; anything else, empty input and
    /// a timed-out prompt all reject. Timeouts are a rejection, not an error.
    pub async fn confirm(&self, ctx: &ApprovalContext) -> bool {
        let _guard = self.prompt_lock.lock().await;

        eprint!("{}", format_prompt(ctx));

        let line = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, read_line()).await {
                Ok(line) => line,
                Err(_) => {
                    eprintln!();
                    eprintln!("[TIMEOUT] Confirmation timed out");
                    return false;
                }
            },
            None => read_line().await,
        };

        let approved = matches!(
            line.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref(),
            Some("y" | "yes")
        );
        eprintln!("{}", if approved { "[APPROVED]" } else { "[REJECTED]" });
        approved
    }
}

/// Human-readable block describing the operation awaiting approval.
fn format_prompt(ctx: &ApprovalContext) -> String {
    let mut lines = vec![format!("[CONFIRM] {} {}", ctx.method, ctx.path)];

    if !ctx.query_params.is_empty() {
        let params: Vec<String> = ctx
            .query_params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        lines.push(format!("  Query: {}", params.join("&")));
    }
    if let Some(subject) = &ctx.message_subject {
        lines.push(format!("  Subject: {subject}"));
    }
    if let Some(from) = &ctx.message_from {
        lines.push(format!("  From: {from}"));
    }
    if let Some(snippet) = &ctx.message_snippet {
        lines.push(format!("  Preview: {snippet}"));
    }
    if let Some(labels) = &ctx.labels_to_add {
        lines.push(format!("  Add labels: {}", labels.join(", ")));
    }
    if let Some(labels) = &ctx.labels_to_remove {
        lines.push(format!("  Remove labels: {}", labels.join(", ")));
    }
    if let Some(summary) = &ctx.event_summary {
        lines.push(format!("  Event: {summary}"));
    }
    if let Some(attendees) = &ctx.event_attendees {
        lines.push(format!("  Attendees: {}", attendees.join(", ")));
    }
    if let Some(send_updates) = &ctx.send_updates {
        lines.push(format!("  Send notifications: {send_updates}"));
    }
    lines.push("Allow this request? [y/N]: ".to_string());
    lines.join("\n")
}

/// Stdin is blocking; read it off the scheduling loop so unrelated requests
/// keep flowing while the operator thinks.
async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut input = String::new();
        match std::io::stdin().read_line(&mut input) {
            Ok(0) => None, // EOF
            Ok(_) => Some(input),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}
