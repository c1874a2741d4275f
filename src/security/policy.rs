//! Fail-closed capability policy: a static block table checked first, then a
//! static allowlist of (method, path pattern) pairs. Anything else is denied.

/// Outcome of a policy check. Both deny reasons collapse to the same external
/// 403 so the table's exact shape cannot be probed; the distinction only
/// exists for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

/// Paths that are always forbidden, under any method.
const BLOCKED_PATHS: &[&str] = &[
    // Send operations
    "/mail/users/{user_id}/messages/send",
    // Draft operations
    "/mail/users/{user_id}/drafts",
    "/mail/users/{user_id}/drafts/send",
    "/mail/users/{user_id}/drafts/{draft_id}",
    // Import/insert operations
    "/mail/users/{user_id}/messages/import",
    "/mail/users/{user_id}/messages/insert",
];

/// The complete catalog of operations the gateway will attempt. Everything
/// absent from this table is denied.
const ALLOWED_OPERATIONS: &[(&str, &str)] = &[
    // Mail reads
    ("GET", "/mail/users/{user_id}/messages"),
    ("GET", "/mail/users/{user_id}/messages/{message_id}"),
    ("GET", "/mail/users/{user_id}/labels"),
    ("GET", "/mail/users/{user_id}/labels/{label_id}"),
    // Mail modifications
    ("POST", "/mail/users/{user_id}/messages/{message_id}/modify"),
    ("POST", "/mail/users/{user_id}/messages/{message_id}/trash"),
    ("POST", "/mail/users/{user_id}/messages/{message_id}/untrash"),
    // Calendar reads
    ("GET", "/calendar/users/me/calendarList"),
    ("GET", "/calendar/calendars/{calendar_id}"),
    ("GET", "/calendar/calendars/{calendar_id}/events"),
    ("GET", "/calendar/calendars/{calendar_id}/events/{event_id}"),
    // Calendar writes
    ("POST", "/calendar/calendars/{calendar_id}/events"),
    ("PUT", "/calendar/calendars/{calendar_id}/events/{event_id}"),
    ("PATCH", "/calendar/calendars/{calendar_id}/events/{event_id}"),
    ("DELETE", "/calendar/calendars/{calendar_id}/events/{event_id}"),
];

/// Check a path against a `/`-separated pattern. Segments of the form
/// `{name}` match any single segment; literal segments match
/// case-insensitively.
fn matches_path_pattern(path: &str, pattern: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut path_parts = path.split('/');

    loop {
        match (pattern_parts.next(), path_parts.next()) {
            (None, None) => return true,
            (Some(pattern_part), Some(path_part)) => {
                if pattern_part.starts_with('{') && pattern_part.ends_with('}') {
                    continue;
                }
                if !pattern_part.eq_ignore_ascii_case(path_part) {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

pub struct PolicyGate {
    blocked: &'static [&'static str],
    allowed: &'static [(&'static str, &'static str)],
}

impl PolicyGate {
    pub fn new() -> Self {
        Self {
            blocked: BLOCKED_PATHS,
            allowed: ALLOWED_OPERATIONS,
        }
    }

    /// Catalog of allowed (method, pattern) pairs, for the docs endpoint.
    pub fn allowed_operations(&self) -> impl Iterator<Item = (&'static str, &'static str)> {
        self.allowed.iter().copied()
    }

    /// Endpoints that bypass both the allowlist and caller authentication.
    fn is_unauthenticated_endpoint(path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        lower == "/health" || lower == "/docs" || lower.starts_with("/approval")
    }

    fn is_blocked(&self, path: &str) -> bool {
        self.blocked
            .iter()
            .any(|pattern| matches_path_pattern(path, pattern))
    }

    fn is_allowed(&self, method: &str, path: &str) -> bool {
        self.allowed
            .iter()
            .any(|(m, pattern)| method.eq_ignore_ascii_case(m) && matches_path_pattern(path, pattern))
    }

    /// Decide whether a (method, path) may even be attempted.
    ///
    /// Block-table entries win over everything; the allowlist is default-deny.
    /// Both deny paths log distinctly but return the identical [`Decision::Block`].
    pub fn decide(&self, method: &str, path: &str) -> Decision {
        let path = path.strip_suffix('/').unwrap_or(path);

        if Self::is_unauthenticated_endpoint(path) {
            return Decision::Allow;
        }
        if self.is_blocked(path) {
            tracing::warn!(method, path, "blocked operation attempted");
            return Decision::Block;
        }
        if self.is_allowed(method, path) {
            return Decision::Allow;
        }
        tracing::warn!(method, path, "operation not in allowlist");
        Decision::Block
    }
}
