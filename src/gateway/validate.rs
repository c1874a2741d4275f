//! Shallow identifier validation. The point is to reject obviously malformed
//! or path-injecting values before they reach a URL; the backend remains the
//! authority on whether an id actually exists.

use crate::error::{GateError, Result};

/// `me` or an email-shaped address.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id == "me" || is_email_shaped(user_id, false) {
        Ok(())
    } else {
        Err(GateError::Validation("Invalid userId format".into()))
    }
}

/// `primary` or an email-shaped address. `#` is allowed in the local part
/// for shared calendars like `en.usa#holiday@group.v.calendar.google.com`.
pub fn validate_calendar_id(calendar_id: &str) -> Result<()> {
    if calendar_id == "primary" || is_email_shaped(calendar_id, true) {
        Ok(())
    } else {
        Err(GateError::Validation("Invalid calendarId format".into()))
    }
}

/// Message, label and event ids: non-empty ASCII alphanumerics plus `_`/`-`.
pub fn validate_resource_id(resource_id: &str, label: &str) -> Result<()> {
    let ok = !resource_id.is_empty()
        && resource_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(GateError::Validation(format!("Invalid {label} ID format")))
    }
}

fn is_email_shaped(value: &str, allow_hash: bool) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    let local_ok = local.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(c, '.' | '_' | '%' | '+' | '-')
            || (allow_hash && c == '#')
    });
    if !local_ok {
        return false;
    }
    let Some((prefix, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
}
