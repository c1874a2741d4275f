use crate::approval::ConfirmationMode;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration, assembled once at startup from CLI arguments.
///
/// Nothing here is hot-reloadable: the policy tables, confirmation mode and
/// token/key file locations are fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,

    // File paths
    pub api_keys_file: PathBuf,
    pub mail_token_file: PathBuf,
    pub calendar_token_file: PathBuf,

    // Confirmation
    pub confirmation_mode: ConfirmationMode,
    pub confirmation_timeout: Option<Duration>,
    pub web_confirmation: bool,

    // Backend base URLs
    pub mail_base_url: String,
    pub calendar_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            cors_origins: Vec::new(),
            api_keys_file: PathBuf::from("api_keys.json"),
            mail_token_file: PathBuf::from("mail_token.json"),
            calendar_token_file: PathBuf::from("calendar_token.json"),
            confirmation_mode: ConfirmationMode::MutatingOnly,
            confirmation_timeout: Some(Duration::from_secs(300)),
            web_confirmation: false,
            mail_base_url: "https://gmail.googleapis.com/gmail/v1".into(),
            calendar_base_url: "https://www.googleapis.com/calendar/v3".into(),
        }
    }
}

impl Config {
    /// Validate the parts that would otherwise fail deep inside a request.
    pub fn validate(&self) -> Result<()> {
        for (label, base) in [
            ("mail", &self.mail_base_url),
            ("calendar", &self.calendar_base_url),
        ] {
            let parsed = url::Url::parse(base)
                .with_context(|| format!("invalid {label} base URL: {base}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("{label} base URL must be http(s): {base}");
            }
            if base.ends_with('/') {
                anyhow::bail!("{label} base URL must not end with a slash: {base}");
            }
        }
        if let Some(timeout) = self.confirmation_timeout
            && timeout.is_zero()
        {
            anyhow::bail!("confirmation timeout must be positive (omit it for no timeout)");
        }
        Ok(())
    }
}

/// Expand a user-supplied path argument (`~` and `$VAR` forms).
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
