//! Command-line interface: the `serve` gateway entry point and the `keys`
//! management subcommands.

use crate::approval::ConfirmationMode;
use crate::config::{Config, expand_path};
use crate::gateway::run_gateway;
use crate::security::keys::ApiKeyStore;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

/// Wardgate - capability-restricting gateway between agents and backend APIs.
#[derive(Parser, Debug)]
#[command(name = "wardgate")]
#[command(version)]
#[command(about = "Mediating gateway that restricts what an agent may do with mail and calendar APIs.", long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to (use 0 for a random available port)
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Path to the API keys file
        #[arg(long, default_value = "api_keys.json")]
        api_keys_file: String,

        /// Path to the mail backend OAuth token file
        #[arg(long, default_value = "mail_token.json")]
        mail_token_file: String,

        /// Path to the calendar backend OAuth token file
        #[arg(long, default_value = "calendar_token.json")]
        calendar_token_file: String,

        /// Require confirmation for every request
        #[arg(long, conflicts_with_all = ["confirm_mutating", "no_confirm"])]
        confirm_all: bool,

        /// Require confirmation for mutating operations only (default)
        #[arg(long, conflicts_with_all = ["confirm_all", "no_confirm"])]
        confirm_mutating: bool,

        /// Do not require any confirmation
        #[arg(long, conflicts_with_all = ["confirm_all", "confirm_mutating"])]
        no_confirm: bool,

        /// Use the web approval queue instead of console prompts
        #[arg(long)]
        web_confirm: bool,

        /// Confirmation timeout in seconds (0 = wait forever)
        #[arg(long, default_value = "300")]
        confirmation_timeout: u64,

        /// Allowed CORS origins (repeatable)
        #[arg(long = "cors-origin")]
        cors_origins: Vec<String>,

        /// Mail backend base URL (no trailing slash)
        #[arg(long, default_value = "https://gmail.googleapis.com/gmail/v1")]
        mail_base_url: String,

        /// Calendar backend base URL (no trailing slash)
        #[arg(long, default_value = "https://www.googleapis.com/calendar/v3")]
        calendar_base_url: String,
    },

    /// Manage API keys
    Keys {
        /// Path to the API keys file
        #[arg(long, default_value = "api_keys.json")]
        api_keys_file: String,

        #[command(subcommand)]
        keys_command: KeysCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeysCommands {
    /// Create a new API key; the key is printed once and never again
    Create {
        /// Key name (1-64 chars: letters, digits, hyphen, underscore)
        name: String,
    },
    /// List keys (suffix only, never full keys)
    List,
    /// Re-enable a disabled key
    Enable { name: String },
    /// Disable a key without deleting it
    Disable { name: String },
    /// Delete a key permanently
    Revoke { name: String },
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            host,
            port,
            api_keys_file,
            mail_token_file,
            calendar_token_file,
            confirm_all,
            confirm_mutating: _,
            no_confirm,
            web_confirm,
            confirmation_timeout,
            cors_origins,
            mail_base_url,
            calendar_base_url,
        } => {
            let confirmation_mode = if confirm_all {
                ConfirmationMode::All
            } else if no_confirm {
                ConfirmationMode::None
            } else {
                ConfirmationMode::MutatingOnly
            };
            let config = Config {
                host,
                port,
                cors_origins,
                api_keys_file: expand_path(&api_keys_file),
                mail_token_file: expand_path(&mail_token_file),
                calendar_token_file: expand_path(&calendar_token_file),
                confirmation_mode,
                confirmation_timeout: (confirmation_timeout > 0)
                    .then(|| Duration::from_secs(confirmation_timeout)),
                web_confirmation: web_confirm,
                mail_base_url,
                calendar_base_url,
            };
            config.validate()?;
            run_gateway(Arc::new(config)).await
        }
        Commands::Keys {
            api_keys_file,
            keys_command,
        } => run_keys_command(&expand_path(&api_keys_file), keys_command),
    }
}

fn run_keys_command(api_keys_file: &std::path::Path, command: KeysCommands) -> Result<()> {
    let store = ApiKeyStore::new(api_keys_file);
    match command {
        KeysCommands::Create { name } => {
            let key = store.create(&name)?;
            println!("Created API key '{name}':");
            println!();
            println!("  {key}");
            println!();
            println!("Store it now; it will not be shown again.");
        }
        KeysCommands::List => {
            let listings = store.list();
            if listings.is_empty() {
                println!("No API keys in {}", api_keys_file.display());
                return Ok(());
            }
            for listing in listings {
                let status = if listing.enabled { "enabled" } else { "disabled" };
                let last_used = listing
                    .last_used_at
                    .map_or_else(|| "never".to_owned(), |at| at.to_rfc3339());
                println!(
                    "{}  ...{}  {status}  created {}  last used {last_used}",
                    listing.name,
                    listing.key_suffix,
                    listing.created_at.to_rfc3339(),
                );
            }
        }
        KeysCommands::Enable { name } => {
            if store.set_enabled(&name, true)? {
                println!("Enabled '{name}'");
            } else {
                anyhow::bail!("no key named '{name}'");
            }
        }
        KeysCommands::Disable { name } => {
            if store.set_enabled(&name, false)? {
                println!("Disabled '{name}'");
            } else {
                anyhow::bail!("no key named '{name}'");
            }
        }
        KeysCommands::Revoke { name } => {
            if store.revoke(&name)? {
                println!("Revoked '{name}'");
            } else {
                anyhow::bail!("no key named '{name}'");
            }
        }
    }
    Ok(())
}
