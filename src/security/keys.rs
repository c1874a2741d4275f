//! On-disk API key store consumed by the gateway's bearer auth and managed
//! through the `wardgate keys` CLI.

use super::constant_time_eq;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const API_KEY_PREFIX: &str = "wg_";
const API_KEY_RANDOM_LEN: usize = 32;
const API_KEY_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyFile {
    #[serde(default)]
    keys: BTreeMap<String, KeyRecord>,
}

/// Listing entry; never exposes the full key value.
#[derive(Debug, Clone, Serialize)]
pub struct KeyListing {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub key_suffix: String,
}

pub struct ApiKeyStore {
    path: PathBuf,
}

impl ApiKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or corrupt files degrade to an empty store; they are logged
    /// but never fatal to the process.
    fn load(&self) -> KeyFile {
        if !self.path.exists() {
            return KeyFile::default();
        }
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|error| {
                tracing::error!("failed to parse API keys file: {error}");
                KeyFile::default()
            }),
            Err(error) => {
                tracing::error!("failed to read API keys file: {error}");
                KeyFile::default()
            }
        }
    }

    /// Write via a sibling temp file, then rename for atomicity.
    fn save(&self, file: &KeyFile) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("create API keys directory")?;
        }
        let tmp = self.path.with_extension("tmp");
        let raw = serde_json::to_string_pretty(file).context("serialize API keys")?;
        fs::write(&tmp, raw).context("write API keys temp file")?;
        fs::rename(&tmp, &self.path).context("replace API keys file")?;
        Ok(())
    }

    fn generate_key() -> String {
        let mut rng = rand::rng();
        let random: String = (0..API_KEY_RANDOM_LEN)
            .map(|_| API_KEY_CHARS[rng.random_range(0..API_KEY_CHARS.len())] as char)
            .collect();
        format!("{API_KEY_PREFIX}{random}")
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > 64 {
            bail!("name must be between 1 and 64 characters");
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("name must contain only alphanumeric characters, hyphens, and underscores");
        }
        Ok(())
    }

    /// Mint a new key under a unique name and persist it.
    pub fn create(&self, name: &str) -> Result<String> {
        Self::validate_name(name)?;
        let mut file = self.load();
        if file.keys.values().any(|record| record.name == name) {
            bail!("API key with name '{name}' already exists");
        }
        let key = Self::generate_key();
        file.keys.insert(
            key.clone(),
            KeyRecord {
                name: name.to_string(),
                created_at: Utc::now(),
                last_used_at: None,
                enabled: true,
            },
        );
        self.save(&file)?;
        Ok(key)
    }

    /// Constant-time scan over the stored keys. Returns the record when the
    /// presented key exists, ignoring the enabled flag (the caller decides
    /// how to surface a disabled key).
    pub fn validate(&self, presented: &str) -> Option<KeyRecord> {
        if !presented.starts_with(API_KEY_PREFIX) {
            return None;
        }
        let file = self.load();
        let mut found = None;
        for (key, record) in &file.keys {
            if constant_time_eq(key, presented) {
                found = Some(record.clone());
            }
        }
        found
    }

    /// Best-effort `last_used_at` bump; a write failure only logs.
    pub fn touch_last_used(&self, presented: &str) {
        let mut file = self.load();
        if let Some(record) = file.keys.get_mut(presented) {
            record.last_used_at = Some(Utc::now());
            if let Err(error) = self.save(&file) {
                tracing::warn!("failed to update key last_used_at: {error}");
            }
        }
    }

    /// Enable or disable a key by name. Returns false when no key has that name.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let mut file = self.load();
        let Some(record) = file.keys.values_mut().find(|record| record.name == name) else {
            return Ok(false);
        };
        record.enabled = enabled;
        self.save(&file)?;
        Ok(true)
    }

    /// Permanently delete a key by name. Returns false when no key has that name.
    pub fn revoke(&self, name: &str) -> Result<bool> {
        let mut file = self.load();
        let Some(key) = file
            .keys
            .iter()
            .find_map(|(key, record)| (record.name == name).then(|| key.clone()))
        else {
            return Ok(false);
        };
        file.keys.remove(&key);
        self.save(&file)?;
        Ok(true)
    }

    pub fn list(&self) -> Vec<KeyListing> {
        self.load()
            .keys
            .iter()
            .map(|(key, record)| KeyListing {
                name: record.name.clone(),
                created_at: record.created_at,
                last_used_at: record.last_used_at,
                enabled: record.enabled,
                key_suffix: key.chars().skip(key.len().saturating_sub(4)).collect(),
            })
            .collect()
    }
}
