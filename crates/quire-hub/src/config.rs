use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use quire_core::auth::Credentials;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct HubConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    /// Author recorded on changes made by the hub itself
    pub author: String,
    pub credentials: Credentials,
    /// Base64 AES-256 key for private note bodies
    pub encryption_key: Option<String>,
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HubConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("author", &self.author)
            .field("credentials", &self.credentials)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl HubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "QUIRE_HUB_BIND_ADDR", "127.0.0.1:8787");
        let db_path = PathBuf::from(value_or_default(&lookup, "QUIRE_HUB_DB_PATH", "quire-hub.db"));
        let author = value_or_default(&lookup, "QUIRE_HUB_AUTHOR", "hub");

        let username = required_trimmed(&lookup, "QUIRE_HUB_USERNAME")?;
        // Passwords are taken verbatim
        let password = lookup("QUIRE_HUB_PASSWORD")
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingVar("QUIRE_HUB_PASSWORD"))?;
        if password.len() < 8 {
            return Err(ConfigError::Invalid(
                "QUIRE_HUB_PASSWORD must be at least 8 characters".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            db_path,
            author,
            credentials: Credentials::new(username, password),
            encryption_key: optional_trimmed(&lookup, "QUIRE_ENCRYPTION_KEY"),
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
