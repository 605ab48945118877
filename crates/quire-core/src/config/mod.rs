//! Sync client configuration.
//!
//! Built programmatically or from environment variables. Environment access
//! goes through a lookup function so tests never touch the process env.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sync::{BACKOFF_BASE, BACKOFF_CEILING};
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);
/// Shortest interval the background loop accepts
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1_000;
pub const DEFAULT_PUSH_LIMIT: usize = 500;

/// Everything the sync client needs to talk to one hub
#[derive(Clone, PartialEq, Eq)]
pub struct SyncClientConfig {
    /// Normalized hub base URL; also keys the persisted hub relationship
    pub hub_url: String,
    pub username: String,
    pub password: String,
    pub interval: Duration,
    pub page_limit: usize,
    pub push_limit: usize,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
}

impl fmt::Debug for SyncClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncClientConfig")
            .field("hub_url", &self.hub_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("interval", &self.interval)
            .field("page_limit", &self.page_limit)
            .field("push_limit", &self.push_limit)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_ceiling", &self.backoff_ceiling)
            .finish()
    }
}

impl SyncClientConfig {
    pub fn new(
        hub_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(Error::Config("username must not be empty".to_string()));
        }
        Ok(Self {
            hub_url: normalize_hub_url(hub_url.into())?,
            username: username.trim().to_string(),
            password: password.into(),
            interval: DEFAULT_SYNC_INTERVAL,
            page_limit: DEFAULT_PAGE_LIMIT,
            push_limit: DEFAULT_PUSH_LIMIT,
            backoff_base: BACKOFF_BASE,
            backoff_ceiling: BACKOFF_CEILING,
        })
    }

    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    /// Read `QUIRE_HUB_URL`, `QUIRE_USERNAME`, `QUIRE_PASSWORD`,
    /// `QUIRE_SYNC_INTERVAL_SECS` and `QUIRE_SYNC_PAGE_LIMIT`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let hub_url = required(&lookup, "QUIRE_HUB_URL")?;
        let username = required(&lookup, "QUIRE_USERNAME")?;
        let password = lookup("QUIRE_PASSWORD")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| missing("QUIRE_PASSWORD"))?;

        let mut config = Self::new(hub_url, username, password)?;

        if let Some(secs) = normalize_text_option(lookup("QUIRE_SYNC_INTERVAL_SECS")) {
            let secs = secs.parse::<u64>().map_err(|_| {
                Error::Config("QUIRE_SYNC_INTERVAL_SECS must be an integer".to_string())
            })?;
            config = config.with_interval(Duration::from_secs(secs));
        }
        if let Some(limit) = normalize_text_option(lookup("QUIRE_SYNC_PAGE_LIMIT")) {
            let limit = limit.parse::<usize>().map_err(|_| {
                Error::Config(format!(
                    "QUIRE_SYNC_PAGE_LIMIT must be an integer in [1, {MAX_PAGE_LIMIT}]"
                ))
            })?;
            config = config.with_page_limit(limit)?;
        }
        Ok(config)
    }

    /// Set the timer interval, raising it to the floor when too short
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_SYNC_INTERVAL {
            tracing::warn!(
                requested_secs = interval.as_secs(),
                minimum_secs = MIN_SYNC_INTERVAL.as_secs(),
                "Sync interval below minimum; clamping"
            );
            self.interval = MIN_SYNC_INTERVAL;
        } else {
            self.interval = interval;
        }
        self
    }

    pub fn with_page_limit(mut self, limit: usize) -> Result<Self> {
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(Error::Config(format!(
                "page limit must be in [1, {MAX_PAGE_LIMIT}]"
            )));
        }
        self.page_limit = limit;
        Ok(self)
    }

    pub fn with_push_limit(mut self, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(Error::Config("push limit must be at least 1".to_string()));
        }
        self.push_limit = limit;
        Ok(self)
    }
}

/// Trim, require an http(s) scheme and drop trailing slashes
pub fn normalize_hub_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("hub URL must not be empty".to_string()))?;
    if !is_http_url(&url) {
        return Err(Error::Config(
            "hub URL must include http:// or https://".to_string(),
        ));
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn missing(name: &str) -> Error {
    Error::Config(format!("Missing required environment variable: {name}"))
}

fn required(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    normalize_text_option(lookup(name)).ok_or_else(|| missing(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(values: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = values
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("QUIRE_HUB_URL", " https://hub.example/ "),
        ("QUIRE_USERNAME", "alice"),
        ("QUIRE_PASSWORD", "secret"),
    ];

    #[test]
    fn defaults_apply() {
        let config = SyncClientConfig::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.hub_url, "https://hub.example");
        assert_eq!(config.interval, DEFAULT_SYNC_INTERVAL);
        assert_eq!(config.page_limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(config.push_limit, DEFAULT_PUSH_LIMIT);
    }

    #[test]
    fn missing_password_is_reported() {
        let error = SyncClientConfig::from_lookup(lookup(&BASE[..2])).unwrap_err();
        assert!(error.to_string().contains("QUIRE_PASSWORD"));
    }

    #[test]
    fn short_interval_is_clamped() {
        let mut values = BASE.to_vec();
        values.push(("QUIRE_SYNC_INTERVAL_SECS", "1"));
        let config = SyncClientConfig::from_lookup(lookup(&values)).unwrap();
        assert_eq!(config.interval, MIN_SYNC_INTERVAL);
    }

    #[test]
    fn page_limit_is_bounded() {
        let mut values = BASE.to_vec();
        values.push(("QUIRE_SYNC_PAGE_LIMIT", "5000"));
        assert!(SyncClientConfig::from_lookup(lookup(&values)).is_err());

        let config = SyncClientConfig::new("http://hub", "a", "b")
            .unwrap()
            .with_page_limit(250)
            .unwrap();
        assert_eq!(config.page_limit, 250);
    }

    #[test]
    fn hub_url_requires_scheme() {
        assert!(normalize_hub_url("hub.example".to_string()).is_err());
        assert!(normalize_hub_url("   ".to_string()).is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let config = SyncClientConfig::new("http://hub", "alice", "hunter2").unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
