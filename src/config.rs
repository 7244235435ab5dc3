//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::cache::DEFAULT_TTL;

/// Relay used when `RELAY_URL` is unset.
pub const DEFAULT_RELAY: &str = "wss://yabu.me";

/// Runtime settings derived from environment variables.
#[derive(Clone)]
pub struct Settings {
    /// Root directory of the cache file store.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:7777`.
    pub bind_http: String,
    /// Bot secret key, `nsec1…` or hex. Empty when not configured.
    pub secret_key: String,
    /// Relay queried for relations, profiles and history.
    pub relay_url: String,
    /// Optional SOCKS5 proxy (host:port) for relay connections.
    pub relay_socks: Option<String>,
    /// Upper bound on a single relay query.
    pub relay_timeout: Duration,
    /// Maximum age of a cached relay answer.
    pub cache_ttl: Duration,
    /// Token required by privileged endpoints.
    pub bearer_token: Option<String>,
    /// Image list sources as `(name, url)` pairs.
    pub image_lists: Vec<(String, String)>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("store_root", &self.store_root)
            .field("bind_http", &self.bind_http)
            .field("relay_url", &self.relay_url)
            .field("relay_socks", &self.relay_socks)
            .field("relay_timeout", &self.relay_timeout)
            .field("cache_ttl", &self.cache_ttl)
            .field("image_lists", &self.image_lists)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT")?);
        let bind_http = env::var("BIND_HTTP").context("BIND_HTTP")?;
        let secret_key = env::var("BOT_SECRET_KEY").unwrap_or_default();
        let relay_url = non_empty("RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY.to_string());
        let relay_socks = non_empty("RELAY_SOCKS");
        let relay_timeout = Duration::from_secs(secs("RELAY_TIMEOUT_SECS", 10)?);
        let cache_ttl = Duration::from_secs(secs("CACHE_TTL_SECS", DEFAULT_TTL.as_secs())?);
        let bearer_token = non_empty("BEARER_TOKEN");
        let image_lists = csv_pairs(env::var("IMAGE_LISTS").unwrap_or_default());
        Ok(Self {
            store_root,
            bind_http,
            secret_key,
            relay_url,
            relay_socks,
            relay_timeout,
            cache_ttl,
            bearer_token,
            image_lists,
        })
    }

    /// Source URL of the named image list.
    pub fn image_list(&self, name: &str) -> Option<&str> {
        self.image_lists
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, url)| url.as_str())
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn secs(var: &str, default: u64) -> Result<u64> {
    match non_empty(var) {
        Some(v) => v.parse().with_context(|| format!("{var} must be a number of seconds")),
        None => Ok(default),
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

/// Parse `name=value` entries from a comma-separated string, skipping malformed ones.
pub fn csv_pairs(input: impl AsRef<str>) -> Vec<(String, String)> {
    csv_strings(input)
        .into_iter()
        .filter_map(|entry| {
            let (name, value) = entry.split_once('=')?;
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() || value.is_empty() {
                None
            } else {
                Some((name.to_string(), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) static ENV_MUTEX: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

#[cfg(test)]
pub(crate) const ENV_VARS: [&str; 9] = [
    "STORE_ROOT",
    "BIND_HTTP",
    "BOT_SECRET_KEY",
    "RELAY_URL",
    "RELAY_SOCKS",
    "RELAY_TIMEOUT_SECS",
    "CACHE_TTL_SECS",
    "BEARER_TOKEN",
    "IMAGE_LISTS",
];
