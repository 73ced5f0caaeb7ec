//! Dashboard configuration.
//!
//! Values come from `LEARNPULSE_*` environment variables with typed defaults.
//! The CLI layers its own flags on top (see `main.rs`), and `validate` runs
//! once before anything is spawned.

use std::time::Duration;

use url::Url;

use crate::aggregator::Limits;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_ROLE: &str = "admin";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;
pub const DEFAULT_ALERT_CAPACITY: usize = 10;
/// Upper bounds accepted by `validate` for the bounded collections.
pub const MAX_HISTORY_CAPACITY: usize = 10_000;
pub const MAX_ALERT_CAPACITY: usize = 1_000;
pub const DEFAULT_ENGAGEMENT_TIMEFRAME: &str = "1h";
pub const DEFAULT_STREAM_TIMEFRAME: &str = "5m";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Path prefix of the realtime analytics REST collaborators.
pub const API_PREFIX: &str = "/api/v1/realtime-analytics";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{what} must be at most {max}")]
    TooLarge { what: &'static str, max: usize },
}

/// Runtime configuration for one dashboard view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveConfig {
    /// HTTP base URL of the analytics backend (e.g. `"http://127.0.0.1:8000"`).
    pub base_url: String,
    /// Identity used in the stream endpoint path.
    pub user_id: String,
    /// Dashboard role passed to the stream endpoint.
    pub role: String,
    /// Channels to subscribe to, in request order.
    pub channels: Vec<String>,
    /// Fixed delay between a lost connection and the next open attempt.
    pub reconnect_delay: Duration,
    /// Period of the poll fallback.
    pub poll_interval: Duration,
    /// Whether each poll tick also fetches the progress stream point.
    pub poll_progress: bool,
    pub history_capacity: usize,
    pub alert_capacity: usize,
    /// Window requested from the engagement bootstrap endpoint.
    pub engagement_timeframe: String,
    /// Window requested from the engagement poll endpoint.
    pub stream_timeframe: String,
    /// Per-request timeout for REST calls.
    pub request_timeout: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl LiveConfig {
    /// Load config from the process environment with sane defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config through an arbitrary key lookup.
    ///
    /// Unset, empty, or unparsable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let parse_u64 = |key: &str, default: u64| get(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(default);
        let parse_usize =
            |key: &str, default: usize| get(key).and_then(|v| v.parse::<usize>().ok()).unwrap_or(default);

        Self {
            base_url: get("LEARNPULSE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            user_id: get("LEARNPULSE_USER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            role: get("LEARNPULSE_ROLE").unwrap_or_else(|| DEFAULT_ROLE.to_owned()),
            channels: get("LEARNPULSE_CHANNELS").map_or_else(default_channels, |raw| parse_channels(&raw)),
            reconnect_delay: Duration::from_millis(parse_u64(
                "LEARNPULSE_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
            )),
            poll_interval: Duration::from_millis(parse_u64("LEARNPULSE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)),
            poll_progress: get("LEARNPULSE_POLL_PROGRESS")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            history_capacity: parse_usize("LEARNPULSE_HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY),
            alert_capacity: parse_usize("LEARNPULSE_ALERT_CAPACITY", DEFAULT_ALERT_CAPACITY),
            engagement_timeframe: get("LEARNPULSE_ENGAGEMENT_TIMEFRAME")
                .unwrap_or_else(|| DEFAULT_ENGAGEMENT_TIMEFRAME.to_owned()),
            stream_timeframe: get("LEARNPULSE_STREAM_TIMEFRAME").unwrap_or_else(|| DEFAULT_STREAM_TIMEFRAME.to_owned()),
            request_timeout: Duration::from_secs(parse_u64(
                "LEARNPULSE_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
        }
    }

    /// Reject values that would make the view misbehave at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] for a non-http(s) base URL and
    /// [`ConfigError::Zero`] for zero periods or capacities, and
    /// [`ConfigError::TooLarge`] for capacities above their maximum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream_url()?;
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::Zero("reconnect delay"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll interval"));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Zero("history capacity"));
        }
        if self.alert_capacity == 0 {
            return Err(ConfigError::Zero("alert capacity"));
        }
        if self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(ConfigError::TooLarge { what: "history capacity", max: MAX_HISTORY_CAPACITY });
        }
        if self.alert_capacity > MAX_ALERT_CAPACITY {
            return Err(ConfigError::TooLarge { what: "alert capacity", max: MAX_ALERT_CAPACITY });
        }
        Ok(())
    }

    /// Base URL of the REST collaborators, without a trailing slash.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("{}{API_PREFIX}", self.base_url.trim_end_matches('/'))
    }

    /// WebSocket URL of the live-update channel. The user id is encoded as
    /// a single path segment and the role as a query value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] unless the base URL is http(s).
    pub fn stream_url(&self) -> Result<String, ConfigError> {
        let invalid = || ConfigError::InvalidBaseUrl(self.base_url.clone());
        let mut url = Url::parse(self.base_url.trim_end_matches('/')).map_err(|_| invalid())?;

        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            _ => return Err(invalid()),
        };
        url.set_scheme(scheme).map_err(|()| invalid())?;
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .extend(["ws", "analytics", self.user_id.as_str()]);
        url.query_pairs_mut().append_pair("role", &self.role);

        Ok(url.into())
    }

    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits { history: self.history_capacity, alerts: self.alert_capacity }
    }
}

/// Split a comma-separated channel list, keeping first-seen order.
#[must_use]
pub fn parse_channels(raw: &str) -> Vec<String> {
    let mut channels: Vec<String> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !channels.iter().any(|c| c == part) {
            channels.push(part.to_owned());
        }
    }
    if channels.is_empty() { default_channels() } else { channels }
}

fn default_channels() -> Vec<String> {
    wire::DEFAULT_CHANNELS.iter().map(ToString::to_string).collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
