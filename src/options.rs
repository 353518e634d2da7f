use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CurlError, Result};

/// Configures retry behavior for failed attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    pub retry_delay_ms: u64,
    /// Factor applied to the delay after every retry.
    pub backoff_multiplier: f64,
    pub retry_on_connection_failure: bool,
    pub retry_on_timeout: bool,
}

impl RetryConfig {
    /// A policy that never re-attempts.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            retry_on_connection_failure: true,
            retry_on_timeout: true,
        }
    }
}

/// How the response cache participates in a GET.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStrategy {
    #[default]
    NoCache,
    CacheFirst,
    NetworkFirst,
    CacheOnly,
    NetworkOnly,
}

impl CacheStrategy {
    /// Whether a lookup under this strategy may return a cached response.
    pub fn reads_cache(self) -> bool {
        !matches!(self, Self::NoCache | Self::NetworkOnly)
    }

    pub fn writes_cache(self) -> bool {
        self != Self::NoCache
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub strategy: CacheStrategy,
    /// Entry lifetime in seconds.
    pub max_age_secs: u64,
    /// Declared byte budget. Only the entry-count bound is enforced.
    pub max_size_bytes: u64,
}

impl CacheConfig {
    pub fn new(strategy: CacheStrategy, max_age_secs: u64) -> Self {
        Self {
            strategy,
            max_age_secs,
            ..Self::default()
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::NoCache,
            max_age_secs: 300,
            max_size_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Client-wide defaults applied to every request built by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    /// Whole-request timeout in seconds, forwarded to the transport.
    pub timeout_secs: u64,
    /// Connect timeout in seconds, forwarded to the transport.
    pub connect_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl ClientOptions {
    /// Parses options from a JSON document. Missing fields keep their defaults.
    ///
    /// ```
    /// use curlkit_http::{CacheStrategy, ClientOptions};
    ///
    /// let opts = ClientOptions::from_json(r#"{"cache": {"strategy": "CACHE_FIRST"}}"#).unwrap();
    /// assert_eq!(opts.cache.strategy, CacheStrategy::CacheFirst);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| CurlError::Decode(format!("invalid client options JSON: {err}")))
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: None,
        }
    }
}
