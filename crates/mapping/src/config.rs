use std::fmt;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://maps.vietmap.vn/api";
pub const DEFAULT_API_VERSION: &str = "1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based): doubles each time, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("base url must be http(s): {0}")]
    UnsupportedBaseUrl(String),
    #[error("api key must not be empty")]
    EmptyApiKey,
}

#[derive(Clone)]
pub struct MapProviderConfig {
    pub base_url: Url,
    pub api_key: String,
    pub api_version: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl MapProviderConfig {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ConfigError::UnsupportedBaseUrl(base_url.to_string()));
        }
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }

        Ok(Self {
            base_url,
            api_key,
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        })
    }
}

impl fmt::Debug for MapProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapProviderConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}
