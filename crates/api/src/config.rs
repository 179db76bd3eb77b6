use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use fleetline_mapping::config::{DEFAULT_API_VERSION, DEFAULT_BASE_URL};
use fleetline_mapping::{MapProviderConfig, RetryPolicy};

use crate::auth::DEFAULT_PASSWORD_ITERATIONS;
use crate::rate_limit::{RateLimitSettings, RouteClass, DEFAULT_MAX_KEYS};

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const MAX_TOKEN_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;
const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

/// Process configuration, read once from `FLEET_*` environment variables.
#[derive(Clone)]
pub struct ApiConfig {
    pub bind: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub password_iterations: u32,
    pub map: MapProviderConfig,
    pub rate_limits: RateLimitSettings,
    pub allowed_origins: Vec<String>,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let jwt_secret = value("FLEET_JWT_SECRET")
            .ok_or_else(|| anyhow!("FLEET_JWT_SECRET must be set to sign access tokens"))?;
        let map = map_provider_settings(&value)?;
        let rate_limits = rate_limit_settings(&value)?;

        let allowed_origins = value("FLEET_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().trim_end_matches('/').to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| {
                DEFAULT_ALLOWED_ORIGINS
                    .iter()
                    .map(|origin| origin.to_string())
                    .collect()
            });

        let token_ttl_seconds: u64 =
            parsed(&value, "FLEET_TOKEN_TTL_SECONDS", DEFAULT_TOKEN_TTL_SECONDS)?;
        if token_ttl_seconds == 0 || token_ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            bail!(
                "FLEET_TOKEN_TTL_SECONDS must be between 1 and {}, got {}",
                MAX_TOKEN_TTL_SECONDS,
                token_ttl_seconds
            );
        }
        let token_ttl = Duration::from_secs(token_ttl_seconds);

        Ok(Self {
            bind: value("FLEET_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            database_url: value("FLEET_DATABASE_URL"),
            jwt_secret,
            token_ttl,
            password_iterations: parsed(
                &value,
                "FLEET_PASSWORD_ITERATIONS",
                DEFAULT_PASSWORD_ITERATIONS,
            )?
            .max(1),
            map,
            rate_limits,
            allowed_origins,
        })
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind", &self.bind)
            .field("database_url", &self.database_url)
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("password_iterations", &self.password_iterations)
            .field("map", &self.map)
            .field("rate_limits", &self.rate_limits)
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

/// Mapping provider settings alone, for tools that only call the upstream.
pub fn map_provider_from_env() -> Result<MapProviderConfig> {
    map_provider_settings(&env_value)
}

/// Effective per-route limits, for tools that only report them.
pub fn rate_limits_from_env() -> Result<RateLimitSettings> {
    rate_limit_settings(&env_value)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_provider_settings<V>(value: &V) -> Result<MapProviderConfig>
where
    V: Fn(&str) -> Option<String>,
{
    let api_key = value("FLEET_VIETMAP_API_KEY")
        .ok_or_else(|| anyhow!("FLEET_VIETMAP_API_KEY must be set to call the mapping provider"))?;
    let base_url = value("FLEET_VIETMAP_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let mut map = MapProviderConfig::new(&base_url, api_key)
        .map_err(|err| anyhow!("FLEET_VIETMAP_BASE_URL is invalid: {}", err))?;

    map.api_version =
        value("FLEET_VIETMAP_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
    map.timeout = Duration::from_millis(parsed(value, "FLEET_UPSTREAM_TIMEOUT_MS", 10_000)?);
    map.connect_timeout =
        Duration::from_millis(parsed(value, "FLEET_UPSTREAM_CONNECT_TIMEOUT_MS", 5_000)?);
    let defaults = RetryPolicy::default();
    map.retry = RetryPolicy {
        max_attempts: parsed(value, "FLEET_UPSTREAM_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
        initial_backoff: Duration::from_millis(parsed(
            value,
            "FLEET_UPSTREAM_BACKOFF_MS",
            defaults.initial_backoff.as_millis() as u64,
        )?),
        max_backoff: defaults.max_backoff,
    };
    Ok(map)
}

fn rate_limit_settings<V>(value: &V) -> Result<RateLimitSettings>
where
    V: Fn(&str) -> Option<String>,
{
    let mut settings = RateLimitSettings {
        window: Duration::from_secs(parsed(value, "FLEET_RATE_LIMIT_WINDOW_SECONDS", 60)?),
        max_keys: parsed(value, "FLEET_RATE_LIMIT_MAX_KEYS", DEFAULT_MAX_KEYS)?,
        sweep_interval: Duration::from_secs(parsed(value, "FLEET_RATE_LIMIT_SWEEP_SECONDS", 60)?),
        ..RateLimitSettings::default()
    };
    if settings.window.is_zero() {
        bail!("FLEET_RATE_LIMIT_WINDOW_SECONDS must be greater than zero");
    }
    for class in RouteClass::ALL {
        let limit = parsed(value, &class.env_key(), class.default_limit())?;
        settings.limits.insert(class, limit);
    }
    Ok(settings)
}

fn parsed<T, V>(value: &V, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match value(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow!("{} has an invalid value: {}", key, raw)),
    }
}
