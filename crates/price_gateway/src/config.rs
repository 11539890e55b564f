//! Environment configuration.

use crate::auth::TokenCacheConfig;
use crate::engine::EngineConfig;
use crate::error::ConfigError;
use crate::feed::FeedConfig;
use crate::session::SESSION_CHANNEL_BUFFER_SIZE;
use external_services::DEFAULT_QUOTE_API_URL;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub http_port: u16,
    pub metrics_port: u16,
    pub quote_api_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub token_cache: TokenCacheConfig,
    pub engine: EngineConfig,
    pub session_buffer: usize,
}

impl GatewayConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read through `lookup`, which returns the raw value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let token_cache = TokenCacheConfig {
            capacity: parse(&lookup, "TOKEN_CACHE_CAPACITY", 1000)?,
            ttl: millis(&lookup, "TOKEN_CACHE_TTL_MS", 3_600_000)?,
            sweep_period: millis(&lookup, "TOKEN_CACHE_SWEEP_MS", 3_600_000)?,
        };

        let engine = EngineConfig {
            feed: FeedConfig {
                tick_period: millis(&lookup, "FEED_TICK_MS", 5_000)?,
                fetch_timeout: millis(&lookup, "FETCH_TIMEOUT_MS", 4_000)?,
                cache_first_reads: flag(&lookup, "CACHE_FIRST_READS")?,
                retire_idle_feeds: flag(&lookup, "RETIRE_IDLE_FEEDS")?,
            },
            popularity_threshold: positive(&lookup, "POPULARITY_THRESHOLD", 5)?,
        };

        Ok(Self {
            http_port: parse(&lookup, "HTTP_PORT", 8081)?,
            metrics_port: parse(&lookup, "METRICS_PORT", 9094)?,
            quote_api_url: lookup("MOCKDATA_API_URL")
                .unwrap_or_else(|| DEFAULT_QUOTE_API_URL.to_string()),
            jwt_secret,
            jwt_issuer: lookup("JWT_ISSUER").filter(|s| !s.is_empty()),
            token_cache,
            engine,
            session_buffer: positive(&lookup, "SESSION_BUFFER", SESSION_CHANNEL_BUFFER_SIZE)?,
        })
    }

    /// Log the effective configuration, secrets excluded.
    pub fn log(&self) {
        info!("Configuration:");
        info!("  HTTP_PORT: {}", self.http_port);
        info!("  METRICS_PORT: {}", self.metrics_port);
        info!("  MOCKDATA_API_URL: {}", self.quote_api_url);
        info!("  JWT_ISSUER: {:?}", self.jwt_issuer);
        info!("  TOKEN_CACHE: {:?}", self.token_cache);
        info!("  FEED: {:?}", self.engine.feed);
        info!("  POPULARITY_THRESHOLD: {}", self.engine.popularity_threshold);
        info!("  SESSION_BUFFER: {}", self.session_buffer);
    }
}

fn parse<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        None => Ok(default),
    }
}

fn millis<F>(lookup: &F, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let ms = positive(lookup, var, default)?;
    Ok(Duration::from_millis(ms))
}

/// Like [`parse`] but zero is rejected.
fn positive<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq + ToString,
{
    let value = parse(lookup, var, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn flag<F>(lookup: &F, var: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid { var, value: v }),
        },
    }
}
