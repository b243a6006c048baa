// Service configuration, read from the process environment

use crate::cache::CacheConfig;
use crate::error::ConfigError;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TOKEN_URL: &str = "https://test.api.amadeus.com/v1/security/oauth2/token";
pub const DEFAULT_SEARCH_URL: &str = "https://test.api.amadeus.com/v2/shopping/flight-offers";

// Credentials and endpoints of the upstream provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub token_url: String,
    pub search_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout_ms: u64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// How long each kind of cache entry lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub token_ttl: Duration,
    pub price_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(1800),
            price_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub provider: ProviderConfig,
    pub policy: CachePolicy,
    pub cache: CacheConfig,
}

impl Config {
    const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
    const DEFAULT_TIMEOUT_MS: u64 = 10_000;

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    // Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(name) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::Invalid { name, value }),
                None => Ok(default),
            }
        };

        let defaults = CachePolicy::default();
        let cache_defaults = CacheConfig::default();

        let bind_addr = lookup("FLY_FINDER_BIND_ADDR").unwrap_or_else(|| {
            warn!(
                "FLY_FINDER_BIND_ADDR not set, listening on {}",
                Self::DEFAULT_BIND_ADDR
            );
            Self::DEFAULT_BIND_ADDR.to_string()
        });

        Ok(Self {
            bind_addr,
            provider: ProviderConfig {
                token_url: lookup("AMADEUS_TOKEN_API_URL")
                    .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
                search_url: lookup("AMADEUS_FLIGHT_SEARCH_API_URL")
                    .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
                client_id: required("AMADEUS_API_ACCESS_KEY")?,
                client_secret: required("AMADEUS_API_SECRET_KEY")?,
                timeout_ms: number("FLY_FINDER_REQUEST_TIMEOUT_MS", Self::DEFAULT_TIMEOUT_MS)?,
            },
            policy: CachePolicy {
                token_ttl: Duration::from_secs(number(
                    "FLY_FINDER_TOKEN_TTL_SECONDS",
                    defaults.token_ttl.as_secs(),
                )?),
                price_ttl: Duration::from_secs(number(
                    "FLY_FINDER_PRICE_TTL_SECONDS",
                    defaults.price_ttl.as_secs(),
                )?),
            },
            cache: CacheConfig {
                max_entries: number(
                    "FLY_FINDER_CACHE_MAX_ENTRIES",
                    cache_defaults.max_entries as u64,
                )? as usize,
                default_ttl_seconds: cache_defaults.default_ttl_seconds,
                cleanup_interval_seconds: number(
                    "FLY_FINDER_CACHE_CLEANUP_SECONDS",
                    cache_defaults.cleanup_interval_seconds,
                )?,
            },
        })
    }
}
