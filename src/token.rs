use crate::amadeus::{AccessToken, FlightProvider};
use crate::cache::CacheStore;
use crate::error::TokenError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub const TOKEN_CACHE_KEY: &str = "auth_token";

/// Hands out the provider access token, keeping it in the shared cache.
///
/// There is no single-flight guard: callers racing on a cold cache each fetch
/// a token and the last one written wins.
pub struct TokenManager {
    provider: Arc<dyn FlightProvider>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl TokenManager {
    pub fn new(provider: Arc<dyn FlightProvider>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    /// Returns the cached token, fetching one when the cache has none.
    pub async fn ensure_token(&self) -> Result<AccessToken, TokenError> {
        if let Some(raw) = self.cache.get(TOKEN_CACHE_KEY).await? {
            match String::from_utf8(raw) {
                Ok(value) => {
                    debug!("Using cached access token");
                    return Ok(AccessToken::new(value));
                }
                Err(_) => error!("Cached access token is not valid UTF-8, fetching a new one"),
            }
        }

        self.fetch_and_store().await
    }

    /// Replaces the cached token with a freshly fetched one.
    /// On failure the stale token is dropped so the next caller fetches again.
    pub async fn refresh_token(&self) -> Result<AccessToken, TokenError> {
        info!("Refreshing access token");
        match self.fetch_and_store().await {
            Ok(token) => Ok(token),
            Err(TokenError::Unavailable) => {
                self.cache.delete(TOKEN_CACHE_KEY).await?;
                Err(TokenError::Unavailable)
            }
            Err(e) => Err(e),
        }
    }

    // Only a successful grant is written to the cache
    async fn fetch_and_store(&self) -> Result<AccessToken, TokenError> {
        let token = self
            .provider
            .fetch_token()
            .await
            .ok_or(TokenError::Unavailable)?;

        self.cache
            .set(
                TOKEN_CACHE_KEY,
                token.as_str().as_bytes().to_vec(),
                Some(self.ttl),
            )
            .await?;
        Ok(token)
    }
}
