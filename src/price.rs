// Price lookup: cache check, token, upstream search with one re-authentication, cache store.

use crate::amadeus::{FlightProvider, SearchOutcome, INTERNAL_ERROR_MESSAGE};
use crate::cache::CacheStore;
use crate::error::{LookupError, QueryError};
use crate::token::TokenManager;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// One (origin, destination, date) search. Airport codes are stored upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceQuery {
    origin: String,
    destination: String,
    date: NaiveDate,
}

impl PriceQuery {
    pub fn new(origin: &str, destination: &str, date: NaiveDate) -> Result<Self, QueryError> {
        Ok(Self {
            origin: airport_code("origin", origin)?,
            destination: airport_code("destination", destination)?,
            date,
        })
    }

    pub fn parse(origin: &str, destination: &str, date: &str) -> Result<Self, QueryError> {
        let parsed = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| QueryError::InvalidDate(date.to_string()))?;
        Self::new(origin, destination, parsed)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn cache_key(&self) -> String {
        format!(
            "flight_data:{}:{}:{}",
            self.origin,
            self.destination,
            self.date_string()
        )
    }
}

impl fmt::Display for PriceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{} on {}", self.origin, self.destination, self.date_string())
    }
}

fn airport_code(name: &'static str, value: &str) -> Result<String, QueryError> {
    let code = value.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(QueryError::InvalidAirport {
            name,
            value: value.to_string(),
        })
    }
}

/// Body of a successful lookup, as sent to clients and stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
    pub price: String,
}

impl PriceQuote {
    fn new(query: &PriceQuery, price: String) -> Self {
        Self {
            origin: query.origin.clone(),
            destination: query.destination.clone(),
            departure_date: query.date_string(),
            price,
        }
    }
}

/// Status code plus the full JSON document to send back.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResponse {
    pub status: u16,
    pub body: Value,
}

impl LookupResponse {
    pub fn data(status: u16, data: Value) -> Self {
        Self {
            status,
            body: json!({ "data": data }),
        }
    }

    pub fn message(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "message": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

pub struct PriceLookupService {
    provider: Arc<dyn FlightProvider>,
    cache: Arc<dyn CacheStore>,
    tokens: TokenManager,
    price_ttl: Duration,
}

impl PriceLookupService {
    pub fn new(
        provider: Arc<dyn FlightProvider>,
        cache: Arc<dyn CacheStore>,
        token_ttl: Duration,
        price_ttl: Duration,
    ) -> Self {
        let tokens = TokenManager::new(Arc::clone(&provider), Arc::clone(&cache), token_ttl);
        Self {
            provider,
            cache,
            tokens,
            price_ttl,
        }
    }

    /// Looks up the cheapest price for `query`.
    ///
    /// With `bypass_cache` set the result cache is neither read nor written.
    /// Never fails: every error becomes a 500 response carrying a message.
    pub async fn lookup(&self, query: &PriceQuery, bypass_cache: bool) -> LookupResponse {
        match self.try_lookup(query, bypass_cache).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error in searching flight prices for {}: {}", query, e);
                LookupResponse::message(500, e.to_string())
            }
        }
    }

    async fn try_lookup(
        &self,
        query: &PriceQuery,
        bypass_cache: bool,
    ) -> Result<LookupResponse, LookupError> {
        let key = query.cache_key();

        if !bypass_cache {
            if let Some(raw) = self.cache.get(&key).await? {
                match serde_json::from_slice::<PriceQuote>(&raw) {
                    Ok(quote) => {
                        info!("Cache hit for {}", key);
                        return Ok(LookupResponse::data(200, serde_json::to_value(quote)?));
                    }
                    Err(e) => warn!("Discarding unreadable cache entry {}: {}", key, e),
                }
            }
        }

        let outcome = self.search_with_reauth(query).await?;

        Ok(match outcome {
            SearchOutcome::Priced(price) => {
                let quote = PriceQuote::new(query, price);
                if !bypass_cache {
                    self.cache
                        .set(&key, serde_json::to_vec(&quote)?, Some(self.price_ttl))
                        .await?;
                }
                LookupResponse::data(200, serde_json::to_value(quote)?)
            }
            SearchOutcome::Rejected(detail) => LookupResponse::data(400, detail),
            SearchOutcome::Failed(_) => {
                LookupResponse::data(500, Value::from(INTERNAL_ERROR_MESSAGE))
            }
            // search_with_reauth never hands back a second 401
            SearchOutcome::Unauthorized => return Err(LookupError::RetryExhausted),
        })
    }

    // On a 401, fetch a new token and repeat the same search exactly once.
    async fn search_with_reauth(&self, query: &PriceQuery) -> Result<SearchOutcome, LookupError> {
        let token = self.tokens.ensure_token().await?;
        let outcome = self.provider.search_cheapest(query, &token).await;
        if outcome != SearchOutcome::Unauthorized {
            return Ok(outcome);
        }

        warn!("Access token rejected for {}, retrying with a fresh one", query);
        let token = self.tokens.refresh_token().await?;
        match self.provider.search_cheapest(query, &token).await {
            SearchOutcome::Unauthorized => {
                error!("Provider rejected the refreshed access token for {}", query);
                Err(LookupError::RetryExhausted)
            }
            outcome => Ok(outcome),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake_provider::ScriptedProvider;
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::CacheError;
    use crate::token::TOKEN_CACHE_KEY;
    use async_trait::async_trait;
    use test_case::test_case;

    const LONG: Duration = Duration::from_secs(600);

    fn service(provider: Arc<ScriptedProvider>, cache: Arc<dyn CacheStore>) -> PriceLookupService {
        PriceLookupService::new(provider, cache, Duration::from_secs(1800), LONG)
    }

    fn mad_bcn() -> PriceQuery {
        PriceQuery::parse("MAD", "BCN", "2025-06-01").unwrap()
    }

    // Store that is down for every operation
    struct UnavailableCache;

    #[async_trait]
    impl CacheStore for UnavailableCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }

    #[test_case("mad", "bcn", "2025-06-01" => Ok(("MAD".to_string(), "BCN".to_string())) ; "lower case codes are normalised")]
    #[test_case(" LHR ", "JFK", "2025-12-31" => Ok(("LHR".to_string(), "JFK".to_string())) ; "surrounding whitespace is ignored")]
    #[test_case("MADRID", "BCN", "2025-06-01" => Err(QueryError::InvalidAirport { name: "origin", value: "MADRID".to_string() }) ; "long origin")]
    #[test_case("MAD", "B1N", "2025-06-01" => Err(QueryError::InvalidAirport { name: "destination", value: "B1N".to_string() }) ; "digit in destination")]
    #[test_case("MAD", "BCN", "01/06/2025" => Err(QueryError::InvalidDate("01/06/2025".to_string())) ; "wrong date format")]
    #[test_case("MAD", "BCN", "2025-02-30" => Err(QueryError::InvalidDate("2025-02-30".to_string())) ; "impossible date")]
    fn test_query_parsing(origin: &str, destination: &str, date: &str) -> Result<(String, String), QueryError> {
        PriceQuery::parse(origin, destination, date)
            .map(|q| (q.origin().to_string(), q.destination().to_string()))
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = PriceQuery::parse("mad", "bcn", "2025-06-01").unwrap();
        let b = mad_bcn();
        assert_eq!(a.cache_key(), "flight_data:MAD:BCN:2025-06-01");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(
            a.cache_key(),
            PriceQuery::parse("MAD", "BCN", "2025-06-02").unwrap().cache_key()
        );
    }

    #[tokio::test]
    async fn test_first_lookup_then_cached() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        let service = service(provider.clone(), Arc::new(MemoryCache::default()));

        let first = service.lookup(&mad_bcn(), false).await;
        assert_eq!(first.status, 200);
        assert_eq!(
            first.body,
            json!({"data": {
                "origin": "MAD",
                "destination": "BCN",
                "departure_date": "2025-06-01",
                "price": "100.00 EUR"
            }})
        );
        assert_eq!(provider.token_calls(), 1);
        assert_eq!(provider.search_calls(), 1);

        let second = service.lookup(&mad_bcn(), false).await;
        assert_eq!(second, first);
        assert_eq!(provider.token_calls(), 1);
        assert_eq!(provider.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_price_expires() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        let service = PriceLookupService::new(
            provider.clone(),
            Arc::new(MemoryCache::default()),
            Duration::from_secs(1800),
            Duration::from_millis(40),
        );

        service.lookup(&mad_bcn(), false).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        provider.queue_outcome(SearchOutcome::Priced("80.00 EUR".to_string()));
        let response = service.lookup(&mad_bcn(), false).await;

        assert_eq!(response.body["data"]["price"], "80.00 EUR");
        assert_eq!(provider.search_calls(), 2);
        // The token outlives the price entry
        assert_eq!(provider.token_calls(), 1);
    }

    #[tokio::test]
    async fn test_nocache_bypasses_read_and_write() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        let cache = Arc::new(MemoryCache::default());
        let service = service(provider.clone(), cache.clone());

        service.lookup(&mad_bcn(), false).await;
        assert_eq!(provider.search_calls(), 1);

        provider.queue_outcome(SearchOutcome::Priced("90.00 EUR".to_string()));
        let fresh = service.lookup(&mad_bcn(), true).await;
        assert_eq!(fresh.body["data"]["price"], "90.00 EUR");
        assert_eq!(provider.search_calls(), 2);

        service.lookup(&mad_bcn(), true).await;
        assert_eq!(provider.search_calls(), 3);

        // The bypassing calls left the earlier cached body untouched
        let cached = service.lookup(&mad_bcn(), false).await;
        assert_eq!(cached.body["data"]["price"], "100.00 EUR");
        assert_eq!(provider.search_calls(), 3);
    }

    #[tokio::test]
    async fn test_nocache_on_cold_cache_stores_nothing() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        let cache = Arc::new(MemoryCache::default());
        let service = service(provider, cache.clone());

        service.lookup(&mad_bcn(), true).await;

        assert_eq!(cache.get(&mad_bcn().cache_key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_token_reused_across_queries() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        let service = service(provider.clone(), Arc::new(MemoryCache::default()));

        for destination in ["BCN", "LHR", "CDG"] {
            let query = PriceQuery::parse("MAD", destination, "2025-06-01").unwrap();
            assert!(service.lookup(&query, false).await.is_success());
        }

        assert_eq!(provider.token_calls(), 1);
        assert_eq!(provider.search_calls(), 3);
        assert!(provider.seen_tokens.lock().iter().all(|t| t == "token-1"));
    }

    #[tokio::test]
    async fn test_rejection_passes_first_error_through() {
        let detail = json!({"status": 400, "code": 425, "title": "INVALID DATE", "detail": "Date/Time is in the past"});
        let provider = Arc::new(ScriptedProvider::new(SearchOutcome::Rejected(detail.clone())));
        let cache = Arc::new(MemoryCache::default());
        let service = service(provider.clone(), cache.clone());

        let response = service.lookup(&mad_bcn(), false).await;

        assert_eq!(response.status, 400);
        assert_eq!(response.body, json!({ "data": detail }));
        assert_eq!(cache.get(&mad_bcn().cache_key()).await.unwrap(), None);

        service.lookup(&mad_bcn(), false).await;
        assert_eq!(provider.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_500_and_not_cached() {
        let provider = Arc::new(ScriptedProvider::new(SearchOutcome::Failed(
            "timeout".to_string(),
        )));
        let cache = Arc::new(MemoryCache::default());
        let service = service(provider, cache.clone());

        let response = service.lookup(&mad_bcn(), false).await;

        assert_eq!(response.status, 500);
        assert_eq!(response.body, json!({"data": "Internal Server Error"}));
        assert_eq!(cache.get(&mad_bcn().cache_key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_and_retries_once() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        provider.queue_outcome(SearchOutcome::Unauthorized);
        let cache = Arc::new(MemoryCache::default());
        let service = service(provider.clone(), cache.clone());

        let response = service.lookup(&mad_bcn(), false).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.body["data"]["price"], "100.00 EUR");
        assert_eq!(provider.token_calls(), 2);
        assert_eq!(provider.search_calls(), 2);
        assert_eq!(
            *provider.seen_tokens.lock(),
            vec!["token-1".to_string(), "token-2".to_string()]
        );
        assert_eq!(
            cache.get(TOKEN_CACHE_KEY).await.unwrap(),
            Some(b"token-2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_repeated_unauthorized_stops_after_one_retry() {
        let provider = Arc::new(ScriptedProvider::new(SearchOutcome::Unauthorized));
        let service = service(provider.clone(), Arc::new(MemoryCache::default()));

        let response = service.lookup(&mad_bcn(), false).await;

        assert_eq!(response.status, 500);
        assert!(response.body["message"].is_string());
        assert_eq!(provider.search_calls(), 2);
        assert_eq!(provider.token_calls(), 2);
    }

    #[tokio::test]
    async fn test_token_unavailable_is_500_and_retried_next_time() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        provider.queue_token(None);
        let service = service(provider.clone(), Arc::new(MemoryCache::default()));

        let response = service.lookup(&mad_bcn(), false).await;
        assert_eq!(response.status, 500);
        assert!(response.body["message"].is_string());
        assert_eq!(provider.search_calls(), 0);

        let response = service.lookup(&mad_bcn(), false).await;
        assert_eq!(response.status, 200);
        assert_eq!(provider.token_calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_500() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        provider.queue_token(Some("stale"));
        provider.queue_token(None);
        provider.queue_outcome(SearchOutcome::Unauthorized);
        let service = service(provider.clone(), Arc::new(MemoryCache::default()));

        let response = service.lookup(&mad_bcn(), false).await;

        assert_eq!(response.status, 500);
        assert_eq!(provider.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_unavailable_is_500_with_message() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        let service = service(provider.clone(), Arc::new(UnavailableCache));

        let response = service.lookup(&mad_bcn(), false).await;

        assert_eq!(response.status, 500);
        assert_eq!(
            response.body,
            json!({"message": "Cache unavailable: connection refused"})
        );
        assert_eq!(provider.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_is_refetched() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        let cache = Arc::new(MemoryCache::default());
        cache
            .set(&mad_bcn().cache_key(), b"not json".to_vec(), None)
            .await
            .unwrap();
        let service = service(provider.clone(), cache.clone());

        let response = service.lookup(&mad_bcn(), false).await;

        assert_eq!(response.status, 200);
        assert_eq!(provider.search_calls(), 1);
        let stored = cache.get(&mad_bcn().cache_key()).await.unwrap().unwrap();
        let quote: PriceQuote = serde_json::from_slice(&stored).unwrap();
        assert_eq!(quote.price, "100.00 EUR");
    }

    #[tokio::test]
    async fn test_concurrent_cold_lookups_all_succeed() {
        let provider = Arc::new(ScriptedProvider::priced("100.00 EUR"));
        let service = Arc::new(service(provider.clone(), Arc::new(MemoryCache::default())));

        let lookups = (0..8).map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.lookup(&mad_bcn(), false).await })
        });
        for response in futures::future::join_all(lookups).await {
            assert_eq!(response.unwrap().status, 200);
        }

        // Racing callers may each fetch; afterwards everything is served from cache
        let searches = provider.search_calls();
        assert!(searches >= 1 && searches <= 8);
        service.lookup(&mad_bcn(), false).await;
        assert_eq!(provider.search_calls(), searches);
    }
}
