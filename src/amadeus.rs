// Upstream flight-data provider client.
// Talks to an Amadeus-style API: an OAuth2 client-credentials token endpoint and a
// flight-offer search endpoint. Every failure is folded into a `SearchOutcome` so
// nothing raised by the network or by parsing escapes this module.

use crate::config::ProviderConfig;
use crate::error::ConfigError;
use crate::price::PriceQuery;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::{error, info, warn};

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Bearer credential for the provider API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep the credential out of logs
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Result of a cheapest-offer search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// `"<total> <currency>"` of the cheapest offer
    Priced(String),
    /// The provider refused the parameters; carries its first error object
    Rejected(Value),
    /// The provider refused the bearer token
    Unauthorized,
    /// Transport error, unreadable payload or unexpected status
    Failed(String),
}

#[async_trait]
pub trait FlightProvider: Send + Sync + 'static {
    /// Requests a fresh access token. `None` means the grant failed; the cause is logged.
    async fn fetch_token(&self) -> Option<AccessToken>;

    /// Searches for the single cheapest offer matching `query`.
    async fn search_cheapest(&self, query: &PriceQuery, token: &AccessToken) -> SearchOutcome;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    data: Vec<FlightOffer>,
}

#[derive(Debug, Deserialize)]
struct FlightOffer {
    price: OfferPrice,
}

#[derive(Debug, Deserialize)]
struct OfferPrice {
    total: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ErrorsResponse {
    #[serde(default)]
    errors: Vec<Value>,
}

pub struct AmadeusClient {
    client: Client,
    config: ProviderConfig,
}

impl AmadeusClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    async fn request_token(&self) -> Result<Option<AccessToken>, reqwest::Error> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(
                "Error in fetching token from provider: status {} body {}",
                status, body
            );
            return Ok(None);
        }

        let payload: TokenResponse = response.json().await?;
        if payload.access_token.trim().is_empty() {
            error!("Error in fetching token from provider: empty access_token");
            return Ok(None);
        }
        Ok(Some(AccessToken::new(payload.access_token)))
    }

    async fn request_offers(
        &self,
        query: &PriceQuery,
        token: &AccessToken,
    ) -> Result<SearchOutcome, reqwest::Error> {
        let date = query.date_string();
        let response = self
            .client
            .get(&self.config.search_url)
            .bearer_auth(token.as_str())
            .query(&[
                ("originLocationCode", query.origin()),
                ("destinationLocationCode", query.destination()),
                ("departureDate", date.as_str()),
                ("adults", "1"),
                ("max", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        Ok(match status {
            StatusCode::OK => parse_offers(&body),
            StatusCode::BAD_REQUEST => parse_rejection(&body),
            StatusCode::UNAUTHORIZED => SearchOutcome::Unauthorized,
            other => {
                error!(
                    "Unexpected status {} from flight search: {}",
                    other.as_u16(),
                    body
                );
                SearchOutcome::Failed(format!("unexpected provider status {}", other.as_u16()))
            }
        })
    }
}

fn parse_offers(body: &str) -> SearchOutcome {
    match serde_json::from_str::<OffersResponse>(body) {
        Ok(offers) => match offers.data.into_iter().next() {
            Some(offer) => {
                SearchOutcome::Priced(format!("{} {}", offer.price.total, offer.price.currency))
            }
            None => {
                error!("Flight search returned no offers");
                SearchOutcome::Failed("provider returned no offers".to_string())
            }
        },
        Err(e) => {
            error!("Unreadable flight search payload: {}", e);
            SearchOutcome::Failed(e.to_string())
        }
    }
}

fn parse_rejection(body: &str) -> SearchOutcome {
    match serde_json::from_str::<ErrorsResponse>(body) {
        Ok(payload) => match payload.errors.into_iter().next() {
            Some(first) => SearchOutcome::Rejected(first),
            None => {
                error!("Provider returned 400 without an error list: {}", body);
                SearchOutcome::Failed("provider rejected the request without detail".to_string())
            }
        },
        Err(e) => {
            error!("Unreadable provider error payload: {}", e);
            SearchOutcome::Failed(e.to_string())
        }
    }
}

#[async_trait]
impl FlightProvider for AmadeusClient {
    async fn fetch_token(&self) -> Option<AccessToken> {
        match self.request_token().await {
            Ok(Some(token)) => {
                info!("Obtained a new access token from provider");
                Some(token)
            }
            Ok(None) => None,
            Err(e) => {
                error!("Error in fetching token from provider: {}", e);
                None
            }
        }
    }

    async fn search_cheapest(&self, query: &PriceQuery, token: &AccessToken) -> SearchOutcome {
        info!("Searching cheapest offer for {}", query);
        match self.request_offers(query, token).await {
            Ok(SearchOutcome::Unauthorized) => {
                warn!("Provider rejected the access token for {}", query);
                SearchOutcome::Unauthorized
            }
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "Error in fetching cheapest flight price from provider: {}",
                    e
                );
                SearchOutcome::Failed(e.to_string())
            }
        }
    }
}
