// Flight price lookup proxy with token and result caching

pub mod amadeus;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod price;
pub mod token;

// Re-export key types for convenience
pub use amadeus::{AccessToken, AmadeusClient, FlightProvider, SearchOutcome};
pub use api::{build_router, AppState};
pub use cache::{CacheConfig, CacheStatsReport, CacheStore, MemoryCache};
pub use config::{CachePolicy, Config, ProviderConfig};
pub use error::{CacheError, ConfigError, LookupError, QueryError, TokenError};
pub use price::{LookupResponse, PriceLookupService, PriceQuery, PriceQuote};
pub use token::TokenManager;
