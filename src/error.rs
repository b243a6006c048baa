use thiserror::Error;

// Failures of the key-value store backing the token and price caches
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Unable to obtain an access token from the provider")]
    Unavailable,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

// Anything that can go wrong while orchestrating a price lookup.
// Every variant ends up as a 500 response.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Response serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Provider rejected the refreshed access token")]
    RetryExhausted,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

// Rejections of /price query parameters, detected before any upstream call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("{name} must be a three-letter IATA code, got '{value}'")]
    InvalidAirport { name: &'static str, value: String },

    #[error("date must be formatted as yyyy-mm-dd, got '{0}'")]
    InvalidDate(String),
}
