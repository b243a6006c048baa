// HTTP surface: GET /ping and GET /price

use crate::error::QueryError;
use crate::price::{LookupResponse, PriceLookupService, PriceQuery};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub prices: Arc<PriceLookupService>,
}

impl AppState {
    pub fn new(prices: Arc<PriceLookupService>) -> Self {
        Self { prices }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PriceParams {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub date: Option<String>,
    pub nocache: Option<String>,
}

impl PriceParams {
    /// Collects the raw query pairs. A repeated key keeps its last value; unknown keys are ignored.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "origin" => params.origin = Some(value),
                "destination" => params.destination = Some(value),
                "date" => params.date = Some(value),
                "nocache" => params.nocache = Some(value),
                _ => {}
            }
        }
        params
    }

    pub fn bypass_cache(&self) -> bool {
        self.nocache.as_deref() == Some("1")
    }

    pub fn to_query(&self) -> Result<PriceQuery, QueryError> {
        let origin = self
            .origin
            .as_deref()
            .ok_or(QueryError::MissingParameter("origin"))?;
        let destination = self
            .destination
            .as_deref()
            .ok_or(QueryError::MissingParameter("destination"))?;
        let date = self
            .date
            .as_deref()
            .ok_or(QueryError::MissingParameter("date"))?;
        PriceQuery::parse(origin, destination, date)
    }
}

impl IntoResponse for LookupResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

// Same shape as a provider error object, so clients handle both alike
fn invalid_query(error: &QueryError) -> LookupResponse {
    LookupResponse::data(
        400,
        json!({
            "status": 400,
            "title": "INVALID QUERY PARAMETER",
            "detail": error.to_string(),
        }),
    )
}

/// GET /ping
pub async fn ping() -> Json<Value> {
    Json(json!({ "data": "pong" }))
}

/// GET /price?origin=..&destination=..&date=..&nocache=1
pub async fn price(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> LookupResponse {
    let params = PriceParams::from_pairs(pairs);
    let query = match params.to_query() {
        Ok(query) => query,
        Err(e) => {
            info!("Rejected price request: {}", e);
            return invalid_query(&e);
        }
    };

    state.prices.lookup(&query, params.bypass_cache()).await
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/price", get(price))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
