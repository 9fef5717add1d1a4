use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::geocode::{AddressRecord, GeocodeError};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

/// Plain-text error reply.
pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl From<GeocodeError> for ApiError {
    fn from(err: GeocodeError) -> Self {
        match err {
            GeocodeError::InvalidInput(_) => ApiError(StatusCode::BAD_REQUEST, err.to_string()),
            GeocodeError::StoreUnavailable(_) => ApiError(
                StatusCode::SERVICE_UNAVAILABLE,
                "Address lookup temporarily unavailable".into(),
            ),
        }
    }
}

// ─── GET /whereami ───────────────────────────────────────────────

/// Raw `lat`/`lon` values. A repeated parameter keeps its first value;
/// parsing happens in the resolver so that missing and malformed input get
/// the same plain-text 400.
#[derive(Debug, Default, PartialEq)]
pub(super) struct WhereAmIQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
}

impl WhereAmIQuery {
    pub(super) fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "lat" => &mut query.lat,
                "lon" => &mut query.lon,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        query
    }
}

pub(super) async fn whereami(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<AddressRecord>, ApiError> {
    let params = WhereAmIQuery::from_pairs(pairs);
    let record = state
        .resolver
        .resolve_raw(params.lat.as_deref(), params.lon.as_deref())
        .await
        .map_err(|e| {
            debug!(lat = ?params.lat, lon = ?params.lon, error = %e, "GET /whereami rejected");
            ApiError::from(e)
        })?;

    Ok(Json(record))
}

// ─── GET /health ─────────────────────────────────────────────────

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub(super) async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.resolver.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                error: None,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
