use axum::extract::rejection::JsonRejection;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetline_core::validation::{
    autocomplete_query, geocode_query, isochrone_query, matrix_query, nearby_query, place_query,
    reverse_query, route_query,
};
use fleetline_core::{Envelope, ProxyRequestSpec, QueryParams, ValidationError};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::{json_body, query_params, ApiState};

/// Body of the older dashboard's `POST /api/map/geocode`.
#[derive(Debug, Deserialize)]
pub struct LegacyGeocodeRequest {
    address: Option<String>,
}

/// Body of the older dashboard's `POST /api/map/reverse-geocode`. Coordinates may arrive as
/// numbers or strings.
#[derive(Debug, Deserialize)]
pub struct LegacyReverseRequest {
    lat: Option<Value>,
    lng: Option<Value>,
}

/// Validates, forwards, and wraps one upstream call. Nothing leaves the process when
/// validation fails.
async fn proxy(
    state: &ApiState,
    parsed: Result<ProxyRequestSpec, ValidationError>,
) -> Result<Response, ApiError> {
    let spec = parsed.map_err(|err| state.reject(err))?;
    let data = state.map.fetch(&spec).await?;
    Ok((StatusCode::OK, Json(Envelope::upstream(data))).into_response())
}

pub async fn geocode(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let params = query_params(raw);
    proxy(&state, geocode_query(&params).map(ProxyRequestSpec::Geocode)).await
}

pub async fn autocomplete(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let params = query_params(raw);
    proxy(
        &state,
        autocomplete_query(&params).map(ProxyRequestSpec::Autocomplete),
    )
    .await
}

pub async fn place(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let params = query_params(raw);
    proxy(&state, place_query(&params).map(ProxyRequestSpec::Place)).await
}

pub async fn reverse_geocode(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let params = query_params(raw);
    proxy(
        &state,
        reverse_query(&params).map(ProxyRequestSpec::ReverseGeocode),
    )
    .await
}

pub async fn route(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let params = query_params(raw);
    proxy(&state, route_query(&params).map(ProxyRequestSpec::Route)).await
}

pub async fn isochrone(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let params = query_params(raw);
    proxy(&state, isochrone_query(&params).map(ProxyRequestSpec::Isochrone)).await
}

pub async fn matrix(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let params = query_params(raw);
    proxy(&state, matrix_query(&params).map(ProxyRequestSpec::Matrix)).await
}

pub async fn nearby(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let params = query_params(raw);
    proxy(&state, nearby_query(&params).map(ProxyRequestSpec::Nearby)).await
}

pub async fn legacy_geocode(
    State(state): State<ApiState>,
    body: Result<Json<LegacyGeocodeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(body)?;
    let params = QueryParams::from_pairs(request.address.map(|address| ("address", address)));
    proxy(&state, geocode_query(&params).map(ProxyRequestSpec::Geocode)).await
}

pub async fn legacy_reverse_geocode(
    State(state): State<ApiState>,
    body: Result<Json<LegacyReverseRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(body)?;
    let params = QueryParams::from_pairs(
        [("lat", request.lat), ("lng", request.lng)]
            .into_iter()
            .filter_map(|(key, value)| scalar_param(value?).map(|value| (key, value))),
    );
    proxy(
        &state,
        reverse_query(&params).map(ProxyRequestSpec::ReverseGeocode),
    )
    .await
}

fn scalar_param(value: Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text),
        _ => None,
    }
}
