use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use fleetline_core::validation::{driver_analytics_query, stats_query};
use fleetline_core::Envelope;
use fleetline_storage::AnalyticsRepository;
use serde_json::json;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::{query_params, ApiState};

pub async fn drivers(
    State(state): State<ApiState>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    authenticate(&state.tokens, &headers)?;
    let query = driver_analytics_query(&query_params(raw)).map_err(|err| state.reject(err))?;

    let since = Utc::now() - Duration::days(i64::from(query.days));
    let drivers = state
        .store
        .driver_performance(since, query.status, query.limit)
        .await?;

    Ok((
        StatusCode::OK,
        Json(Envelope::ok(json!({
            "period_days": query.days,
            "status": query.status.map(|status| status.as_str()),
            "drivers": drivers,
        }))),
    )
        .into_response())
}

pub async fn stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    authenticate(&state.tokens, &headers)?;
    let query = stats_query(&query_params(raw)).map_err(|err| state.reject(err))?;

    let since = Utc::now() - Duration::days(i64::from(query.days));
    let stats = state.store.delivery_stats(since).await?;

    Ok((
        StatusCode::OK,
        Json(Envelope::ok(json!({
            "period_days": query.days,
            "stats": stats,
        }))),
    )
        .into_response())
}
