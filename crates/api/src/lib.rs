mod accounts;
mod analytics;
pub mod auth;
pub mod config;
pub mod error;
mod map_proxy;
mod notifications;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, MethodRouter};
use axum::{body::Body, Json, Router};
use fleetline_core::{QueryParams, ValidationError};
use fleetline_mapping::{MapClient, MapTransport, ReqwestTransport};
use fleetline_observability::AppMetrics;
use fleetline_storage::Store;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::{PasswordHasher, TokenIssuer};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::rate_limit::{rate_limit_middleware, RateLimitRegistry, RouteClass, RouteLimit};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<Store>,
    pub map: MapClient,
    pub limits: RateLimitRegistry,
    pub tokens: Arc<TokenIssuer>,
    pub passwords: PasswordHasher,
    pub metrics: Arc<AppMetrics>,
    pub allowed_origins: Arc<Vec<String>>,
}

impl ApiState {
    /// Counts a validation failure and turns it into a 400.
    pub fn reject(&self, err: ValidationError) -> ApiError {
        self.metrics.inc_validation_rejected();
        debug!(error = %err, "request rejected by validation");
        ApiError::Validation(err)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    storage: &'static str,
    metrics: fleetline_observability::MetricsSnapshot,
    rate_limit_keys: std::collections::BTreeMap<&'static str, usize>,
}

/// Wires state from already-built collaborators. Tests pass an in-memory store and a
/// scripted transport here.
pub fn build_state(
    config: &ApiConfig,
    store: Store,
    transport: Arc<dyn MapTransport>,
    metrics: Arc<AppMetrics>,
) -> ApiState {
    ApiState {
        store: Arc::new(store),
        map: MapClient::new(config.map.clone(), transport, metrics.clone()),
        limits: RateLimitRegistry::from_settings(&config.rate_limits),
        tokens: Arc::new(TokenIssuer::new(&config.jwt_secret, config.token_ttl)),
        passwords: PasswordHasher::new(config.password_iterations),
        metrics,
        allowed_origins: Arc::new(config.allowed_origins.clone()),
    }
}

pub async fn build_app(config: &ApiConfig) -> Result<Router> {
    let metrics = AppMetrics::shared();

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };

    let transport = ReqwestTransport::new(config.map.timeout, config.map.connect_timeout)
        .context("failed to build HTTP client")?;

    let state = build_state(config, store, Arc::new(transport), metrics);
    state.limits.spawn_sweeper();
    info!(
        storage = state.store.backend_name(),
        upstream = %config.map.base_url,
        "api state initialized"
    );

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    let limited = |class: RouteClass, route: MethodRouter<ApiState>| -> MethodRouter<ApiState> {
        route.layer(middleware::from_fn_with_state(
            RouteLimit {
                class,
                limiter: state.limits.limiter(class),
                metrics: state.metrics.clone(),
            },
            rate_limit_middleware,
        ))
    };

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/auth/register",
            limited(RouteClass::Auth, post(accounts::register)),
        )
        .route(
            "/api/auth/login",
            limited(RouteClass::Auth, post(accounts::login)),
        )
        .route("/api/auth/me", limited(RouteClass::Auth, get(accounts::me)))
        .route(
            "/api/notifications",
            limited(
                RouteClass::Notifications,
                get(notifications::list).post(notifications::create),
            ),
        )
        .route(
            "/api/notifications/unread-count",
            limited(RouteClass::Notifications, get(notifications::unread_count)),
        )
        .route(
            "/api/notifications/read-all",
            limited(RouteClass::Notifications, patch(notifications::mark_all_read)),
        )
        .route(
            "/api/notifications/{id}/read",
            limited(RouteClass::Notifications, patch(notifications::mark_read)),
        )
        .route(
            "/api/analytics/drivers",
            limited(RouteClass::Analytics, get(analytics::drivers)),
        )
        .route(
            "/api/analytics/stats",
            limited(RouteClass::Analytics, get(analytics::stats)),
        )
        .route(
            "/api/map/geocode",
            limited(
                RouteClass::Geocode,
                get(map_proxy::geocode).post(map_proxy::legacy_geocode),
            ),
        )
        .route(
            "/api/map/autocomplete",
            limited(RouteClass::Geocode, get(map_proxy::autocomplete)),
        )
        .route(
            "/api/map/place",
            limited(RouteClass::Geocode, get(map_proxy::place)),
        )
        .route(
            "/api/map/reverse-geocode",
            limited(
                RouteClass::ReverseGeocode,
                get(map_proxy::reverse_geocode).post(map_proxy::legacy_reverse_geocode),
            ),
        )
        .route(
            "/api/map/reverse",
            limited(RouteClass::ReverseGeocode, get(map_proxy::reverse_geocode)),
        )
        .route(
            "/api/map/route",
            limited(RouteClass::Routing, get(map_proxy::route)),
        )
        .route(
            "/api/map/isochrone",
            limited(RouteClass::Isochrone, get(map_proxy::isochrone)),
        )
        .route(
            "/api/map/matrix",
            limited(RouteClass::Matrix, get(map_proxy::matrix)),
        )
        .route(
            "/api/map/nearby",
            limited(RouteClass::Nearby, get(map_proxy::nearby)),
        )
        .fallback(not_found)
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_metrics_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: fleetline_core::now_rfc3339(),
        storage: state.store.backend_name(),
        metrics: state.metrics.snapshot(),
        rate_limit_keys: state.limits.key_counts(),
    };
    (StatusCode::OK, Json(payload))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Route not found".to_string())
}

/// Decoded query string; repeated keys are preserved.
pub(crate) fn query_params(raw: Option<String>) -> QueryParams {
    let raw = raw.unwrap_or_default();
    QueryParams::from_pairs(url::form_urlencoded::parse(raw.as_bytes()).into_owned())
}

pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| {
            ApiError::BadRequest(format!("Invalid JSON body: {}", rejection.body_text()))
        })
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::RETRY_AFTER])
}

async fn request_metrics_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    state.metrics.inc_request();
    let response = next.run(request).await;
    state.metrics.observe_latency(started.elapsed());
    response
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );

    response
}
