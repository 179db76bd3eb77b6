#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use fleetline_api::config::ApiConfig;
use fleetline_api::{build_router, build_state, ApiState};
use fleetline_mapping::{MapTransport, ScriptedTransport};
use fleetline_observability::AppMetrics;
use fleetline_storage::{MemoryStore, Store};
use serde_json::{json, Value};
use tower::ServiceExt;

pub struct Harness {
    pub app: Router,
    pub state: ApiState,
    pub transport: Arc<ScriptedTransport>,
    pub store: MemoryStore,
}

pub fn config(extra: &[(&str, &str)]) -> ApiConfig {
    let mut pairs = vec![
        ("FLEET_JWT_SECRET", "integration-secret"),
        ("FLEET_VIETMAP_API_KEY", "integration-key"),
        ("FLEET_VIETMAP_BASE_URL", "https://maps.example.test/api"),
        ("FLEET_PASSWORD_ITERATIONS", "1000"),
        ("FLEET_UPSTREAM_BACKOFF_MS", "1"),
    ];
    pairs.extend_from_slice(extra);
    ApiConfig::from_lookup(move |key: &str| {
        pairs
            .iter()
            .rev()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    })
    .expect("test config should load")
}

pub fn harness() -> Harness {
    harness_with(&[])
}

pub fn harness_with(extra: &[(&str, &str)]) -> Harness {
    let config = config(extra);
    let store = MemoryStore::new();
    let transport = Arc::new(ScriptedTransport::default());
    let state = build_state(
        &config,
        Store::Memory(store.clone()),
        transport.clone() as Arc<dyn MapTransport>,
        AppMetrics::shared(),
    );

    Harness {
        app: build_router(state.clone()),
        state,
        transport,
        store,
    }
}

impl Harness {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(get(uri, None, None)).await
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.send(request).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    /// Registers an account and returns its bearer token and user id.
    pub async fn register(&self, email: &str, role: &str) -> (String, String) {
        let (status, body) = self
            .call(post_json(
                "/api/auth/register",
                json!({
                    "full_name": "Test User",
                    "email": email,
                    "password": "s3cure-password",
                    "role": role,
                }),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        let token = body["data"]["token"].as_str().expect("token").to_string();
        let user_id = body["data"]["user"]["user_id"]
            .as_str()
            .expect("user id")
            .to_string();
        (token, user_id)
    }
}

pub fn get(uri: &str, token: Option<&str>, client_ip: Option<&str>) -> Request<Body> {
    request("GET", uri, token, client_ip, Body::empty())
}

pub fn post_json(uri: &str, payload: Value, token: Option<&str>) -> Request<Body> {
    request("POST", uri, token, None, Body::from(payload.to_string()))
}

pub fn patch(uri: &str, token: Option<&str>) -> Request<Body> {
    request("PATCH", uri, token, None, Body::empty())
}

fn request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    client_ip: Option<&str>,
    body: Body,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if let Some(ip) = client_ip {
        builder = builder.header("x-forwarded-for", ip);
    }
    builder.body(body).expect("valid request")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
