mod common;

use axum::http::{header, StatusCode};
use common::{get, harness, harness_with, post_json};
use serde_json::json;

#[tokio::test]
async fn thirty_first_analytics_request_is_rejected_without_touching_the_store() {
    let h = harness();
    let (token, _) = h.register("manager@fleet.test", "manager").await;

    for i in 0..30 {
        let (status, body) = h
            .call(get("/api/analytics/stats", Some(&token), Some("10.0.0.1")))
            .await;
        assert_eq!(status, StatusCode::OK, "request {} failed: {}", i + 1, body);
    }
    assert_eq!(h.store.analytics_query_count(), 30);

    let response = h
        .send(get("/api/analytics/stats", Some(&token), Some("10.0.0.1")))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(
        common::body_json(response).await,
        json!({ "success": false, "error": "Rate limit exceeded. Please try again later." })
    );
    assert_eq!(h.store.analytics_query_count(), 30);

    // the driver report shares the analytics limiter
    let (status, _) = h
        .call(get("/api/analytics/drivers", Some(&token), Some("10.0.0.1")))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // another client is unaffected
    let (status, _) = h
        .call(get("/api/analytics/stats", Some(&token), Some("10.0.0.2")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.analytics_query_count(), 31);
    let metrics = h.state.metrics.snapshot();
    assert_eq!(metrics.rate_limited_total, 2);
    assert_eq!(metrics.rate_limited_by_class["analytics"], 2);
}

#[tokio::test]
async fn limiter_runs_before_validation_and_authentication() {
    let h = harness();

    for _ in 0..12 {
        let (status, _) = h
            .call(post_json("/api/auth/register", json!({ "email": "x" }), None))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, body) = h
        .call(post_json("/api/auth/register", json!({ "email": "x" }), None))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);

    // unauthenticated analytics calls still consume the budget
    for _ in 0..30 {
        let (status, _) = h.get("/api/analytics/stats").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = h.get("/api/analytics/stats").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn clients_without_forwarding_headers_share_one_bucket() {
    let h = harness_with(&[("FLEET_RATE_LIMIT_ISOCHRONE", "2")]);

    for _ in 0..2 {
        let (status, _) = h.get("/api/map/isochrone?lat=10.77&lng=106.70&time=600").await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = h.get("/api/map/isochrone?lat=10.77&lng=106.70&time=600").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(h.transport.call_count(), 2);

    let (status, _) = h
        .call(get(
            "/api/map/isochrone?lat=10.77&lng=106.70&time=600",
            None,
            Some("198.51.100.4"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn route_classes_have_independent_budgets() {
    let h = harness_with(&[("FLEET_RATE_LIMIT_MATRIX", "1")]);
    let matrix = "/api/map/matrix?points=10.77,106.70;10.80,106.66";

    assert_eq!(h.get(matrix).await.0, StatusCode::OK);
    assert_eq!(h.get(matrix).await.0, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        h.get("/api/map/route?origin=10.77,106.70&destination=10.80,106.66")
            .await
            .0,
        StatusCode::OK
    );

    let (status, health) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["rate_limit_keys"]["matrix"], 1);
    assert_eq!(health["rate_limit_keys"]["routing"], 1);
}
