mod common;

use axum::http::StatusCode;
use common::{harness, harness_with, post_json};
use fleetline_mapping::{TransportError, UpstreamReply};
use serde_json::json;

#[tokio::test]
async fn invalid_coordinates_never_reach_the_provider() {
    let h = harness();

    for uri in [
        "/api/map/reverse-geocode?lat=91&lng=106.7",
        "/api/map/reverse-geocode?lat=10.7&lng=-181",
        "/api/map/reverse?lat=abc&lng=106.7",
        "/api/map/isochrone?lat=10.7&time=600",
        "/api/map/nearby?lat=10.7&lng=106.7&radius=10",
        "/api/map/route?origin=10.7&destination=10.8,106.6",
    ] {
        let (status, body) = h.get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} -> {}", uri, body);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }

    assert_eq!(h.transport.call_count(), 0);
    assert_eq!(h.state.metrics.snapshot().validation_rejected_total, 6);
}

#[tokio::test]
async fn matrix_point_count_is_enforced() {
    let h = harness();
    let points = |n: usize| vec!["10.77,106.70"; n].join(";");

    let (status, body) = h
        .get(&format!("/api/map/matrix?points={}", points(1)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "matrix requires between 2 and 25 points, got 1");

    let (status, _) = h
        .get(&format!("/api/map/matrix?points={}", points(26)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.transport.call_count(), 0);

    for n in [2, 25] {
        let (status, body) = h
            .get(&format!("/api/map/matrix?points={}", points(n)))
            .await;
        assert_eq!(status, StatusCode::OK, "{} points -> {}", n, body);
    }
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 2);
    let forwarded = calls[1]
        .query_pairs()
        .filter(|(key, _)| key == "point")
        .count();
    assert_eq!(forwarded, 25);
}

#[tokio::test]
async fn vehicle_allow_list_applies_to_routing() {
    let h = harness();
    let base = "/api/map/route?origin=10.77,106.70&destination=10.80,106.66";

    let (status, _) = h.get(&format!("{}&vehicle=car", base)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h.get(&format!("{}&vehicle=scooter", base)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("vehicle must be one of"));
    assert_eq!(h.transport.call_count(), 1);

    let (status, _) = h.get(&format!("{}&vehicle=motorbike", base)).await;
    assert_eq!(status, StatusCode::OK);
    let url = h.transport.calls()[1].clone();
    assert!(url
        .query_pairs()
        .any(|(key, value)| key == "vehicle" && value == "motorcycle"));
    assert_eq!(url.path(), "/api/route");
}

#[tokio::test]
async fn successful_calls_are_wrapped_in_the_upstream_envelope() {
    let h = harness();
    let polygon = json!({ "polygons": [{ "type": "Polygon", "coordinates": [] }] });
    h.transport.push(Ok(UpstreamReply::ok(polygon.clone())));

    let (status, body) = h
        .get("/api/map/isochrone?lat=10.7769&lng=106.7009&time=600")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], polygon);
    assert_eq!(body["source"], "VietMap API");
    let timestamp = body["timestamp"].as_str().expect("timestamp");
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());

    let url = &h.transport.calls()[0];
    assert!(url
        .query_pairs()
        .any(|(key, value)| key == "time" && value == "600"));
    assert!(url
        .query_pairs()
        .any(|(key, value)| key == "apikey" && value == "integration-key"));
}

#[tokio::test]
async fn geocode_text_is_measured_in_characters() {
    let h = harness();

    let (status, _) = h
        .get("/api/map/geocode?address=Nguy%E1%BB%85n%20Hu%E1%BB%87")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.transport.calls()[0]
        .query_pairs()
        .any(|(key, value)| key == "text" && value == "Nguyễn Huệ"));

    let (status, body) = h.get("/api/map/geocode?address=ab").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("between 3 and 200 characters"));
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn persistent_upstream_failure_is_forwarded_after_retries() {
    let h = harness();
    for _ in 0..3 {
        h.transport.push(Ok(UpstreamReply {
            status: 503,
            body: json!({ "message": "maintenance" }),
        }));
    }

    let (status, body) = h
        .get("/api/map/route?origin=10.77,106.70&destination=10.80,106.66")
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "success": false, "error": "Routing failed: 503" }));
    assert_eq!(h.transport.call_count(), 3);

    let metrics = h.state.metrics.snapshot();
    assert_eq!(metrics.upstream_retries_total, 2);
    assert_eq!(metrics.upstream_failures_total, 1);
}

#[tokio::test]
async fn client_errors_from_the_provider_are_not_retried() {
    let h = harness();
    h.transport.push(Ok(UpstreamReply {
        status: 404,
        body: json!({ "message": "unknown place" }),
    }));

    let (status, body) = h.get("/api/map/place?ref_id=vm:unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Place lookup failed: 404");
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn timeouts_become_gateway_timeouts() {
    let h = harness();
    for _ in 0..3 {
        h.transport.push(Err(TransportError::Timeout));
    }

    let (status, body) = h
        .get("/api/map/reverse-geocode?lat=10.7769&lng=106.7009")
        .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["success"], false);
    assert_eq!(h.transport.call_count(), 3);
}

#[tokio::test]
async fn retry_budget_follows_configuration() {
    let h = harness_with(&[("FLEET_UPSTREAM_MAX_ATTEMPTS", "1")]);
    h.transport.push(Err(TransportError::Connect("refused".to_string())));

    let (status, body) = h.get("/api/map/nearby?lat=10.77&lng=106.70").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Nearby search request failed"));
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn legacy_post_routes_share_validation_and_envelope() {
    let h = harness();
    h.transport.push(Ok(UpstreamReply::ok(json!([{ "ref_id": "vm:1" }]))));

    let (status, body) = h
        .call(post_json(
            "/api/map/geocode",
            json!({ "address": "1 Le Loi, District 1" }),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["ref_id"], "vm:1");
    assert_eq!(body["source"], "VietMap API");

    let (status, _) = h
        .call(post_json(
            "/api/map/reverse-geocode",
            json!({ "lat": "10.7769", "lng": 106.7009 }),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .call(post_json(
            "/api/map/reverse-geocode",
            json!({ "lat": 95, "lng": 106.7 }),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "lat must be a latitude between -90 and 90");

    let (status, body) = h
        .call(post_json("/api/map/geocode", json!({}), None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "address is required");

    assert_eq!(h.transport.call_count(), 2);
}
