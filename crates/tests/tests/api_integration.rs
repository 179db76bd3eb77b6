mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use fleetline_api::build_app;
use fleetline_api::config::ApiConfig;
use fleetline_storage::UserRepository;
use serde_json::json;
use tower::ServiceExt;

use common::{get, harness, patch, post_json};

#[tokio::test]
async fn health_is_public() {
    let app = build_app(&common::config(&[]))
        .await
        .expect("app should build");

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert!(response.headers().contains_key("x-request-id"));
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn unknown_routes_use_the_error_envelope() {
    let h = harness();
    let (status, body) = h.get("/api/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "error": "Route not found" }));
}

#[test]
fn secrets_are_required_at_startup() {
    let err = ApiConfig::from_lookup(|key: &str| {
        (key == "FLEET_VIETMAP_API_KEY").then(|| "key".to_string())
    })
    .unwrap_err();
    assert!(err.to_string().contains("FLEET_JWT_SECRET"));

    let err = ApiConfig::from_lookup(|key: &str| {
        (key == "FLEET_JWT_SECRET").then(|| "secret".to_string())
    })
    .unwrap_err();
    assert!(err.to_string().contains("FLEET_VIETMAP_API_KEY"));
}

#[tokio::test]
async fn register_login_and_me() {
    let h = harness();

    let (status, body) = h
        .call(post_json(
            "/api/auth/register",
            json!({
                "full_name": "Tran Van An",
                "email": "An.Tran@Fleet.test",
                "phone": "+84901234567",
                "password": "giao-hang-nhanh",
            }),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["token_type"], "Bearer");
    assert_eq!(body["data"]["user"]["role"], "driver");
    assert_eq!(body["data"]["user"]["email"], "an.tran@fleet.test");
    assert!(body["data"]["user"].get("password_hash").is_none());

    let (status, body) = h
        .call(post_json(
            "/api/auth/register",
            json!({
                "full_name": "Someone Else",
                "email": "an.tran@fleet.test",
                "password": "another-password",
            }),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Email already registered");

    let (status, body) = h
        .call(post_json(
            "/api/auth/login",
            json!({ "phone": "+84901234567", "password": "giao-hang-nhanh" }),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = h
        .call(post_json(
            "/api/auth/login",
            json!({ "email": "an.tran@fleet.test", "password": "wrong-password" }),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, body) = h.call(get("/api/auth/me", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["full_name"], "Tran Van An");

    let (status, body) = h.get("/api/auth/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Access token required");

    let (status, _) = h
        .call(get("/api/auth/me", Some("not-a-token"), None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_registrations_for_one_email_conflict() {
    let h = harness();
    let payload = json!({
        "full_name": "Pham Quoc Bao",
        "email": "bao@fleet.test",
        "password": "giao-hang-nhanh",
    });

    let (first, second) = tokio::join!(
        h.call(post_json("/api/auth/register", payload.clone(), None)),
        h.call(post_json("/api/auth/register", payload.clone(), None)),
    );
    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);

    let conflict = if first.0 == StatusCode::CONFLICT { first.1 } else { second.1 };
    assert_eq!(
        conflict,
        json!({ "success": false, "error": "Email already registered" })
    );
}

#[tokio::test]
async fn deactivated_accounts_cannot_log_in() {
    let h = harness();
    let (token, user_id) = h.register("driver@fleet.test", "driver").await;

    assert!(h.state.store.set_user_active(&user_id, false).await.unwrap());

    let (status, body) = h
        .call(post_json(
            "/api/auth/login",
            json!({ "email": "driver@fleet.test", "password": "s3cure-password" }),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Account is deactivated");

    let (status, _) = h.call(get("/api/auth/me", Some(&token), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = h.call(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON body"));
}

#[tokio::test]
async fn notifications_flow() {
    let h = harness();
    let (manager, _) = h.register("dispatch@fleet.test", "manager").await;
    let (driver, driver_id) = h.register("rider@fleet.test", "driver").await;

    let (status, body) = h
        .call(post_json(
            "/api/notifications",
            json!({ "user_id": driver_id, "title": "New job", "message": "Pickup at District 3", "kind": "delivery" }),
            Some(&manager),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["kind"], "delivery");
    assert_eq!(body["data"]["is_read"], false);
    let first_id = body["data"]["notification_id"].as_str().unwrap().to_string();

    h.call(post_json(
        "/api/notifications",
        json!({ "user_id": driver_id, "title": "Shift", "message": "Starts at 8" }),
        Some(&manager),
    ))
    .await;

    let (status, body) = h
        .call(post_json(
            "/api/notifications",
            json!({ "user_id": "someone-else", "title": "Hi", "message": "there" }),
            Some(&driver),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Only managers can notify other users");

    let (status, body) = h
        .call(post_json(
            "/api/notifications",
            json!({ "user_id": "missing-user", "title": "Hi", "message": "there" }),
            Some(&manager),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");

    let (status, body) = h
        .call(get("/api/notifications", Some(&driver), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["unread_count"], 2);
    assert_eq!(body["data"]["notifications"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["notifications"][0]["title"], "Shift");

    // another user cannot mark the driver's notification
    let (status, _) = h
        .call(patch(
            &format!("/api/notifications/{}/read", first_id),
            Some(&manager),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = h
        .call(patch(
            &format!("/api/notifications/{}/read", first_id),
            Some(&driver),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_read"], true);

    let (_, body) = h
        .call(get("/api/notifications/unread-count", Some(&driver), None))
        .await;
    assert_eq!(body["data"]["count"], 1);

    let (status, body) = h
        .call(patch("/api/notifications/read-all", Some(&driver)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["updated"], 1);

    let (_, body) = h
        .call(get("/api/notifications?unread_only=true", Some(&driver), None))
        .await;
    assert_eq!(body["data"]["notifications"], json!([]));
    assert_eq!(body["data"]["unread_count"], 0);
}

#[tokio::test]
async fn analytics_reports_on_seeded_deliveries() {
    use chrono::{Duration, Utc};
    use fleetline_core::{DeliveryStatus, DriverStatus, VehicleType};
    use fleetline_storage::{storage_timestamp, DeliveryRecord, DriverRecord, FleetRepository};

    let h = harness();
    let (token, _) = h.register("ops@fleet.test", "manager").await;
    let now = Utc::now();

    h.store
        .upsert_driver(DriverRecord {
            driver_id: "drv-1".to_string(),
            user_id: None,
            full_name: "Le Thi Binh".to_string(),
            vehicle_type: VehicleType::Motorcycle,
            status: DriverStatus::Active,
            rating: 4.8,
            created_at: storage_timestamp(now),
        })
        .await
        .unwrap();
    for (index, status) in [
        DeliveryStatus::Delivered,
        DeliveryStatus::Delivered,
        DeliveryStatus::Cancelled,
    ]
    .into_iter()
    .enumerate()
    {
        h.store
            .insert_delivery(DeliveryRecord {
                delivery_id: format!("del-{}", index),
                driver_id: Some("drv-1".to_string()),
                status,
                distance_km: 4.0,
                fee: 30_000.0,
                created_at: storage_timestamp(now - Duration::hours(2)),
                delivered_at: None,
            })
            .await
            .unwrap();
    }

    let (status, body) = h
        .call(get("/api/analytics/drivers?days=7", Some(&token), None))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["period_days"], 7);
    let driver = &body["data"]["drivers"][0];
    assert_eq!(driver["driver_id"], "drv-1");
    assert_eq!(driver["completed_deliveries"], 2);

    let (status, body) = h
        .call(get("/api/analytics/stats", Some(&token), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stats"]["total_deliveries"], 3);

    let (status, _) = h
        .call(get("/api/analytics/drivers?days=0", Some(&token), None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
