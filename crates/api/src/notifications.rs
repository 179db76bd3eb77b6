use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetline_core::{Envelope, NotificationKind, UserRole};
use fleetline_storage::{NewNotification, NotificationRepository, UserRepository};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::{json_body, query_params, ApiState};

const MAX_TITLE_LEN: usize = 160;
const MAX_MESSAGE_LEN: usize = 2_000;
const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    user_id: Option<String>,
    title: Option<String>,
    message: Option<String>,
    kind: Option<String>,
}

pub async fn list(
    State(state): State<ApiState>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state.tokens, &headers)?;
    let params = query_params(raw);

    let unread_only = matches!(
        params.get("unread_only").or_else(|| params.get("unread")),
        Some("true") | Some("1")
    );
    let limit = match params.get("limit") {
        None => DEFAULT_LIST_LIMIT,
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|value| (1..=MAX_LIST_LIMIT).contains(value))
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "limit must be an integer between 1 and {}",
                    MAX_LIST_LIMIT
                ))
            })?,
    };

    let notifications = state
        .store
        .list_notifications(&claims.user_id, unread_only, limit)
        .await?;
    let unread = state.store.unread_notification_count(&claims.user_id).await?;

    Ok((
        StatusCode::OK,
        Json(Envelope::ok(json!({
            "notifications": notifications,
            "unread_count": unread,
        }))),
    )
        .into_response())
}

pub async fn create(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<CreateNotificationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state.tokens, &headers)?;
    let request = json_body(body)?;

    let title = bounded_text(request.title, "title", MAX_TITLE_LEN)?;
    let message = bounded_text(request.message, "message", MAX_MESSAGE_LEN)?;
    let kind = match request.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        None => NotificationKind::default(),
        Some(raw) => NotificationKind::parse(raw).ok_or_else(|| {
            ApiError::BadRequest("kind must be one of info, delivery, alert, system".to_string())
        })?,
    };

    let target = request
        .user_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| claims.user_id.clone());
    if target != claims.user_id {
        if claims.role != UserRole::Manager {
            return Err(ApiError::Forbidden(
                "Only managers can notify other users".to_string(),
            ));
        }
        if state.store.find_by_id(&target).await?.is_none() {
            return Err(ApiError::NotFound("User not found".to_string()));
        }
    }

    let notification = state
        .store
        .create_notification(NewNotification {
            user_id: target,
            title,
            message,
            kind,
        })
        .await?;
    info!(
        notification_id = %notification.notification_id,
        sender = %claims.user_id,
        kind = kind.as_str(),
        "notification created"
    );

    Ok((StatusCode::CREATED, Json(Envelope::ok(notification))).into_response())
}

pub async fn unread_count(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state.tokens, &headers)?;
    let count = state.store.unread_notification_count(&claims.user_id).await?;
    Ok((StatusCode::OK, Json(Envelope::ok(json!({ "count": count })))).into_response())
}

pub async fn mark_read(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(notification_id): Path<String>,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state.tokens, &headers)?;
    let notification = state
        .store
        .mark_notification_read(notification_id.trim(), &claims.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Notification not found".to_string()))?;
    Ok((StatusCode::OK, Json(Envelope::ok(notification))).into_response())
}

pub async fn mark_all_read(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state.tokens, &headers)?;
    let updated = state
        .store
        .mark_all_notifications_read(&claims.user_id)
        .await?;
    Ok((StatusCode::OK, Json(Envelope::ok(json!({ "updated": updated })))).into_response())
}

fn bounded_text(value: Option<String>, field: &str, max: usize) -> Result<String, ApiError> {
    let value = value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))?;
    if value.chars().count() > max {
        return Err(ApiError::BadRequest(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value)
}
