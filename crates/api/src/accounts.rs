use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetline_core::{Envelope, UserRole};
use fleetline_storage::{DuplicateUser, NewUser, UserRecord, UserRepository};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::{json_body, ApiState};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 254;
const MAX_PHONE_LEN: usize = 20;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    full_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    password: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: Option<String>,
    phone: Option<String>,
    password: Option<String>,
}

pub async fn register(
    State(state): State<ApiState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(body)?;

    let full_name = required(request.full_name, "full_name")?;
    if full_name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "full_name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    let email = required(request.email, "email")?;
    if !email.contains('@') || email.len() > MAX_EMAIL_LEN {
        return Err(ApiError::BadRequest("email is invalid".to_string()));
    }
    let phone = request
        .phone
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    if let Some(phone) = phone.as_deref() {
        if phone.len() > MAX_PHONE_LEN
            || !phone.chars().all(|c| c.is_ascii_digit() || c == '+')
        {
            return Err(ApiError::BadRequest("phone is invalid".to_string()));
        }
    }
    let password = request
        .password
        .ok_or_else(|| ApiError::BadRequest("password is required".to_string()))?;
    let password_len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password_len) {
        return Err(ApiError::BadRequest(format!(
            "password must be between {} and {} characters",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        )));
    }
    let role = match request.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        None => UserRole::default(),
        Some(raw) => UserRole::parse(raw)
            .ok_or_else(|| ApiError::BadRequest("role must be driver or manager".to_string()))?,
    };

    if state.store.find_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }
    if let Some(phone) = phone.as_deref() {
        if state.store.find_by_phone(phone).await?.is_some() {
            return Err(ApiError::Conflict("Phone already registered".to_string()));
        }
    }

    let hasher = state.passwords;
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|err| ApiError::Internal(anyhow::anyhow!("password hashing task failed: {}", err)))??;
    let user = state
        .store
        .create_user(NewUser {
            email,
            phone,
            full_name,
            password_hash,
            role,
        })
        .await
        .map_err(|err| match err.downcast_ref::<DuplicateUser>().copied() {
            Some(DuplicateUser::Email) => ApiError::Conflict("Email already registered".to_string()),
            Some(DuplicateUser::Phone) => ApiError::Conflict("Phone already registered".to_string()),
            None => ApiError::Internal(err),
        })?;
    let token = state.tokens.issue(&user)?;
    info!(user_id = %user.user_id, role = user.role.as_str(), "user registered");

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(session_payload(&state, token, &user))),
    )
        .into_response())
}

pub async fn login(
    State(state): State<ApiState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(body)?;
    let password = request
        .password
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest("password is required".to_string()))?;

    let email = request.email.filter(|value| !value.trim().is_empty());
    let phone = request.phone.filter(|value| !value.trim().is_empty());
    let user = match (email, phone) {
        (Some(email), _) => state.store.find_by_email(&email).await?,
        (None, Some(phone)) => state.store.find_by_phone(&phone).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "email or phone is required".to_string(),
            ))
        }
    };

    let Some(user) = user else {
        return Err(invalid_credentials());
    };
    let hasher = state.passwords;
    let stored = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
        .await
        .map_err(|err| ApiError::Internal(anyhow::anyhow!("password check task failed: {}", err)))?;
    if !verified {
        return Err(invalid_credentials());
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("Account is deactivated".to_string()));
    }

    let token = state.tokens.issue(&user)?;
    info!(user_id = %user.user_id, "user logged in");
    Ok((
        StatusCode::OK,
        Json(Envelope::ok(session_payload(&state, token, &user))),
    )
        .into_response())
}

pub async fn me(State(state): State<ApiState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let claims = authenticate(&state.tokens, &headers)?;
    let user = state
        .store
        .find_by_id(&claims.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    if !user.is_active {
        return Err(ApiError::Forbidden("Account is deactivated".to_string()));
    }
    Ok((StatusCode::OK, Json(Envelope::ok(json!({ "user": user })))).into_response())
}

fn session_payload(state: &ApiState, token: String, user: &UserRecord) -> serde_json::Value {
    json!({
        "token": token,
        "token_type": "Bearer",
        "expires_in": state.tokens.ttl().as_secs(),
        "user": user,
    })
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid credentials".to_string())
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))
}
