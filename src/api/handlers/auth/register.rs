//! Account registration.

use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use rand::rngs::OsRng;
use sqlx::PgPool;
use tracing::error;

use crate::events::{EventRepo, SecurityEventType};

use super::error::{ApiError, ErrorBody};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{SignupOutcome, insert_user_and_verification};
use super::types::{MessageResponse, RegisterRequest};
use super::utils::{extract_client_ip, normalize_email, session_meta_from_headers, valid_email};

const MIN_PASSWORD_CHARS: usize = 8;
pub(super) const MAX_DISPLAY_NAME_CHARS: usize = 80;

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };

    let email_normalized = normalize_email(&request.email);
    if !valid_email(&email_normalized) {
        return ApiError::Validation("Invalid email".to_string()).into_response();
    }

    if request.password.chars().count() < MIN_PASSWORD_CHARS {
        return ApiError::Validation("Password must be at least 8 characters".to_string())
            .into_response();
    }

    // Fall back to the mailbox name; the platform profile page edits this.
    let display_name = match request.display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => email_normalized
            .split('@')
            .next()
            .unwrap_or(email_normalized.as_str())
            .to_string(),
    };
    if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return ApiError::Validation("Display name too long".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }
    if auth_state
        .rate_limiter()
        .check_email(&email_normalized, RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = match Argon2::default().hash_password(request.password.as_bytes(), &salt) {
        Ok(hash) => hash.to_string(),
        Err(err) => {
            error!("Failed to hash password: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let user_id = match insert_user_and_verification(
        &pool,
        &email_normalized,
        &display_name,
        &password_hash,
        auth_state.config(),
        auth_state.email(),
    )
    .await
    {
        Ok(SignupOutcome::Created(user_id)) => user_id,
        Ok(SignupOutcome::Conflict) => {
            return ApiError::Conflict("Email is already registered".to_string()).into_response();
        }
        Err(err) => {
            error!("Signup failed: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let meta = session_meta_from_headers(&headers, None);
    if let Err(err) =
        EventRepo::record(&pool, user_id, SecurityEventType::UserRegistered, &meta).await
    {
        error!("Failed to record security event: {err}");
    }

    (
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Account created. Check your email for a verification link.".to_string(),
        }),
    )
        .into_response()
}
