//! Email verification endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use tracing::error;

use crate::events::{EventRepo, SecurityEventType};

use super::error::{ApiError, ErrorBody};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{consume_verification_token, enqueue_resend_verification};
use super::types::{ResendVerificationRequest, VerifyEmailRequest};
use super::utils::{
    extract_client_ip, hash_verification_token, normalize_email, session_meta_from_headers,
    valid_email,
};

/// Consume an email verification token from the signup or resend email.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid or expired token", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };

    let token = request.token.trim();
    if token.is_empty() {
        return ApiError::Validation("Missing token".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }

    let token_hash = hash_verification_token(token);
    let user_id = match consume_verification_token(&pool, &token_hash).await {
        Ok(user_id) => user_id,
        Err(err) => {
            error!("Failed to consume verification token: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let Some(user_id) = user_id else {
        // Unknown, expired, and already-used tokens are indistinguishable.
        return ApiError::Validation("Invalid or expired token".to_string()).into_response();
    };

    let meta = session_meta_from_headers(&headers, None);
    if let Err(err) =
        EventRepo::record(&pool, user_id, SecurityEventType::EmailVerified, &meta).await
    {
        error!("Failed to record security event: {err}");
    }

    StatusCode::NO_CONTENT.into_response()
}

/// Queue another verification email. The response never reveals whether the
/// address has an account.
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 204, description = "Accepted; an email goes out when the account qualifies"),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };

    let email_normalized = normalize_email(&request.email);
    if !valid_email(&email_normalized) {
        return ApiError::Validation("Invalid email".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendVerification)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }
    if auth_state
        .rate_limiter()
        .check_email(&email_normalized, RateLimitAction::ResendVerification)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }

    // Queued, on cooldown, already verified, and no-such-account all come
    // back 204.
    if let Err(err) = enqueue_resend_verification(
        &pool,
        &email_normalized,
        auth_state.config(),
        auth_state.email(),
    )
    .await
    {
        error!("Failed to resend verification: {err}");
        return ApiError::Internal.into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}
