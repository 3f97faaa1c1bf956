//! Password login.

use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
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
use super::session::token_pair_headers;
use super::state::AuthState;
use super::storage::{insert_login_challenge, lookup_user_by_email};
use super::types::{
    LoginRequest, TokenPairResponse, TwoFactorChallengeResponse,
};
use super::utils::{extract_client_ip, normalize_email, session_meta_from_headers, valid_email};

/// Password login. Two-factor accounts get a challenge instead of tokens.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair, or a two-factor challenge", body = TokenPairResponse),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
#[allow(clippy::too_many_lines)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
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
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }
    if auth_state
        .rate_limiter()
        .check_email(&email_normalized, RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }

    let user = match lookup_user_by_email(&pool, &email_normalized).await {
        Ok(user) => user,
        Err(err) => {
            error!("Login lookup failed: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let meta = session_meta_from_headers(&headers, request.device_info);

    // Unknown accounts and OAuth-only accounts (no password) burn one hash
    // anyway so the response time does not leak which emails exist.
    let Some(user) = user else {
        burn_one_hash(&request.password);
        return ApiError::Unauthenticated.into_response();
    };
    let Some(stored_hash) = user.password_hash.as_deref() else {
        burn_one_hash(&request.password);
        return ApiError::Unauthenticated.into_response();
    };

    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(err) => {
            // A stored hash that does not parse is corrupt; fail closed.
            error!(user_id = %user.id, "Invalid stored password hash: {err}");
            return ApiError::Unauthenticated.into_response();
        }
    };

    if Argon2::default()
        .verify_password(request.password.as_bytes(), &parsed)
        .is_err()
    {
        if let Err(err) =
            EventRepo::record(&pool, user.id, SecurityEventType::LoginFailed, &meta).await
        {
            error!("Failed to record security event: {err}");
        }
        return ApiError::Unauthenticated.into_response();
    }

    if user.two_factor_enabled {
        let challenge = match insert_login_challenge(&pool, user.id, &meta, auth_state.config())
            .await
        {
            Ok(challenge) => challenge,
            Err(err) => {
                error!("Failed to create login challenge: {err}");
                return ApiError::Internal.into_response();
            }
        };

        return (
            StatusCode::OK,
            Json(TwoFactorChallengeResponse {
                two_factor_required: true,
                challenge,
            }),
        )
            .into_response();
    }

    let pair = match auth_state
        .tokens()
        .start_session(&pool, user.id, &user.email, Some(&user.display_name), &meta)
        .await
    {
        Ok((_session, pair)) => pair,
        Err(err) => {
            error!("Failed to start session: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let response_headers = match token_pair_headers(&auth_state, &pair) {
        Ok(response_headers) => response_headers,
        Err(err) => {
            error!("Failed to build session cookies: {err}");
            return ApiError::Internal.into_response();
        }
    };

    if let Err(err) = EventRepo::record(&pool, user.id, SecurityEventType::Login, &meta).await {
        error!("Failed to record security event: {err}");
    }

    (
        StatusCode::OK,
        response_headers,
        Json(TokenPairResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: auth_state.tokens().access_ttl_seconds(),
        }),
    )
        .into_response()
}

// Costs roughly one Argon2 verification; keeps the miss path as slow as the
// hit path.
fn burn_one_hash(password: &str) {
    let salt = SaltString::generate(&mut OsRng);
    let _ = Argon2::default().hash_password(password.as_bytes(), &salt);
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::super::state::{AuthConfig, AuthState};
    use super::*;
    use crate::api::email::{EmailSender, LogEmailSender};
    use crate::oauth::ProviderRegistry;
    use crate::tokens::TokenService;
    use crate::totp::TotpService;
    use anyhow::Result;
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn test_state(pool: PgPool) -> Result<Arc<AuthState>> {
        Ok(Arc::new(AuthState::new(
            AuthConfig::new("https://thanawy.app".to_string()),
            TokenService::new(SecretString::from("test-secret".to_string())),
            TotpService::new(pool, "ThanaWy".to_string()),
            ProviderRegistry::new(None, None)?,
            Arc::new(NoopRateLimiter) as Arc<dyn RateLimiter>,
            Arc::new(LogEmailSender) as Arc<dyn EmailSender>,
        )))
    }

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn login_missing_payload() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone())?;

        let response = login(HeaderMap::new(), Extension(pool), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_rejects_invalid_email() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone())?;

        let request = LoginRequest {
            email: "double@@example.com".to_string(),
            password: "hunter2hunter2".to_string(),
            device_info: None,
        };
        let response = login(
            HeaderMap::new(),
            Extension(pool),
            Extension(state),
            Some(Json(request)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[test]
    fn burn_one_hash_accepts_any_input() {
        burn_one_hash("");
        burn_one_hash("correct horse battery staple");
    }
}
