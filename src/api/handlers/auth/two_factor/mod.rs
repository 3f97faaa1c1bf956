//! Two-factor authentication handlers.
//!
//! Flow overview:
//! 1) `totp/setup` stores a pending secret and a fresh recovery-code batch.
//! 2) `totp/verify` confirms the first code and flips the account flag.
//! 3) Password login for a two-factor account returns an opaque challenge
//!    instead of tokens; `totp/verify-login` consumes it and mints the
//!    session.
//! 4) Recovery codes are single-use; regeneration replaces the whole batch.
//!
//! Security boundaries:
//! - A challenge admits exactly one verification attempt; a failed factor
//!   sends the user back to password login.
//! - Only salted Argon2id hashes of recovery codes are persisted.

mod recovery;
mod storage;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use tracing::{error, warn};
use uuid::Uuid;

use crate::events::{EventRepo, SecurityEventType};
use crate::sessions::SessionMeta;
use crate::totp::ConfirmOutcome;

use super::error::{ApiError, ErrorBody};
use super::principal::require_auth;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::token_pair_headers;
use super::state::AuthState;
use super::storage::{consume_login_challenge, lookup_user_by_id, set_two_factor_enabled};
use super::types::{
    RecoveryCodeStatusResponse, RecoveryCodesResponse, TokenPairResponse, TotpSetupResponse,
    TotpVerifyRequest, TwoFactorDisableRequest, TwoFactorLoginRequest,
};
use super::utils::{extract_client_ip, hash_challenge_token, session_meta_from_headers};

/// Begin TOTP enrollment: pending secret, provisioning QR, and a fresh
/// recovery-code batch. Re-running setup replaces both.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/totp/setup",
    responses(
        (status = 200, description = "Enrollment material", body = TotpSetupResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 409, description = "Two-factor already enabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn totp_setup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match lookup_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) if user.two_factor_enabled => {
            return ApiError::Conflict("Two-factor authentication is already enabled".to_string())
                .into_response();
        }
        Ok(Some(_)) => {}
        Ok(None) => return ApiError::Unauthenticated.into_response(),
        Err(err) => {
            error!("Failed to load user for two-factor setup: {err}");
            return ApiError::Internal.into_response();
        }
    }

    let enrollment = match auth_state
        .totp()
        .enroll_begin(principal.user_id, &principal.email)
        .await
    {
        Ok(enrollment) => enrollment,
        Err(err) => {
            error!("Failed to begin TOTP enrollment: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let batch = match recovery::RecoveryCodeBatch::generate() {
        Ok(batch) => batch,
        Err(err) => {
            error!("Failed to generate recovery codes: {err}");
            return ApiError::Internal.into_response();
        }
    };

    if let Err(err) = storage::replace_recovery_codes(&pool, principal.user_id, &batch).await {
        error!("Failed to save recovery codes: {err}");
        return ApiError::Internal.into_response();
    }

    (
        StatusCode::OK,
        Json(TotpSetupResponse {
            secret: enrollment.secret_base32,
            otpauth_url: enrollment.otpauth_url,
            qr_png_base64: enrollment.qr_png_base64,
            recovery_codes: batch.codes,
        }),
    )
        .into_response()
}

/// Confirm the first TOTP code and enable two-factor on the account.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/totp/verify",
    request_body = TotpVerifyRequest,
    responses(
        (status = 204, description = "Two-factor enabled"),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 409, description = "Two-factor already enabled", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn totp_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TotpVerifyRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TwoFactorVerify)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }
    if auth_state
        .rate_limiter()
        .check_email(&principal.email, RateLimitAction::TwoFactorVerify)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }

    match auth_state
        .totp()
        .enroll_confirm(principal.user_id, &request.code)
        .await
    {
        Ok(ConfirmOutcome::Enabled) => {}
        Ok(ConfirmOutcome::AlreadyEnabled) => {
            let flagged = match lookup_user_by_id(&pool, principal.user_id).await {
                Ok(user) => user.is_some_and(|user| user.two_factor_enabled),
                Err(err) => {
                    error!("Failed to load user for enrollment confirm: {err}");
                    return ApiError::Internal.into_response();
                }
            };
            if flagged {
                return ApiError::Conflict(
                    "Two-factor authentication is already enabled".to_string(),
                )
                .into_response();
            }
            // Confirmed credential with the flag still off means an earlier
            // verify was interrupted; re-check the code and finish the flip.
            match auth_state.totp().verify(principal.user_id, &request.code).await {
                Ok(true) => {}
                Ok(false) => {
                    return ApiError::Validation("Incorrect code".to_string()).into_response();
                }
                Err(err) => {
                    error!("Failed to verify TOTP code: {err}");
                    return ApiError::Internal.into_response();
                }
            }
        }
        Ok(ConfirmOutcome::IncorrectCode) => {
            return ApiError::Validation("Incorrect code".to_string()).into_response();
        }
        Ok(ConfirmOutcome::NotEnrolled) => {
            return ApiError::Validation("Two-factor setup has not been started".to_string())
                .into_response();
        }
        Err(err) => {
            error!("Failed to confirm TOTP enrollment: {err}");
            return ApiError::Internal.into_response();
        }
    }

    if let Err(err) = set_two_factor_enabled(&pool, principal.user_id, true).await {
        error!("Failed to enable two-factor flag: {err}");
        return ApiError::Internal.into_response();
    }

    let meta = session_meta_from_headers(&headers, None);
    record_event(
        &pool,
        principal.user_id,
        SecurityEventType::TwoFactorEnabled,
        &meta,
    )
    .await;

    StatusCode::NO_CONTENT.into_response()
}

/// Complete a two-factor login challenge with a TOTP or recovery code.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/totp/verify-login",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Login complete", body = TokenPairResponse),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 401, description = "Invalid challenge or code", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
#[allow(clippy::too_many_lines)]
pub async fn totp_verify_login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwoFactorLoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };

    if request.code.is_none() && request.recovery_code.is_none() {
        return ApiError::Validation("Provide a code or a recovery code".to_string())
            .into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TwoFactorVerify)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }

    // One verification attempt per challenge: consumption happens before
    // the factor check, so a failed code sends the user back to password
    // login instead of opening a brute-force window.
    let challenge_hash = hash_challenge_token(&request.challenge);
    let record = match consume_login_challenge(&pool, &challenge_hash).await {
        Ok(Some(record)) => record,
        Ok(None) => return ApiError::Unauthenticated.into_response(),
        Err(err) => {
            error!("Failed to consume login challenge: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let user = match lookup_user_by_id(&pool, record.user_id).await {
        Ok(Some(user)) if user.two_factor_enabled => user,
        Ok(_) => return ApiError::Unauthenticated.into_response(),
        Err(err) => {
            error!("Failed to load user for login challenge: {err}");
            return ApiError::Internal.into_response();
        }
    };

    // The challenge row carries the context of the password step; the
    // verify request may refresh the device summary.
    let mut meta = record.meta;
    if request.device_info.is_some() {
        meta.device_info = request.device_info;
    }

    if let Some(code) = request.code.as_deref() {
        let valid = match auth_state.totp().verify(user.id, code).await {
            Ok(valid) => valid,
            Err(err) => {
                error!("Failed to verify TOTP code: {err}");
                return ApiError::Internal.into_response();
            }
        };
        if !valid {
            record_event(&pool, user.id, SecurityEventType::LoginFailed, &meta).await;
            return ApiError::Unauthenticated.into_response();
        }
    } else if let Some(code) = request.recovery_code.as_deref() {
        let hashes = match storage::list_unused_code_hashes(&pool, user.id).await {
            Ok(hashes) => hashes,
            Err(err) => {
                error!("Failed to list recovery codes: {err}");
                return ApiError::Internal.into_response();
            }
        };

        let matched = match find_matching_hash(code, &hashes) {
            Ok(Some(hash)) => hash,
            Ok(None) => {
                warn!(user_id = %user.id, "Recovery code rejected");
                record_event(&pool, user.id, SecurityEventType::LoginFailed, &meta).await;
                return ApiError::Unauthenticated.into_response();
            }
            Err(err) => {
                warn!(user_id = %user.id, "Recovery code attempt failed: {err}");
                record_event(&pool, user.id, SecurityEventType::LoginFailed, &meta).await;
                return ApiError::Unauthenticated.into_response();
            }
        };

        match storage::consume_recovery_code(&pool, user.id, &matched).await {
            Ok(true) => {}
            Ok(false) => {
                // Lost a race with a concurrent attempt on the same code.
                warn!(user_id = %user.id, "Recovery code already consumed");
                record_event(&pool, user.id, SecurityEventType::LoginFailed, &meta).await;
                return ApiError::Unauthenticated.into_response();
            }
            Err(err) => {
                error!("Failed to consume recovery code: {err}");
                return ApiError::Internal.into_response();
            }
        }

        record_event(&pool, user.id, SecurityEventType::RecoveryCodeUsed, &meta).await;
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

    record_event(&pool, user.id, SecurityEventType::Login, &meta).await;

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

/// Turn two-factor off. Requires a valid TOTP code.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/disable",
    request_body = TwoFactorDisableRequest,
    responses(
        (status = 204, description = "Two-factor disabled"),
        (status = 400, description = "Validation error", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 409, description = "Two-factor not enabled", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn two_factor_disable(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TwoFactorDisableRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let Some(Json(request)) = payload else {
        return ApiError::Validation("Missing payload".to_string()).into_response();
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TwoFactorVerify)
        == RateLimitDecision::Limited
    {
        return ApiError::RateLimited.into_response();
    }

    match lookup_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) if user.two_factor_enabled => {}
        Ok(Some(_) | None) => {
            return ApiError::Conflict("Two-factor authentication is not enabled".to_string())
                .into_response();
        }
        Err(err) => {
            error!("Failed to load user for two-factor disable: {err}");
            return ApiError::Internal.into_response();
        }
    }

    match auth_state.totp().verify(principal.user_id, &request.code).await {
        Ok(true) => {}
        Ok(false) => return ApiError::Validation("Incorrect code".to_string()).into_response(),
        Err(err) => {
            error!("Failed to verify TOTP code: {err}");
            return ApiError::Internal.into_response();
        }
    }

    // The flag gates every two-factor decision, so it flips first; credential
    // and code cleanup may lag and is repaired by the next setup.
    if let Err(err) = set_two_factor_enabled(&pool, principal.user_id, false).await {
        error!("Failed to disable two-factor flag: {err}");
        return ApiError::Internal.into_response();
    }

    if let Err(err) = auth_state.totp().disable(principal.user_id).await {
        error!("Failed to delete TOTP credential: {err}");
    }
    if let Err(err) = storage::delete_recovery_codes(&pool, principal.user_id).await {
        error!("Failed to delete recovery codes: {err}");
    }

    let meta = session_meta_from_headers(&headers, None);
    record_event(
        &pool,
        principal.user_id,
        SecurityEventType::TwoFactorDisabled,
        &meta,
    )
    .await;

    StatusCode::NO_CONTENT.into_response()
}

/// Count of recovery codes the user has not consumed yet.
#[utoipa::path(
    get,
    path = "/v1/auth/two-factor/recovery-codes",
    responses(
        (status = 200, description = "Remaining code count", body = RecoveryCodeStatusResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn recovery_code_status(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match storage::count_unused_codes(&pool, principal.user_id).await {
        Ok(remaining) => (
            StatusCode::OK,
            Json(RecoveryCodeStatusResponse { remaining }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to count recovery codes: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Replace the active recovery-code batch; the previous batch stops working.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/recovery-codes",
    responses(
        (status = 200, description = "Fresh batch, shown once", body = RecoveryCodesResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 409, description = "Two-factor not enabled", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn regenerate_recovery_codes(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match lookup_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) if user.two_factor_enabled => {}
        Ok(Some(_) | None) => {
            return ApiError::Conflict("Two-factor authentication is not enabled".to_string())
                .into_response();
        }
        Err(err) => {
            error!("Failed to load user for recovery code regeneration: {err}");
            return ApiError::Internal.into_response();
        }
    }

    let batch = match recovery::RecoveryCodeBatch::generate() {
        Ok(batch) => batch,
        Err(err) => {
            error!("Failed to generate recovery codes: {err}");
            return ApiError::Internal.into_response();
        }
    };

    if let Err(err) = storage::replace_recovery_codes(&pool, principal.user_id, &batch).await {
        error!("Failed to save recovery codes: {err}");
        return ApiError::Internal.into_response();
    }

    let meta = session_meta_from_headers(&headers, None);
    record_event(
        &pool,
        principal.user_id,
        SecurityEventType::RecoveryCodesRegenerated,
        &meta,
    )
    .await;

    (
        StatusCode::OK,
        Json(RecoveryCodesResponse { codes: batch.codes }),
    )
        .into_response()
}

fn find_matching_hash(code: &str, hashes: &[String]) -> Result<Option<String>> {
    for hash in hashes {
        if recovery::verify_recovery_code(code, hash)? {
            return Ok(Some(hash.clone()));
        }
    }
    Ok(None)
}

// Audit writes never fail the request they describe.
async fn record_event(
    pool: &PgPool,
    user_id: Uuid,
    event_type: SecurityEventType,
    meta: &SessionMeta,
) {
    if let Err(err) = EventRepo::record(pool, user_id, event_type, meta).await {
        error!("Failed to record security event: {err}");
    }
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

    fn test_state(pool: PgPool) -> Result<AuthState> {
        Ok(AuthState::new(
            AuthConfig::new("https://thanawy.app".to_string()),
            TokenService::new(SecretString::from("test-secret".to_string())),
            TotpService::new(pool, "ThanaWy".to_string()),
            ProviderRegistry::new(None, None)?,
            Arc::new(NoopRateLimiter) as Arc<dyn RateLimiter>,
            Arc::new(LogEmailSender) as Arc<dyn EmailSender>,
        ))
    }

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn totp_setup_requires_auth() -> Result<()> {
        let pool = lazy_pool()?;
        let state = Arc::new(test_state(pool.clone())?);

        let response = totp_setup(HeaderMap::new(), Extension(pool), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn totp_verify_login_requires_payload() -> Result<()> {
        let pool = lazy_pool()?;
        let state = Arc::new(test_state(pool.clone())?);

        let response = totp_verify_login(HeaderMap::new(), Extension(pool), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn totp_verify_login_requires_a_factor() -> Result<()> {
        let pool = lazy_pool()?;
        let state = Arc::new(test_state(pool.clone())?);

        let request = TwoFactorLoginRequest {
            challenge: "opaque".to_string(),
            code: None,
            recovery_code: None,
            device_info: None,
        };
        let response = totp_verify_login(
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

    #[tokio::test]
    async fn two_factor_disable_requires_auth() -> Result<()> {
        let pool = lazy_pool()?;
        let state = Arc::new(test_state(pool.clone())?);

        let request = TwoFactorDisableRequest {
            code: "123456".to_string(),
        };
        let response = two_factor_disable(
            HeaderMap::new(),
            Extension(pool),
            Extension(state),
            Some(Json(request)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn recovery_code_status_requires_auth() -> Result<()> {
        let pool = lazy_pool()?;
        let state = Arc::new(test_state(pool.clone())?);

        let response = recovery_code_status(HeaderMap::new(), Extension(pool), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[test]
    fn find_matching_hash_picks_the_right_code() -> Result<()> {
        let batch = recovery::RecoveryCodeBatch::generate()?;
        let code = batch
            .codes
            .first()
            .ok_or_else(|| anyhow::anyhow!("empty batch"))?;

        let matched = find_matching_hash(code, &batch.code_hashes)?;
        assert_eq!(matched.as_ref(), batch.code_hashes.first());

        let matched = find_matching_hash("ABCD-EFGH-9999", &batch.code_hashes)?;
        assert!(matched.is_none());
        Ok(())
    }
}
