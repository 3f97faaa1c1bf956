//! Authenticated self-service endpoints.
//!
//! Flow Overview:
//! 1) Authenticate via bearer token or session cookie.
//! 2) Resolve the current user or their sessions from the database.
//! 3) Session revocation is scoped to the owner; other users' sessions look
//!    like they do not exist.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::events::{EventRepo, SecurityEventType};
use crate::sessions::SessionRepo;

use super::error::{ApiError, ErrorBody};
use super::principal::require_auth;
use super::state::AuthState;
use super::storage::lookup_user_by_id;
use super::types::{MeResponse, SessionInfo, SessionListResponse};
use super::utils::session_meta_from_headers;

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "The authenticated user's profile", body = MeResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn get_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match lookup_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(MeResponse {
                id: user.id.to_string(),
                email: user.email,
                display_name: user.display_name,
                role: user.role,
                email_verified: user.email_verified_at.is_some(),
                two_factor_enabled: user.two_factor_enabled,
                created_at: rfc3339(user.created_at),
            }),
        )
            .into_response(),
        // A valid session pointing at a missing user row should not happen;
        // treat it as an expired login rather than a 404.
        Ok(None) => ApiError::Unauthenticated.into_response(),
        Err(err) => {
            error!("Failed to fetch profile: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Every session for the user, active and revoked alike, newest first.
#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Sessions for the authenticated user", body = SessionListResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match SessionRepo::list_for_user(&pool, principal.user_id).await {
        Ok(sessions) => {
            let sessions = sessions
                .into_iter()
                .map(|session| SessionInfo {
                    id: session.id.to_string(),
                    user_agent: session.user_agent,
                    ip: session.ip,
                    device_info: session.device_info,
                    created_at: rfc3339(session.created_at),
                    expires_at: rfc3339(session.expires_at),
                    last_seen_at: rfc3339(session.last_seen_at),
                    is_active: session.is_active,
                    current: session.id == principal.session_id,
                })
                .collect();
            (StatusCode::OK, Json(SessionListResponse { sessions })).into_response()
        }
        Err(err) => {
            error!("Failed to list sessions: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Revoke one session by id. Only the owner's sessions are visible here.
#[utoipa::path(
    delete,
    path = "/v1/auth/sessions/{id}",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 404, description = "No such session for this user", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn revoke_session(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    // An unparseable id cannot name any session.
    let Ok(session_id) = Uuid::parse_str(id.trim()) else {
        return ApiError::NotFound.into_response();
    };

    match SessionRepo::revoke(&pool, principal.user_id, session_id).await {
        Ok(true) => {
            let meta = session_meta_from_headers(&headers, None);
            if let Err(err) = EventRepo::record(
                &pool,
                principal.user_id,
                SecurityEventType::SessionRevoked,
                &meta,
            )
            .await
            {
                error!("Failed to record security event: {err}");
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => ApiError::NotFound.into_response(),
        Err(err) => {
            error!("Failed to revoke session: {err}");
            ApiError::Internal.into_response()
        }
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
    async fn get_me_requires_auth() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone())?;

        let response = get_me(HeaderMap::new(), Extension(pool), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn list_sessions_requires_auth() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone())?;

        let response = list_sessions(HeaderMap::new(), Extension(pool), Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_session_requires_auth() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone())?;

        let response = revoke_session(
            Path("not-a-uuid".to_string()),
            HeaderMap::new(),
            Extension(pool),
            Extension(state),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[test]
    fn rfc3339_renders_utc_seconds() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T10:20:30.456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(rfc3339(ts), "2026-03-01T10:20:30Z");
    }
}
