//! Authenticated principal extraction.
//!
//! Flow Overview: take the access token from the Authorization header (or the
//! browser cookie), verify its signature and expiry, then re-check the session
//! row it points at. Revoked or expired sessions fail here no matter how much
//! lifetime the token itself has left.

use axum::http::HeaderMap;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::sessions::SessionRepo;

use super::error::ApiError;
use super::session::extract_access_token;
use super::state::AuthState;

/// Authenticated user context derived from a verified access token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
}

/// Resolve the request's access token into a principal, or return 401.
///
/// Verification failures never distinguish their cause: missing header, bad
/// signature, expired token, and revoked session all map to the same 401.
///
/// # Errors
/// Returns `ApiError::Unauthenticated` for any verification failure and
/// `ApiError::Internal` when the session store is unreachable.
pub async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<Principal, ApiError> {
    let Some(token) = extract_access_token(headers) else {
        return Err(ApiError::Unauthenticated);
    };

    let Some(claims) = state.tokens().verify_access(&token) else {
        return Err(ApiError::Unauthenticated);
    };

    let (Ok(user_id), Ok(session_id)) =
        (Uuid::parse_str(&claims.sub), Uuid::parse_str(&claims.sid))
    else {
        return Err(ApiError::Unauthenticated);
    };

    // Tokens outlive revocation; the session row is the source of truth.
    match SessionRepo::lookup_active(pool, session_id).await {
        Ok(Some(session)) if session.user_id == user_id => Ok(Principal {
            user_id,
            email: claims.email,
            session_id,
        }),
        Ok(_) => Err(ApiError::Unauthenticated),
        Err(err) => {
            error!("Failed to look up session: {err}");
            Err(ApiError::Internal)
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
    use axum::http::HeaderValue;
    use axum::http::header::AUTHORIZATION;
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

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

    #[tokio::test]
    async fn missing_token_is_unauthenticated() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let state = test_state(pool.clone())?;

        let result = require_auth(&HeaderMap::new(), &pool, &state).await;
        assert!(matches!(result, Err(ApiError::Unauthenticated)));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_token_is_unauthenticated_before_touching_db() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let state = test_state(pool.clone())?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_static("Bearer not-a-token"),
        );

        let result = require_auth(&headers, &pool, &state).await;
        assert!(matches!(result, Err(ApiError::Unauthenticated)));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_is_rejected_as_access_credential() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let state = test_state(pool.clone())?;

        let pair = state.tokens().issue(
            uuid::Uuid::new_v4(),
            "sara@example.com",
            None,
            uuid::Uuid::new_v4(),
        )?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", pair.refresh_token))?,
        );

        // Kind check fails before the session lookup, so no DB is needed.
        let result = require_auth(&headers, &pool, &state).await;
        assert!(matches!(result, Err(ApiError::Unauthenticated)));
        Ok(())
    }
}
