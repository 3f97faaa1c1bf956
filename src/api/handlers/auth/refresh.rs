//! Refresh token exchange.

use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::events::{EventRepo, SecurityEventType};

use super::error::{ApiError, ErrorBody};
use super::session::{clear_token_pair_headers, extract_refresh_token, token_pair_headers};
use super::state::AuthState;
use super::types::{RefreshRequest, TokenPairResponse};
use super::utils::session_meta_from_headers;

/// Exchange a refresh token for a fresh pair. The old token dies either way.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPairResponse),
        (status = 401, description = "Invalid, reused, or revoked refresh token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    // Browser flows carry the token in a cookie; API clients put it in the
    // body. The cookie wins when both are present.
    let token = extract_refresh_token(&headers)
        .or_else(|| payload.and_then(|Json(request)| request.refresh_token));
    let Some(token) = token else {
        return ApiError::Unauthenticated.into_response();
    };

    let outcome = match auth_state.tokens().refresh(&pool, &token).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Failed to refresh session: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let Some((pair, claims)) = outcome else {
        // Rejected tokens also clear the cookies so a browser stuck with a
        // revoked session stops retrying.
        let mut response_headers = HeaderMap::new();
        match clear_token_pair_headers(auth_state.config()) {
            Ok(cleared) => response_headers = cleared,
            Err(err) => error!("Failed to build clearing cookies: {err}"),
        }
        return (
            StatusCode::UNAUTHORIZED,
            response_headers,
            Json(ErrorBody {
                error: "Authentication required".to_string(),
                code: "unauthenticated".to_string(),
            }),
        )
            .into_response();
    };

    let response_headers = match token_pair_headers(&auth_state, &pair) {
        Ok(response_headers) => response_headers,
        Err(err) => {
            error!("Failed to build session cookies: {err}");
            return ApiError::Internal.into_response();
        }
    };

    if let Ok(user_id) = Uuid::parse_str(&claims.sub) {
        let meta = session_meta_from_headers(&headers, None);
        if let Err(err) =
            EventRepo::record(&pool, user_id, SecurityEventType::TokenRefreshed, &meta).await
        {
            error!("Failed to record security event: {err}");
        }
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
    use axum::http::header::{COOKIE, SET_COOKIE};
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
    async fn refresh_without_any_token_is_unauthenticated() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone())?;

        let response = refresh(HeaderMap::new(), Extension(pool), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_and_clears_cookies() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone())?;

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("refresh_token=garbage"));

        let response = refresh(headers, Extension(pool), Extension(state), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|cookie| cookie.contains("Max-Age=0")));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_body_fallback_rejects_garbage() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone())?;

        let request = RefreshRequest {
            refresh_token: Some("garbage".to_string()),
        };
        let response = refresh(
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
}
