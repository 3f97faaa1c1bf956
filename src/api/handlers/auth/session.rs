//! Cookie plumbing for token pairs and the logout endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::events::{EventRepo, SecurityEventType};
use crate::sessions::SessionRepo;
use crate::tokens::TokenPair;

use super::principal::require_auth;
use super::state::{AuthConfig, AuthState};
use super::types::LogoutRequest;
use super::utils::session_meta_from_headers;

pub(super) const ACCESS_COOKIE_NAME: &str = "access_token";
pub(super) const REFRESH_COOKIE_NAME: &str = "refresh_token";
pub(super) const OAUTH_STATE_COOKIE_NAME: &str = "oauth_state";
pub(super) const OAUTH_REDIRECT_COOKIE_NAME: &str = "oauth_redirect";

/// Build a `HttpOnly` cookie; `Max-Age=0` clears it.
fn build_cookie(
    name: &str,
    value: &str,
    max_age_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// `Set-Cookie` headers carrying a fresh token pair for browser flows.
pub(super) fn token_pair_headers(
    state: &AuthState,
    pair: &TokenPair,
) -> Result<HeaderMap, InvalidHeaderValue> {
    // Only mark cookies secure when the frontend is served over HTTPS.
    let secure = state.config().session_cookie_secure();
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        build_cookie(
            ACCESS_COOKIE_NAME,
            &pair.access_token,
            state.tokens().access_ttl_seconds(),
            secure,
        )?,
    );
    headers.append(
        SET_COOKIE,
        build_cookie(
            REFRESH_COOKIE_NAME,
            &pair.refresh_token,
            state.tokens().refresh_ttl_seconds(),
            secure,
        )?,
    );
    Ok(headers)
}

/// `Set-Cookie` headers clearing both token cookies.
pub(super) fn clear_token_pair_headers(
    config: &AuthConfig,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let secure = config.session_cookie_secure();
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, build_cookie(ACCESS_COOKIE_NAME, "", 0, secure)?);
    headers.append(
        SET_COOKIE,
        build_cookie(REFRESH_COOKIE_NAME, "", 0, secure)?,
    );
    Ok(headers)
}

/// Short-lived CSRF state cookie set when the OAuth flow starts.
pub(super) fn oauth_state_cookie(
    config: &AuthConfig,
    state_token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(
        OAUTH_STATE_COOKIE_NAME,
        state_token,
        config.oauth_state_ttl_seconds(),
        config.session_cookie_secure(),
    )
}

/// Short-lived cookie holding the sanitized post-login redirect path.
pub(super) fn oauth_redirect_cookie(
    config: &AuthConfig,
    path: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(
        OAUTH_REDIRECT_COOKIE_NAME,
        path,
        config.oauth_state_ttl_seconds(),
        config.session_cookie_secure(),
    )
}

/// `Set-Cookie` headers consuming both OAuth cookies after a callback.
pub(super) fn clear_oauth_cookie_headers(
    config: &AuthConfig,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let secure = config.session_cookie_secure();
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        build_cookie(OAUTH_STATE_COOKIE_NAME, "", 0, secure)?,
    );
    headers.append(
        SET_COOKIE,
        build_cookie(OAUTH_REDIRECT_COOKIE_NAME, "", 0, secure)?,
    );
    Ok(headers)
}

/// Cookie jar lookup by name.
pub(super) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Access token from the Authorization header, with cookie fallback for
/// browser flows.
pub(super) fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer_token(headers).or_else(|| extract_cookie(headers, ACCESS_COOKIE_NAME))
}

pub(super) fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers, REFRESH_COOKIE_NAME)
}

/// Revoke the current session (or all of them) and clear the token cookies.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Session revoked and cookies cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    // Cookies are cleared even when the presented token is already invalid.
    let mut response_headers = HeaderMap::new();
    match clear_token_pair_headers(auth_state.config()) {
        Ok(cleared) => response_headers = cleared,
        Err(err) => error!("Failed to build logout cookies: {err}"),
    }

    let Ok(principal) = require_auth(&headers, &pool, &auth_state).await else {
        return (StatusCode::NO_CONTENT, response_headers).into_response();
    };

    let revoke_all = payload.is_some_and(|Json(request)| request.all.unwrap_or(false));
    let meta = session_meta_from_headers(&headers, None);

    if revoke_all {
        match SessionRepo::revoke_all(&pool, principal.user_id).await {
            Ok(_) => {
                if let Err(err) = EventRepo::record(
                    &pool,
                    principal.user_id,
                    SecurityEventType::AllSessionsRevoked,
                    &meta,
                )
                .await
                {
                    error!("Failed to record logout event: {err}");
                }
            }
            Err(err) => error!("Failed to revoke sessions: {err}"),
        }
    } else {
        match SessionRepo::revoke(&pool, principal.user_id, principal.session_id).await {
            Ok(_) => {
                if let Err(err) =
                    EventRepo::record(&pool, principal.user_id, SecurityEventType::Logout, &meta)
                        .await
                {
                    error!("Failed to record logout event: {err}");
                }
            }
            Err(err) => error!("Failed to revoke session: {err}"),
        }
    }

    (StatusCode::NO_CONTENT, response_headers).into_response()
}
