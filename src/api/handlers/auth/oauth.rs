//! OAuth login bridge.
//!
//! Flow Overview:
//! 1) `GET /v1/auth/{provider}` sets a CSRF state cookie and redirects the
//!    browser to the provider's consent page.
//! 2) The provider calls back with `code` and `state`; the state must match
//!    the cookie before any request goes out to the provider.
//! 3) The profile email finds or creates an account, then the flow joins the
//!    password path: session row, token cookies, redirect into the app.
//!
//! Every exit is a 302. Failures land on the login page with a
//! machine-readable `error` query code, never a 500 page.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, warn};

use crate::events::{EventRepo, SecurityEventType};
use crate::oauth::{Profile, ProviderKind, sanitize_redirect_path};

use super::register::MAX_DISPLAY_NAME_CHARS;
use super::session::{
    OAUTH_REDIRECT_COOKIE_NAME, OAUTH_STATE_COOKIE_NAME, clear_oauth_cookie_headers,
    extract_cookie, oauth_redirect_cookie, oauth_state_cookie, token_pair_headers,
};
use super::state::{AuthConfig, AuthState};
use super::storage::{OauthUserOutcome, UserRecord, find_or_create_oauth_user};
use super::utils::{generate_state_token, normalize_email, session_meta_from_headers};

#[derive(Debug, Deserialize)]
pub struct OauthStartQuery {
    /// In-app path to land on after login; anything off-origin collapses
    /// to `/`.
    pub redirect: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OauthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denies consent.
    pub error: Option<String>,
}

fn login_error_url(config: &AuthConfig, code: &str) -> String {
    let base = config.frontend_base_url().trim_end_matches('/');
    format!("{base}/login?error={code}")
}

fn app_url(config: &AuthConfig, path: &str) -> String {
    let base = config.frontend_base_url().trim_end_matches('/');
    format!("{base}{path}")
}

/// 302 with whatever cookie headers the exit already collected.
fn found(mut headers: HeaderMap, location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(LOCATION, value);
        }
        Err(err) => {
            error!("Failed to build redirect location: {err}");
            headers.insert(LOCATION, HeaderValue::from_static("/"));
        }
    }
    (StatusCode::FOUND, headers).into_response()
}

/// Start the OAuth flow: set the CSRF state cookie and bounce to the
/// provider's consent page.
#[utoipa::path(
    get,
    path = "/v1/auth/{provider}",
    params(
        ("provider" = String, Path, description = "Provider name, e.g. google"),
        ("redirect" = Option<String>, Query, description = "In-app path to land on after login")
    ),
    responses(
        (status = 302, description = "Redirect to the provider consent page, or to the login page with an error code")
    ),
    tag = "oauth"
)]
pub async fn oauth_start(
    Path(provider): Path<String>,
    Query(query): Query<OauthStartQuery>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let config = auth_state.config();

    let provider = ProviderKind::parse(&provider)
        .and_then(|kind| auth_state.providers().get(kind));
    let Some(provider) = provider else {
        return found(
            HeaderMap::new(),
            &login_error_url(config, "unknown_provider"),
        );
    };

    let state_token = match generate_state_token() {
        Ok(state_token) => state_token,
        Err(err) => {
            error!("Failed to generate state token: {err}");
            return found(HeaderMap::new(), &login_error_url(config, "internal"));
        }
    };

    let redirect_path = sanitize_redirect_path(query.redirect.as_deref());

    let mut headers = HeaderMap::new();
    match (
        oauth_state_cookie(config, &state_token),
        oauth_redirect_cookie(config, &redirect_path),
    ) {
        (Ok(state_cookie), Ok(redirect_cookie)) => {
            headers.append(SET_COOKIE, state_cookie);
            headers.append(SET_COOKIE, redirect_cookie);
        }
        (Err(err), _) | (_, Err(err)) => {
            error!("Failed to build OAuth cookies: {err}");
            return found(HeaderMap::new(), &login_error_url(config, "internal"));
        }
    }

    found(headers, &provider.authorize_url(&state_token))
}

/// Provider callback: verify the CSRF state, trade the code for a profile,
/// and land the browser in the app with session cookies set.
#[utoipa::path(
    get,
    path = "/v1/auth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Provider name, e.g. google"),
        ("code" = Option<String>, Query, description = "Authorization code from the provider"),
        ("state" = Option<String>, Query, description = "CSRF state echoed by the provider")
    ),
    responses(
        (status = 302, description = "Redirect into the app with session cookies, or to the login page with an error code")
    ),
    tag = "oauth"
)]
#[allow(clippy::too_many_lines)]
pub async fn oauth_callback(
    Path(provider): Path<String>,
    Query(query): Query<OauthCallbackQuery>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let config = auth_state.config();

    let provider = ProviderKind::parse(&provider)
        .and_then(|kind| auth_state.providers().get(kind));
    let Some(provider) = provider else {
        return found(
            HeaderMap::new(),
            &login_error_url(config, "unknown_provider"),
        );
    };

    // The state cookie is consumed by this callback whatever the outcome, so
    // every exit past this point clears it.
    let state_cookie = extract_cookie(&headers, OAUTH_STATE_COOKIE_NAME);
    let cookie_jar = match clear_oauth_cookie_headers(config) {
        Ok(cleared) => cleared,
        Err(err) => {
            error!("Failed to build clearing cookies: {err}");
            HeaderMap::new()
        }
    };

    // CSRF gate: the echoed state must match the cookie before any request
    // goes out to the provider.
    let state_matches = match (state_cookie.as_deref(), query.state.as_deref()) {
        (Some(cookie), Some(echoed)) => cookie == echoed,
        _ => false,
    };
    if !state_matches {
        return found(cookie_jar, &login_error_url(config, "state_mismatch"));
    }

    if let Some(provider_error) = query.error.as_deref() {
        warn!("Provider returned an error: {provider_error}");
        return found(cookie_jar, &login_error_url(config, "provider_rejected"));
    }

    let Some(code) = query.code.as_deref() else {
        return found(cookie_jar, &login_error_url(config, "missing_code"));
    };

    let access_token = match provider.exchange_code(code).await {
        Ok(access_token) => access_token,
        Err(err) => {
            warn!("Code exchange failed: {err}");
            return found(cookie_jar, &login_error_url(config, err.redirect_code()));
        }
    };

    let profile = match provider.fetch_profile(access_token.expose_secret()).await {
        Ok(profile) => profile,
        Err(err) => {
            warn!("Profile fetch failed: {err}");
            return found(cookie_jar, &login_error_url(config, err.redirect_code()));
        }
    };

    let user = match resolve_user(&pool, &headers, &profile).await {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to resolve OAuth account: {err}");
            return found(cookie_jar, &login_error_url(config, "internal"));
        }
    };

    let meta = session_meta_from_headers(&headers, None);
    let pair = match auth_state
        .tokens()
        .start_session(&pool, user.id, &user.email, Some(&user.display_name), &meta)
        .await
    {
        Ok((_session, pair)) => pair,
        Err(err) => {
            error!("Failed to start session: {err}");
            return found(cookie_jar, &login_error_url(config, "internal"));
        }
    };

    let mut response_headers = match token_pair_headers(&auth_state, &pair) {
        Ok(response_headers) => response_headers,
        Err(err) => {
            error!("Failed to build session cookies: {err}");
            return found(cookie_jar, &login_error_url(config, "internal"));
        }
    };
    for value in cookie_jar.get_all(SET_COOKIE) {
        response_headers.append(SET_COOKIE, value.clone());
    }

    if let Err(err) = EventRepo::record(&pool, user.id, SecurityEventType::OauthLogin, &meta).await
    {
        error!("Failed to record security event: {err}");
    }

    let redirect_path = sanitize_redirect_path(
        extract_cookie(&headers, OAUTH_REDIRECT_COOKIE_NAME).as_deref(),
    );
    found(response_headers, &app_url(config, &redirect_path))
}

/// Find or create the account behind a provider profile, auditing first
/// logins as registrations.
async fn resolve_user(
    pool: &PgPool,
    headers: &HeaderMap,
    profile: &Profile,
) -> anyhow::Result<UserRecord> {
    let email = normalize_email(&profile.email);
    let display_name = display_name_from_profile(profile, &email);

    match find_or_create_oauth_user(pool, &email, &display_name).await? {
        OauthUserOutcome::Created(user) => {
            let meta = session_meta_from_headers(headers, None);
            if let Err(err) =
                EventRepo::record(pool, user.id, SecurityEventType::UserRegistered, &meta).await
            {
                error!("Failed to record security event: {err}");
            }
            Ok(user)
        }
        OauthUserOutcome::Existing(user) => Ok(user),
    }
}

/// Provider display names are capped, not rejected; there is no form to send
/// the user back to.
fn display_name_from_profile(profile: &Profile, email_normalized: &str) -> String {
    let name = profile
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            email_normalized
                .split('@')
                .next()
                .unwrap_or(email_normalized)
        });
    name.chars().take(MAX_DISPLAY_NAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::super::state::{AuthConfig, AuthState};
    use super::*;
    use crate::api::email::{EmailSender, LogEmailSender};
    use crate::oauth::{ProviderConfig, ProviderRegistry};
    use crate::tokens::TokenService;
    use crate::totp::TotpService;
    use anyhow::Result;
    use axum::http::header::COOKIE;
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn test_state(pool: PgPool, google: bool) -> Result<Arc<AuthState>> {
        let google = google.then(|| ProviderConfig {
            client_id: "client-id".to_string(),
            client_secret: SecretString::from("client-secret".to_string()),
            redirect_uri: "https://thanawy.app/v1/auth/google/callback".to_string(),
        });
        Ok(Arc::new(AuthState::new(
            AuthConfig::new("https://thanawy.app".to_string()),
            TokenService::new(SecretString::from("test-secret".to_string())),
            TotpService::new(pool, "ThanaWy".to_string()),
            ProviderRegistry::new(google, None)?,
            Arc::new(NoopRateLimiter) as Arc<dyn RateLimiter>,
            Arc::new(LogEmailSender) as Arc<dyn EmailSender>,
        )))
    }

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn start_rejects_unknown_provider() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool, true)?;

        let response = oauth_start(
            Path("github".to_string()),
            Query(OauthStartQuery { redirect: None }),
            Extension(state),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            location(&response),
            "https://thanawy.app/login?error=unknown_provider"
        );
        Ok(())
    }

    #[tokio::test]
    async fn start_rejects_unconfigured_provider() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool, false)?;

        let response = oauth_start(
            Path("google".to_string()),
            Query(OauthStartQuery { redirect: None }),
            Extension(state),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).ends_with("error=unknown_provider"));
        Ok(())
    }

    #[tokio::test]
    async fn start_sets_state_and_redirect_cookies() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool, true)?;

        let response = oauth_start(
            Path("google".to_string()),
            Query(OauthStartQuery {
                redirect: Some("/dashboard".to_string()),
            }),
            Extension(state),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).starts_with("https://accounts.google.com/"));

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("oauth_state="));
        assert!(cookies[1].starts_with("oauth_redirect=/dashboard"));
        Ok(())
    }

    #[tokio::test]
    async fn start_collapses_external_redirects() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool, true)?;

        let response = oauth_start(
            Path("google".to_string()),
            Query(OauthStartQuery {
                redirect: Some("//evil.example.com".to_string()),
            }),
            Extension(state),
        )
        .await
        .into_response();

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();
        assert!(cookies[1].starts_with("oauth_redirect=/;"));
        Ok(())
    }

    #[tokio::test]
    async fn callback_without_state_cookie_never_reaches_the_provider() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone(), true)?;

        let response = oauth_callback(
            Path("google".to_string()),
            Query(OauthCallbackQuery {
                code: Some("code".to_string()),
                state: Some("echoed".to_string()),
                error: None,
            }),
            HeaderMap::new(),
            Extension(pool),
            Extension(state),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).ends_with("error=state_mismatch"));
        Ok(())
    }

    #[tokio::test]
    async fn callback_rejects_mismatched_state_and_clears_cookies() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone(), true)?;

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("oauth_state=expected"));

        let response = oauth_callback(
            Path("google".to_string()),
            Query(OauthCallbackQuery {
                code: Some("code".to_string()),
                state: Some("tampered".to_string()),
                error: None,
            }),
            headers,
            Extension(pool),
            Extension(state),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).ends_with("error=state_mismatch"));

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();
        assert!(cookies.iter().any(|cookie| cookie.starts_with("oauth_state=;")));
        Ok(())
    }

    #[tokio::test]
    async fn callback_maps_provider_error_to_login_redirect() -> Result<()> {
        let pool = lazy_pool()?;
        let state = test_state(pool.clone(), true)?;

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("oauth_state=nonce"));

        let response = oauth_callback(
            Path("google".to_string()),
            Query(OauthCallbackQuery {
                code: None,
                state: Some("nonce".to_string()),
                error: Some("access_denied".to_string()),
            }),
            headers,
            Extension(pool),
            Extension(state),
        )
        .await
        .into_response();

        assert!(location(&response).ends_with("error=provider_rejected"));
        Ok(())
    }

    #[test]
    fn display_name_falls_back_to_mailbox() {
        let profile = Profile {
            email: "Sara@Example.com".to_string(),
            name: None,
        };
        assert_eq!(
            display_name_from_profile(&profile, "sara@example.com"),
            "sara"
        );

        let profile = Profile {
            email: "sara@example.com".to_string(),
            name: Some("  Sara N  ".to_string()),
        };
        assert_eq!(
            display_name_from_profile(&profile, "sara@example.com"),
            "Sara N"
        );
    }

    #[test]
    fn login_error_url_joins_cleanly() {
        let config = AuthConfig::new("https://thanawy.app/".to_string());
        assert_eq!(
            login_error_url(&config, "state_mismatch"),
            "https://thanawy.app/login?error=state_mismatch"
        );
        assert_eq!(app_url(&config, "/dashboard"), "https://thanawy.app/dashboard");
    }
}
