//! Security event audit trail, read side.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::SecondsFormat;
use sqlx::PgPool;
use tracing::error;

use crate::events::{
    EventFilter, EventRepo, SecurityEventType,
    models::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE},
};

use super::error::{ApiError, ErrorBody};
use super::principal::require_auth;
use super::state::AuthState;
use super::types::{SecurityEventInfo, SecurityEventListResponse, SecurityEventsQuery};

/// A page of the caller's own audit trail, newest first.
#[utoipa::path(
    get,
    path = "/v1/auth/security-events",
    params(
        ("event_type" = Option<String>, Query, description = "Filter by event type"),
        ("from" = Option<i64>, Query, description = "Unix seconds, inclusive lower bound"),
        ("to" = Option<i64>, Query, description = "Unix seconds, inclusive upper bound"),
        ("limit" = Option<i64>, Query, description = "Page size, capped at 100"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses(
        (status = 200, description = "Security events for the authenticated user", body = SecurityEventListResponse),
        (status = 400, description = "Unknown event type", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn list_security_events(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Query(query): Query<SecurityEventsQuery>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let filter = match build_filter(&query) {
        Ok(filter) => filter,
        Err(err) => return err.into_response(),
    };

    match EventRepo::list(&pool, principal.user_id, &filter).await {
        Ok(events) => {
            let events = events
                .into_iter()
                .map(|event| SecurityEventInfo {
                    id: event.id.to_string(),
                    event_type: event.event_type.as_str().to_string(),
                    ip: event.ip,
                    user_agent: event.user_agent,
                    device_info: event.device_info,
                    created_at: event.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                })
                .collect();
            (StatusCode::OK, Json(SecurityEventListResponse { events })).into_response()
        }
        Err(err) => {
            error!("Failed to list security events: {err}");
            ApiError::Internal.into_response()
        }
    }
}

/// Unknown event types are a 400, not an empty page, so typos in a client do
/// not read as "no events".
fn build_filter(query: &SecurityEventsQuery) -> Result<EventFilter, ApiError> {
    let event_type = match query.event_type.as_deref() {
        None => None,
        Some(value) => Some(
            SecurityEventType::parse(value)
                .ok_or_else(|| ApiError::Validation(format!("Unknown event type: {value}")))?,
        ),
    };

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    Ok(EventFilter {
        event_type,
        from_unix_seconds: query.from,
        to_unix_seconds: query.to,
        limit,
        offset,
    })
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

    fn empty_query() -> SecurityEventsQuery {
        SecurityEventsQuery {
            event_type: None,
            from: None,
            to: None,
            limit: None,
            offset: None,
        }
    }

    #[tokio::test]
    async fn list_requires_auth() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let state = test_state(pool.clone())?;

        let response = list_security_events(
            HeaderMap::new(),
            Extension(pool),
            Extension(state),
            Query(empty_query()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[test]
    fn build_filter_defaults() -> Result<()> {
        let filter = build_filter(&empty_query()).map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(filter.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(filter.offset, 0);
        assert!(filter.event_type.is_none());
        Ok(())
    }

    #[test]
    fn build_filter_clamps_limit_and_offset() -> Result<()> {
        let mut query = empty_query();
        query.limit = Some(10_000);
        query.offset = Some(-5);

        let filter = build_filter(&query).map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(filter.limit, MAX_PAGE_SIZE);
        assert_eq!(filter.offset, 0);

        query.limit = Some(0);
        let filter = build_filter(&query).map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(filter.limit, 1);
        Ok(())
    }

    #[test]
    fn build_filter_parses_event_type() {
        let mut query = empty_query();
        query.event_type = Some("login".to_string());
        assert!(build_filter(&query).is_ok());

        query.event_type = Some("password_changed".to_string());
        assert!(matches!(
            build_filter(&query),
            Err(ApiError::Validation(_))
        ));
    }
}
