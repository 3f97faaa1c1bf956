//! Auth state and configuration shared by the handlers.

use std::sync::Arc;

use crate::api::email::EmailSender;
use crate::oauth::ProviderRegistry;
use crate::tokens::TokenService;
use crate::totp::TotpService;

use super::rate_limit::RateLimiter;

const DEFAULT_EMAIL_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_OAUTH_STATE_TTL_SECONDS: i64 = 10 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    email_token_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    challenge_ttl_seconds: i64,
    oauth_state_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            email_token_ttl_seconds: DEFAULT_EMAIL_TOKEN_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            oauth_state_ttl_seconds: DEFAULT_OAUTH_STATE_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_email_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_oauth_state_ttl_seconds(mut self, seconds: i64) -> Self {
        self.oauth_state_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn email_token_ttl_seconds(&self) -> i64 {
        self.email_token_ttl_seconds
    }

    pub(super) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    pub(super) fn challenge_ttl_seconds(&self) -> i64 {
        self.challenge_ttl_seconds
    }

    pub(super) fn oauth_state_ttl_seconds(&self) -> i64 {
        self.oauth_state_ttl_seconds
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    tokens: TokenService,
    totp: TotpService,
    providers: ProviderRegistry,
    rate_limiter: Arc<dyn RateLimiter>,
    email: Arc<dyn EmailSender>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        tokens: TokenService,
        totp: TotpService,
        providers: ProviderRegistry,
        rate_limiter: Arc<dyn RateLimiter>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            tokens,
            totp,
            providers,
            rate_limiter,
            email,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn totp(&self) -> &TotpService {
        &self.totp
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    pub(super) fn email(&self) -> &dyn EmailSender {
        self.email.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::{AuthConfig, AuthState};
    use crate::api::email::{EmailSender, LogEmailSender};
    use crate::oauth::ProviderRegistry;
    use crate::tokens::TokenService;
    use crate::totp::TotpService;
    use anyhow::Result;
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://thanawy.app".to_string());

        assert_eq!(config.frontend_base_url(), "https://thanawy.app");
        assert_eq!(
            config.email_token_ttl_seconds(),
            super::DEFAULT_EMAIL_TOKEN_TTL_SECONDS
        );
        assert_eq!(
            config.resend_cooldown_seconds(),
            super::DEFAULT_RESEND_COOLDOWN_SECONDS
        );
        assert_eq!(
            config.challenge_ttl_seconds(),
            super::DEFAULT_CHALLENGE_TTL_SECONDS
        );
        assert_eq!(
            config.oauth_state_ttl_seconds(),
            super::DEFAULT_OAUTH_STATE_TTL_SECONDS
        );

        let config = config
            .with_email_token_ttl_seconds(120)
            .with_resend_cooldown_seconds(30)
            .with_challenge_ttl_seconds(90)
            .with_oauth_state_ttl_seconds(300);

        assert_eq!(config.email_token_ttl_seconds(), 120);
        assert_eq!(config.resend_cooldown_seconds(), 30);
        assert_eq!(config.challenge_ttl_seconds(), 90);
        assert_eq!(config.oauth_state_ttl_seconds(), 300);
    }

    #[test]
    fn session_cookie_secure_follows_frontend_scheme() {
        assert!(AuthConfig::new("https://thanawy.app".to_string()).session_cookie_secure());
        assert!(!AuthConfig::new("http://localhost:3000".to_string()).session_cookie_secure());
    }

    #[tokio::test]
    async fn auth_state_constructs_with_noop_rate_limiter() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let config = AuthConfig::new("https://thanawy.app".to_string());
        let tokens = TokenService::new(SecretString::from("test-secret".to_string()));
        let totp = TotpService::new(pool, "ThanaWy".to_string());
        let providers = ProviderRegistry::new(None, None)?;
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        let email: Arc<dyn EmailSender> = Arc::new(LogEmailSender);

        let state = AuthState::new(config, tokens, totp, providers, limiter, email);

        assert!(state.providers().is_empty());
        assert_eq!(state.config().frontend_base_url(), "https://thanawy.app");
        Ok(())
    }
}
