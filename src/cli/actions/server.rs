use crate::{
    api,
    api::handlers::auth::AuthConfig,
    oauth::{ProviderConfig, ProviderRegistry},
    tokens::TokenService,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub frontend_base_url: String,
    pub email_token_ttl_seconds: i64,
    pub resend_cooldown_seconds: i64,
    pub challenge_ttl_seconds: i64,
    pub oauth_state_ttl_seconds: i64,
    pub totp_issuer: String,
    pub public_base_url: String,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<SecretString>,
    pub facebook_client_id: Option<String>,
    pub facebook_client_secret: Option<SecretString>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the provider registry cannot be built or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let tokens = TokenService::new(args.token_secret)
        .with_access_ttl_seconds(args.access_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_ttl_seconds);

    let auth_config = AuthConfig::new(args.frontend_base_url)
        .with_email_token_ttl_seconds(args.email_token_ttl_seconds)
        .with_resend_cooldown_seconds(args.resend_cooldown_seconds)
        .with_challenge_ttl_seconds(args.challenge_ttl_seconds)
        .with_oauth_state_ttl_seconds(args.oauth_state_ttl_seconds);

    let google = provider_config(
        args.google_client_id,
        args.google_client_secret,
        &args.public_base_url,
        "google",
    );
    let facebook = provider_config(
        args.facebook_client_id,
        args.facebook_client_secret,
        &args.public_base_url,
        "facebook",
    );

    debug!(
        google = google.is_some(),
        facebook = facebook.is_some(),
        "OAuth providers configured"
    );

    let providers = ProviderRegistry::new(google, facebook)
        .context("Failed to build OAuth provider registry")?;

    api::new(
        args.port,
        args.dsn,
        tokens,
        args.totp_issuer,
        providers,
        auth_config,
    )
    .await
}

// Callback URLs follow the route shape /v1/auth/{provider}/callback.
fn provider_config(
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    public_base_url: &str,
    slug: &str,
) -> Option<ProviderConfig> {
    let client_id = client_id?;
    let client_secret = client_secret?;
    let redirect_uri = format!(
        "{}/v1/auth/{slug}/callback",
        public_base_url.trim_end_matches('/')
    );

    Some(ProviderConfig {
        client_id,
        client_secret,
        redirect_uri,
    })
}
