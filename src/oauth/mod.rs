//! External identity providers for browser-based OAuth login.
//!
//! Every provider exposes the same three-step capability: build the consent
//! URL carrying a CSRF state, exchange the callback code for an access token,
//! and fetch the profile behind that token. Configured providers are held in
//! a [`ProviderRegistry`] and selected by [`ProviderKind`] at request time.

pub mod facebook;
pub mod google;

pub use facebook::FacebookProvider;
pub use google::GoogleProvider;

use secrecy::SecretString;
use std::{collections::HashMap, time::Duration};

const PROVIDER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced while talking to an identity provider.
///
/// Callback handling folds every variant into a machine-readable redirect
/// code; none of them becomes a 500.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected the request: {0}")]
    Provider(String),

    #[error("failed to parse provider response: {0}")]
    Parse(String),

    #[error("provider profile has no email address")]
    MissingEmail,
}

impl OAuthError {
    /// Query-string error code used when redirecting back to the login page.
    #[must_use]
    pub const fn redirect_code(&self) -> &'static str {
        match self {
            Self::Http(_) => "provider_unreachable",
            Self::Provider(_) => "provider_rejected",
            Self::Parse(_) => "provider_response",
            Self::MissingEmail => "email_missing",
        }
    }
}

/// Identity providers this service can federate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Google,
    Facebook,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Facebook => "facebook",
        }
    }

    /// Parse a provider name from a request path segment.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "google" => Some(Self::Google),
            "facebook" => Some(Self::Facebook),
            _ => None,
        }
    }
}

/// Subset of the provider profile this service consumes.
#[derive(Debug, Clone)]
pub struct Profile {
    pub email: String,
    pub name: Option<String>,
}

/// Credentials registered with a provider plus the callback URL this service
/// exposes for it.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

/// A configured provider, dispatched by variant.
#[derive(Debug, Clone)]
pub enum Provider {
    Google(GoogleProvider),
    Facebook(FacebookProvider),
}

impl Provider {
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Google(_) => ProviderKind::Google,
            Self::Facebook(_) => ProviderKind::Facebook,
        }
    }

    /// Consent URL the browser is redirected to, carrying the CSRF `state`.
    #[must_use]
    pub fn authorize_url(&self, state: &str) -> String {
        match self {
            Self::Google(provider) => provider.authorize_url(state),
            Self::Facebook(provider) => provider.authorize_url(state),
        }
    }

    /// Exchange the callback `code` for a provider access token.
    ///
    /// # Errors
    /// Returns `OAuthError` if the provider is unreachable or rejects the
    /// code.
    pub async fn exchange_code(&self, code: &str) -> Result<SecretString, OAuthError> {
        match self {
            Self::Google(provider) => provider.exchange_code(code).await,
            Self::Facebook(provider) => provider.exchange_code(code).await,
        }
    }

    /// Fetch the profile behind an access token.
    ///
    /// # Errors
    /// Returns `OAuthError` if the provider is unreachable, rejects the
    /// token, or the profile carries no email address.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<Profile, OAuthError> {
        match self {
            Self::Google(provider) => provider.fetch_profile(access_token).await,
            Self::Facebook(provider) => provider.fetch_profile(access_token).await,
        }
    }
}

/// Lookup table of configured providers sharing one HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Provider>,
}

impl ProviderRegistry {
    /// Build a registry from whichever provider credentials were configured
    /// at startup. Providers without credentials are simply absent.
    ///
    /// # Errors
    /// Returns an error if the shared HTTP client cannot be constructed.
    pub fn new(
        google: Option<ProviderConfig>,
        facebook: Option<ProviderConfig>,
    ) -> Result<Self, OAuthError> {
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .connect_timeout(PROVIDER_CONNECT_TIMEOUT)
            .timeout(PROVIDER_REQUEST_TIMEOUT)
            .build()?;

        let mut providers = HashMap::new();

        if let Some(config) = google {
            providers.insert(
                ProviderKind::Google,
                Provider::Google(GoogleProvider::new(config, http.clone())),
            );
        }

        if let Some(config) = facebook {
            providers.insert(
                ProviderKind::Facebook,
                Provider::Facebook(FacebookProvider::new(config, http.clone())),
            );
        }

        Ok(Self { providers })
    }

    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<&Provider> {
        self.providers.get(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Post-login redirect targets must stay on this origin: absolute paths only,
/// never scheme-relative `//host` forms.
#[must_use]
pub fn sanitize_redirect_path(path: Option<&str>) -> String {
    match path {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path.to_string(),
        _ => "/".to_string(),
    }
}
