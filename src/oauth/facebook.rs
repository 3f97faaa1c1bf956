//! Facebook (Meta Graph API) OAuth 2.0 provider.

use super::{OAuthError, Profile, ProviderConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

const FACEBOOK_AUTHORIZE_URL: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const FACEBOOK_TOKEN_URL: &str = "https://graph.facebook.com/v19.0/oauth/access_token";
const FACEBOOK_PROFILE_URL: &str = "https://graph.facebook.com/v19.0/me";
const FACEBOOK_SCOPES: &str = "email,public_profile";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

// Graph API wraps errors one level deep.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    email: Option<String>,
    name: Option<String>,
}

/// Facebook OAuth client bound to one set of registered credentials.
#[derive(Debug, Clone)]
pub struct FacebookProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl FacebookProvider {
    #[must_use]
    pub const fn new(config: ProviderConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Consent URL carrying the CSRF `state`.
    #[must_use]
    pub fn authorize_url(&self, state: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", FACEBOOK_SCOPES)
            .append_pair("state", state)
            .finish();

        format!("{FACEBOOK_AUTHORIZE_URL}?{query}")
    }

    /// Exchange the callback `code` for an access token.
    ///
    /// # Errors
    /// Returns `OAuthError` if Facebook is unreachable, rejects the code, or
    /// replies with an unexpected payload.
    pub async fn exchange_code(&self, code: &str) -> Result<SecretString, OAuthError> {
        debug!("exchanging authorization code with facebook");

        let response = self
            .http
            .get(FACEBOOK_TOKEN_URL)
            .query(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let body = response.text().await?;

        if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
            return Err(OAuthError::Provider(err.error.message));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| OAuthError::Parse(format!("token response: {err}")))?;

        Ok(SecretString::from(token.access_token))
    }

    /// Fetch the profile behind `access_token`, requiring an email address.
    ///
    /// Facebook accounts registered by phone number have no email; those
    /// profiles are rejected rather than invented.
    ///
    /// # Errors
    /// Returns `OAuthError` if Facebook is unreachable, rejects the token, or
    /// the profile carries no email.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<Profile, OAuthError> {
        debug!("fetching facebook profile");

        let response = self
            .http
            .get(FACEBOOK_PROFILE_URL)
            .query(&[("fields", "id,name,email")])
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Provider(format!("profile: {body}")));
        }

        let profile: UserProfile = response
            .json()
            .await
            .map_err(|err| OAuthError::Parse(format!("profile response: {err}")))?;

        let email = profile.email.ok_or(OAuthError::MissingEmail)?;

        Ok(Profile {
            email,
            name: profile.name,
        })
    }
}
