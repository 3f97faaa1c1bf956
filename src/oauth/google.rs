//! Google OAuth 2.0 / OpenID Connect provider.

use super::{OAuthError, Profile, ProviderConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const GOOGLE_SCOPES: &str = "openid email profile";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    name: Option<String>,
}

/// Google OAuth client bound to one set of registered credentials.
#[derive(Debug, Clone)]
pub struct GoogleProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GoogleProvider {
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
            .append_pair("scope", GOOGLE_SCOPES)
            .append_pair("state", state)
            .finish();

        format!("{GOOGLE_AUTHORIZE_URL}?{query}")
    }

    /// Exchange the callback `code` for an access token.
    ///
    /// # Errors
    /// Returns `OAuthError` if Google is unreachable, rejects the code, or
    /// replies with an unexpected payload.
    pub async fn exchange_code(&self, code: &str) -> Result<SecretString, OAuthError> {
        debug!("exchanging authorization code with google");

        let response = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        let body = response.text().await?;

        // Token errors come back as JSON with an `error` field.
        if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
            let message = err.error_description.unwrap_or(err.error);
            return Err(OAuthError::Provider(message));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| OAuthError::Parse(format!("token response: {err}")))?;

        Ok(SecretString::from(token.access_token))
    }

    /// Fetch the profile behind `access_token`, requiring an email address.
    ///
    /// # Errors
    /// Returns `OAuthError` if Google is unreachable, rejects the token, or
    /// the profile carries no email.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<Profile, OAuthError> {
        debug!("fetching google userinfo");

        let response = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Provider(format!("userinfo: {body}")));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|err| OAuthError::Parse(format!("userinfo response: {err}")))?;

        let email = info.email.ok_or(OAuthError::MissingEmail)?;

        Ok(Profile {
            email,
            name: info.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GoogleProvider {
        let config = ProviderConfig {
            client_id: "google-client-id".to_string(),
            client_secret: SecretString::from("google-secret".to_string()),
            redirect_uri: "https://thanawy.app/v1/auth/google/callback".to_string(),
        };
        GoogleProvider::new(config, reqwest::Client::new())
    }

    #[test]
    fn authorize_url_contains_required_params() {
        let url = provider().authorize_url("state-123");

        assert!(url.starts_with(GOOGLE_AUTHORIZE_URL));
        assert!(url.contains("client_id=google-client-id"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fthanawy.app%2Fv1%2Fauth%2Fgoogle%2Fcallback"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("state=state-123"));
    }

    #[test]
    fn token_response_deserializes() {
        let json = r#"{"access_token": "ya29.token", "expires_in": 3599, "token_type": "Bearer"}"#;

        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "ya29.token");
    }

    #[test]
    fn error_payload_deserializes_with_description() {
        let json = r#"{"error": "invalid_grant", "error_description": "Bad authorization code."}"#;

        let err: ErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(err.error, "invalid_grant");
        assert_eq!(
            err.error_description.as_deref(),
            Some("Bad authorization code.")
        );
    }

    #[test]
    fn success_payload_is_not_mistaken_for_an_error() {
        let json = r#"{"access_token": "ya29.token", "token_type": "Bearer"}"#;

        assert!(serde_json::from_str::<ErrorResponse>(json).is_err());
    }

    #[test]
    fn userinfo_tolerates_missing_fields() {
        let json = r#"{"sub": "1234567890", "email_verified": true}"#;

        let info: UserInfo = serde_json::from_str(json).unwrap();
        assert!(info.email.is_none());
        assert!(info.name.is_none());
    }

    #[test]
    fn client_secret_is_redacted_in_debug_output() {
        let provider = provider();
        let debug = format!("{provider:?}");

        assert!(!debug.contains("google-secret"));
    }
}
