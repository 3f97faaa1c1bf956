//! Small helpers for auth validation, token generation, and request metadata.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::sessions::SessionMeta;

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Create a new verification token for email links.
///
/// Returned token is only sent to the user; we store a hash in the database.
pub(super) fn generate_verification_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate verification token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Create a CSRF state for the OAuth redirect/callback round trip.
/// The value lives in a short-lived cookie and is never persisted server-side.
pub(super) fn generate_state_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate state token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Create a single-use challenge token bridging password success and the
/// second factor. The raw value goes to the client; the database stores a hash.
pub(super) fn generate_challenge_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate challenge token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a verification token so we never store the raw token in the database.
pub(super) fn hash_verification_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Hash a challenge token; lookups compare hashes only.
pub(super) fn hash_challenge_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Build the frontend verification link included in outbound emails.
pub(super) fn build_verify_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/verify-email#token={token}")
}

/// Extract a client IP for rate limiting and session metadata from common
/// proxy headers.
pub(super) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Capture the request metadata recorded on session rows and audit events.
pub(super) fn session_meta_from_headers(
    headers: &axum::http::HeaderMap,
    device_info: Option<serde_json::Value>,
) -> SessionMeta {
    SessionMeta {
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        ip: extract_client_ip(headers),
        device_info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Sara@Example.COM "), "sara@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn build_verify_url_trims_trailing_slash() {
        let url = build_verify_url("https://thanawy.app/", "token");
        assert_eq!(url, "https://thanawy.app/verify-email#token=token");
    }

    #[test]
    fn generate_verification_token_round_trip() {
        let decoded_len = generate_verification_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn generated_tokens_are_unique() {
        let first = generate_state_token().unwrap();
        let second = generate_state_token().unwrap();
        assert_ne!(first, second);

        let first = generate_challenge_token().unwrap();
        let second = generate_challenge_token().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn hash_verification_token_stable() {
        let first = hash_verification_token("token");
        let second = hash_verification_token("token");
        let different = hash_verification_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }

    #[test]
    fn session_meta_captures_user_agent_and_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.7"));

        let meta = session_meta_from_headers(&headers, None);
        assert_eq!(meta.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(meta.ip.as_deref(), Some("203.0.113.7"));
        assert!(meta.device_info.is_none());
    }
}
