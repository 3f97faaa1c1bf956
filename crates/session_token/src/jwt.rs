use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Which half of a token pair a claim set belongs to. Access tokens
/// authenticate requests, refresh tokens only mint new pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTokenHeader {
    pub alg: String,
    pub typ: String,
}

impl SessionTokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTokenClaims {
    pub sub: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub sid: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("unexpected token kind")]
    WrongKind,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn mac_for(secret: &[u8]) -> Result<HmacSha256, Error> {
    HmacSha256::new_from_slice(secret).map_err(|_| Error::Key)
}

/// Create an HS256 signed session token (JWT).
///
/// # Errors
///
/// Returns an error if claims/header JSON cannot be encoded or the key is
/// rejected.
pub fn sign_hs256(secret: &[u8], claims: &SessionTokenClaims) -> Result<String, Error> {
    let header = SessionTokenHeader::hs256();
    let header_b64 = b64e_json(&header)?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = mac_for(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an HS256 session token and return its decoded claims.
///
/// The signature is checked before the payload is parsed. A token of the
/// wrong kind fails verification even when everything else is valid, so an
/// access token can never stand in for a refresh token or vice versa.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the signature is invalid,
/// - the claims fail validation (`kind`, `exp`).
pub fn verify_hs256(
    token: &str,
    secret: &[u8],
    expected_kind: TokenKind,
    now_unix_seconds: i64,
) -> Result<SessionTokenClaims, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    let header: SessionTokenHeader = b64d_json(header_b64)?;
    if header.alg != "HS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;

    let mut mac = mac_for(secret)?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature_bytes)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: SessionTokenClaims = b64d_json(claims_b64)?;
    if claims.kind != expected_kind {
        return Err(Error::WrongKind);
    }
    if claims.exp <= now_unix_seconds {
        return Err(Error::Expired);
    }

    Ok(claims)
}
