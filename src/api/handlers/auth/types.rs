//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Client-supplied device summary recorded on the session.
    pub device_info: Option<serde_json::Value>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Intermediate login response when the account has 2FA enabled: no tokens
/// yet, only a single-use challenge for the second factor.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorChallengeResponse {
    pub two_factor_required: bool,
    pub challenge: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    /// Optional body fallback; the `refresh_token` cookie takes priority.
    pub refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutRequest {
    /// Revoke every session for the user instead of just the current one.
    pub all: Option<bool>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
    pub created_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionInfo {
    pub id: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub device_info: Option<serde_json::Value>,
    pub created_at: String,
    pub expires_at: String,
    pub last_seen_at: String,
    pub is_active: bool,
    /// True for the session that authenticated this request.
    pub current: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpSetupResponse {
    /// Base32 seed for manual entry.
    pub secret: String,
    pub otpauth_url: String,
    /// `data:image/png;base64` QR of the otpauth URL.
    pub qr_png_base64: String,
    /// Plaintext recovery codes, shown exactly once.
    pub recovery_codes: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpVerifyRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorLoginRequest {
    pub challenge: String,
    pub code: Option<String>,
    pub recovery_code: Option<String>,
    /// Client-supplied device summary recorded on the session.
    pub device_info: Option<serde_json::Value>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorDisableRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecoveryCodeStatusResponse {
    pub remaining: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecoveryCodesResponse {
    /// Plaintext codes of the fresh batch, shown exactly once.
    pub codes: Vec<String>,
}

/// Query parameters for `GET /v1/auth/security-events`.
#[derive(Debug, Deserialize)]
pub struct SecurityEventsQuery {
    pub event_type: Option<String>,
    /// Unix seconds, inclusive lower bound.
    pub from: Option<i64>,
    /// Unix seconds, inclusive upper bound.
    pub to: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SecurityEventInfo {
    pub id: String,
    pub event_type: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_info: Option<serde_json::Value>,
    pub created_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SecurityEventListResponse {
    pub events: Vec<SecurityEventInfo>,
}
