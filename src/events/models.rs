use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, postgres::PgRow};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Everything the service writes to the audit trail. Stored as text so the
/// log stays readable with plain SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventType {
    Login,
    LoginFailed,
    Logout,
    SessionRevoked,
    AllSessionsRevoked,
    TokenRefreshed,
    TwoFactorEnabled,
    TwoFactorDisabled,
    RecoveryCodeUsed,
    RecoveryCodesRegenerated,
    OauthLogin,
    EmailVerified,
    UserRegistered,
}

impl SecurityEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::LoginFailed => "login_failed",
            Self::Logout => "logout",
            Self::SessionRevoked => "session_revoked",
            Self::AllSessionsRevoked => "all_sessions_revoked",
            Self::TokenRefreshed => "token_refreshed",
            Self::TwoFactorEnabled => "two_factor_enabled",
            Self::TwoFactorDisabled => "two_factor_disabled",
            Self::RecoveryCodeUsed => "recovery_code_used",
            Self::RecoveryCodesRegenerated => "recovery_codes_regenerated",
            Self::OauthLogin => "oauth_login",
            Self::EmailVerified => "email_verified",
            Self::UserRegistered => "user_registered",
        }
    }

    /// Parse the persisted `security_events.event_type` textual value.
    fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        Self::parse(value).ok_or_else(|| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid security_events.event_type value: {value}"),
            )))
        })
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "login" => Some(Self::Login),
            "login_failed" => Some(Self::LoginFailed),
            "logout" => Some(Self::Logout),
            "session_revoked" => Some(Self::SessionRevoked),
            "all_sessions_revoked" => Some(Self::AllSessionsRevoked),
            "token_refreshed" => Some(Self::TokenRefreshed),
            "two_factor_enabled" => Some(Self::TwoFactorEnabled),
            "two_factor_disabled" => Some(Self::TwoFactorDisabled),
            "recovery_code_used" => Some(Self::RecoveryCodeUsed),
            "recovery_codes_regenerated" => Some(Self::RecoveryCodesRegenerated),
            "oauth_login" => Some(Self::OauthLogin),
            "email_verified" => Some(Self::EmailVerified),
            "user_registered" => Some(Self::UserRegistered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: SecurityEventType,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_info: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for SecurityEvent {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let event_type: String = row.try_get("event_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            event_type: SecurityEventType::from_db(&event_type)?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            device_info: row.try_get("device_info")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Read-path filter. Always scoped to one user by the repo; time bounds are
/// unix seconds.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub event_type: Option<SecurityEventType>,
    pub from_unix_seconds: Option<i64>,
    pub to_unix_seconds: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            event_type: None,
            from_unix_seconds: None,
            to_unix_seconds: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_text_round_trip() {
        let all = [
            SecurityEventType::Login,
            SecurityEventType::LoginFailed,
            SecurityEventType::Logout,
            SecurityEventType::SessionRevoked,
            SecurityEventType::AllSessionsRevoked,
            SecurityEventType::TokenRefreshed,
            SecurityEventType::TwoFactorEnabled,
            SecurityEventType::TwoFactorDisabled,
            SecurityEventType::RecoveryCodeUsed,
            SecurityEventType::RecoveryCodesRegenerated,
            SecurityEventType::OauthLogin,
            SecurityEventType::EmailVerified,
            SecurityEventType::UserRegistered,
        ];
        for event_type in all {
            assert_eq!(SecurityEventType::parse(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn event_type_parse_rejects_unknown() {
        assert_eq!(SecurityEventType::parse("password_changed"), None);
        assert_eq!(SecurityEventType::parse(""), None);
    }

    #[test]
    fn event_filter_defaults_to_first_page() {
        let filter = EventFilter::default();
        assert_eq!(filter.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(filter.offset, 0);
        assert!(filter.event_type.is_none());
    }
}
