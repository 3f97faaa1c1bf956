use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, postgres::PgRow};
use uuid::Uuid;

/// A user's TOTP credential. `confirmed_at IS NULL` means enrollment is
/// pending and login verification ignores the row.
#[derive(Debug, Clone)]
pub struct TotpCredential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub secret: Vec<u8>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for TotpCredential {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            secret: row.try_get("secret")?,
            confirmed_at: row.try_get("confirmed_at")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}
