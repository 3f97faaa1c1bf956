use crate::sessions::models::{Session, SessionMeta};
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

// INET comes back as text so the model stays plain strings.
const SESSION_COLUMNS: &str = "id, user_id, user_agent, host(ip) AS ip, device_info, \
     created_at, expires_at, last_seen_at, is_active";

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

pub struct SessionRepo;

impl SessionRepo {
    /// Inserts a new session row. Every login gets a fresh row; devices are
    /// never deduplicated.
    ///
    /// Returns the raw `sqlx` error so callers can retry on a
    /// unique-violation of `refresh_token_hash`.
    ///
    /// # Errors
    /// Returns an error if database insertion fails.
    pub async fn create(
        pool: &PgPool,
        session_id: Uuid,
        user_id: Uuid,
        meta: &SessionMeta,
        refresh_token_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<Session, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            r"
            INSERT INTO user_sessions
            (id, user_id, user_agent, ip, device_info, refresh_token_hash, expires_at)
            VALUES ($1, $2, $3, $4::inet, $5, $6, NOW() + ($7 * INTERVAL '1 second'))
            RETURNING {SESSION_COLUMNS}
            "
        ))
        .bind(session_id)
        .bind(user_id)
        .bind(meta.user_agent.as_deref())
        .bind(meta.ip.as_deref())
        .bind(meta.device_info.as_ref())
        .bind(refresh_token_hash)
        .bind(ttl_seconds)
        .fetch_one(pool)
        .await
    }

    /// Lists every session for a user, newest first, active and revoked
    /// alike. Callers mark the current one.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Session>> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list sessions")
    }

    /// Fetches a session that can back a token right now: active and not
    /// past its expiry. Revocation takes effect here, not at token expiry.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn lookup_active(pool: &PgPool, session_id: Uuid) -> Result<Option<Session>> {
        sqlx::query_as::<_, Session>(&format!(
            r"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE id = $1 AND is_active = TRUE AND expires_at > NOW()
            "
        ))
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .context("Failed to look up session")
    }

    /// Compare-and-rotate of the stored refresh hash, bumping
    /// `last_seen_at`. The presented hash must match the row in the same
    /// statement, so a given refresh token rotates at most once. Returns
    /// false on a stale hash or a session that went inactive or expired.
    ///
    /// # Errors
    /// Returns an error if the database update fails.
    pub async fn rotate_refresh(
        pool: &PgPool,
        session_id: Uuid,
        current_refresh_token_hash: &[u8],
        new_refresh_token_hash: &[u8],
    ) -> Result<bool> {
        let row = sqlx::query(
            r"
            UPDATE user_sessions
            SET refresh_token_hash = $3, last_seen_at = NOW()
            WHERE id = $1 AND refresh_token_hash = $2
              AND is_active = TRUE AND expires_at > NOW()
            RETURNING id
            ",
        )
        .bind(session_id)
        .bind(current_refresh_token_hash)
        .bind(new_refresh_token_hash)
        .fetch_optional(pool)
        .await
        .context("Failed to rotate refresh token")?;

        Ok(row.is_some())
    }

    /// Deactivates one session, scoped to its owner. Returns false when the
    /// row does not exist or belongs to someone else; revoking an already
    /// revoked session succeeds.
    ///
    /// # Errors
    /// Returns an error if the database update fails.
    pub async fn revoke(pool: &PgPool, user_id: Uuid, session_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "UPDATE user_sessions SET is_active = FALSE WHERE id = $2 AND user_id = $1 RETURNING id",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .context("Failed to revoke session")?;

        Ok(row.is_some())
    }

    /// Deactivates every active session for a user and returns how many
    /// flipped. Calling it again is a no-op that still succeeds.
    ///
    /// # Errors
    /// Returns an error if the database update fails.
    pub async fn revoke_all(pool: &PgPool, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = FALSE WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to revoke sessions")?;

        Ok(result.rows_affected())
    }
}
