//! Database helpers for account, verification, and challenge state.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{Instrument, error};
use uuid::Uuid;

use crate::api::email::{EmailMessage, EmailSender};
use crate::sessions::{SessionMeta, repo::is_unique_violation};

use super::state::AuthConfig;
use super::utils::{
    build_verify_url, generate_challenge_token, generate_verification_token,
    hash_challenge_token, hash_verification_token,
};

/// Outcome when attempting to create a new user + verification record.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(Uuid),
    Conflict,
}

/// Outcome for a resend request (always 204 to avoid account probing).
#[derive(Debug)]
pub(super) enum ResendOutcome {
    Queued,
    Cooldown,
    Noop,
}

/// Outcome of an OAuth callback account lookup.
#[derive(Debug)]
pub(super) enum OauthUserOutcome {
    Created(UserRecord),
    Existing(UserRecord),
}

/// Account fields the handlers read. `password_hash` is `None` for
/// accounts provisioned through an OAuth provider.
#[derive(Debug, Clone)]
pub(super) struct UserRecord {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) display_name: String,
    pub(super) role: String,
    pub(super) password_hash: Option<String>,
    pub(super) email_verified_at: Option<DateTime<Utc>>,
    pub(super) two_factor_enabled: bool,
    pub(super) created_at: DateTime<Utc>,
}

/// Pending login context returned when a two-factor challenge is consumed.
#[derive(Debug)]
pub(super) struct ChallengeRecord {
    pub(super) user_id: Uuid,
    pub(super) meta: SessionMeta,
}

fn map_user(row: &PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        role: row.get("role"),
        password_hash: row.get("password_hash"),
        email_verified_at: row.get("email_verified_at"),
        two_factor_enabled: row.get("two_factor_enabled"),
        created_at: row.get("created_at"),
    }
}

pub(super) async fn lookup_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, email, display_name, role, password_hash,
               email_verified_at, two_factor_enabled, created_at
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| map_user(&row)))
}

pub(super) async fn lookup_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, email, display_name, role, password_hash,
               email_verified_at, two_factor_enabled, created_at
        FROM users
        WHERE id = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;

    Ok(row.map(|row| map_user(&row)))
}

pub(super) async fn insert_user_and_verification(
    pool: &PgPool,
    email: &str,
    display_name: &str,
    password_hash: &str,
    config: &AuthConfig,
    sender: &dyn EmailSender,
) -> Result<SignupOutcome> {
    // User row and verification token are created together; the email goes
    // out only after the transaction commits.
    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let query = r"
        INSERT INTO users (id, email, display_name, password_hash)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(display_name)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(SignupOutcome::Conflict);
            }
            return Err(err).context("failed to insert user");
        }
    };

    let token = insert_verification_token(&mut tx, user_id, config).await?;

    tx.commit().await.context("commit signup transaction")?;

    send_verification_email(sender, email, &token, config);

    Ok(SignupOutcome::Created(user_id))
}

async fn insert_verification_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    config: &AuthConfig,
) -> Result<String> {
    // Generate a raw token for the email link and store only its hash.
    let token = generate_verification_token()?;
    let token_hash = hash_verification_token(&token);

    let query = r"
        INSERT INTO email_verification_tokens (id, user_id, token_hash, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token_hash)
        .bind(config.email_token_ttl_seconds())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email verification token")?;

    Ok(token)
}

// Delivery is best-effort once the transaction commits; a lost email is
// recovered through the resend endpoint.
fn send_verification_email(sender: &dyn EmailSender, email: &str, token: &str, config: &AuthConfig) {
    let verify_url = build_verify_url(config.frontend_base_url(), token);
    let payload = json!({
        "email": email,
        "verify_url": verify_url,
    });

    let message = EmailMessage {
        to_email: email.to_string(),
        template: "verify_email".to_string(),
        payload_json: payload.to_string(),
    };
    if let Err(err) = sender.send(&message) {
        error!("Failed to send verification email: {err}");
    }
}

pub(super) async fn consume_verification_token(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<Uuid>> {
    // Mark the token consumed if still valid, then flag the user verified in
    // the same transaction.
    let mut tx = pool.begin().await.context("begin verification transaction")?;

    let query = r"
        UPDATE email_verification_tokens
        SET consumed_at = NOW()
        WHERE token_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume verification token")?;

    let Some(row) = row else {
        tx.commit().await.context("commit verification noop")?;
        return Ok(None);
    };

    let user_id: Uuid = row.get("user_id");
    let query = r"
        UPDATE users
        SET email_verified_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;

    tx.commit().await.context("commit verification transaction")?;

    Ok(Some(user_id))
}

pub(super) async fn enqueue_resend_verification(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
    sender: &dyn EmailSender,
) -> Result<ResendOutcome> {
    // Resend is intentionally opaque: callers always get 204 to avoid
    // account probing.
    let mut tx = pool.begin().await.context("begin resend transaction")?;

    let query = r"
        SELECT id, email, email_verified_at
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup user for resend")?;

    let Some(row) = row else {
        tx.commit().await.context("commit resend noop")?;
        return Ok(ResendOutcome::Noop);
    };

    let verified_at: Option<DateTime<Utc>> = row.get("email_verified_at");
    if verified_at.is_some() {
        tx.commit().await.context("commit resend noop")?;
        return Ok(ResendOutcome::Noop);
    }

    let user_id: Uuid = row.get("id");
    if resend_cooldown_active(&mut tx, user_id, config.resend_cooldown_seconds()).await? {
        tx.commit().await.context("commit resend cooldown")?;
        return Ok(ResendOutcome::Cooldown);
    }

    let email: String = row.get("email");
    let token = insert_verification_token(&mut tx, user_id, config).await?;
    tx.commit().await.context("commit resend transaction")?;

    send_verification_email(sender, &email, &token, config);

    Ok(ResendOutcome::Queued)
}

async fn resend_cooldown_active(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    cooldown_seconds: i64,
) -> Result<bool> {
    // Cooldown prevents repeated resend requests from hammering delivery.
    let query = r"
        SELECT 1
        FROM email_verification_tokens
        WHERE user_id = $1
          AND created_at > NOW() - ($2 * INTERVAL '1 second')
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(cooldown_seconds)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check resend cooldown")?;
    Ok(row.is_some())
}

pub(super) async fn insert_login_challenge(
    pool: &PgPool,
    user_id: Uuid,
    meta: &SessionMeta,
    config: &AuthConfig,
) -> Result<String> {
    // Generate a random challenge, store only its hash with the login
    // context, and return the raw value for the client to echo back.
    let query = r"
        INSERT INTO login_challenges
            (id, user_id, challenge_hash, user_agent, ip, device_info, expires_at)
        VALUES ($1, $2, $3, $4, $5::inet, $6, NOW() + ($7 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_challenge_token()?;
        let challenge_hash = hash_challenge_token(&token);
        let result = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(challenge_hash)
            .bind(meta.user_agent.as_deref())
            .bind(meta.ip.as_deref())
            .bind(meta.device_info.as_ref())
            .bind(config.challenge_ttl_seconds())
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert login challenge"),
        }
    }

    Err(anyhow!("failed to generate unique login challenge"))
}

pub(super) async fn consume_login_challenge(
    pool: &PgPool,
    challenge_hash: &[u8],
) -> Result<Option<ChallengeRecord>> {
    // Consumption is a single guarded UPDATE, so a challenge verifies at
    // most once even under concurrent requests.
    let query = r"
        UPDATE login_challenges
        SET consumed_at = NOW()
        WHERE challenge_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id, user_agent, host(ip) AS ip, device_info
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(challenge_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume login challenge")?;

    Ok(row.map(|row| ChallengeRecord {
        user_id: row.get("user_id"),
        meta: SessionMeta {
            user_agent: row.get("user_agent"),
            ip: row.get("ip"),
            device_info: row.get("device_info"),
        },
    }))
}

pub(super) async fn set_two_factor_enabled(
    pool: &PgPool,
    user_id: Uuid,
    enabled: bool,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET two_factor_enabled = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(enabled)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update two-factor flag")?;
    Ok(())
}

pub(super) async fn find_or_create_oauth_user(
    pool: &PgPool,
    email: &str,
    display_name: &str,
) -> Result<OauthUserOutcome> {
    if let Some(user) = lookup_user_by_email(pool, email).await? {
        return Ok(OauthUserOutcome::Existing(user));
    }

    // Provider emails arrive verified; the account never gets a password.
    let query = r"
        INSERT INTO users (id, email, display_name, email_verified_at)
        VALUES ($1, $2, $3, NOW())
        RETURNING id, email, display_name, role, password_hash,
                  email_verified_at, two_factor_enabled, created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(display_name)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(OauthUserOutcome::Created(map_user(&row))),
        // Lost a race with a concurrent callback for the same account.
        Err(err) if is_unique_violation(&err) => match lookup_user_by_email(pool, email).await? {
            Some(user) => Ok(OauthUserOutcome::Existing(user)),
            None => Err(anyhow!("user missing after unique violation")),
        },
        Err(err) => Err(err).context("failed to insert oauth user"),
    }
}

#[cfg(test)]
mod tests {
    use super::{ChallengeRecord, ResendOutcome, SignupOutcome};
    use crate::sessions::SessionMeta;
    use uuid::Uuid;

    #[test]
    fn signup_outcome_debug_names() {
        assert!(format!("{:?}", SignupOutcome::Created(Uuid::nil())).starts_with("Created"));
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn resend_outcome_debug_names() {
        assert_eq!(format!("{:?}", ResendOutcome::Queued), "Queued");
        assert_eq!(format!("{:?}", ResendOutcome::Cooldown), "Cooldown");
        assert_eq!(format!("{:?}", ResendOutcome::Noop), "Noop");
    }

    #[test]
    fn challenge_record_carries_login_context() {
        let record = ChallengeRecord {
            user_id: Uuid::nil(),
            meta: SessionMeta {
                user_agent: Some("Mozilla/5.0".to_string()),
                ip: Some("203.0.113.7".to_string()),
                device_info: Some(serde_json::json!({"platform": "android"})),
            },
        };
        assert_eq!(record.user_id, Uuid::nil());
        assert_eq!(record.meta.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(record.meta.ip.as_deref(), Some("203.0.113.7"));
    }
}
