use crate::totp::models::TotpCredential;
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

pub struct TotpRepo;

impl TotpRepo {
    /// Creates a new TOTP credential in unconfirmed state, replacing any
    /// earlier credential for the user.
    ///
    /// # Errors
    /// Returns an error if database insertion fails.
    pub async fn create_credential(
        pool: &PgPool,
        credential_id: Uuid,
        user_id: Uuid,
        secret: &[u8],
    ) -> Result<()> {
        let mut tx = pool.begin().await?;

        // Callers gate setup on the account flag, so any row still here is
        // a pending attempt or a leftover from an interrupted disable.
        sqlx::query("DELETE FROM totp_credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r"
            INSERT INTO totp_credentials (id, user_id, secret)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(credential_id)
        .bind(user_id)
        .bind(secret)
        .execute(&mut *tx)
        .await
        .context("Failed to insert TOTP credential")?;

        tx.commit().await?;

        Ok(())
    }

    /// Gets the user's credential regardless of confirmation state.
    ///
    /// # Errors
    /// Returns an error if database query fails.
    pub async fn get_for_user(pool: &PgPool, user_id: Uuid) -> Result<Option<TotpCredential>> {
        sqlx::query_as::<_, TotpCredential>("SELECT * FROM totp_credentials WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch credential")
    }

    /// Gets the confirmed credential for a user, if any.
    ///
    /// # Errors
    /// Returns an error if database query fails.
    pub async fn get_active_credential(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Option<TotpCredential>> {
        sqlx::query_as::<_, TotpCredential>(
            "SELECT * FROM totp_credentials WHERE user_id = $1 AND confirmed_at IS NOT NULL",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch active credential")
    }

    /// Marks the user's pending credential as confirmed.
    ///
    /// # Errors
    /// Returns an error if database update fails.
    pub async fn confirm_credential(pool: &PgPool, user_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE totp_credentials SET confirmed_at = NOW() WHERE user_id = $1 AND confirmed_at IS NULL",
        )
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to confirm credential")?;
        Ok(())
    }

    /// Updates last used timestamp.
    ///
    /// # Errors
    /// Returns an error if database update fails.
    pub async fn touch_last_used(pool: &PgPool, credential_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE totp_credentials SET last_used_at = NOW() WHERE id = $1")
            .bind(credential_id)
            .execute(pool)
            .await
            .context("Failed to touch last_used_at")?;
        Ok(())
    }

    /// Hard deletes all TOTP credentials for a user.
    ///
    /// # Errors
    /// Returns an error if database execution fails.
    pub async fn delete_for_user(pool: &PgPool, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM totp_credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await
            .context("Failed to delete TOTP credentials")?;
        Ok(())
    }
}
