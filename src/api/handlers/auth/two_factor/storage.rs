//! Storage helpers for recovery codes.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::recovery::RecoveryCodeBatch;

/// Replace the user's recovery codes with a fresh batch. Old rows are
/// deleted, consumed or not; only one batch is ever live.
pub(super) async fn replace_recovery_codes(
    pool: &PgPool,
    user_id: Uuid,
    batch: &RecoveryCodeBatch,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin recovery code batch")?;

    sqlx::query("DELETE FROM recovery_codes WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete old recovery codes")?;

    let query = r"
        INSERT INTO recovery_codes (id, user_id, batch_id, code_hash)
        VALUES ($1, $2, $3, $4)
    ";
    for hash in &batch.code_hashes {
        sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(batch.batch_id)
            .bind(hash)
            .execute(&mut *tx)
            .await
            .context("failed to insert recovery code")?;
    }

    tx.commit().await.context("commit recovery code batch")?;
    Ok(())
}

/// List unused recovery code hashes for a user.
pub(super) async fn list_unused_code_hashes(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>> {
    let query = r"
        SELECT code_hash
        FROM recovery_codes
        WHERE user_id = $1
          AND consumed_at IS NULL
    ";
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("failed to list recovery codes")?;
    Ok(rows
        .into_iter()
        .map(|row| row.get::<String, _>("code_hash"))
        .collect())
}

/// Count unused recovery codes for a user.
pub(super) async fn count_unused_codes(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS remaining
        FROM recovery_codes
        WHERE user_id = $1
          AND consumed_at IS NULL
    ";
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .context("failed to count recovery codes")?;
    Ok(row.get("remaining"))
}

/// Mark a recovery code as consumed. The guarded UPDATE makes the code
/// single-use even under concurrent verification attempts.
pub(super) async fn consume_recovery_code(
    pool: &PgPool,
    user_id: Uuid,
    code_hash: &str,
) -> Result<bool> {
    let query = r"
        UPDATE recovery_codes
        SET consumed_at = NOW()
        WHERE user_id = $1
          AND code_hash = $2
          AND consumed_at IS NULL
        RETURNING id
    ";
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(code_hash)
        .fetch_optional(pool)
        .await
        .context("failed to consume recovery code")?;
    Ok(row.is_some())
}

/// Delete all recovery codes for a user (two-factor disable path).
pub(super) async fn delete_recovery_codes(pool: &PgPool, user_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM recovery_codes WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to delete recovery codes")?;
    Ok(())
}
