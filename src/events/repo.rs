use crate::events::models::{EventFilter, SecurityEvent, SecurityEventType};
use crate::sessions::SessionMeta;
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

pub struct EventRepo;

impl EventRepo {
    /// Appends one event. The log has no update or delete path anywhere in
    /// the service.
    ///
    /// UUIDv7 ids keep inserts sequential and the index happy on a table
    /// that only ever grows.
    ///
    /// # Errors
    /// Returns an error if database insertion fails.
    pub async fn record(
        pool: &PgPool,
        user_id: Uuid,
        event_type: SecurityEventType,
        meta: &SessionMeta,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO security_events (id, user_id, event_type, ip, user_agent, device_info)
            VALUES ($1, $2, $3, $4::inet, $5, $6)
            ",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(event_type.as_str())
        .bind(meta.ip.as_deref())
        .bind(meta.user_agent.as_deref())
        .bind(meta.device_info.as_ref())
        .execute(pool)
        .await
        .context("Failed to record security event")?;
        Ok(())
    }

    /// Reads a page of one user's events, newest first, optionally narrowed
    /// by type and a unix-seconds time window.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        filter: &EventFilter,
    ) -> Result<Vec<SecurityEvent>> {
        sqlx::query_as::<_, SecurityEvent>(
            r"
            SELECT id, user_id, event_type, host(ip) AS ip, user_agent, device_info, created_at
            FROM security_events
            WHERE user_id = $1
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::bigint IS NULL OR created_at >= to_timestamp($3))
              AND ($4::bigint IS NULL OR created_at <= to_timestamp($4))
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            ",
        )
        .bind(user_id)
        .bind(filter.event_type.map(SecurityEventType::as_str))
        .bind(filter.from_unix_seconds)
        .bind(filter.to_unix_seconds)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(pool)
        .await
        .context("Failed to list security events")
    }
}
