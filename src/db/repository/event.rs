use sqlx::SqlitePool;

use crate::db::models::CreateEvent;
use crate::db::repository::{EventTypeRepository, UserRepository};
use crate::error::{AppError, AppResult};

// ============================================================================
// Event Repository
// ============================================================================

pub struct EventRepository;

impl EventRepository {
    /// Insert an event, resolving the proposer by email and checking the type id.
    ///
    /// Fails with `NotFound` when either association does not resolve.
    pub async fn create(pool: &SqlitePool, event: CreateEvent) -> AppResult<i64> {
        let proposer = UserRepository::find_by_email(pool, &event.proposer_email)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No user with email {}", event.proposer_email))
            })?;

        if EventTypeRepository::find_by_id(pool, event.type_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!(
                "No event type with id {}",
                event.type_id
            )));
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO events (
                title,
                description,
                start_date_time,
                start_date_time_unix,
                start_date_time_tz_offset,
                end_date_time,
                end_date_time_unix,
                end_date_time_tz_offset,
                timezone,
                location,
                attendance_limit,
                hash,
                series,
                type_id,
                proposer_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.start.iso)
        .bind(event.start.unix_millis)
        .bind(event.start.tz_offset_minutes)
        .bind(&event.end.iso)
        .bind(event.end.unix_millis)
        .bind(event.end.tz_offset_minutes)
        .bind(&event.timezone)
        .bind(&event.location)
        .bind(event.attendance_limit)
        .bind(&event.hash)
        .bind(event.series)
        .bind(event.type_id)
        .bind(proposer.id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(id)
    }

    #[cfg(test)]
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: i64,
    ) -> AppResult<Option<crate::db::models::Event>> {
        let row = sqlx::query_as::<_, crate::db::models::Event>(
            r#"
            SELECT
                id, title, description,
                start_date_time, start_date_time_unix, start_date_time_tz_offset,
                end_date_time, end_date_time_unix, end_date_time_tz_offset,
                timezone, location, attendance_limit,
                hash, series, type_id, proposer_id, created_at
            FROM events
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Id of the first event carrying `hash` (the earliest occurrence for a series).
    pub async fn find_id_by_hash(pool: &SqlitePool, hash: &str) -> AppResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM events WHERE hash = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(id)
    }
}
