use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{CalendarLink, MessageLink};
use crate::error::{AppError, AppResult};

/// Map constraint failures on link inserts to the error taxonomy: a second link
/// for the same event is a `Conflict`, a link to a missing event is `NotFound`.
fn map_link_insert_error(e: sqlx::Error, table: &str, event_id: i64) -> AppError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return AppError::Conflict(format!("{} already exists for event {}", table, event_id));
        }
        if db_err.is_foreign_key_violation() {
            return AppError::NotFound(format!("No event with id {}", event_id));
        }
    }
    AppError::Database(e)
}

// ============================================================================
// Calendar Link Repository
// ============================================================================

pub struct CalendarLinkRepository;

impl CalendarLinkRepository {
    /// Record a Google Calendar copy of `event_id`. A second insert for the same
    /// event is rejected with `Conflict`.
    pub async fn create(
        pool: &SqlitePool,
        event_id: i64,
        calendar_id: &str,
        external_event_id: &str,
    ) -> AppResult<CalendarLink> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, CalendarLink>(
            r#"
            INSERT INTO calendar_links (event_id, calendar_id, external_event_id, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING event_id, calendar_id, external_event_id, created_at
            "#,
        )
        .bind(event_id)
        .bind(calendar_id)
        .bind(external_event_id)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| map_link_insert_error(e, "calendar link", event_id))
    }

    pub async fn find_by_event_id(
        pool: &SqlitePool,
        event_id: i64,
    ) -> AppResult<Option<CalendarLink>> {
        let row = sqlx::query_as::<_, CalendarLink>(
            r#"
            SELECT event_id, calendar_id, external_event_id, created_at
            FROM calendar_links
            WHERE event_id = ?
            "#,
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn exists(pool: &SqlitePool, event_id: i64) -> AppResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM calendar_links WHERE event_id = ? LIMIT 1",
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(found.is_some())
    }
}

// ============================================================================
// Message Link Repository
// ============================================================================

pub struct MessageLinkRepository;

impl MessageLinkRepository {
    pub async fn create(
        pool: &SqlitePool,
        event_id: i64,
        channel_id: &str,
        external_message_id: &str,
    ) -> AppResult<MessageLink> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, MessageLink>(
            r#"
            INSERT INTO message_links (event_id, channel_id, external_message_id, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING event_id, channel_id, external_message_id, created_at
            "#,
        )
        .bind(event_id)
        .bind(channel_id)
        .bind(external_message_id)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| map_link_insert_error(e, "message link", event_id))
    }

    pub async fn exists(pool: &SqlitePool, event_id: i64) -> AppResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM message_links WHERE event_id = ? LIMIT 1",
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(found.is_some())
    }
}
