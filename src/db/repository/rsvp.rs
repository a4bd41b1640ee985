use anyhow::Context;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{AttendeeList, RsvpRow};
use crate::error::{AppError, AppResult};

/// Repository for per-event attendee lists (`rsvps` table).
///
/// Single RSVPs go through [`RsvpRepository::append`]. Whole-list writes through
/// `upsert` are version-checked: a write that lost a race fails with `Conflict`
/// instead of overwriting the other writer's list.
pub struct RsvpRepository;

impl RsvpRepository {
    pub async fn exists(pool: &SqlitePool, event_id: i64) -> AppResult<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM rsvps WHERE event_id = ? LIMIT 1")
            .bind(event_id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(found.is_some())
    }

    pub async fn find_by_event_id(
        pool: &SqlitePool,
        event_id: i64,
    ) -> AppResult<Option<AttendeeList>> {
        let row = sqlx::query_as::<_, RsvpRow>(
            r#"
            SELECT event_id, attendees, version, created_at, updated_at
            FROM rsvps
            WHERE event_id = ?
            "#,
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.map(|r| -> AppResult<AttendeeList> {
            let emails: Vec<String> = serde_json::from_str(&r.attendees)
                .with_context(|| format!("Corrupt attendee list for event {}", r.event_id))?;
            Ok(AttendeeList {
                event_id: r.event_id,
                emails,
                version: r.version,
            })
        })
        .transpose()
    }

    /// Append one email to the event's list in a single statement, creating the
    /// record on first RSVP. Concurrent appends serialize in SQLite, so none is lost.
    pub async fn append(pool: &SqlitePool, event_id: i64, email: &str) -> AppResult<AttendeeList> {
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, RsvpRow>(
            r#"
            INSERT INTO rsvps (event_id, attendees, version, created_at, updated_at)
            VALUES (?, json_array(?), 1, ?, ?)
            ON CONFLICT(event_id) DO UPDATE SET
                attendees = json_insert(rsvps.attendees, '$[#]', ?),
                version = rsvps.version + 1,
                updated_at = excluded.updated_at
            RETURNING event_id, attendees, version, created_at, updated_at
            "#,
        )
        .bind(event_id)
        .bind(email)
        .bind(now)
        .bind(now)
        .bind(email)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound(format!("No event with id {}", event_id))
            }
            other => AppError::Database(other),
        })?;

        let emails: Vec<String> = serde_json::from_str(&row.attendees)
            .with_context(|| format!("Corrupt attendee list for event {}", row.event_id))?;
        Ok(AttendeeList {
            event_id: row.event_id,
            emails,
            version: row.version,
        })
    }

    /// Create the record (when `expected_version` is `None`) or overwrite the whole
    /// list (when the stored version still equals `expected_version`).
    ///
    /// Returns the new version.
    pub async fn upsert(
        pool: &SqlitePool,
        event_id: i64,
        attendees: &[String],
        expected_version: Option<i64>,
    ) -> AppResult<i64> {
        let now = Utc::now().naive_utc();
        let attendees_json =
            serde_json::to_string(attendees).context("Failed to serialize attendee list")?;

        match expected_version {
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO rsvps (event_id, attendees, version, created_at, updated_at)
                    VALUES (?, ?, 1, ?, ?)
                    ON CONFLICT(event_id) DO NOTHING
                    "#,
                )
                .bind(event_id)
                .bind(&attendees_json)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                        AppError::NotFound(format!("No event with id {}", event_id))
                    }
                    other => AppError::Database(other),
                })?;

                if result.rows_affected() == 0 {
                    return Err(AppError::Conflict(format!(
                        "RSVP record for event {} was created concurrently",
                        event_id
                    )));
                }
                Ok(1)
            }
            Some(version) => {
                let result = sqlx::query(
                    r#"
                    UPDATE rsvps
                    SET attendees = ?, version = version + 1, updated_at = ?
                    WHERE event_id = ? AND version = ?
                    "#,
                )
                .bind(&attendees_json)
                .bind(now)
                .bind(event_id)
                .bind(version)
                .execute(pool)
                .await
                .map_err(AppError::Database)?;

                if result.rows_affected() == 0 {
                    return Err(AppError::Conflict(format!(
                        "RSVP record for event {} changed since version {}",
                        event_id, version
                    )));
                }
                Ok(version + 1)
            }
        }
    }
}
