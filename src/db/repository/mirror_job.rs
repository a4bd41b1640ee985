use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateMirrorJob, MirrorJob};
use crate::error::{AppError, AppResult};

const MIRROR_JOB_COLUMNS: &str = r#"
    id,
    event_id,
    target,
    destination_id,
    payload_json,
    status,
    attempts,
    max_attempts,
    next_attempt_at,
    last_error,
    external_id,
    created_at,
    updated_at
"#;

/// Repository for the persisted mirror saga (`mirror_jobs` table).
///
/// Implementation notes:
/// - Claiming uses an atomic single-statement UPDATE with a subselect:
///   `UPDATE ... WHERE id IN (SELECT id ... LIMIT n) RETURNING ...`
///   so two reconciliation passes never replay the same job.
/// - Claimable: `failed` jobs whose `next_attempt_at` has passed, plus `pending` or
///   `processing` jobs untouched since `stale_before` (the process died mid-mirror).
pub struct MirrorJobRepository;

impl MirrorJobRepository {
    /// Record a job in `pending` state, due immediately.
    pub async fn create(pool: &SqlitePool, job: CreateMirrorJob) -> AppResult<MirrorJob> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, MirrorJob>(&format!(
            r#"
            INSERT INTO mirror_jobs (
                id,
                event_id,
                target,
                destination_id,
                payload_json,
                status,
                attempts,
                max_attempts,
                next_attempt_at,
                last_error,
                external_id,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?, NULL, NULL, ?, ?)
            RETURNING {}
            "#,
            MIRROR_JOB_COLUMNS
        ))
        .bind(id)
        .bind(job.event_id)
        .bind(job.target.as_str())
        .bind(job.destination_id)
        .bind(job.payload_json)
        .bind(job.max_attempts.max(1))
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Claim up to `limit` due jobs in one atomic statement, oldest due first.
    /// A job is claimed at most once per call.
    pub async fn fetch_and_claim_due(
        pool: &SqlitePool,
        limit: i64,
        stale_before: NaiveDateTime,
    ) -> AppResult<Vec<MirrorJob>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now().naive_utc();
        let mut jobs = sqlx::query_as::<_, MirrorJob>(&format!(
            r#"
            UPDATE mirror_jobs
            SET status = 'processing', updated_at = ?
            WHERE id IN (
                SELECT id FROM mirror_jobs
                WHERE (status = 'failed' AND next_attempt_at <= ?)
                   OR (status IN ('pending', 'processing') AND updated_at < ?)
                ORDER BY next_attempt_at ASC
                LIMIT ?
            )
            RETURNING {}
            "#,
            MIRROR_JOB_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .bind(stale_before)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        // RETURNING order is unspecified
        jobs.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        Ok(jobs)
    }

    pub async fn mark_linked(pool: &SqlitePool, id: &str) -> AppResult<MirrorJob> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, MirrorJob>(&format!(
            r#"
            UPDATE mirror_jobs
            SET status = 'linked', last_error = NULL, updated_at = ?
            WHERE id = ?
            RETURNING {}
            "#,
            MIRROR_JOB_COLUMNS
        ))
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Remember what the external service returned, so a replay can link
    /// without writing to it a second time.
    pub async fn record_external_id(
        pool: &SqlitePool,
        id: &str,
        external_id: &str,
    ) -> AppResult<MirrorJob> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, MirrorJob>(&format!(
            r#"
            UPDATE mirror_jobs
            SET external_id = ?, updated_at = ?
            WHERE id = ?
            RETURNING {}
            "#,
            MIRROR_JOB_COLUMNS
        ))
        .bind(external_id)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Increment attempts, set `next_attempt_at` and `last_error`. Once the new
    /// attempt count reaches `max_attempts` the job moves to 'dead'.
    pub async fn register_failure(
        pool: &SqlitePool,
        id: &str,
        next_attempt_at: NaiveDateTime,
        last_error: &str,
    ) -> AppResult<MirrorJob> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, MirrorJob>(&format!(
            r#"
            UPDATE mirror_jobs
            SET
                attempts = attempts + 1,
                next_attempt_at = ?,
                last_error = ?,
                status = CASE WHEN attempts + 1 >= max_attempts THEN 'dead' ELSE 'failed' END,
                updated_at = ?
            WHERE id = ?
            RETURNING {}
            "#,
            MIRROR_JOB_COLUMNS
        ))
        .bind(next_attempt_at)
        .bind(last_error)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    #[cfg(test)]
    pub async fn find_by_event_id(pool: &SqlitePool, event_id: i64) -> AppResult<Vec<MirrorJob>> {
        let rows = sqlx::query_as::<_, MirrorJob>(&format!(
            r#"
            SELECT {}
            FROM mirror_jobs
            WHERE event_id = ?
            ORDER BY created_at ASC
            "#,
            MIRROR_JOB_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}
