use sqlx::SqlitePool;

use crate::db::models::{EventType, User};
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, first_name, last_name, created_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}

// ============================================================================
// Event Type Repository
// ============================================================================

pub struct EventTypeRepository;

impl EventTypeRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<EventType>> {
        let row = sqlx::query_as::<_, EventType>(
            "SELECT id, label, icon FROM event_types WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
