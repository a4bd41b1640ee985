//! Data store gateway used by the orchestrators.
//!
//! Every method is a single logical unit against the store; no transaction spans
//! two calls. `SqliteStore` is the production implementation and simply delegates
//! to the repositories.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::db::models::{
    AttendeeList, CalendarLink, CreateEvent, CreateMirrorJob, EventType, MirrorJob,
};
use crate::db::repository::{
    CalendarLinkRepository, EventRepository, EventTypeRepository, MessageLinkRepository,
    MirrorJobRepository, RsvpRepository, UserRepository,
};
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Persist an event; `NotFound` when the proposer email or type id does not resolve.
    async fn create_event(&self, event: CreateEvent) -> AppResult<i64>;

    /// Rejected with `Conflict` when the event already has a calendar link.
    async fn create_calendar_link(
        &self,
        event_id: i64,
        calendar_id: &str,
        external_event_id: &str,
    ) -> AppResult<()>;

    /// Rejected with `Conflict` when the event already has a message link.
    async fn create_message_link(
        &self,
        event_id: i64,
        channel_id: &str,
        external_message_id: &str,
    ) -> AppResult<()>;

    async fn lookup_user_display_name(&self, email: &str) -> AppResult<String>;
    async fn lookup_event_type(&self, type_id: i64) -> AppResult<EventType>;
    async fn resolve_event_id_by_hash(&self, hash: &str) -> AppResult<i64>;

    async fn has_rsvp_record(&self, event_id: i64) -> AppResult<bool>;
    async fn has_calendar_link(&self, event_id: i64) -> AppResult<bool>;
    async fn has_message_link(&self, event_id: i64) -> AppResult<bool>;

    /// `NotFound` when the event has no RSVP record yet.
    async fn get_attendee_list(&self, event_id: i64) -> AppResult<AttendeeList>;

    /// Create (`expected_version == None`) or overwrite the attendee list.
    /// `Conflict` when another writer changed the record first.
    async fn upsert_rsvp(
        &self,
        event_id: i64,
        attendees: &[String],
        expected_version: Option<i64>,
    ) -> AppResult<i64>;

    /// Atomically add one email to the end of the list, creating the record if needed.
    async fn append_attendee(&self, event_id: i64, email: &str) -> AppResult<AttendeeList>;

    /// `NotFound` when the event has no calendar link.
    async fn get_calendar_link(&self, event_id: i64) -> AppResult<CalendarLink>;

    async fn record_mirror_job(&self, job: CreateMirrorJob) -> AppResult<MirrorJob>;
    async fn record_mirror_delivery(&self, job_id: &str, external_id: &str) -> AppResult<MirrorJob>;
    async fn mark_mirror_linked(&self, job_id: &str) -> AppResult<MirrorJob>;
    async fn register_mirror_failure(
        &self,
        job_id: &str,
        next_attempt_at: NaiveDateTime,
        error: &str,
    ) -> AppResult<MirrorJob>;
    /// Atomically claim due `failed` jobs and jobs left `pending`/`processing` since `stale_before`.
    async fn claim_due_mirror_jobs(
        &self,
        limit: i64,
        stale_before: NaiveDateTime,
    ) -> AppResult<Vec<MirrorJob>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn create_event(&self, event: CreateEvent) -> AppResult<i64> {
        EventRepository::create(&self.pool, event).await
    }

    async fn create_calendar_link(
        &self,
        event_id: i64,
        calendar_id: &str,
        external_event_id: &str,
    ) -> AppResult<()> {
        CalendarLinkRepository::create(&self.pool, event_id, calendar_id, external_event_id)
            .await
            .map(|_| ())
    }

    async fn create_message_link(
        &self,
        event_id: i64,
        channel_id: &str,
        external_message_id: &str,
    ) -> AppResult<()> {
        MessageLinkRepository::create(&self.pool, event_id, channel_id, external_message_id)
            .await
            .map(|_| ())
    }

    async fn lookup_user_display_name(&self, email: &str) -> AppResult<String> {
        UserRepository::find_by_email(&self.pool, email)
            .await?
            .map(|u| u.display_name())
            .ok_or_else(|| AppError::NotFound(format!("No user with email {}", email)))
    }

    async fn lookup_event_type(&self, type_id: i64) -> AppResult<EventType> {
        EventTypeRepository::find_by_id(&self.pool, type_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No event type with id {}", type_id)))
    }

    async fn resolve_event_id_by_hash(&self, hash: &str) -> AppResult<i64> {
        EventRepository::find_id_by_hash(&self.pool, hash)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No event with hash {}", hash)))
    }

    async fn has_rsvp_record(&self, event_id: i64) -> AppResult<bool> {
        RsvpRepository::exists(&self.pool, event_id).await
    }

    async fn has_calendar_link(&self, event_id: i64) -> AppResult<bool> {
        CalendarLinkRepository::exists(&self.pool, event_id).await
    }

    async fn has_message_link(&self, event_id: i64) -> AppResult<bool> {
        MessageLinkRepository::exists(&self.pool, event_id).await
    }

    async fn get_attendee_list(&self, event_id: i64) -> AppResult<AttendeeList> {
        RsvpRepository::find_by_event_id(&self.pool, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No RSVP record for event {}", event_id)))
    }

    async fn upsert_rsvp(
        &self,
        event_id: i64,
        attendees: &[String],
        expected_version: Option<i64>,
    ) -> AppResult<i64> {
        RsvpRepository::upsert(&self.pool, event_id, attendees, expected_version).await
    }

    async fn append_attendee(&self, event_id: i64, email: &str) -> AppResult<AttendeeList> {
        RsvpRepository::append(&self.pool, event_id, email).await
    }

    async fn get_calendar_link(&self, event_id: i64) -> AppResult<CalendarLink> {
        CalendarLinkRepository::find_by_event_id(&self.pool, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No calendar link for event {}", event_id)))
    }

    async fn record_mirror_job(&self, job: CreateMirrorJob) -> AppResult<MirrorJob> {
        MirrorJobRepository::create(&self.pool, job).await
    }

    async fn record_mirror_delivery(&self, job_id: &str, external_id: &str) -> AppResult<MirrorJob> {
        MirrorJobRepository::record_external_id(&self.pool, job_id, external_id).await
    }

    async fn mark_mirror_linked(&self, job_id: &str) -> AppResult<MirrorJob> {
        MirrorJobRepository::mark_linked(&self.pool, job_id).await
    }

    async fn register_mirror_failure(
        &self,
        job_id: &str,
        next_attempt_at: NaiveDateTime,
        error: &str,
    ) -> AppResult<MirrorJob> {
        MirrorJobRepository::register_failure(&self.pool, job_id, next_attempt_at, error).await
    }

    async fn claim_due_mirror_jobs(
        &self,
        limit: i64,
        stale_before: NaiveDateTime,
    ) -> AppResult<Vec<MirrorJob>> {
        MirrorJobRepository::fetch_and_claim_due(&self.pool, limit, stale_before).await
    }
}
