//! Fixtures and recording doubles shared by the unit tests.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::models::{CreateEvent, DerivedInstant, EventDraft};
use crate::db::{EventStore, SqliteStore};
use crate::error::{AppError, AppResult};
use crate::services::events::EventService;
use crate::services::google_calendar::{
    CalendarEventSnapshot, CalendarEventUpdate, CalendarProvider, GoogleAttendee, GoogleEvent,
};
use crate::services::reconcile::Reconciler;
use crate::services::rsvp::RsvpService;
use crate::services::slack::{Announcer, SlackAnnouncement};
use crate::AppState;

pub const PROPOSER: &str = "ada@example.com";
pub const PROPOSER_NAME: &str = "Ada";

/// Fresh in-memory database with the real migrations and one known proposer.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();

    seed(pool).await
}

/// Database file opened the way `init_db` opens it, with several connections,
/// so writes really race. Returns the path for cleanup.
pub async fn file_pool(max_connections: u32) -> (SqlitePool, PathBuf) {
    let path = std::env::temp_dir().join(format!("juntos-test-{}.db", uuid::Uuid::new_v4()));
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .unwrap();

    (seed(pool).await, path)
}

async fn seed(pool: SqlitePool) -> SqlitePool {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    sqlx::query("INSERT INTO users (email, first_name, last_name) VALUES (?, ?, ?)")
        .bind(PROPOSER)
        .bind(PROPOSER_NAME)
        .bind("Lovelace")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

/// A Berlin evening event proposed by [`PROPOSER`], no mirrors requested.
pub fn draft(title: &str) -> EventDraft {
    EventDraft {
        title: title.to_string(),
        description: "Monthly meetup".to_string(),
        start_date_time: DateTime::parse_from_rfc3339("2024-05-01T18:00:00+02:00").unwrap(),
        end_date_time: DateTime::parse_from_rfc3339("2024-05-01T19:30:00+02:00").unwrap(),
        timezone: "Europe/Berlin".to_string(),
        location: "Kernel House".to_string(),
        limit: None,
        proposer_email: PROPOSER.to_string(),
        type_id: None,
        post_on_slack: false,
        slack_channel_id: None,
        create_gcal_event: false,
        gcal_calendar_id: None,
    }
}

pub async fn store_with_event() -> (Arc<dyn EventStore>, i64) {
    let store: Arc<dyn EventStore> = Arc::new(SqliteStore::new(memory_pool().await));
    let instant = DerivedInstant {
        iso: "2024-05-01T16:00:00.000Z".to_string(),
        unix_millis: 1_714_579_200_000,
        tz_offset_minutes: -120,
    };
    let id = store
        .create_event(CreateEvent {
            title: "Fixture".into(),
            description: String::new(),
            start: instant.clone(),
            end: instant,
            timezone: "Europe/Berlin".into(),
            location: String::new(),
            attendance_limit: 0,
            hash: "fixture001".into(),
            series: false,
            type_id: 1,
            proposer_email: PROPOSER.into(),
        })
        .await
        .unwrap();
    (store, id)
}

// ============================================================================
// Recording doubles
// ============================================================================

#[derive(Default)]
struct CalendarLog {
    failure: Option<String>,
    calls: Vec<String>,
    created: Vec<(GoogleEvent, String)>,
    updates: Vec<CalendarEventUpdate>,
}

/// Google Calendar stand-in: records every call, hands out `gcal-N` ids and
/// fails every call while a failure is set.
#[derive(Default)]
pub struct RecordingCalendar {
    log: Mutex<CalendarLog>,
}

impl RecordingCalendar {
    pub fn fail_with(&self, message: &str) {
        self.log.lock().unwrap().failure = Some(message.to_string());
    }

    pub fn recover(&self) {
        self.log.lock().unwrap().failure = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn created(&self) -> Vec<(GoogleEvent, String)> {
        self.log.lock().unwrap().created.clone()
    }

    pub fn updates(&self) -> Vec<CalendarEventUpdate> {
        self.log.lock().unwrap().updates.clone()
    }

    pub fn attendee_updates(&self) -> usize {
        self.log.lock().unwrap().updates.len()
    }

    fn record(&self, call: String) -> AppResult<()> {
        let mut log = self.log.lock().unwrap();
        log.calls.push(call);
        match log.failure {
            Some(ref message) => Err(AppError::Calendar(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CalendarProvider for RecordingCalendar {
    async fn create_event(&self, event: &GoogleEvent, calendar_id: &str) -> AppResult<String> {
        self.record(format!("create {}", calendar_id))?;
        let mut log = self.log.lock().unwrap();
        let id = format!("gcal-{}", log.created.len() + 1);
        log.created.push((event.clone(), calendar_id.to_string()));
        Ok(id)
    }

    async fn fetch_event(
        &self,
        calendar_id: &str,
        external_event_id: &str,
    ) -> AppResult<CalendarEventSnapshot> {
        self.record(format!("fetch {} {}", calendar_id, external_event_id))?;
        Ok(CalendarEventSnapshot {
            id: Some(external_event_id.to_string()),
            summary: Some("Fixture".to_string()),
            creator: Some(serde_json::json!({ "email": PROPOSER })),
            start: None,
            end: None,
            attendees: vec![GoogleAttendee {
                email: PROPOSER.to_string(),
                organizer: Some(true),
                response_status: Some("accepted".to_string()),
            }],
        })
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        external_event_id: &str,
        update: &CalendarEventUpdate,
    ) -> AppResult<()> {
        self.record(format!("update {} {}", calendar_id, external_event_id))?;
        self.log.lock().unwrap().updates.push(update.clone());
        Ok(())
    }
}

#[derive(Default)]
struct AnnouncerLog {
    failure: Option<String>,
    sent: Vec<(SlackAnnouncement, String)>,
}

/// Slack stand-in: keeps successfully "posted" announcements.
#[derive(Default)]
pub struct RecordingAnnouncer {
    log: Mutex<AnnouncerLog>,
}

impl RecordingAnnouncer {
    pub fn fail_with(&self, message: &str) {
        self.log.lock().unwrap().failure = Some(message.to_string());
    }

    pub fn recover(&self) {
        self.log.lock().unwrap().failure = None;
    }

    pub fn sent(&self) -> Vec<(SlackAnnouncement, String)> {
        self.log.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl Announcer for RecordingAnnouncer {
    async fn send_announcement(
        &self,
        announcement: &SlackAnnouncement,
        channel_id: &str,
    ) -> AppResult<String> {
        let mut log = self.log.lock().unwrap();
        if let Some(ref message) = log.failure {
            return Err(AppError::Messaging(message.clone()));
        }
        log.sent.push((announcement.clone(), channel_id.to_string()));
        Ok(format!("1700000000.{:06}", log.sent.len()))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Orchestrators wired to an in-memory store and recording integrations.
pub struct Harness {
    pub pool: SqlitePool,
    pub store: Arc<dyn EventStore>,
    pub calendar: Arc<RecordingCalendar>,
    pub announcer: Arc<RecordingAnnouncer>,
    pub config: Config,
    pub events: EventService,
    pub rsvp: RsvpService,
    pub reconciler: Reconciler,
    integrations: bool,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(memory_pool().await, true)
    }

    /// Neither Google Calendar nor Slack configured.
    pub async fn without_integrations() -> Self {
        Self::build(memory_pool().await, false)
    }

    /// Production configuration over a caller-supplied pool.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self::build(pool, true)
    }

    fn build(pool: SqlitePool, integrations: bool) -> Self {
        let store: Arc<dyn EventStore> = Arc::new(SqliteStore::new(pool.clone()));
        let calendar = Arc::new(RecordingCalendar::default());
        let announcer = Arc::new(RecordingAnnouncer::default());

        let config = Config::default();

        let state = wire(&config, &store, &calendar, &announcer, integrations);
        Self {
            pool,
            store,
            calendar,
            announcer,
            config,
            events: state.events,
            rsvp: state.rsvp,
            reconciler: state.reconciler,
            integrations,
        }
    }

    /// Application state sharing this harness' store and doubles.
    pub fn app_state(&self) -> AppState {
        wire(
            &self.config,
            &self.store,
            &self.calendar,
            &self.announcer,
            self.integrations,
        )
    }
}

fn wire(
    config: &Config,
    store: &Arc<dyn EventStore>,
    calendar: &Arc<RecordingCalendar>,
    announcer: &Arc<RecordingAnnouncer>,
    integrations: bool,
) -> AppState {
    let (calendar, announcer): (Option<Arc<dyn CalendarProvider>>, Option<Arc<dyn Announcer>>) =
        if integrations {
            (
                Some(calendar.clone() as Arc<dyn CalendarProvider>),
                Some(announcer.clone() as Arc<dyn Announcer>),
            )
        } else {
            (None, None)
        };

    AppState::new(config.clone(), store.clone(), calendar, announcer)
}
