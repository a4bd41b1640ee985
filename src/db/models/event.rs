use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Event type used when a draft does not name one.
pub const DEFAULT_EVENT_TYPE_ID: i64 = 1;

// ============================================================================
// Event Models
// ============================================================================

/// A proposed event as submitted to `POST /new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date_time: DateTime<FixedOffset>,
    pub end_date_time: DateTime<FixedOffset>,
    pub timezone: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub limit: Option<i64>,
    pub proposer_email: String,
    #[serde(default)]
    pub type_id: Option<i64>,

    #[serde(default)]
    pub post_on_slack: bool,
    #[serde(default)]
    pub slack_channel_id: Option<String>,
    #[serde(default)]
    pub create_gcal_event: bool,
    #[serde(default)]
    pub gcal_calendar_id: Option<String>,
}

impl EventDraft {
    pub fn type_id_or_default(&self) -> i64 {
        self.type_id.unwrap_or(DEFAULT_EVENT_TYPE_ID)
    }

    pub fn gcal_calendar_id(&self) -> Option<&str> {
        self.gcal_calendar_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn slack_channel_id(&self) -> Option<&str> {
        self.slack_channel_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// An instant stored three ways: ISO string, epoch millis and the zone offset
/// (minutes to add to local time to reach UTC) at that instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedInstant {
    pub iso: String,
    pub unix_millis: i64,
    pub tz_offset_minutes: i32,
}

/// Fully derived event row, ready for insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEvent {
    pub title: String,
    pub description: String,
    pub start: DerivedInstant,
    pub end: DerivedInstant,
    pub timezone: String,
    pub location: String,
    pub attendance_limit: i64,
    pub hash: String,
    pub series: bool,
    pub type_id: i64,
    pub proposer_email: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub start_date_time: String,
    pub start_date_time_unix: i64,
    pub start_date_time_tz_offset: i32,
    pub end_date_time: String,
    pub end_date_time_unix: i64,
    pub end_date_time_tz_offset: i32,
    pub timezone: String,
    pub location: String,
    pub attendance_limit: i64,
    pub hash: String,
    pub series: bool,
    pub type_id: i64,
    pub proposer_id: i64,
    pub created_at: NaiveDateTime,
}
