use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Cross-reference between a local event and its Google Calendar copy.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarLink {
    pub event_id: i64,
    pub calendar_id: String,
    pub external_event_id: String,
    pub created_at: NaiveDateTime,
}

/// Cross-reference between the first event of a batch and its Slack announcement.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageLink {
    pub event_id: i64,
    pub channel_id: String,
    pub external_message_id: String,
    pub created_at: NaiveDateTime,
}
