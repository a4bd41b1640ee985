use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// RSVP payload submitted to `POST /rsvp`. Exactly one of `hash` / `event_id`
/// is expected; when both are present the hash wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub event_id: Option<i64>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl Attendee {
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RsvpRow {
    pub event_id: i64,
    /// JSON array of emails
    pub attendees: String,
    pub version: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Attendee emails in RSVP order plus the version they were read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeList {
    pub event_id: i64,
    pub emails: Vec<String>,
    pub version: i64,
}
