use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which external write a mirror job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorTarget {
    CalendarEvent,
    Announcement,
    CalendarAttendee,
}

impl MirrorTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorTarget::CalendarEvent => "calendar_event",
            MirrorTarget::Announcement => "announcement",
            MirrorTarget::CalendarAttendee => "calendar_attendee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calendar_event" => Some(MirrorTarget::CalendarEvent),
            "announcement" => Some(MirrorTarget::Announcement),
            "calendar_attendee" => Some(MirrorTarget::CalendarAttendee),
            _ => None,
        }
    }
}

impl std::fmt::Display for MirrorTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_LINKED: &str = "linked";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_DEAD: &str = "dead";

/// One step of the create-locally-then-mirror saga.
///
/// A job is written before the external call so that a failed (or interrupted)
/// mirror leaves a trace the reconciliation worker can replay from `payload_json`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MirrorJob {
    /// Primary key (UUID)
    pub id: String,

    pub event_id: i64,

    /// See [`MirrorTarget::as_str`]
    pub target: String,

    /// Calendar id or Slack channel id
    pub destination_id: String,

    /// Serialized request body replayed on retry.
    pub payload_json: String,

    /// 'pending', 'processing', 'linked', 'failed', 'dead'
    pub status: String,

    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: NaiveDateTime,
    pub last_error: Option<String>,

    /// Calendar event id or Slack message ts, once the external write succeeded.
    pub external_id: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl MirrorJob {
    pub fn target(&self) -> Option<MirrorTarget> {
        MirrorTarget::parse(&self.target)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMirrorJob {
    pub event_id: i64,
    pub target: MirrorTarget,
    pub destination_id: String,
    pub payload_json: String,
    pub max_attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_round_trips_through_its_column_value() {
        for target in [
            MirrorTarget::CalendarEvent,
            MirrorTarget::Announcement,
            MirrorTarget::CalendarAttendee,
        ] {
            assert_eq!(MirrorTarget::parse(target.as_str()), Some(target));
        }
        assert_eq!(MirrorTarget::parse("fax"), None);
    }
}
