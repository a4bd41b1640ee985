use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::GoogleConfig;
use crate::db::models::EventDraft;
use crate::error::{AppError, AppResult};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Refresh the access token this many seconds before Google says it expires.
const REFRESH_MARGIN_SECS: i64 = 60;

// ============================================================================
// Calendar Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAttendee {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

impl GoogleAttendee {
    pub fn accepted(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            organizer: None,
            response_status: Some("accepted".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleDate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Body of an `events.insert` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEvent {
    pub summary: String,
    pub attendees: Vec<GoogleAttendee>,
    pub start: GoogleDate,
    pub end: GoogleDate,
    pub guests_can_see_other_guests: bool,
    pub location: String,
}

impl GoogleEvent {
    /// Calendar copy of a draft: the proposer is the accepted organizer and every
    /// guest can see the other guests.
    pub fn from_draft(draft: &EventDraft) -> Self {
        let organizer = GoogleAttendee {
            email: draft.proposer_email.clone(),
            organizer: Some(true),
            response_status: Some("accepted".to_string()),
        };

        Self {
            summary: draft.title.clone(),
            attendees: vec![organizer],
            start: GoogleDate {
                date_time: Some(to_utc_iso(&draft.start_date_time)),
                date: None,
                time_zone: Some(draft.timezone.clone()),
            },
            end: GoogleDate {
                date_time: Some(to_utc_iso(&draft.end_date_time)),
                date: None,
                time_zone: Some(draft.timezone.clone()),
            },
            guests_can_see_other_guests: true,
            location: draft.location.clone(),
        }
    }
}

fn to_utc_iso(dt: &chrono::DateTime<chrono::FixedOffset>) -> String {
    dt.with_timezone(&Utc)
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// The parts of a stored calendar event that survive an attendee update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventSnapshot {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub creator: Option<serde_json::Value>,
    #[serde(default)]
    pub start: Option<GoogleDate>,
    #[serde(default)]
    pub end: Option<GoogleDate>,
    #[serde(default)]
    pub attendees: Vec<GoogleAttendee>,
}

/// Body of an `events.update` call issued when someone RSVPs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<GoogleDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<GoogleDate>,
    pub attendees: Vec<GoogleAttendee>,
}

impl CalendarEventUpdate {
    /// Carry the snapshot forward with `email` appended as an accepted guest.
    /// Existing guests are kept as they are, duplicates included.
    pub fn with_attendee(snapshot: CalendarEventSnapshot, email: &str) -> Self {
        let mut attendees = snapshot.attendees;
        attendees.push(GoogleAttendee::accepted(email));

        Self {
            summary: snapshot.summary,
            creator: snapshot.creator,
            start: snapshot.start,
            end: snapshot.end,
            attendees,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsertedEvent {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: chrono::DateTime<Utc>,
}

// ============================================================================
// Provider
// ============================================================================

#[async_trait]
pub trait CalendarProvider: Send + Sync + 'static {
    /// Insert the event and return the id Google assigned to it.
    async fn create_event(&self, event: &GoogleEvent, calendar_id: &str) -> AppResult<String>;

    async fn fetch_event(
        &self,
        calendar_id: &str,
        external_event_id: &str,
    ) -> AppResult<CalendarEventSnapshot>;

    /// Replace the event, asking Google to notify every participant.
    async fn update_event(
        &self,
        calendar_id: &str,
        external_event_id: &str,
        update: &CalendarEventUpdate,
    ) -> AppResult<()>;

    /// Fetch, append `email` as an accepted guest, write the whole event back.
    async fn add_attendee(
        &self,
        calendar_id: &str,
        external_event_id: &str,
        email: &str,
    ) -> AppResult<()> {
        let snapshot = self.fetch_event(calendar_id, external_event_id).await?;
        let update = CalendarEventUpdate::with_attendee(snapshot, email);
        self.update_event(calendar_id, external_event_id, &update)
            .await
    }
}

/// Google Calendar v3 over REST, authenticated with a long-lived refresh token.
#[derive(Debug, Clone)]
pub struct GoogleCalendarService {
    client: Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    access_token: Arc<RwLock<Option<AccessToken>>>,
}

impl GoogleCalendarService {
    pub fn new(client_id: String, client_secret: String, refresh_token: String) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .map_err(|e| AppError::Calendar(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            client_id,
            client_secret,
            refresh_token,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// `None` when the OAuth client is not (fully) configured.
    pub fn from_config(config: &GoogleConfig) -> AppResult<Option<Self>> {
        match config.credentials() {
            Some((client_id, client_secret, refresh_token)) => {
                Self::new(client_id, client_secret, refresh_token).map(Some)
            }
            None => Ok(None),
        }
    }

    fn events_url(calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            GOOGLE_CALENDAR_API_URL,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(calendar_id: &str, external_event_id: &str) -> String {
        format!(
            "{}/{}",
            Self::events_url(calendar_id),
            urlencoding::encode(external_event_id)
        )
    }

    async fn refresh_access_token(&self) -> AppResult<String> {
        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Google token request failed: {}", e);
                AppError::Calendar(format!("Failed to authenticate with Google: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Google rejected the refresh token ({}): {}", status, error_text);
            return Err(AppError::Calendar(format!(
                "Google authentication failed ({}): {}",
                status, error_text
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::Calendar(format!("Failed to parse Google token response: {}", e))
        })?;

        let expires_at = Utc::now() + Duration::seconds(token.expires_in);
        *self.access_token.write().await = Some(AccessToken {
            token: token.access_token.clone(),
            expires_at,
        });

        tracing::debug!("Refreshed Google access token, expires at {}", expires_at);
        Ok(token.access_token)
    }

    /// Cached access token, refreshed shortly before expiry. Authentication
    /// failures abort the calendar call.
    async fn bearer(&self) -> AppResult<String> {
        {
            let guard = self.access_token.read().await;
            if let Some(ref t) = *guard {
                if t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                    return Ok(t.token.clone());
                }
            }
        }

        self.refresh_access_token().await
    }

    async fn error_from_response(context: &str, response: reqwest::Response) -> AppError {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            tracing::error!("{}: Google denied access ({}): {}", context, status, error_text);
        }
        AppError::Calendar(format!(
            "{} ({}): {}",
            context, status, error_text
        ))
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarService {
    async fn create_event(&self, event: &GoogleEvent, calendar_id: &str) -> AppResult<String> {
        let token = self.bearer().await?;

        let response = self
            .client
            .post(Self::events_url(calendar_id))
            .bearer_auth(token)
            .json(event)
            .send()
            .await
            .map_err(|e| AppError::Calendar(format!("Failed to create calendar event: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("Failed to create calendar event", response).await);
        }

        let inserted: InsertedEvent = response.json().await.map_err(|e| {
            AppError::Calendar(format!("Failed to parse created calendar event: {}", e))
        })?;

        inserted
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Calendar("Error in creating event: no id returned".to_string()))
    }

    async fn fetch_event(
        &self,
        calendar_id: &str,
        external_event_id: &str,
    ) -> AppResult<CalendarEventSnapshot> {
        let token = self.bearer().await?;

        let response = self
            .client
            .get(Self::event_url(calendar_id, external_event_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Calendar(format!("Failed to fetch calendar event: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("Failed to fetch calendar event", response).await);
        }

        response.json().await.map_err(|e| {
            AppError::Calendar(format!("Failed to parse calendar event: {}", e))
        })
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        external_event_id: &str,
        update: &CalendarEventUpdate,
    ) -> AppResult<()> {
        let token = self.bearer().await?;

        let response = self
            .client
            .put(Self::event_url(calendar_id, external_event_id))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(token)
            .json(update)
            .send()
            .await
            .map_err(|e| AppError::Calendar(format!("Failed to update calendar event: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("Failed to update calendar event", response).await);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{draft, RecordingCalendar};

    #[test]
    fn calendar_copy_uses_real_end_time() {
        let d = draft("Reading group");
        let event = GoogleEvent::from_draft(&d);

        assert_eq!(event.summary, "Reading group");
        assert_eq!(
            event.start.date_time.as_deref(),
            Some("2024-05-01T16:00:00.000Z")
        );
        assert_eq!(
            event.end.date_time.as_deref(),
            Some("2024-05-01T17:30:00.000Z")
        );
        assert_eq!(event.start.time_zone.as_deref(), Some("Europe/Berlin"));
        assert!(event.guests_can_see_other_guests);

        let organizer = &event.attendees[0];
        assert_eq!(organizer.email, d.proposer_email);
        assert_eq!(organizer.organizer, Some(true));
        assert_eq!(organizer.response_status.as_deref(), Some("accepted"));
    }

    #[test]
    fn google_event_serializes_with_api_field_names() {
        let json = serde_json::to_value(GoogleEvent::from_draft(&draft("x"))).unwrap();
        assert_eq!(json["guestsCanSeeOtherGuests"], true);
        assert_eq!(json["start"]["timeZone"], "Europe/Berlin");
        assert!(json["start"].get("date").is_none());
        assert_eq!(json["attendees"][0]["responseStatus"], "accepted");
    }

    #[test]
    fn attendee_update_keeps_existing_guests_and_duplicates() {
        let snapshot: CalendarEventSnapshot = serde_json::from_value(serde_json::json!({
            "id": "g1",
            "summary": "Reading group",
            "creator": { "email": "ada@example.com" },
            "start": { "dateTime": "2024-05-01T16:00:00Z", "timeZone": "UTC" },
            "end": { "dateTime": "2024-05-01T17:00:00Z", "timeZone": "UTC" },
            "attendees": [
                { "email": "ada@example.com", "organizer": true, "responseStatus": "accepted" },
                { "email": "bob@example.com", "responseStatus": "accepted" }
            ],
            "etag": "\"3333\""
        }))
        .unwrap();

        let update = CalendarEventUpdate::with_attendee(snapshot, "bob@example.com");
        let emails: Vec<&str> = update.attendees.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(
            emails,
            vec!["ada@example.com", "bob@example.com", "bob@example.com"]
        );
        assert_eq!(update.summary.as_deref(), Some("Reading group"));
        assert_eq!(
            update.end.and_then(|e| e.date_time).as_deref(),
            Some("2024-05-01T17:00:00Z")
        );
    }

    #[test]
    fn snapshot_without_attendees_starts_empty() {
        let snapshot: CalendarEventSnapshot =
            serde_json::from_value(serde_json::json!({ "id": "g1" })).unwrap();
        let update = CalendarEventUpdate::with_attendee(snapshot, "new@example.com");
        assert_eq!(update.attendees, vec![GoogleAttendee::accepted("new@example.com")]);
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("summary").is_none());
    }

    #[tokio::test]
    async fn add_attendee_fetches_then_writes_whole_event() {
        let calendar = RecordingCalendar::default();
        calendar
            .add_attendee("cal", "g1", "new@example.com")
            .await
            .unwrap();

        let calls = calendar.calls();
        assert_eq!(calls, vec!["fetch cal g1", "update cal g1"]);
        let updates = calendar.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].attendees.last().map(|a| a.email.as_str()),
            Some("new@example.com")
        );
    }

    #[test]
    fn unconfigured_google_disables_the_provider() {
        let config = crate::config::Config::default();
        assert!(GoogleCalendarService::from_config(&config.google)
            .unwrap()
            .is_none());
    }

    #[test]
    fn calendar_ids_are_escaped_in_urls() {
        assert_eq!(
            GoogleCalendarService::event_url("team@group.calendar.google.com", "abc"),
            "https://www.googleapis.com/calendar/v3/calendars/team%40group.calendar.google.com/events/abc"
        );
    }
}
