use std::sync::Arc;

use serde::Serialize;

use crate::db::models::{Attendee, MirrorTarget};
use crate::db::EventStore;
use crate::error::{AppError, AppResult};
use crate::services::google_calendar::CalendarProvider;
use crate::services::mirror::{AttendeePayload, MirrorLedger};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpOutcome {
    pub event_id: i64,
    pub attendees: Vec<String>,
    pub calendar_mirrored: bool,
}

#[derive(Clone)]
pub struct RsvpService {
    store: Arc<dyn EventStore>,
    calendar: Option<Arc<dyn CalendarProvider>>,
    ledger: MirrorLedger,
}

impl RsvpService {
    pub fn new(
        store: Arc<dyn EventStore>,
        calendar: Option<Arc<dyn CalendarProvider>>,
        ledger: MirrorLedger,
    ) -> Self {
        Self {
            store,
            calendar,
            ledger,
        }
    }

    /// Add the attendee to the event's list, then to its Google Calendar copy if
    /// one is linked. Repeated RSVPs from one email are kept as duplicates.
    pub async fn rsvp(&self, attendee: &Attendee) -> AppResult<RsvpOutcome> {
        let email = attendee.email.trim();
        if email.is_empty() {
            return Err(AppError::Validation("email is required".to_string()));
        }

        let event_id = match (attendee.hash(), attendee.event_id) {
            (Some(hash), _) => self.store.resolve_event_id_by_hash(hash).await?,
            (None, Some(id)) => id,
            (None, None) => {
                return Err(AppError::Validation(
                    "either one of hash or eventId required".to_string(),
                ))
            }
        };

        let attendees = self.store.append_attendee(event_id, email).await?.emails;
        tracing::info!(
            "Recorded RSVP from {} for event {} ({} attendee(s))",
            email,
            event_id,
            attendees.len()
        );

        let calendar_mirrored = if self.store.has_calendar_link(event_id).await? {
            self.mirror_attendee(event_id, email).await?;
            true
        } else {
            false
        };

        Ok(RsvpOutcome {
            event_id,
            attendees,
            calendar_mirrored,
        })
    }

    async fn mirror_attendee(&self, event_id: i64, email: &str) -> AppResult<()> {
        let link = self.store.get_calendar_link(event_id).await?;
        let calendar = self.calendar.as_ref().ok_or_else(|| {
            AppError::Calendar("Google Calendar integration is not configured".to_string())
        })?;

        let job = self
            .ledger
            .open(
                event_id,
                MirrorTarget::CalendarAttendee,
                &link.calendar_id,
                &AttendeePayload {
                    email: email.to_string(),
                },
            )
            .await?;

        match calendar
            .add_attendee(&link.calendar_id, &link.external_event_id, email)
            .await
        {
            Ok(()) => {
                self.ledger.linked(&job).await?;
                tracing::info!(
                    "Added {} to calendar event {} for event {}",
                    email,
                    link.external_event_id,
                    event_id
                );
                Ok(())
            }
            Err(e) => {
                self.ledger.failed(&job, &e).await?;
                Err(e)
            }
        }
    }
}
