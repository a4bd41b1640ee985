use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};
use rand::Rng;

use crate::db::models::{CreateEvent, DerivedInstant, EventDraft, MirrorTarget};
use crate::db::EventStore;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::services::google_calendar::{CalendarProvider, GoogleEvent};
use crate::services::mirror::MirrorLedger;
use crate::services::slack::{build_announcement, Announcer};

const HASH_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
pub const HASH_LEN: usize = 10;

/// Fresh random locator for a standalone event or a whole series.
pub fn generate_hash() -> String {
    let mut rng = rand::thread_rng();
    (0..HASH_LEN)
        .map(|_| HASH_ALPHABET[rng.gen_range(0..HASH_ALPHABET.len())] as char)
        .collect()
}

/// Store-friendly forms of an instant. The offset follows the browser
/// convention: minutes to add to local time to get UTC, so UTC+2 is -120.
/// `timezone` decides the offset when it is a known IANA name; otherwise the
/// offset written in the timestamp is used.
pub fn derive_instant(dt: &DateTime<FixedOffset>, timezone: &str) -> DerivedInstant {
    let utc = dt.with_timezone(&Utc);
    let offset_seconds = match timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => utc.with_timezone(&tz).offset().fix().local_minus_utc(),
        Err(_) => dt.offset().local_minus_utc(),
    };

    DerivedInstant {
        iso: utc.to_rfc3339_opts(SecondsFormat::Millis, true),
        unix_millis: utc.timestamp_millis(),
        tz_offset_minutes: -(offset_seconds / 60),
    }
}

fn prepare_event(draft: &EventDraft, hash: &str, series: bool) -> CreateEvent {
    CreateEvent {
        title: draft.title.clone(),
        description: draft.description.clone(),
        start: derive_instant(&draft.start_date_time, &draft.timezone),
        end: derive_instant(&draft.end_date_time, &draft.timezone),
        timezone: draft.timezone.clone(),
        location: draft.location.clone(),
        attendance_limit: draft.limit.unwrap_or(0),
        hash: hash.to_string(),
        series,
        type_id: draft.type_id_or_default(),
        proposer_email: draft.proposer_email.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Calendar,
    Announcement,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Calendar => "calendar",
            FailureStage::Announcement => "announcement",
        }
    }
}

/// A mirror that could not be made for one draft. The event itself is stored.
#[derive(Debug)]
pub struct DraftFailure {
    pub index: usize,
    pub event_id: i64,
    pub stage: FailureStage,
    pub error: AppError,
}

#[derive(Debug, Default)]
pub struct CreationReport {
    pub event_ids: Vec<i64>,
    pub hash: String,
    pub series: bool,
    pub failures: Vec<DraftFailure>,
}

impl CreationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Errors that are reported per draft; anything else stops the batch.
fn is_reportable(error: &AppError) -> bool {
    matches!(error.kind(), ErrorKind::Validation | ErrorKind::Integration)
}

#[derive(Clone)]
pub struct EventService {
    store: Arc<dyn EventStore>,
    calendar: Option<Arc<dyn CalendarProvider>>,
    announcer: Option<Arc<dyn Announcer>>,
    ledger: MirrorLedger,
    rsvp_base_url: String,
}

impl EventService {
    pub fn new(
        store: Arc<dyn EventStore>,
        calendar: Option<Arc<dyn CalendarProvider>>,
        announcer: Option<Arc<dyn Announcer>>,
        ledger: MirrorLedger,
        rsvp_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            calendar,
            announcer,
            ledger,
            rsvp_base_url: rsvp_base_url.into(),
        }
    }

    /// Store every draft, mirror each to Google Calendar when asked, then announce
    /// the batch once on Slack from its first draft.
    ///
    /// Mirror problems (missing companion id, integration failure) land in the
    /// report and the batch carries on. Store failures end the batch. Nothing
    /// already written is undone.
    pub async fn create_events(&self, drafts: &[EventDraft]) -> AppResult<CreationReport> {
        let first = drafts
            .first()
            .ok_or_else(|| AppError::Validation("at least one event is required".to_string()))?;

        let series = drafts.len() > 1;
        let hash = generate_hash();
        let mut report = CreationReport {
            hash: hash.clone(),
            series,
            ..Default::default()
        };

        for (index, draft) in drafts.iter().enumerate() {
            let event_id = self
                .store
                .create_event(prepare_event(draft, &hash, series))
                .await?;
            report.event_ids.push(event_id);
            tracing::debug!("Stored event {} ({}/{}) with hash {}", event_id, index + 1, drafts.len(), hash);

            if !draft.create_gcal_event {
                continue;
            }

            let outcome = match draft.gcal_calendar_id() {
                Some(calendar_id) => self.mirror_to_calendar(event_id, draft, calendar_id).await,
                None => Err(AppError::Validation(
                    "google calendar id not found".to_string(),
                )),
            };

            if let Err(error) = outcome {
                if !is_reportable(&error) {
                    return Err(error);
                }
                tracing::warn!("Calendar mirror for event {} skipped: {}", event_id, error);
                report.failures.push(DraftFailure {
                    index,
                    event_id,
                    stage: FailureStage::Calendar,
                    error,
                });
            }
        }

        if first.post_on_slack {
            let event_id = report.event_ids[0];
            let series_hash = if series { Some(hash.as_str()) } else { None };

            let outcome = match first.slack_channel_id() {
                Some(channel_id) => {
                    self.announce(event_id, first, channel_id, series_hash)
                        .await
                }
                None => Err(AppError::Validation(
                    "slack channel id not found in the first event in array".to_string(),
                )),
            };

            if let Err(error) = outcome {
                if !is_reportable(&error) {
                    return Err(error);
                }
                tracing::warn!("Slack announcement for event {} skipped: {}", event_id, error);
                report.failures.push(DraftFailure {
                    index: 0,
                    event_id,
                    stage: FailureStage::Announcement,
                    error,
                });
            }
        }

        tracing::info!(
            "Created {} event(s) with hash {} ({} mirror failure(s))",
            report.event_ids.len(),
            report.hash,
            report.failures.len()
        );
        Ok(report)
    }

    async fn mirror_to_calendar(
        &self,
        event_id: i64,
        draft: &EventDraft,
        calendar_id: &str,
    ) -> AppResult<()> {
        let calendar = self.calendar.as_ref().ok_or_else(|| {
            AppError::Calendar("Google Calendar integration is not configured".to_string())
        })?;

        let google_event = GoogleEvent::from_draft(draft);
        let job = self
            .ledger
            .open(event_id, MirrorTarget::CalendarEvent, calendar_id, &google_event)
            .await?;

        match calendar.create_event(&google_event, calendar_id).await {
            Ok(external_event_id) => {
                self.ledger.delivered(&job, &external_event_id).await?;
                self.store
                    .create_calendar_link(event_id, calendar_id, &external_event_id)
                    .await?;
                self.ledger.linked(&job).await?;
                tracing::info!(
                    "Mirrored event {} to calendar {} as {}",
                    event_id,
                    calendar_id,
                    external_event_id
                );
                Ok(())
            }
            Err(e) => {
                self.ledger.failed(&job, &e).await?;
                Err(e)
            }
        }
    }

    async fn announce(
        &self,
        event_id: i64,
        draft: &EventDraft,
        channel_id: &str,
        series_hash: Option<&str>,
    ) -> AppResult<()> {
        let announcer = self.announcer.as_ref().ok_or_else(|| {
            AppError::Messaging("Slack integration is not configured".to_string())
        })?;

        let proposer = self
            .store
            .lookup_user_display_name(&draft.proposer_email)
            .await?;
        let event_type = self
            .store
            .lookup_event_type(draft.type_id_or_default())
            .await?;
        let announcement = build_announcement(
            draft,
            &proposer,
            &event_type,
            series_hash,
            &self.rsvp_base_url,
        );

        let job = self
            .ledger
            .open(event_id, MirrorTarget::Announcement, channel_id, &announcement)
            .await?;

        match announcer.send_announcement(&announcement, channel_id).await {
            Ok(message_id) => {
                self.ledger.delivered(&job, &message_id).await?;
                self.store
                    .create_message_link(event_id, channel_id, &message_id)
                    .await?;
                self.ledger.linked(&job).await?;
                tracing::info!(
                    "Announced event {} in channel {} as message {}",
                    event_id,
                    channel_id,
                    message_id
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{STATUS_FAILED, STATUS_LINKED};
    use crate::db::{EventRepository, MirrorJobRepository};
    use crate::test_support::{self, draft, Harness};
    use chrono::TimeZone;

    #[test]
    fn instant_is_derived_from_the_event_zone() {
        let dt = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 18, 0, 0)
            .unwrap();

        let berlin = derive_instant(&dt, "Europe/Berlin");
        assert_eq!(berlin.iso, "2024-05-01T16:00:00.000Z");
        assert_eq!(berlin.unix_millis, 1_714_579_200_000);
        assert_eq!(berlin.tz_offset_minutes, -120);

        // same instant, viewed from New York in daylight time
        let ny = derive_instant(&dt, "America/New_York");
        assert_eq!(ny.unix_millis, berlin.unix_millis);
        assert_eq!(ny.tz_offset_minutes, 240);

        // unknown zone falls back to the written offset
        let fallback = derive_instant(&dt, "Mars/Olympus");
        assert_eq!(fallback.tz_offset_minutes, -120);
    }

    #[test]
    fn hashes_use_the_url_safe_alphabet() {
        let a = generate_hash();
        let b = generate_hash();
        assert_eq!(a.len(), HASH_LEN);
        assert!(a.bytes().all(|c| HASH_ALPHABET.contains(&c)));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn empty_batch_is_a_validation_error() {
        let h = Harness::new().await;
        let err = h.events.create_events(&[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn single_event_gets_its_own_hash() {
        let h = Harness::new().await;
        let first = h.events.create_events(&[draft("One")]).await.unwrap();
        let second = h.events.create_events(&[draft("Two")]).await.unwrap();

        assert!(first.is_clean());
        assert!(!first.series);
        assert_eq!(first.hash.len(), HASH_LEN);
        assert_ne!(first.hash, second.hash);

        let stored = EventRepository::find_by_id(&h.pool, first.event_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.series);
        assert_eq!(stored.hash, first.hash);
        assert_eq!(stored.attendance_limit, 0);
        assert_eq!(stored.type_id, 1);
        assert_eq!(stored.start_date_time, "2024-05-01T16:00:00.000Z");
        assert_eq!(stored.end_date_time_tz_offset, -120);
    }

    #[tokio::test]
    async fn batch_shares_one_series_hash() {
        let h = Harness::new().await;
        let report = h
            .events
            .create_events(&[draft("Week 1"), draft("Week 2"), draft("Week 3")])
            .await
            .unwrap();

        assert!(report.series);
        assert_eq!(report.event_ids.len(), 3);
        for id in &report.event_ids {
            let e = EventRepository::find_by_id(&h.pool, *id).await.unwrap().unwrap();
            assert!(e.series);
            assert_eq!(e.hash, report.hash);
        }
        assert_eq!(
            h.store.resolve_event_id_by_hash(&report.hash).await.unwrap(),
            report.event_ids[0]
        );
    }

    #[tokio::test]
    async fn missing_calendar_id_is_reported_and_siblings_continue() {
        let h = Harness::new().await;
        let mut broken = draft("No calendar id");
        broken.create_gcal_event = true;
        let mut ok = draft("Has calendar id");
        ok.create_gcal_event = true;
        ok.gcal_calendar_id = Some("cal-1".into());

        let report = h.events.create_events(&[broken, ok]).await.unwrap();

        assert_eq!(report.event_ids.len(), 2);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.index, 0);
        assert_eq!(failure.stage, FailureStage::Calendar);
        assert_eq!(failure.error.kind(), ErrorKind::Validation);

        assert!(!h.store.has_calendar_link(report.event_ids[0]).await.unwrap());
        let link = h.store.get_calendar_link(report.event_ids[1]).await.unwrap();
        assert_eq!(link.calendar_id, "cal-1");
        assert_eq!(link.external_event_id, "gcal-1");
        assert_eq!(h.calendar.created().len(), 1);
    }

    #[tokio::test]
    async fn calendar_outage_is_recorded_for_replay() {
        let h = Harness::new().await;
        h.calendar.fail_with("503 backend error");
        let mut d = draft("Outage");
        d.create_gcal_event = true;
        d.gcal_calendar_id = Some("cal-1".into());

        let report = h.events.create_events(&[d]).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind(), ErrorKind::Integration);
        let event_id = report.event_ids[0];
        // the event stays
        assert!(EventRepository::find_by_id(&h.pool, event_id)
            .await
            .unwrap()
            .is_some());
        assert!(!h.store.has_calendar_link(event_id).await.unwrap());

        let jobs = MirrorJobRepository::find_by_event_id(&h.pool, event_id)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, STATUS_FAILED);
        assert_eq!(jobs[0].target(), Some(MirrorTarget::CalendarEvent));
        let payload: GoogleEvent = serde_json::from_str(&jobs[0].payload_json).unwrap();
        assert_eq!(payload.summary, "Outage");
    }

    #[tokio::test]
    async fn announcement_goes_out_once_for_the_first_event() {
        let h = Harness::new().await;
        let mut first = draft("Week 1");
        first.post_on_slack = true;
        first.slack_channel_id = Some("C42".into());
        let mut second = draft("Week 2");
        second.post_on_slack = true;
        second.slack_channel_id = Some("C99".into());

        let report = h.events.create_events(&[first, second]).await.unwrap();
        assert!(report.is_clean());

        let sent = h.announcer.sent();
        assert_eq!(sent.len(), 1);
        let (announcement, channel) = &sent[0];
        assert_eq!(channel, "C42");
        assert_eq!(
            announcement.url,
            format!("https://juntos.kernel.community/rsvp{}", report.hash)
        );
        assert!(h.store.has_message_link(report.event_ids[0]).await.unwrap());
        assert!(!h.store.has_message_link(report.event_ids[1]).await.unwrap());

        let jobs = MirrorJobRepository::find_by_event_id(&h.pool, report.event_ids[0])
            .await
            .unwrap();
        assert_eq!(jobs[0].status, STATUS_LINKED);
        assert_eq!(jobs[0].external_id.as_deref(), Some("1700000000.000001"));
    }

    #[tokio::test]
    async fn announcement_needs_a_channel_on_the_first_draft() {
        let h = Harness::new().await;
        let mut first = draft("Week 1");
        first.post_on_slack = true;

        let report = h.events.create_events(&[first]).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Announcement);
        assert_eq!(report.failures[0].error.kind(), ErrorKind::Validation);
        assert!(h.announcer.sent().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_integrations_are_reported_not_skipped() {
        let h = Harness::without_integrations().await;
        let mut d = draft("Nowhere to go");
        d.create_gcal_event = true;
        d.gcal_calendar_id = Some("cal-1".into());
        d.post_on_slack = true;
        d.slack_channel_id = Some("C1".into());

        let report = h.events.create_events(&[d]).await.unwrap();
        let kinds: Vec<ErrorKind> = report.failures.iter().map(|f| f.error.kind()).collect();
        assert_eq!(kinds, vec![ErrorKind::Integration, ErrorKind::Integration]);
    }

    #[tokio::test]
    async fn unknown_proposer_stops_the_batch_without_rollback() {
        let h = Harness::new().await;
        let mut stranger = draft("Week 2");
        stranger.proposer_email = "nobody@example.com".into();

        let err = h
            .events
            .create_events(&[draft("Week 1"), stranger, draft("Week 3")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&h.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn announcement_credits_the_proposer_by_name() {
        let h = Harness::new().await;
        let mut d = draft("Solo");
        d.post_on_slack = true;
        d.slack_channel_id = Some("C1".into());
        h.events.create_events(&[d]).await.unwrap();

        let sent = h.announcer.sent();
        let (announcement, _) = &sent[0];
        let first_block = serde_json::to_value(&announcement.blocks[0]).unwrap();
        assert_eq!(
            first_block["text"]["text"],
            format!("{} has proposed a new event!", test_support::PROPOSER_NAME)
        );
        assert!(announcement.url.ends_with("/rsvp"));
    }
}
