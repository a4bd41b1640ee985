use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use serde::Serialize;

use crate::config::MirrorRetryConfig;
use crate::db::models::{MirrorJob, MirrorTarget, STATUS_DEAD};
use crate::db::EventStore;
use crate::error::{AppError, AppResult};
use crate::services::google_calendar::{CalendarProvider, GoogleEvent};
use crate::services::mirror::{AttendeePayload, MirrorLedger};
use crate::services::slack::{Announcer, SlackAnnouncement};

/// Counts for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub claimed: usize,
    pub linked: usize,
    pub failed: usize,
    pub dead: usize,
}

/// Replays mirror jobs that failed or were interrupted.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn EventStore>,
    calendar: Option<Arc<dyn CalendarProvider>>,
    announcer: Option<Arc<dyn Announcer>>,
    ledger: MirrorLedger,
    batch_size: i64,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn EventStore>,
        calendar: Option<Arc<dyn CalendarProvider>>,
        announcer: Option<Arc<dyn Announcer>>,
        ledger: MirrorLedger,
        config: &MirrorRetryConfig,
    ) -> Self {
        Self {
            store,
            calendar,
            announcer,
            ledger,
            batch_size: config.batch_size.max(1) as i64,
            stale_after: Duration::seconds(config.stale_after_seconds.min(i64::MAX as u64) as i64),
        }
    }

    pub async fn run_once(&self) -> AppResult<ReconcileSummary> {
        let stale_before = Utc::now().naive_utc() - self.stale_after;
        let jobs = self
            .store
            .claim_due_mirror_jobs(self.batch_size, stale_before)
            .await?;

        let mut summary = ReconcileSummary {
            claimed: jobs.len(),
            ..Default::default()
        };

        for job in jobs {
            match self.replay(&job).await {
                Ok(()) => match self.ledger.linked(&job).await {
                    Ok(_) => {
                        summary.linked += 1;
                        tracing::info!("Mirror job {} ({}) replayed", job.id, job.target);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to mark mirror job {} linked: {:?}", job.id, e);
                    }
                },
                Err(e) => match self.ledger.failed(&job, &e).await {
                    Ok(updated) if updated.status == STATUS_DEAD => {
                        summary.dead += 1;
                        tracing::error!(
                            "Mirror job {} ({} for event {}) gave up after {} attempts: {}",
                            updated.id,
                            updated.target,
                            updated.event_id,
                            updated.attempts,
                            e
                        );
                    }
                    Ok(_) => summary.failed += 1,
                    Err(store_err) => {
                        tracing::warn!(
                            "Failed to record failure of mirror job {}: {:?}",
                            job.id,
                            store_err
                        );
                    }
                },
            }
        }

        if summary.claimed > 0 {
            tracing::info!(
                "Reconciliation pass: {} claimed, {} linked, {} failed, {} dead",
                summary.claimed,
                summary.linked,
                summary.failed,
                summary.dead
            );
        }
        Ok(summary)
    }

    async fn replay(&self, job: &MirrorJob) -> AppResult<()> {
        let target = job.target().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Unknown mirror target {}", job.target))
        })?;

        match target {
            MirrorTarget::CalendarEvent => {
                // a previous attempt may have linked it before dying
                if self.store.has_calendar_link(job.event_id).await? {
                    return Ok(());
                }
                let external_event_id = match job.external_id.clone() {
                    // created before, only the link is missing
                    Some(id) => id,
                    None => {
                        let calendar = self.calendar()?;
                        let event: GoogleEvent = serde_json::from_str(&job.payload_json)
                            .context("Corrupt calendar event payload")?;
                        let id = calendar.create_event(&event, &job.destination_id).await?;
                        self.ledger.delivered(job, &id).await?;
                        id
                    }
                };
                self.store
                    .create_calendar_link(job.event_id, &job.destination_id, &external_event_id)
                    .await
            }
            MirrorTarget::Announcement => {
                if self.store.has_message_link(job.event_id).await? {
                    return Ok(());
                }
                let message_id = match job.external_id.clone() {
                    Some(ts) => ts,
                    None => {
                        let announcer = self.announcer.as_ref().ok_or_else(|| {
                            AppError::Messaging("Slack integration is not configured".to_string())
                        })?;
                        let announcement: SlackAnnouncement =
                            serde_json::from_str(&job.payload_json)
                                .context("Corrupt announcement payload")?;
                        let ts = announcer
                            .send_announcement(&announcement, &job.destination_id)
                            .await?;
                        self.ledger.delivered(job, &ts).await?;
                        ts
                    }
                };
                self.store
                    .create_message_link(job.event_id, &job.destination_id, &message_id)
                    .await
            }
            MirrorTarget::CalendarAttendee => {
                let calendar = self.calendar()?;
                let payload: AttendeePayload = serde_json::from_str(&job.payload_json)
                    .context("Corrupt attendee payload")?;
                let link = self.store.get_calendar_link(job.event_id).await?;
                calendar
                    .add_attendee(&link.calendar_id, &link.external_event_id, &payload.email)
                    .await
            }
        }
    }

    fn calendar(&self) -> AppResult<&Arc<dyn CalendarProvider>> {
        self.calendar.as_ref().ok_or_else(|| {
            AppError::Calendar("Google Calendar integration is not configured".to_string())
        })
    }
}
