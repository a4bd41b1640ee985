//! Bookkeeping for the create-locally-then-mirror saga.
//!
//! Every external write is bracketed by a `mirror_jobs` row: opened as `pending`
//! before the call, then moved to `linked` or `failed`/`dead`. The reconciler
//! replays whatever is left behind.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MirrorRetryConfig;
use crate::db::models::{CreateMirrorJob, MirrorJob, MirrorTarget};
use crate::db::EventStore;
use crate::error::{AppError, AppResult};

/// Payload of a `calendar_attendee` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeePayload {
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorPolicy {
    pub max_attempts: i32,
    pub initial_backoff_seconds: u64,
    pub max_backoff_seconds: u64,
}

impl MirrorPolicy {
    pub fn from_config(config: &MirrorRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1) as i32,
            initial_backoff_seconds: config.initial_backoff_seconds,
            max_backoff_seconds: config.max_backoff_seconds,
        }
    }

    /// `min(max_backoff, initial_backoff * 2^attempts)`, in seconds.
    pub fn backoff_seconds(&self, attempts: i32) -> u64 {
        let mut delay = self.initial_backoff_seconds;
        for _ in 0..attempts.max(0) {
            delay = delay.saturating_mul(2);
            if delay >= self.max_backoff_seconds {
                return self.max_backoff_seconds;
            }
        }
        delay.min(self.max_backoff_seconds)
    }

    pub fn next_attempt_at(&self, attempts: i32) -> NaiveDateTime {
        let delay = self.backoff_seconds(attempts).min(i64::MAX as u64) as i64;
        Utc::now().naive_utc() + chrono::Duration::seconds(delay)
    }
}

impl Default for MirrorPolicy {
    fn default() -> Self {
        Self::from_config(&crate::config::Config::default().mirror_retry)
    }
}

#[derive(Clone)]
pub struct MirrorLedger {
    store: Arc<dyn EventStore>,
    policy: MirrorPolicy,
}

impl MirrorLedger {
    pub fn new(store: Arc<dyn EventStore>, policy: MirrorPolicy) -> Self {
        Self { store, policy }
    }

    /// Record the intent to mirror before calling out.
    pub async fn open<P: Serialize>(
        &self,
        event_id: i64,
        target: MirrorTarget,
        destination_id: &str,
        payload: &P,
    ) -> AppResult<MirrorJob> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize mirror payload: {}", e)))?;

        self.store
            .record_mirror_job(CreateMirrorJob {
                event_id,
                target,
                destination_id: destination_id.to_string(),
                payload_json,
                max_attempts: self.policy.max_attempts,
            })
            .await
    }

    /// Record the external id right after the external call returns.
    pub async fn delivered(&self, job: &MirrorJob, external_id: &str) -> AppResult<MirrorJob> {
        self.store.record_mirror_delivery(&job.id, external_id).await
    }

    pub async fn linked(&self, job: &MirrorJob) -> AppResult<MirrorJob> {
        self.store.mark_mirror_linked(&job.id).await
    }

    /// Count the attempt and schedule the next one; the returned job is `dead`
    /// once its attempts are used up.
    pub async fn failed(&self, job: &MirrorJob, error: &AppError) -> AppResult<MirrorJob> {
        let next = self.policy.next_attempt_at(job.attempts);
        let updated = self
            .store
            .register_mirror_failure(&job.id, next, &error.to_string())
            .await?;

        tracing::warn!(
            "Mirror job {} ({} for event {}) failed on attempt {}/{}: {}",
            updated.id,
            updated.target,
            updated.event_id,
            updated.attempts,
            updated.max_attempts,
            error
        );
        Ok(updated)
    }
}
