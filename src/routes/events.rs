use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{Attendee, EventDraft};
use crate::error::{AppError, AppErrorWithLogData};
use crate::services::events::CreationReport;
use crate::services::rsvp::RsvpOutcome;
use crate::AppState;

/// Request bodies are wrapped as `{ "data": ... }`.
#[derive(Debug, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

/// Successful responses are wrapped as `{ "ok": true, "data": ... }`.
#[derive(Debug, Serialize)]
pub struct OkResponse<T> {
    pub ok: bool,
    pub data: T,
}

impl<T> OkResponse<T> {
    pub fn new(data: T) -> Json<Self> {
        Json(Self { ok: true, data })
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/new", post(create_events))
        .route("/rsvp", post(rsvp))
}

/// Turn a report with failures into the error of its first failure, listing
/// every failure and the stored event ids in `logData`.
fn report_into_result(report: CreationReport) -> Result<Vec<i64>, AppErrorWithLogData> {
    if report.is_clean() {
        return Ok(report.event_ids);
    }

    let details: Vec<String> = report
        .failures
        .iter()
        .map(|f| {
            format!(
                "draft {} (event {}) {}: {}",
                f.index,
                f.event_id,
                f.stage.as_str(),
                f.error
            )
        })
        .collect();
    let log_data = format!(
        "created events {:?}; {}",
        report.event_ids,
        details.join("; ")
    );

    let first = report
        .failures
        .into_iter()
        .next()
        .map(|f| f.error)
        .unwrap_or_else(|| AppError::Internal(anyhow::anyhow!("empty failure list")));
    Err(first.with_log_data(log_data))
}

async fn create_events(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DataEnvelope<Vec<EventDraft>>>, JsonRejection>,
) -> Result<Json<OkResponse<Vec<i64>>>, AppErrorWithLogData> {
    let Json(body) = payload.map_err(AppError::from)?;
    let report = state.events.create_events(&body.data).await?;
    let event_ids = report_into_result(report)?;
    Ok(OkResponse::new(event_ids))
}

async fn rsvp(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DataEnvelope<Attendee>>, JsonRejection>,
) -> Result<Json<OkResponse<RsvpOutcome>>, AppErrorWithLogData> {
    let Json(body) = payload.map_err(AppError::from)?;
    let attendee = body.data;

    let outcome = state.rsvp.rsvp(&attendee).await.map_err(|e| {
        let locator = match (attendee.hash(), attendee.event_id) {
            (Some(hash), _) => format!("hash={}", hash),
            (None, Some(id)) => format!("eventId={}", id),
            (None, None) => "missing hash and/or eventId".to_string(),
        };
        e.with_log_data(locator)
    })?;

    Ok(OkResponse::new(outcome))
}
