use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};

use crate::error::AppErrorWithLogData;
use crate::routes::events::OkResponse;
use crate::services::reconcile::ReconcileSummary;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/reconcile", post(reconcile))
}

/// Run one mirror reconciliation pass now instead of waiting for the worker.
async fn reconcile(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OkResponse<ReconcileSummary>>, AppErrorWithLogData> {
    let summary = state
        .reconciler
        .run_once()
        .await
        .map_err(|e| e.with_log_data("manual reconciliation pass"))?;
    Ok(OkResponse::new(summary))
}
