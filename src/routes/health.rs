use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::{AppState, IntegrationStatus};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub integrations: IntegrationStatus,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        integrations: state.integrations,
    };

    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::test_support::Harness;

    async fn health_body(h: &Harness) -> serde_json::Value {
        let app = Router::new()
            .route("/health", get(health_check))
            .with_state(Arc::new(h.app_state()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn reports_configured_integrations() {
        let body = health_body(&Harness::new().await).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["integrations"]["googleCalendar"], true);
        assert_eq!(body["integrations"]["slack"], true);
    }

    #[tokio::test]
    async fn reports_missing_integrations() {
        let body = health_body(&Harness::without_integrations().await).await;
        assert_eq!(body["integrations"]["googleCalendar"], false);
        assert_eq!(body["integrations"]["slack"], false);
    }
}
