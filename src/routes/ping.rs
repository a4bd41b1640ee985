use std::sync::Arc;

use axum::{http::StatusCode, response::Response, routing::get, Json, Router};

use crate::error::ErrorEnvelope;
use crate::routes::events::OkResponse;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(ping))
        .route("/pingerror", get(ping_error))
}

async fn ping() -> Json<OkResponse<&'static str>> {
    OkResponse::new("pong")
}

/// Always fails, so clients can check how they render the error envelope.
async fn ping_error() -> Response {
    ErrorEnvelope {
        message: "error message".to_string(),
        status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        log_data: Some("raw log data goes here".to_string()),
    }
    .into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let h = crate::test_support::Harness::new().await;
        let app = router().with_state(Arc::new(h.app_state()));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let (status, body) = get_json("/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "ok": true, "data": "pong" }));
    }

    #[tokio::test]
    async fn ping_error_returns_the_envelope() {
        let (status, body) = get_json("/pingerror").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "error message");
        assert_eq!(body["status"], 500);
        assert_eq!(body["logData"], "raw log data goes here");
    }
}
