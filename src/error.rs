use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Google Calendar error: {0}")]
    Calendar(String),

    #[error("Slack error: {0}")]
    Messaging(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Coarse error taxonomy shared by the orchestrators and their callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Integration,
    Conflict,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Calendar(_) | AppError::Messaging(_) => ErrorKind::Integration,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::RateLimited | AppError::Database(_) | AppError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::Calendar(msg) => {
                tracing::error!("Google Calendar error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Messaging(msg) => {
                tracing::error!("Slack error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        }
    }

    pub fn with_log_data(self, log_data: impl Into<String>) -> AppErrorWithLogData {
        AppErrorWithLogData {
            error: self,
            log_data: Some(log_data.into()),
        }
    }
}

/// Wire shape of every error response: `{message, status, logData}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub message: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_data: Option<String>,
}

impl ErrorEnvelope {
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        AppErrorWithLogData {
            error: self,
            log_data: None,
        }
        .into_response()
    }
}

#[derive(Debug)]
pub struct AppErrorWithLogData {
    error: AppError,
    log_data: Option<String>,
}

impl IntoResponse for AppErrorWithLogData {
    fn into_response(self) -> Response {
        let (status, message) = self.error.status_and_message();

        ErrorEnvelope {
            message,
            status: status.as_u16(),
            log_data: self.log_data,
        }
        .into_response_with(status)
    }
}

impl From<AppError> for AppErrorWithLogData {
    fn from(error: AppError) -> Self {
        AppErrorWithLogData {
            error,
            log_data: None,
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integration_variants_share_a_kind() {
        assert_eq!(
            AppError::Calendar("down".into()).kind(),
            ErrorKind::Integration
        );
        assert_eq!(
            AppError::Messaging("down".into()).kind(),
            ErrorKind::Integration
        );
        assert_eq!(
            AppError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn envelope_carries_status_and_log_data() {
        let response = AppError::NotFound("no event with hash abc".into())
            .with_log_data("hash=abc")
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let envelope = ErrorEnvelope {
            message: "boom".into(),
            status: 500,
            log_data: Some("details".into()),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["logData"], "details");
        assert_eq!(json["status"], 500);
    }
}
