use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use axum::{body::Body, http::StatusCode, response::IntoResponse};
use http::HeaderValue;
use tower_governor::GovernorError;

use crate::error::{AppError, ErrorEnvelope};

/// Error handler for the public rate limiter: every rejection uses the
/// `{message, status, logData}` envelope, 429s also carry `Retry-After`.
pub fn governor_error_response(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut resp = AppError::RateLimited
                .with_log_data(format!("retry after {}s", wait_time))
                .into_response();

            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp.headers_mut()
                .insert(http::header::RETRY_AFTER, HeaderValue::from(wait_time));

            resp
        }
        GovernorError::UnableToExtractKey => {
            AppError::BadRequest("Unable to determine client IP for rate limiting".to_string())
                .into_response()
        }
        GovernorError::Other { code, msg, headers } => {
            let status =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut resp = ErrorEnvelope {
                message: msg.unwrap_or_else(|| "Rate limiting error".to_string()),
                status: status.as_u16(),
                log_data: None,
            }
            .into_response_with(status);

            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

/// Periodically drop stale limiter entries on a std thread until `shutdown` is set.
pub fn spawn_cleanup_thread<F>(
    name: &'static str,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    retain_recent: F,
) -> JoinHandle<()>
where
    F: Fn() -> usize + Send + 'static,
{
    std::thread::spawn(move || {
        // short ticks so shutdown is noticed quickly
        let tick = Duration::from_secs(1);
        loop {
            for _ in 0..interval.as_secs().max(1) {
                if shutdown.load(Ordering::SeqCst) {
                    tracing::info!("{} rate limiter cleanup thread exiting", name);
                    return;
                }
                std::thread::sleep(tick);
            }
            let size = retain_recent();
            tracing::debug!("{} rate limiter size: {}", name, size);
        }
    })
}
