//! Initialization helpers for the application:
//! - database connection + migrations
//! - optional integrations (Google Calendar / Slack)
//! - background worker spawn helpers

use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::config::Config;
use crate::services::google_calendar::{CalendarProvider, GoogleCalendarService};
use crate::services::slack::{Announcer, SlackService};

/// Redact potentially sensitive information from a database URL before logging.
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool (creating the file and its directory if needed) and run migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build the Google Calendar and Slack clients that are configured.
///
/// A missing integration is not fatal: requests that need it fail with an
/// integration error instead.
pub fn init_integrations(
    config: &Config,
) -> Result<(
    Option<Arc<dyn CalendarProvider>>,
    Option<Arc<dyn Announcer>>,
)> {
    if config.google.is_partially_configured() {
        tracing::warn!(
            "Google Calendar needs GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and GOOGLE_REFRESH_TOKEN; integration disabled"
        );
    }

    let calendar: Option<Arc<dyn CalendarProvider>> =
        match GoogleCalendarService::from_config(&config.google)? {
            Some(service) => {
                tracing::info!("Google Calendar integration enabled");
                Some(Arc::new(service))
            }
            None => {
                tracing::info!("Google Calendar integration disabled");
                None
            }
        };

    let announcer: Option<Arc<dyn Announcer>> = match SlackService::from_config(&config.slack)? {
        Some(service) => {
            tracing::info!("Slack integration enabled");
            Some(Arc::new(service))
        }
        None => {
            tracing::info!("Slack integration disabled");
            None
        }
    };

    Ok((calendar, announcer))
}

/// Spawn background workers:
/// - mirror reconciliation (replays failed or interrupted calendar/Slack writes)
///
/// Returns the `JoinHandle`s so callers can await shutdown. Each worker listens
/// for a shutdown notification via the broadcast sender.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    // Mirror reconciliation worker
    {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let poll_interval =
                std::time::Duration::from_secs(state.config.mirror_retry.poll_interval_seconds.max(1));

            if !state.config.mirror_retry.enabled {
                tracing::info!("Mirror reconciliation worker disabled");
                return;
            }

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    tracing::info!("Mirror reconciliation worker received shutdown signal");
                    break;
                }

                tracing::debug!("Polling mirror jobs for due retries");
                if let Err(e) = state.reconciler.run_once().await {
                    tracing::warn!("Mirror reconciliation pass failed: {:?}", e);
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Mirror reconciliation worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }));
    }

    handles
}
