use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{routing::get, Router};
use http::HeaderValue;
use serde::Serialize;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::GovernorLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use config::Config;
use db::{EventStore, SqliteStore};
use services::events::EventService;
use services::google_calendar::CalendarProvider;
use services::init;
use services::mirror::{MirrorLedger, MirrorPolicy};
use services::reconcile::Reconciler;
use services::rsvp::RsvpService;
use services::slack::Announcer;

/// Which external mirrors this process can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatus {
    pub google_calendar: bool,
    pub slack: bool,
}

pub struct AppState {
    pub config: Config,
    pub integrations: IntegrationStatus,
    pub events: EventService,
    pub rsvp: RsvpService,
    pub reconciler: Reconciler,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn EventStore>,
        calendar: Option<Arc<dyn CalendarProvider>>,
        announcer: Option<Arc<dyn Announcer>>,
    ) -> Self {
        let ledger = MirrorLedger::new(
            store.clone(),
            MirrorPolicy::from_config(&config.mirror_retry),
        );

        let integrations = IntegrationStatus {
            google_calendar: calendar.is_some(),
            slack: announcer.is_some(),
        };

        let events = EventService::new(
            store.clone(),
            calendar.clone(),
            announcer.clone(),
            ledger.clone(),
            config.rsvp.base_url.clone(),
        );
        let rsvp = RsvpService::new(store.clone(), calendar.clone(), ledger.clone());
        let reconciler = Reconciler::new(store, calendar, announcer, ledger, &config.mirror_retry);

        Self {
            config,
            integrations,
            events,
            rsvp,
            reconciler,
        }
    }
}

/// The whole HTTP surface. `limit` wraps the POST routes; production passes the
/// per-IP governor layer.
fn app_router<F>(state: Arc<AppState>, limit: F, frontend_origin: HeaderValue) -> Router
where
    F: FnOnce(Router<Arc<AppState>>) -> Router<Arc<AppState>>,
{
    let limited = limit(
        routes::events::router()
            // manual mirror reconciliation
            .merge(routes::reconcile::router()),
    );

    Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(routes::ping::router())
        .merge(limited)
        .with_state(state)
        .layer(axum::middleware::from_fn(
            middleware::security_headers::security_headers_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(frontend_origin)
                .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
                .allow_headers([http::header::CONTENT_TYPE, http::header::ACCEPT]),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "juntos_events=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Juntos events service");

    let pool = init::init_db(&config).await?;
    let store: Arc<dyn EventStore> = Arc::new(SqliteStore::new(pool));
    let (calendar, announcer) = init::init_integrations(&config)?;

    let app_state = Arc::new(AppState::new(config.clone(), store, calendar, announcer));

    // Create shutdown notifier for background workers and std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    let bg_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Rate limiter for the POST endpoints, keyed on the client IP
    let mut public_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    public_builder.per_second(config.rate_limit.public_per_second.max(1).into());
    public_builder.burst_size(config.rate_limit.public_burst.max(1));
    public_builder.error_handler(middleware::rate_limit::governor_error_response);

    let public_gov_conf = Arc::new(
        public_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build public governor config"))?,
    );

    let public_cleaner = {
        let limiter = public_gov_conf.limiter().clone();
        middleware::rate_limit::spawn_cleanup_thread(
            "public",
            Duration::from_secs(60),
            thread_shutdown.clone(),
            move || {
                limiter.retain_recent();
                limiter.len()
            },
        )
    };

    let public_rate_layer = GovernorLayer {
        config: public_gov_conf.clone(),
    };

    let frontend_origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", e))?;

    let app = app_router(
        app_state.clone(),
        move |routes| routes.layer(public_rate_layer),
        frontend_origin,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    // Select between the server and the signal listener. On a signal the
    // workers and threads are notified and the server future is dropped.
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let thread_shutdown_clone = thread_shutdown.clone();

    let signal_fut = async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received, notifying background workers and threads");
        let _ = shutdown_tx_clone.send(());
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server future dropped to stop accepting new connections");
        }
    }

    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );

    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    let _ = tokio::time::timeout(shutdown_wait, bg_wait).await;

    // The server may have stopped on its own; make sure the thread sees the flag.
    thread_shutdown.store(true, Ordering::SeqCst);
    if let Err(e) = public_cleaner.join() {
        tracing::warn!("Public rate limiter cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to bind SIGTERM, listening for Ctrl+C only: {}", e);
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::test_support::Harness;

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn reconcile_shares_the_post_rate_limit() {
        let h = Harness::new().await;
        let mut builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
        builder.per_second(60).burst_size(1);
        builder.error_handler(middleware::rate_limit::governor_error_response);
        let layer = GovernorLayer {
            config: Arc::new(builder.finish().unwrap()),
        };

        let app = app_router(
            Arc::new(h.app_state()),
            move |routes| routes.layer(layer),
            HeaderValue::from_static("http://localhost:3000"),
        );

        let first = app.clone().oneshot(request("POST", "/reconcile")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.clone().oneshot(request("POST", "/reconcile")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(http::header::RETRY_AFTER));

        // smoke endpoints stay outside the limiter
        for _ in 0..3 {
            let ping = app.clone().oneshot(request("GET", "/ping")).await.unwrap();
            assert_eq!(ping.status(), StatusCode::OK);
        }
    }
}
