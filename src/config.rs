use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    pub slack: SlackConfig,
    pub rsvp: RsvpConfig,
    pub rate_limit: RateLimitConfig,
    pub mirror_retry: MirrorRetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS (the web front-end).
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// OAuth client used to mirror events into Google Calendar.
/// The integration is enabled only when all three values are present.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RsvpConfig {
    /// Base URL of the RSVP landing page used in announcements.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for /new and /rsvp
    pub public_per_second: u32,
    /// Burst size for /new and /rsvp
    pub public_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorRetryConfig {
    /// Whether the background reconciliation worker is enabled.
    pub enabled: bool,
    /// Backoff in seconds before the first retry of a failed mirror.
    pub initial_backoff_seconds: u64,
    /// Cap for exponential backoff (seconds).
    pub max_backoff_seconds: u64,
    /// How often (seconds) the worker polls for due jobs.
    pub poll_interval_seconds: u64,
    /// Attempts (including the first, synchronous one) before a job is marked dead.
    pub max_attempts: u32,
    /// Maximum number of jobs claimed per reconciliation pass.
    pub batch_size: u32,
    /// A `pending`/`processing` job untouched for this long is treated as interrupted.
    pub stale_after_seconds: u64,
}

impl GoogleConfig {
    pub fn credentials(&self) -> Option<(String, String, String)> {
        match (&self.client_id, &self.client_secret, &self.refresh_token) {
            (Some(id), Some(secret), Some(token)) => {
                Some((id.clone(), secret.clone(), token.clone()))
            }
            _ => None,
        }
    }

    pub fn is_partially_configured(&self) -> bool {
        let set = [
            self.client_id.is_some(),
            self.client_secret.is_some(),
            self.refresh_token.is_some(),
        ];
        set.iter().any(|s| *s) && !set.iter().all(|s| *s)
    }
}

fn parse_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/juntos.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            google: GoogleConfig {
                client_id: non_empty_var("GOOGLE_CLIENT_ID"),
                client_secret: non_empty_var("GOOGLE_CLIENT_SECRET"),
                refresh_token: non_empty_var("GOOGLE_REFRESH_TOKEN"),
            },
            slack: SlackConfig {
                bot_token: non_empty_var("SLACK_BOT_TOKEN"),
            },
            rsvp: RsvpConfig {
                base_url: env::var("RSVP_BASE_URL")
                    .unwrap_or_else(|_| "https://juntos.kernel.community".to_string())
                    .trim_end_matches('/')
                    .to_string(),
            },
            rate_limit: RateLimitConfig {
                public_per_second: env::var("RATE_LIMIT_PUBLIC_PER_SECOND")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                public_burst: env::var("RATE_LIMIT_PUBLIC_BURST")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
            },
            mirror_retry: MirrorRetryConfig {
                enabled: parse_flag("MIRROR_RETRY_ENABLED", true),
                initial_backoff_seconds: env::var("MIRROR_RETRY_INITIAL_BACKOFF_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30u64),
                max_backoff_seconds: env::var("MIRROR_RETRY_MAX_BACKOFF_SECONDS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600u64),
                poll_interval_seconds: env::var("MIRROR_RETRY_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .unwrap_or(15u64),
                max_attempts: env::var("MIRROR_RETRY_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5u32),
                batch_size: env::var("MIRROR_RETRY_BATCH_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10u32),
                stale_after_seconds: env::var("MIRROR_RETRY_STALE_AFTER_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300u64),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/juntos.db".to_string(),
                max_connections: 5,
            },
            google: GoogleConfig {
                client_id: None,
                client_secret: None,
                refresh_token: None,
            },
            slack: SlackConfig { bot_token: None },
            rsvp: RsvpConfig {
                base_url: "https://juntos.kernel.community".to_string(),
            },
            rate_limit: RateLimitConfig {
                public_per_second: 5,
                public_burst: 20,
            },
            mirror_retry: MirrorRetryConfig {
                enabled: true,
                initial_backoff_seconds: 30,
                max_backoff_seconds: 3600,
                poll_interval_seconds: 15,
                max_attempts: 5,
                batch_size: 10,
                stale_after_seconds: 300,
            },
        }
    }
}
