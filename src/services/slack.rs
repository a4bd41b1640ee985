use std::time::Duration as StdDuration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::SlackConfig;
use crate::db::models::{EventDraft, EventType};
use crate::error::{AppError, AppResult};

const SLACK_API_URL: &str = "https://slack.com/api";

/// Longest description shown in an announcement, in characters.
pub const DESCRIPTION_LIMIT: usize = 200;

/// Characters removed from titles and descriptions before they are posted.
const STRIPPED_CHARS: &[char] = &[
    '&', '/', '\\', '#', ',', '+', '(', ')', '$', '~', '%', '.', '\'', '"', ':', '*', '?', '<',
    '>', '@', '^', '{', '}',
];

// ============================================================================
// Block Kit Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<bool>,
}

impl TextObject {
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn".to_string(),
            text: text.into(),
            emoji: None,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: "plain_text".to_string(),
            text: text.into(),
            emoji: Some(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: TextObject,
    pub value: String,
    pub action_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { text: TextObject },
    Divider,
    Actions { elements: Vec<ButtonElement> },
}

/// Everything needed to post (or re-post) one announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackAnnouncement {
    pub title: String,
    pub description: String,
    pub start_date_time: String,
    pub url: String,
    pub blocks: Vec<Block>,
    pub icon: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    blocks: &'a [Block],
    icon_emoji: &'a str,
    username: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// Formatting
// ============================================================================

pub fn sanitize_text(text: &str) -> String {
    text.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect()
}

/// Cut to [`DESCRIPTION_LIMIT`] characters, appending `...` only when something was cut.
pub fn truncate_description(text: &str) -> String {
    if text.chars().count() <= DESCRIPTION_LIMIT {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(DESCRIPTION_LIMIT).collect();
    truncated.push_str("...");
    truncated
}

/// Landing page for RSVPs: `<base>/rsvp` followed by the series hash, if any.
pub fn rsvp_url(base_url: &str, series_hash: Option<&str>) -> String {
    format!(
        "{}/rsvp{}",
        base_url.trim_end_matches('/'),
        series_hash.unwrap_or_default()
    )
}

/// Announcement for the first draft of a batch.
pub fn build_announcement(
    draft: &EventDraft,
    proposer_name: &str,
    event_type: &EventType,
    series_hash: Option<&str>,
    base_url: &str,
) -> SlackAnnouncement {
    let url = rsvp_url(base_url, series_hash);
    let title = sanitize_text(&draft.title);
    let description = truncate_description(&sanitize_text(&draft.description));

    let mut blocks = vec![
        Block::Section {
            text: TextObject::mrkdwn(format!(
                "{} has proposed a new {}!",
                proposer_name, event_type.label
            )),
        },
        Block::Divider,
        Block::Section {
            text: TextObject::mrkdwn(format!("{}\n{}", title, description)),
        },
    ];

    if series_hash.is_some() {
        blocks.push(Block::Section {
            text: TextObject::mrkdwn("*_This event is part of a series_*"),
        });
    }

    blocks.push(Block::Actions {
        elements: vec![ButtonElement {
            kind: "button".to_string(),
            text: TextObject::plain("Read more"),
            value: "click-0".to_string(),
            action_id: "actionId-0".to_string(),
            url: url.clone(),
        }],
    });

    SlackAnnouncement {
        title: draft.title.clone(),
        description: draft.description.clone(),
        start_date_time: draft.start_date_time.to_rfc2822(),
        url,
        blocks,
        icon: event_type.icon.clone(),
        username: format!("New {} scheduled", event_type.label),
    }
}

/// `chat.postMessage` body: posted under the event type's name and icon, with the
/// title as the notification fallback text.
fn post_message_request<'a>(
    announcement: &'a SlackAnnouncement,
    channel_id: &'a str,
) -> PostMessageRequest<'a> {
    PostMessageRequest {
        channel: channel_id,
        text: &announcement.title,
        blocks: &announcement.blocks,
        icon_emoji: &announcement.icon,
        username: &announcement.username,
    }
}

// ============================================================================
// Announcer
// ============================================================================

#[async_trait]
pub trait Announcer: Send + Sync + 'static {
    /// Post the announcement and return the message id (Slack's `ts`).
    async fn send_announcement(
        &self,
        announcement: &SlackAnnouncement,
        channel_id: &str,
    ) -> AppResult<String>;
}

#[derive(Debug, Clone)]
pub struct SlackService {
    client: Client,
    bot_token: String,
}

impl SlackService {
    pub fn new(bot_token: String) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .map_err(|e| AppError::Messaging(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, bot_token })
    }

    pub fn from_config(config: &SlackConfig) -> AppResult<Option<Self>> {
        match config.bot_token {
            Some(ref token) => Self::new(token.clone()).map(Some),
            None => Ok(None),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{}", SLACK_API_URL, method)
    }
}

#[async_trait]
impl Announcer for SlackService {
    async fn send_announcement(
        &self,
        announcement: &SlackAnnouncement,
        channel_id: &str,
    ) -> AppResult<String> {
        let body = post_message_request(announcement, channel_id);

        let response = self
            .client
            .post(self.api_url("chat.postMessage"))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Messaging(format!("Failed to send message: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Messaging(format!(
                "Slack API error ({}): {}",
                status, error_text
            )));
        }

        let parsed: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| AppError::Messaging(format!("Failed to parse Slack response: {}", e)))?;

        if !parsed.ok {
            let error = parsed.error.unwrap_or_else(|| "unknown_error".to_string());
            if error == "invalid_auth" || error == "not_authed" || error == "token_revoked" {
                tracing::error!("Slack rejected the bot token: {}", error);
            }
            return Err(AppError::Messaging(format!("Slack API error: {}", error)));
        }

        parsed
            .ts
            .ok_or_else(|| AppError::Messaging("Slack response carried no message id".to_string()))
    }
}
