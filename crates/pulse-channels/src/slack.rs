//! Slack notifier using the Web API

use async_trait::async_trait;
use pulse_core::{NotificationMessage, PulseError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::notifier::Notifier;

const MAX_MESSAGE_SIZE: usize = 10_240;
const API_BASE: &str = "https://slack.com/api";

/// Posts heartbeat notifications to a single Slack channel
pub struct SlackNotifier {
    bot_token: String,
    channel: String,
    client: reqwest::Client,
    running: AtomicBool,
}

impl SlackNotifier {
    /// Create a new Slack notifier
    ///
    /// # Arguments
    /// * `bot_token` - Slack bot token (starts with xoxb-)
    /// * `channel` - Channel id or name to post into
    pub fn new(bot_token: String, channel: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PulseError::Notification(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            bot_token,
            channel,
            client,
            running: AtomicBool::new(false),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Message body as posted: agent id prefix, capped at Slack's size limit
    pub fn format(message: &NotificationMessage) -> String {
        Self::prepare(message).0
    }

    /// Formatted body and whether it had to be cut to fit
    fn prepare(message: &NotificationMessage) -> (String, bool) {
        let body = format!("*[{}]* {}", message.agent_id, message.text);
        let text = truncate_to_bytes(&body, MAX_MESSAGE_SIZE);
        let truncated = text.len() < body.len();
        (text, truncated)
    }

    /// Call a Slack Web API method and check its `ok` flag
    async fn api_call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/{}", API_BASE, method);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PulseError::Notification(format!("Slack {} request failed: {}", method, e))
            })?;

        if !response.status().is_success() {
            return Err(PulseError::Notification(format!(
                "Slack API HTTP error: {}",
                response.status()
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PulseError::Notification(format!("Invalid Slack response: {}", e)))?;

        if result.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let err = result
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(PulseError::Notification(format!(
                "Slack {} error: {}",
                method, err
            )));
        }

        Ok(result)
    }
}

/// Cut `text` to at most `max_bytes`, backing off to a char boundary
fn truncate_to_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn start(&self) -> Result<()> {
        info!("Starting Slack notifier");

        if self.bot_token.is_empty() {
            return Err(PulseError::Config("Slack bot token is empty".to_string()));
        }
        if self.channel.is_empty() {
            return Err(PulseError::Config("Slack channel is empty".to_string()));
        }

        let auth = self.api_call("auth.test", serde_json::json!({})).await?;
        let user = auth
            .get("user")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!(
            "Slack notifier authenticated as {}, posting to {}",
            user, self.channel
        );

        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        if !self.is_running() {
            return Err(PulseError::Notification(
                "Slack notifier is not started".to_string(),
            ));
        }

        let (text, truncated) = Self::prepare(message);
        if truncated {
            warn!(
                "Notification for agent {} truncated to {} bytes",
                message.agent_id, MAX_MESSAGE_SIZE
            );
        }

        let body = serde_json::json!({
            "channel": self.channel,
            "text": text,
        });
        let result = self.api_call("chat.postMessage", body).await?;

        debug!(
            "Posted notification {} for agent {} (ts: {})",
            message.id,
            message.agent_id,
            result.get("ts").and_then(|v| v.as_str()).unwrap_or("")
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Slack notifier stopped");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}
