//! Notifier selection with fallback to the local sink

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::local::LocalNotifier;
use crate::notifier::Notifier;
use crate::slack::SlackNotifier;

/// Slack notification settings (mirrors `[notifications.slack]`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackNotifierConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub channel: String,
}

/// Pick a notifier for `config`. Never fails: anything short of a fully
/// configured Slack sink yields the local sink.
pub fn build_notifier(config: &SlackNotifierConfig) -> Arc<dyn Notifier> {
    if !config.enabled {
        info!("Slack notifications disabled, using local notifier");
        return Arc::new(LocalNotifier::new());
    }

    if config.bot_token.is_empty() {
        warn!("Slack notifications enabled but bot token is empty, using local notifier");
        return Arc::new(LocalNotifier::new());
    }
    if config.channel.is_empty() {
        warn!("Slack notifications enabled but channel is empty, using local notifier");
        return Arc::new(LocalNotifier::new());
    }

    match SlackNotifier::new(config.bot_token.clone(), config.channel.clone()) {
        Ok(notifier) => {
            info!("Using Slack notifier for channel {}", config.channel);
            Arc::new(notifier)
        }
        Err(e) => {
            warn!("Failed to create Slack notifier ({}), using local notifier", e);
            Arc::new(LocalNotifier::new())
        }
    }
}

/// Build and start a notifier. If the selected notifier fails to start, a
/// started local sink is returned instead.
pub async fn connect_notifier(config: &SlackNotifierConfig) -> Arc<dyn Notifier> {
    start_or_fallback(build_notifier(config)).await
}

/// Start `notifier`, or hand back a started local sink if that fails
pub async fn start_or_fallback(notifier: Arc<dyn Notifier>) -> Arc<dyn Notifier> {
    match notifier.start().await {
        Ok(()) => notifier,
        Err(e) => {
            error!(
                "Failed to start {} notifier: {}. Falling back to local notifier",
                notifier.name(),
                e
            );
            let local: Arc<dyn Notifier> = Arc::new(LocalNotifier::new());
            if let Err(e) = local.start().await {
                warn!("Local notifier failed to start: {}", e);
            }
            local
        }
    }
}
