//! Local notifier that writes to stdout

use async_trait::async_trait;
use pulse_core::{NotificationMessage, Result};
use tracing::{debug, info};

use crate::notifier::Notifier;

/// Always-succeeding sink used when no external channel is configured
#[derive(Debug, Default, Clone)]
pub struct LocalNotifier;

impl LocalNotifier {
    pub fn new() -> Self {
        Self
    }

    /// Render a message as a single stdout entry
    pub fn format(message: &NotificationMessage) -> String {
        format!(
            "[{}] [{}] {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.agent_id,
            message.text
        )
    }
}

#[async_trait]
impl Notifier for LocalNotifier {
    async fn start(&self) -> Result<()> {
        debug!("Local notifier ready");
        Ok(())
    }

    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        println!("{}", Self::format(message));
        info!(
            "Delivered notification {} for agent {} to stdout",
            message.id, message.agent_id
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}
