//! Notifier contract

use async_trait::async_trait;
use pulse_core::{NotificationMessage, Result};

/// A sink that delivers notify-worthy heartbeat results to a human.
///
/// A failed `send` must leave the notifier usable: the next call is attempted
/// as if nothing happened.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Open connections or verify credentials
    async fn start(&self) -> Result<()>;

    /// Format and deliver one message
    async fn send(&self, message: &NotificationMessage) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &str;
}
