//! Notification sinks for pulse
//!
//! This crate provides the `Notifier` contract, a local stdout sink, a Slack
//! sink, and the factory that picks between them based on configuration.

pub mod factory;
pub mod local;
pub mod notifier;
pub mod slack;

// Re-export main types
pub use factory::{SlackNotifierConfig, build_notifier, connect_notifier, start_or_fallback};
pub use local::LocalNotifier;
pub use notifier::Notifier;
pub use slack::SlackNotifier;
