//! Error types for pulse
//!
//! Every failure a heartbeat can hit falls into one of a few buckets:
//! configuration problems, engine invocation failures and notification
//! delivery failures. None of them is fatal to the scheduler; callers catch
//! them at the per-agent boundary and log.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    /// Invalid or incomplete configuration (missing credentials, bad windows, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The reasoning engine failed to start, crashed, or reported an error result
    #[error("Engine error: {0}")]
    Engine(String),

    /// A notifier could not deliver a message
    #[error("Notification error: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PulseError>;
