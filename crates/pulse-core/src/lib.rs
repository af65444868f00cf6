//! pulse-core - Heartbeat execution for pulse agents
//!
//! This crate provides:
//! - Agent configuration and per-agent scheduling state
//! - The reasoning engine capability and a Claude CLI implementation
//! - Checklist loading and heartbeat prompt building
//! - The executor that runs one heartbeat and decides whether to notify

pub mod ack;
pub mod checklist;
pub mod claude;
pub mod engine;
pub mod error;
pub mod executor;
pub mod types;

// Re-export main types for convenience
pub use ack::{AckDecision, classify, extract_response};
pub use claude::ClaudeCliEngine;
pub use engine::{
    DEFAULT_ALLOWED_CAPABILITIES, Engine, EngineMessage, EngineMessageKind, EngineOptions,
    EngineStream, PermissionPolicy,
};
pub use error::{PulseError, Result};
pub use executor::{Executor, HeartbeatSettings};
pub use types::{
    ActiveHours, AgentConfig, AgentSnapshot, AgentState, HeartbeatOutcome, HeartbeatResult,
    NotificationMessage,
};
