//! Shared types for pulse-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{PulseError, Result};

/// Minutes in a day; also the value of an `24:00` end bound.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Daily local-time window, inclusive on both ends, stored as minutes since midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl ActiveHours {
    /// Build a window from minute offsets.
    ///
    /// Windows that cross midnight (`start > end`) are rejected.
    pub fn new(start_minute: u32, end_minute: u32) -> Result<Self> {
        if start_minute >= MINUTES_PER_DAY {
            return Err(PulseError::Config(format!(
                "active hours start {} is outside the day",
                format_minute(start_minute)
            )));
        }
        if end_minute > MINUTES_PER_DAY {
            return Err(PulseError::Config(format!(
                "active hours end minute {} is outside the day",
                end_minute
            )));
        }
        if start_minute > end_minute {
            return Err(PulseError::Config(format!(
                "active hours {}-{} cross midnight, which is not supported",
                format_minute(start_minute),
                format_minute(end_minute)
            )));
        }
        Ok(Self {
            start_minute,
            end_minute,
        })
    }

    /// Parse a window from `"HH:MM"` bounds. `24:00` is accepted as an end bound.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start_minute = parse_hhmm(start)?;
        let end_minute = parse_hhmm(end)?;
        if start_minute == MINUTES_PER_DAY {
            return Err(PulseError::Config(
                "active hours cannot start at 24:00".to_string(),
            ));
        }
        Self::new(start_minute, end_minute)
    }

    /// Whether `minute_of_day` falls inside `[start, end]`
    pub fn contains(&self, minute_of_day: u32) -> bool {
        self.start_minute <= minute_of_day && minute_of_day <= self.end_minute
    }
}

impl fmt::Display for ActiveHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            format_minute(self.start_minute),
            format_minute(self.end_minute)
        )
    }
}

/// Parse `"HH:MM"` into minutes since midnight
pub fn parse_hhmm(s: &str) -> Result<u32> {
    let invalid = || PulseError::Config(format!("invalid time '{}', expected HH:MM", s));

    let (hours, minutes) = s.trim().split_once(':').ok_or_else(invalid)?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;

    if hours == 24 && minutes == 0 {
        return Ok(MINUTES_PER_DAY);
    }
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

fn format_minute(minute: u32) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Immutable, externally supplied configuration for one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub agent_id: String,
    /// Working directory handed to the engine
    pub workspace: PathBuf,
    pub interval: Duration,
    pub active_hours: Option<ActiveHours>,
}

impl AgentConfig {
    pub fn new(
        agent_id: impl Into<String>,
        workspace: impl Into<PathBuf>,
        interval: Duration,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        if agent_id.trim().is_empty() {
            return Err(PulseError::Config("agent id cannot be empty".to_string()));
        }
        if interval.is_zero() {
            return Err(PulseError::Config(format!(
                "agent '{}' has a zero heartbeat interval",
                agent_id
            )));
        }
        Ok(Self {
            agent_id,
            workspace: workspace.into(),
            interval,
            active_hours: None,
        })
    }

    pub fn with_active_hours(mut self, window: ActiveHours) -> Self {
        self.active_hours = Some(window);
        self
    }
}

/// How the most recent heartbeat for an agent ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatOutcome {
    /// Engine produced something worth surfacing
    Notified,
    /// Engine acknowledged with the sentinel; nothing surfaced
    Acknowledged,
    Failed,
    /// Outside the agent's active-hours window; engine not called
    SkippedInactive,
    /// Checklist had no actionable content; engine not called
    SkippedEmpty,
}

impl fmt::Display for HeartbeatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notified => write!(f, "notified"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Failed => write!(f, "failed"),
            Self::SkippedInactive => write!(f, "skipped_inactive"),
            Self::SkippedEmpty => write!(f, "skipped_empty"),
        }
    }
}

/// Mutable per-agent record, owned by the scheduler
#[derive(Debug, Clone)]
pub struct AgentState {
    pub agent_id: String,
    pub config: AgentConfig,
    pub next_due_at: Instant,
    pub interval: Duration,
    /// Opaque engine session id, replaced only from executor results
    pub session_token: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<HeartbeatOutcome>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub runs: u64,
}

impl AgentState {
    /// First heartbeat is due one interval after `now`
    pub fn new(config: AgentConfig, now: Instant) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            interval: config.interval,
            next_due_at: now + config.interval,
            config,
            session_token: None,
            last_run_at: None,
            last_outcome: None,
            last_error: None,
            consecutive_failures: 0,
            runs: 0,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due_at <= now
    }

    /// Push the next due time one interval past `completed_at`
    pub fn advance(&mut self, completed_at: Instant) {
        self.next_due_at = completed_at + self.interval;
    }

    /// Record the outcome of an attempt
    pub fn record(&mut self, outcome: HeartbeatOutcome, error: Option<String>) {
        self.runs += 1;
        self.last_run_at = Some(Utc::now());
        self.last_outcome = Some(outcome);
        if outcome == HeartbeatOutcome::Failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        self.last_error = error;
    }

    pub fn snapshot(&self, now: Instant) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: self.agent_id.clone(),
            workspace: self.config.workspace.clone(),
            interval_ms: self.interval.as_millis() as u64,
            next_due_in_ms: self.next_due_at.saturating_duration_since(now).as_millis() as u64,
            active_hours: self.config.active_hours.map(|w| w.to_string()),
            session_token: self.session_token.clone(),
            last_run_at: self.last_run_at,
            last_outcome: self.last_outcome,
            last_error: self.last_error.clone(),
            consecutive_failures: self.consecutive_failures,
            runs: self.runs,
        }
    }
}

/// Read-only diagnostic view of an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub workspace: PathBuf,
    pub interval_ms: u64,
    pub next_due_in_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_hours: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<HeartbeatOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub runs: u64,
}

/// Result of one executor invocation
#[derive(Debug)]
pub struct HeartbeatResult {
    pub success: bool,
    pub notify: bool,
    pub output: String,
    pub session_token: Option<String>,
    pub error: Option<PulseError>,
    /// Engine was not called because the checklist had nothing actionable
    pub skipped: bool,
}

impl HeartbeatResult {
    pub fn completed(output: String, notify: bool, session_token: Option<String>) -> Self {
        Self {
            success: true,
            notify,
            output,
            session_token,
            error: None,
            skipped: false,
        }
    }

    pub fn skipped(session_token: Option<String>) -> Self {
        Self {
            success: true,
            notify: false,
            output: String::new(),
            session_token,
            error: None,
            skipped: true,
        }
    }

    pub fn failure(error: PulseError) -> Self {
        Self {
            success: false,
            notify: false,
            output: String::new(),
            session_token: None,
            error: Some(error),
            skipped: false,
        }
    }

    /// Outcome this result maps to, as recorded in agent state
    pub fn outcome(&self) -> HeartbeatOutcome {
        if !self.success {
            HeartbeatOutcome::Failed
        } else if self.skipped {
            HeartbeatOutcome::SkippedEmpty
        } else if self.notify && !self.output.trim().is_empty() {
            HeartbeatOutcome::Notified
        } else {
            HeartbeatOutcome::Acknowledged
        }
    }
}

/// Message handed to a notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: String,
    pub agent_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(
        agent_id: impl Into<String>,
        text: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            text: text.into(),
            session_token,
            timestamp: Utc::now(),
        }
    }
}
