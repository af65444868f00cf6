//! Reasoning engine capability
//!
//! The engine is opaque: it takes a prompt plus execution options and yields a
//! stream of typed messages. Anything that can produce that stream (the Claude
//! CLI, a test double) plugs in behind the [`Engine`] trait.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::Result;

/// Capabilities granted to heartbeat runs by default: read-only inspection plus shell
pub const DEFAULT_ALLOWED_CAPABILITIES: &[&str] =
    &["Read", "Glob", "Grep", "Bash", "WebFetch", "WebSearch"];

/// How the engine treats actions that would normally need approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    #[default]
    Default,
    AcceptEdits,
    /// Never stop for interactive approval
    BypassPermissions,
}

impl PermissionPolicy {
    /// Flag value understood by the Claude CLI `--permission-mode`
    pub fn as_cli_mode(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_cli_mode())
    }
}

/// Options for one engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub workspace: PathBuf,
    pub allowed_capabilities: Vec<String>,
    /// Session to resume, if any
    pub resume_token: Option<String>,
    pub permission_policy: PermissionPolicy,
}

/// Payload of a streamed engine message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMessageKind {
    Text { content: String },
    ToolUse { name: String },
    Final { content: String },
}

/// One message from the engine stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineMessage {
    pub kind: EngineMessageKind,
    pub session_id: Option<String>,
}

impl EngineMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: EngineMessageKind::Text {
                content: content.into(),
            },
            session_id: None,
        }
    }

    pub fn tool_use(name: impl Into<String>) -> Self {
        Self {
            kind: EngineMessageKind::ToolUse { name: name.into() },
            session_id: None,
        }
    }

    pub fn final_result(content: impl Into<String>) -> Self {
        Self {
            kind: EngineMessageKind::Final {
                content: content.into(),
            },
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

pub type EngineStream = BoxStream<'static, Result<EngineMessage>>;

/// An opaque reasoning engine
#[async_trait]
pub trait Engine: Send + Sync {
    /// Start an invocation. Errors here mean the engine could not be started;
    /// errors yielded by the stream mean it failed mid-run.
    async fn invoke(&self, prompt: &str, options: EngineOptions) -> Result<EngineStream>;

    /// Short name for logs
    fn name(&self) -> &str;
}
