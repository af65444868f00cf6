//! Heartbeat executor - one engine invocation per agent per heartbeat

use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ack::{classify, extract_response};
use crate::checklist::{
    DEFAULT_CHECKLIST_FILE, build_prompt, is_checklist_empty, load_checklist, truncate_checklist,
};
use crate::engine::{
    DEFAULT_ALLOWED_CAPABILITIES, Engine, EngineMessage, EngineMessageKind, EngineOptions,
    PermissionPolicy,
};
use crate::error::Result;
use crate::types::{AgentState, HeartbeatResult};

/// Sentinel the engine replies with when nothing needs attention
pub const DEFAULT_SENTINEL: &str = "HEARTBEAT_OK";

/// Heading that separates engine narration from the user-facing reply
pub const DEFAULT_RESPONSE_MARKER: &str = "## Response";

/// Executor settings (mirrors the `[heartbeat]` config section)
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub sentinel: String,
    /// Longest remark allowed next to the sentinel while still suppressing
    pub ack_max_chars: usize,
    pub response_marker: String,
    pub checklist_file: String,
    pub max_checklist_chars: usize,
    /// Skip the engine call when the checklist has nothing actionable
    pub skip_empty_checklist: bool,
    pub allowed_capabilities: Vec<String>,
    pub permission_policy: PermissionPolicy,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            ack_max_chars: 300,
            response_marker: DEFAULT_RESPONSE_MARKER.to_string(),
            checklist_file: DEFAULT_CHECKLIST_FILE.to_string(),
            max_checklist_chars: 20_000,
            skip_empty_checklist: true,
            allowed_capabilities: DEFAULT_ALLOWED_CAPABILITIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            permission_policy: PermissionPolicy::BypassPermissions,
        }
    }
}

/// Running state while folding over the engine stream
#[derive(Debug, Default)]
struct EngineRun {
    text: String,
    last_text: Option<String>,
    final_content: Option<String>,
    session_id: Option<String>,
    tool_uses: usize,
}

impl EngineRun {
    fn absorb(&mut self, message: EngineMessage) {
        if let Some(session_id) = message.session_id {
            self.session_id = Some(session_id);
        }
        match message.kind {
            EngineMessageKind::Text { content } => {
                if !self.text.is_empty() {
                    self.text.push('\n');
                }
                self.text.push_str(&content);
                self.last_text = Some(content);
            }
            EngineMessageKind::ToolUse { name } => {
                self.tool_uses += 1;
                debug!("Engine used tool: {}", name);
            }
            EngineMessageKind::Final { content } => {
                self.final_content = Some(content);
            }
        }
    }

    /// The engine's last word: the final payload, or the last text chunk
    fn terminal(&self) -> &str {
        self.final_content
            .as_deref()
            .or(self.last_text.as_deref())
            .unwrap_or("")
    }

    fn accumulated(&self) -> &str {
        if self.text.trim().is_empty() {
            self.final_content.as_deref().unwrap_or("")
        } else {
            &self.text
        }
    }
}

/// Runs a heartbeat for one agent and classifies the reply
pub struct Executor {
    engine: Arc<dyn Engine>,
    settings: HeartbeatSettings,
}

impl Executor {
    pub fn new(engine: Arc<dyn Engine>, settings: HeartbeatSettings) -> Self {
        Self { engine, settings }
    }

    pub fn settings(&self) -> &HeartbeatSettings {
        &self.settings
    }

    /// Invoke the engine for `agent`. Never fails; engine errors come back as
    /// an unsuccessful result.
    pub async fn invoke(&self, agent: &AgentState) -> HeartbeatResult {
        let settings = &self.settings;
        let checklist = load_checklist(&agent.config.workspace, &settings.checklist_file).await;

        if settings.skip_empty_checklist
            && let Some(content) = &checklist
            && is_checklist_empty(content)
        {
            debug!(
                "Checklist for agent {} has nothing actionable, skipping engine call",
                agent.agent_id
            );
            return HeartbeatResult::skipped(agent.session_token.clone());
        }

        let checklist = checklist.map(|c| truncate_checklist(&c, settings.max_checklist_chars));
        let prompt = build_prompt(
            checklist.as_deref(),
            &settings.checklist_file,
            &settings.sentinel,
            &settings.response_marker,
        );

        let options = EngineOptions {
            workspace: agent.config.workspace.clone(),
            allowed_capabilities: settings.allowed_capabilities.clone(),
            resume_token: agent.session_token.clone(),
            permission_policy: settings.permission_policy,
        };

        info!(
            "Invoking {} for agent {} (resume: {})",
            self.engine.name(),
            agent.agent_id,
            agent.session_token.is_some()
        );

        let run = match self.run_engine(&prompt, options).await {
            Ok(run) => run,
            Err(e) => {
                warn!("Heartbeat for agent {} failed: {}", agent.agent_id, e);
                return HeartbeatResult::failure(e);
            }
        };

        let output = extract_response(run.terminal(), run.accumulated(), &settings.response_marker);
        let decision = classify(&output, &settings.sentinel, settings.ack_max_chars);
        let session_token = run.session_id.or_else(|| agent.session_token.clone());

        if decision.notify {
            info!(
                "Agent {} has something to report ({} chars, {} tool calls)",
                agent.agent_id,
                decision.message.len(),
                run.tool_uses
            );
            HeartbeatResult::completed(decision.message, true, session_token)
        } else {
            debug!("Agent {} acknowledged heartbeat", agent.agent_id);
            HeartbeatResult::completed(output, false, session_token)
        }
    }

    async fn run_engine(&self, prompt: &str, options: EngineOptions) -> Result<EngineRun> {
        let mut stream = self.engine.invoke(prompt, options).await?;
        let mut run = EngineRun::default();
        while let Some(message) = stream.next().await {
            run.absorb(message?);
        }
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PulseError;
    use crate::types::AgentConfig;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Engine that replays a fixed script and records what it was asked
    struct ScriptedEngine {
        script: Mutex<Option<Vec<Result<EngineMessage>>>>,
        fail_to_start: bool,
        calls: Mutex<Vec<(String, EngineOptions)>>,
    }

    impl ScriptedEngine {
        fn new(script: Vec<Result<EngineMessage>>) -> Self {
            Self {
                script: Mutex::new(Some(script)),
                fail_to_start: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                script: Mutex::new(None),
                fail_to_start: true,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Engine for ScriptedEngine {
        async fn invoke(
            &self,
            prompt: &str,
            options: EngineOptions,
        ) -> Result<crate::engine::EngineStream> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), options));
            if self.fail_to_start {
                return Err(PulseError::Engine("claude not found".into()));
            }
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(stream::iter(script).boxed())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn agent(workspace: &std::path::Path) -> AgentState {
        let config = AgentConfig::new("ops", workspace, Duration::from_secs(60)).unwrap();
        AgentState::new(config, Instant::now())
    }

    fn executor(engine: Arc<ScriptedEngine>) -> Executor {
        Executor::new(engine, HeartbeatSettings::default())
    }

    #[tokio::test]
    async fn test_sentinel_reply_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(EngineMessage::text("Checked everything.").with_session("s-1")),
            Ok(EngineMessage::text("HEARTBEAT_OK").with_session("s-1")),
            Ok(EngineMessage::final_result("HEARTBEAT_OK").with_session("s-1")),
        ]));

        let result = executor(engine.clone()).invoke(&agent(dir.path())).await;

        assert!(result.success);
        assert!(!result.notify);
        assert_eq!(result.session_token.as_deref(), Some("s-1"));
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn test_marker_section_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(EngineMessage::tool_use("Bash")),
            Ok(EngineMessage::text("Ran df -h, HEARTBEAT_OK would be wrong.")),
            Ok(EngineMessage::final_result(
                "Ran df -h.\n## Response\nDisk on /var is 97% full.",
            )
            .with_session("s-2")),
        ]));

        let result = executor(engine).invoke(&agent(dir.path())).await;

        assert!(result.success);
        assert!(result.notify);
        assert_eq!(result.output, "Disk on /var is 97% full.");
    }

    #[tokio::test]
    async fn test_without_marker_accumulated_text_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(EngineMessage::text("Build on main is red.")),
            Ok(EngineMessage::text("Two reviews pending.")),
        ]));

        let result = executor(engine).invoke(&agent(dir.path())).await;

        assert!(result.notify);
        assert_eq!(result.output, "Build on main is red.\nTwo reviews pending.");
    }

    #[tokio::test]
    async fn test_engine_start_failure_becomes_result() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::failing());

        let result = executor(engine).invoke(&agent(dir.path())).await;

        assert!(!result.success);
        assert!(!result.notify);
        assert!(result.output.is_empty());
        assert!(matches!(result.error, Some(PulseError::Engine(_))));
    }

    #[tokio::test]
    async fn test_mid_stream_error_becomes_result() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(EngineMessage::text("partial")),
            Err(PulseError::Engine("rate limited".into())),
        ]));

        let result = executor(engine).invoke(&agent(dir.path())).await;

        assert!(!result.success);
        assert!(result.session_token.is_none());
    }

    #[tokio::test]
    async fn test_session_token_forwarded_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(EngineMessage::final_result(
            "HEARTBEAT_OK",
        ))]));
        let mut state = agent(dir.path());
        state.session_token = Some("prev".into());

        let result = executor(engine.clone()).invoke(&state).await;

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls[0].1.resume_token.as_deref(), Some("prev"));
        assert_eq!(calls[0].1.permission_policy, PermissionPolicy::BypassPermissions);
        assert!(calls[0].1.allowed_capabilities.contains(&"Read".to_string()));
        // no new session id in the stream, so the old one survives
        assert_eq!(result.session_token.as_deref(), Some("prev"));
    }

    #[tokio::test]
    async fn test_empty_checklist_skips_engine() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("HEARTBEAT.md"), "# Checks\n\n- [ ]\n")
            .await
            .unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![]));

        let result = executor(engine.clone()).invoke(&agent(dir.path())).await;

        assert!(result.success);
        assert!(result.skipped);
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_checklist_content_reaches_prompt() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("HEARTBEAT.md"), "- Check the nightly backup\n")
            .await
            .unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(EngineMessage::final_result(
            "HEARTBEAT_OK",
        ))]));

        executor(engine.clone()).invoke(&agent(dir.path())).await;

        let calls = engine.calls.lock().unwrap();
        assert!(calls[0].0.contains("Check the nightly backup"));
        assert_eq!(calls[0].1.workspace, dir.path());
    }

    #[tokio::test]
    async fn test_verbose_ack_notifies_full_text() {
        let dir = tempfile::tempdir().unwrap();
        let long_tail = "x".repeat(301);
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(EngineMessage::final_result(
            format!("HEARTBEAT_OK {}", long_tail),
        ))]));

        let result = executor(engine).invoke(&agent(dir.path())).await;

        assert!(result.notify);
        assert_eq!(result.output, format!("HEARTBEAT_OK {}", long_tail));
    }
}
