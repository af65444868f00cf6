//! Claude CLI engine
//!
//! Runs `claude -p` with `--output-format stream-json` and turns each JSON
//! line into [`EngineMessage`]s as it arrives.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineMessage, EngineMessageKind, EngineOptions, EngineStream};
use crate::error::{PulseError, Result};

/// Engine backed by the Claude Code CLI
#[derive(Debug, Clone)]
pub struct ClaudeCliEngine {
    claude_path: PathBuf,
    model: Option<String>,
    max_turns: Option<u32>,
}

impl ClaudeCliEngine {
    pub fn new(claude_path: impl Into<PathBuf>) -> Self {
        Self {
            claude_path: claude_path.into(),
            model: None,
            max_turns: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_turns(mut self, max_turns: Option<u32>) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Command-line arguments for one invocation
    pub fn build_args(&self, prompt: &str, options: &EngineOptions) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--permission-mode".to_string(),
            options.permission_policy.as_cli_mode().to_string(),
        ];

        if !options.allowed_capabilities.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(options.allowed_capabilities.join(","));
        }
        if let Some(token) = &options.resume_token {
            args.push("--resume".to_string());
            args.push(token.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(max_turns) = self.max_turns {
            args.push("--max-turns".to_string());
            args.push(max_turns.to_string());
        }
        args
    }
}

#[async_trait]
impl Engine for ClaudeCliEngine {
    async fn invoke(&self, prompt: &str, options: EngineOptions) -> Result<EngineStream> {
        let args = self.build_args(prompt, &options);
        debug!(
            "Spawning {} in {} (resume: {:?})",
            self.claude_path.display(),
            options.workspace.display(),
            options.resume_token
        );

        let mut child = Command::new(&self.claude_path)
            .args(&args)
            .current_dir(&options.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PulseError::Engine(format!(
                    "Failed to start {}: {}",
                    self.claude_path.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PulseError::Engine("claude stdout was not captured".to_string()))?;

        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                if let Err(e) = stderr.read_to_string(&mut buf).await {
                    debug!("Failed to read claude stderr: {}", e);
                }
                buf
            })
        });

        let state = StreamState {
            lines: BufReader::new(stdout).lines(),
            pending: VecDeque::new(),
            child,
            stderr,
            saw_result: false,
            finished: false,
        };

        Ok(stream::unfold(state, next_message).boxed())
    }

    fn name(&self) -> &str {
        "claude"
    }
}

struct StreamState {
    lines: Lines<BufReader<ChildStdout>>,
    pending: VecDeque<EngineMessage>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    saw_result: bool,
    finished: bool,
}

async fn next_message(mut state: StreamState) -> Option<(Result<EngineMessage>, StreamState)> {
    loop {
        if let Some(message) = state.pending.pop_front() {
            return Some((Ok(message), state));
        }
        if state.finished {
            return None;
        }

        match state.lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_stream_line(&line) {
                    Ok(messages) => {
                        if messages
                            .iter()
                            .any(|m| matches!(m.kind, EngineMessageKind::Final { .. }))
                        {
                            state.saw_result = true;
                        }
                        state.pending.extend(messages);
                    }
                    Err(e @ PulseError::Engine(_)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    Err(e) => warn!("Skipping malformed claude output line: {}", e),
                }
            }
            Ok(None) => {
                state.finished = true;
                if let Some(e) = finish(&mut state).await {
                    return Some((Err(e), state));
                }
            }
            Err(e) => {
                state.finished = true;
                return Some((Err(e.into()), state));
            }
        }
    }
}

/// Reap the process once stdout closes. A non-zero exit is only an error when
/// no result event was seen.
async fn finish(state: &mut StreamState) -> Option<PulseError> {
    let status = match state.child.wait().await {
        Ok(status) => status,
        Err(e) => return Some(e.into()),
    };

    let stderr = match state.stderr.take() {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };

    if status.success() || state.saw_result {
        if !stderr.trim().is_empty() {
            debug!("claude stderr: {}", stderr.trim());
        }
        return None;
    }

    Some(PulseError::Engine(format!(
        "claude exited with {}: {}",
        status,
        stderr.trim()
    )))
}

/// Parse one line of `stream-json` output.
///
/// Assistant events yield text and tool-use messages, a result event yields
/// the final message (or an engine error when flagged as one), and anything
/// else is ignored.
pub fn parse_stream_line(line: &str) -> Result<Vec<EngineMessage>> {
    let event: Value = serde_json::from_str(line)?;
    let session_id = event
        .get("session_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let tag = |message: EngineMessage| match &session_id {
        Some(id) => message.with_session(id.clone()),
        None => message,
    };

    match event.get("type").and_then(|v| v.as_str()) {
        Some("assistant") => {
            let blocks = event
                .pointer("/message/content")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let mut messages = Vec::new();
            for block in blocks {
                match block.get("type").and_then(|v| v.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|v| v.as_str())
                            && !text.is_empty()
                        {
                            messages.push(tag(EngineMessage::text(text)));
                        }
                    }
                    Some("tool_use") => {
                        let name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown");
                        messages.push(tag(EngineMessage::tool_use(name)));
                    }
                    _ => {}
                }
            }
            Ok(messages)
        }
        Some("result") => {
            let content = event
                .get("result")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            if event.get("is_error").and_then(|v| v.as_bool()) == Some(true) {
                let subtype = event
                    .get("subtype")
                    .and_then(|v| v.as_str())
                    .unwrap_or("error");
                return Err(PulseError::Engine(format!(
                    "claude reported {}: {}",
                    subtype, content
                )));
            }
            Ok(vec![tag(EngineMessage::final_result(content))])
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PermissionPolicy;

    fn options(resume: Option<&str>) -> EngineOptions {
        EngineOptions {
            workspace: PathBuf::from("/tmp/ws"),
            allowed_capabilities: vec!["Read".into(), "Bash".into()],
            resume_token: resume.map(|s| s.to_string()),
            permission_policy: PermissionPolicy::BypassPermissions,
        }
    }

    #[test]
    fn test_build_args_fresh_session() {
        let engine = ClaudeCliEngine::new("claude");
        let args = engine.build_args("do the thing", &options(None));

        assert_eq!(&args[..2], &["-p", "do the thing"]);
        assert!(args.windows(2).any(|w| w == ["--output-format", "stream-json"]));
        assert!(args.windows(2).any(|w| w == ["--allowedTools", "Read,Bash"]));
        assert!(
            args.windows(2)
                .any(|w| w == ["--permission-mode", "bypassPermissions"])
        );
        assert!(!args.contains(&"--resume".to_string()));
        assert!(!args.contains(&"--model".to_string()));
    }

    #[test]
    fn test_build_args_resume_and_overrides() {
        let engine = ClaudeCliEngine::new("/usr/local/bin/claude")
            .with_model(Some("sonnet".into()))
            .with_max_turns(Some(8));
        let args = engine.build_args("p", &options(Some("sess-42")));

        assert!(args.windows(2).any(|w| w == ["--resume", "sess-42"]));
        assert!(args.windows(2).any(|w| w == ["--model", "sonnet"]));
        assert!(args.windows(2).any(|w| w == ["--max-turns", "8"]));
    }

    #[test]
    fn test_parse_assistant_event() {
        let line = r#"{"type":"assistant","session_id":"s1","message":{"content":[
            {"type":"text","text":"Looking at disk usage"},
            {"type":"tool_use","id":"t1","name":"Bash","input":{"command":"df -h"}}
        ]}}"#
            .replace('\n', "");
        let messages = parse_stream_line(&line).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            EngineMessage::text("Looking at disk usage").with_session("s1")
        );
        assert_eq!(messages[1], EngineMessage::tool_use("Bash").with_session("s1"));
    }

    #[test]
    fn test_parse_result_event() {
        let line = concat!(
            r#"{"type":"result","subtype":"success","is_error":false,"#,
            r###""session_id":"s1","result":"## Response\nHEARTBEAT_OK"}"###
        );
        let messages = parse_stream_line(line).unwrap();

        assert_eq!(
            messages,
            vec![EngineMessage::final_result("## Response\nHEARTBEAT_OK").with_session("s1")]
        );
    }

    #[test]
    fn test_parse_error_result() {
        let line = concat!(
            r#"{"type":"result","subtype":"error_max_turns","is_error":true,"#,
            r#""session_id":"s1","result":""}"#
        );
        let err = parse_stream_line(line).unwrap_err();

        assert!(matches!(err, PulseError::Engine(_)));
        assert!(err.to_string().contains("error_max_turns"));
    }

    #[test]
    fn test_parse_ignores_system_and_rejects_garbage() {
        let line = r#"{"type":"system","subtype":"init","session_id":"s1","tools":[]}"#;
        assert!(parse_stream_line(line).unwrap().is_empty());

        assert!(matches!(
            parse_stream_line("not json"),
            Err(PulseError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let engine = ClaudeCliEngine::new("/nonexistent/claude-binary");
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(None);
        opts.workspace = dir.path().to_path_buf();

        let err = engine.invoke("hi", opts).await.err().unwrap();
        assert!(matches!(err, PulseError::Engine(_)));
    }
}
