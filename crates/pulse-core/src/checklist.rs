//! Heartbeat checklist loading and prompt building

use std::path::Path;
use tracing::{debug, warn};

/// Default checklist file name inside an agent workspace
pub const DEFAULT_CHECKLIST_FILE: &str = "HEARTBEAT.md";

/// Starter checklist written by `pulse init`
pub const CHECKLIST_TEMPLATE: &str = r#"# Heartbeat Checklist

<!--
This file is read on every heartbeat. List the things worth checking,
one per line, and keep them actionable. While nothing but headings,
comments and empty boxes remain, heartbeats are skipped.

Examples:
- Look at open PRs assigned to me and flag any waiting more than a day
- Check disk usage on the build host and warn above 90%
- Summarize unread messages tagged urgent
-->

## Checks

- [ ]
"#;

/// Read the checklist from `workspace/file_name`.
///
/// Returns `None` when the file is missing. Other read failures are logged and
/// also treated as missing so a heartbeat still runs with the default prompt.
pub async fn load_checklist(workspace: &Path, file_name: &str) -> Option<String> {
    let path = workspace.join(file_name);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No checklist at {}", path.display());
            None
        }
        Err(e) => {
            warn!("Failed to read checklist {}: {}", path.display(), e);
            None
        }
    }
}

/// Whether a checklist has nothing actionable in it.
///
/// Blank lines, headings, HTML comments (including multi-line ones) and empty
/// task boxes do not count.
pub fn is_checklist_empty(content: &str) -> bool {
    let mut in_comment = false;
    for raw in content.lines() {
        let mut line = raw.trim();

        if in_comment {
            match line.find("-->") {
                Some(end) => {
                    in_comment = false;
                    line = line[end + 3..].trim();
                }
                None => continue,
            }
        }

        while let Some(rest) = line.strip_prefix("<!--") {
            match rest.find("-->") {
                Some(end) => line = rest[end + 3..].trim(),
                None => {
                    in_comment = true;
                    line = "";
                }
            }
        }

        if line.is_empty() || line.starts_with('#') || line == "- [ ]" || line == "* [ ]" {
            continue;
        }
        return false;
    }
    true
}

/// Truncate the checklist to `max_chars`, noting how much was dropped
pub fn truncate_checklist(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let kept: String = content.chars().take(max_chars).collect();
    format!(
        "{}\n\n[checklist truncated: shown {} of {} characters]",
        kept, max_chars, total
    )
}

/// Build the heartbeat prompt
pub fn build_prompt(
    checklist: Option<&str>,
    checklist_file: &str,
    sentinel: &str,
    response_marker: &str,
) -> String {
    let mut prompt = String::new();

    match checklist {
        Some(content) => {
            prompt.push_str(&format!(
                "This is a scheduled heartbeat. Work through the checklist from {} below \
                 and act on anything that needs attention.\n\n",
                checklist_file
            ));
            prompt.push_str("<checklist>\n");
            prompt.push_str(content.trim_end());
            prompt.push_str("\n</checklist>\n\n");
        }
        None => {
            prompt.push_str(&format!(
                "This is a scheduled heartbeat. There is no {} checklist in this workspace. \
                 Check for anything that needs the user's attention.\n\n",
                checklist_file
            ));
        }
    }

    prompt.push_str(&format!(
        "When you are done, write a line containing exactly `{}` and put only the \
         message for the user after it.\n",
        response_marker
    ));
    prompt.push_str(&format!(
        "If nothing needs attention, reply with only: {}\n",
        sentinel
    ));

    debug!("Built heartbeat prompt ({} chars)", prompt.len());
    prompt
}

/// Create the checklist from the template if it does not exist yet.
///
/// Returns `true` if a file was written.
pub async fn ensure_checklist_file(path: &Path) -> std::io::Result<bool> {
    if tokio::fs::try_exists(path).await? {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(path, CHECKLIST_TEMPLATE).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_checklist_empty_true() {
        assert!(is_checklist_empty(""));
        assert!(is_checklist_empty("# Header\n## Checks\n\n"));
        assert!(is_checklist_empty("<!-- comment -->\n\n- [ ]\n* [ ]"));
        assert!(is_checklist_empty("<!--\n- not a task\n-->\n"));
        assert!(is_checklist_empty(CHECKLIST_TEMPLATE));
    }

    #[test]
    fn test_is_checklist_empty_false() {
        assert!(!is_checklist_empty("Check orders"));
        assert!(!is_checklist_empty("- [x] Done"));
        assert!(!is_checklist_empty("# Header\n- Rotate logs"));
        assert!(!is_checklist_empty("<!-- note --> - Rotate logs"));
        assert!(!is_checklist_empty("<!--\nhidden\n--> Check CI"));
    }

    #[test]
    fn test_truncate_checklist() {
        assert_eq!(truncate_checklist("short", 10), "short");

        let long = "é".repeat(30);
        let truncated = truncate_checklist(&long, 10);
        assert!(truncated.starts_with(&"é".repeat(10)));
        assert!(truncated.contains("shown 10 of 30 characters"));
    }

    #[test]
    fn test_build_prompt_with_checklist() {
        let prompt = build_prompt(
            Some("- Check CI\n"),
            "HEARTBEAT.md",
            "HEARTBEAT_OK",
            "## Response",
        );
        assert!(prompt.contains("<checklist>\n- Check CI\n</checklist>"));
        assert!(prompt.contains("HEARTBEAT.md"));
        assert!(prompt.contains("`## Response`"));
        assert!(prompt.trim_end().ends_with("HEARTBEAT_OK"));
    }

    #[test]
    fn test_build_prompt_without_checklist() {
        let prompt = build_prompt(None, "HEARTBEAT.md", "HEARTBEAT_OK", "## Response");
        assert!(prompt.contains("no HEARTBEAT.md checklist"));
        assert!(!prompt.contains("<checklist>"));
        assert!(prompt.contains("HEARTBEAT_OK"));
    }

    #[tokio::test]
    async fn test_load_checklist_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_checklist(dir.path(), "HEARTBEAT.md").await.is_none());
    }

    #[tokio::test]
    async fn test_ensure_checklist_file_creates_then_noops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("HEARTBEAT.md");

        assert!(ensure_checklist_file(&path).await.unwrap());
        let content = load_checklist(&path.parent().unwrap(), "HEARTBEAT.md")
            .await
            .unwrap();
        assert!(content.contains("Heartbeat Checklist"));

        tokio::fs::write(&path, "custom").await.unwrap();
        assert!(!ensure_checklist_file(&path).await.unwrap());
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "custom");
    }
}
