//! Response extraction and acknowledgment suppression
//!
//! The engine may narrate freely; only the section after the response marker
//! (or the whole text, when no marker is present) is classified. A reply that
//! is just the sentinel, or the sentinel plus a short remark at either end,
//! means "nothing needs attention" and is not surfaced.

/// Decision for one classified response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckDecision {
    pub notify: bool,
    /// Text to deliver when `notify` is set
    pub message: String,
}

/// Pick the user-facing section of a response.
///
/// If `terminal` contains `marker`, everything after its last occurrence is
/// returned. Otherwise the full `accumulated` text is used.
pub fn extract_response(terminal: &str, accumulated: &str, marker: &str) -> String {
    if !marker.is_empty()
        && let Some(idx) = terminal.rfind(marker)
    {
        return terminal[idx + marker.len()..].trim().to_string();
    }
    accumulated.trim().to_string()
}

/// Classify `output` against the acknowledgment sentinel
pub fn classify(output: &str, sentinel: &str, max_ack_chars: usize) -> AckDecision {
    let output = output.trim();

    if sentinel.is_empty() {
        return notify(output);
    }

    if output == sentinel {
        return suppress();
    }

    let remainder = output
        .strip_prefix(sentinel)
        .or_else(|| output.strip_suffix(sentinel))
        .map(str::trim);

    match remainder {
        Some(rest) if rest.chars().count() <= max_ack_chars => suppress(),
        // Sentinel too verbose, embedded mid-text, or absent
        _ => notify(output),
    }
}

fn suppress() -> AckDecision {
    AckDecision {
        notify: false,
        message: String::new(),
    }
}

fn notify(output: &str) -> AckDecision {
    AckDecision {
        notify: true,
        message: output.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: &str = "HEARTBEAT_OK";

    #[test]
    fn test_exact_sentinel_suppressed() {
        let d = classify("HEARTBEAT_OK", SENTINEL, 300);
        assert!(!d.notify);
        let d = classify("  HEARTBEAT_OK\n", SENTINEL, 300);
        assert!(!d.notify);
    }

    #[test]
    fn test_sentinel_prefix_within_threshold() {
        let d = classify("HEARTBEAT_OK all quiet", SENTINEL, 20);
        assert!(!d.notify);
        // remainder is exactly the threshold
        let d = classify("HEARTBEAT_OK 12345", SENTINEL, 5);
        assert!(!d.notify);
    }

    #[test]
    fn test_sentinel_suffix_within_threshold() {
        let d = classify("Checked inbox, nothing new. HEARTBEAT_OK", SENTINEL, 50);
        assert!(!d.notify);
    }

    #[test]
    fn test_sentinel_prefix_over_threshold_notifies_full_text() {
        let text = "HEARTBEAT_OK but the build on main has been red for 3 hours";
        let d = classify(text, SENTINEL, 10);
        assert!(d.notify);
        assert_eq!(d.message, text);
    }

    #[test]
    fn test_sentinel_suffix_over_threshold_notifies_full_text() {
        let text = "Two PRs are waiting for your review. HEARTBEAT_OK";
        let d = classify(text, SENTINEL, 5);
        assert!(d.notify);
        assert_eq!(d.message, text);
    }

    #[test]
    fn test_sentinel_in_middle_notifies_full_text() {
        let text = "Server down. HEARTBEAT_OK was not appropriate here. Please check.";
        let d = classify(text, SENTINEL, 1000);
        assert!(d.notify);
        assert_eq!(d.message, text);
    }

    #[test]
    fn test_no_sentinel_notifies() {
        let d = classify("  Disk usage at 97% on /var  ", SENTINEL, 300);
        assert!(d.notify);
        assert_eq!(d.message, "Disk usage at 97% on /var");
    }

    #[test]
    fn test_threshold_counts_chars_not_bytes() {
        // 4 chars, 12 bytes
        let d = classify("HEARTBEAT_OK ✓✓✓✓", SENTINEL, 4);
        assert!(!d.notify);
    }

    #[test]
    fn test_extract_after_marker() {
        let terminal = "Looked at logs.\n## Response\n  HEARTBEAT_OK  ";
        assert_eq!(
            extract_response(terminal, "ignored", "## Response"),
            "HEARTBEAT_OK"
        );
    }

    #[test]
    fn test_extract_uses_last_marker() {
        let terminal = "## Response draft\nthinking\n## Response\nfinal answer";
        assert_eq!(
            extract_response(terminal, "", "## Response"),
            "final answer"
        );
    }

    #[test]
    fn test_extract_without_marker_uses_accumulated() {
        assert_eq!(
            extract_response("last chunk", "first chunk\nlast chunk\n", "## Response"),
            "first chunk\nlast chunk"
        );
    }
}
